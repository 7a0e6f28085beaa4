//! Open vault session.
//!
//! A [`Session`] exists only after auto-save reconciliation has resolved,
//! so nothing can read the database while it is still being merged. Edits
//! are recorded as [`Change`]s; `flush_auto_save` writes them to the
//! artifact and `save` folds them into the main store.

use std::future::Future;

use chrono::{DateTime, Utc};
use keyward_core::{
    encode_auto_save, fields, Change, Database, EventLog, EventType, Item, LifecycleEvent,
    LogEntry,
};
use zeroize::Zeroizing;

use crate::breach::{check_breaches, BreachLookup, LeakStatus};
use crate::error::VaultError;
use crate::reconcile::{MergeDecider, ReconcileReport, Reconciler, Workspace};
use crate::settings::Settings;
use crate::store::VaultStore;
use crate::warnings::{WarningEngine, WarningListener, WarningSet};

/// Source recorded on lifecycle entries written by the session.
pub const SESSION_SOURCE: &str = "session";

/// One open vault.
pub struct Session<S: VaultStore> {
    store: S,
    settings: Settings,
    ws: Workspace,
    report: ReconcileReport,
    /// Set while a foreign artifact was kept unmerged; flushing would
    /// overwrite it.
    auto_save_suppressed: bool,
}

impl<S: VaultStore> Session<S> {
    /// Load the vault and reconcile any auto-save artifact.
    ///
    /// A vault that has never been saved opens empty.
    ///
    /// # Errors
    ///
    /// - [`VaultError::RecoverableCorruption`]: open again with a decider
    ///   that answers a `DontMerge…` behavior.
    /// - [`VaultError::ArtifactLocked`] if another session is reconciling.
    /// - [`VaultError::NullPayload`] or store errors if the main store is unreadable.
    pub fn open(
        store: S,
        settings: Settings,
        decider: &mut dyn MergeDecider,
        now: DateTime<Utc>,
    ) -> Result<Self, VaultError> {
        let main = store.load_main()?.unwrap_or_default();
        let mut ws = Workspace::from_main(main);
        ws.events.append(LogEntry::new(
            now,
            EventType::Lifecycle(LifecycleEvent::SessionOpened),
            SESSION_SOURCE,
            &store.name(),
        ));

        let report = Reconciler::new(&store, &settings).run(&mut ws, decider, now)?;
        tracing::info!(
            vault = %store.name(),
            sequence = ws.main.sequence,
            items = ws.db.len(),
            "session opened"
        );

        Ok(Self {
            auto_save_suppressed: report.kept_unmerged_artifact(),
            store,
            settings,
            ws,
            report,
        })
    }

    // -- Accessors --------------------------------------------------------

    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.ws.db
    }

    #[must_use]
    pub const fn events(&self) -> &EventLog {
        &self.ws.events
    }

    /// What reconciliation did when this session opened.
    #[must_use]
    pub const fn reconcile_report(&self) -> &ReconcileReport {
        &self.report
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Main-store sequence number this session is based on.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.ws.main.sequence
    }

    /// Whether database edits are waiting for a clean save.
    #[must_use]
    pub fn has_unsaved_changes(&self) -> bool {
        !self.ws.pending.is_empty()
    }

    // -- Edits ------------------------------------------------------------

    /// Insert a new item, recording one `Add` per field.
    ///
    /// An item with a password but no change time is stamped with `now`.
    ///
    /// # Errors
    ///
    /// [`VaultError::ItemExists`] if the id is taken.
    pub fn add_item(&mut self, mut item: Item, now: DateTime<Utc>) -> Result<(), VaultError> {
        let id = item.id().to_string();
        if self.ws.db.contains(&id) {
            return Err(VaultError::ItemExists(id));
        }
        if item.get(fields::PASSWORD).is_some() && item.get(fields::PASSWORD_CHANGED_AT).is_none()
        {
            item.set(fields::PASSWORD_CHANGED_AT, &now.to_rfc3339());
        }

        let mut changes: Vec<Change> = item
            .field_names()
            .map(|name| Change::add(&id, name, item.get(name).unwrap_or_default()))
            .collect();
        if changes.is_empty() {
            changes.push(Change::add(&id, "", ""));
        }

        self.ws.db.insert(item);
        for change in changes {
            self.ws.pending.push(change);
        }
        tracing::debug!(item = %id, "item added");
        Ok(())
    }

    /// Set one field. Setting the password also stamps its change time.
    ///
    /// Writing the value a field already holds records nothing.
    ///
    /// # Errors
    ///
    /// [`VaultError::ItemNotFound`] if no item has this id.
    pub fn set_field(
        &mut self,
        id: &str,
        name: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<(), VaultError> {
        if !self.ws.db.contains(id) {
            return Err(VaultError::ItemNotFound(id.to_string()));
        }
        if self.ws.db.field(id, name) == Some(value) {
            return Ok(());
        }

        self.record_update(id, name, value);
        if name == fields::PASSWORD {
            self.record_update(id, fields::PASSWORD_CHANGED_AT, &now.to_rfc3339());
        }
        Ok(())
    }

    fn record_update(&mut self, id: &str, name: &str, value: &str) {
        self.ws.db.set_field(id, name, value);
        self.ws.pending.push(Change::update(id, name, value));
    }

    /// Remove an item.
    ///
    /// # Errors
    ///
    /// [`VaultError::ItemNotFound`] if no item has this id.
    pub fn delete_item(&mut self, id: &str) -> Result<(), VaultError> {
        if self.ws.db.remove(id).is_none() {
            return Err(VaultError::ItemNotFound(id.to_string()));
        }
        self.ws.pending.push(Change::delete(id));
        tracing::debug!(item = %id, "item deleted");
        Ok(())
    }

    // -- Event log --------------------------------------------------------

    /// Append an entry, returning its index.
    pub fn log_event(&mut self, entry: LogEntry) -> usize {
        self.ws.events.append(entry)
    }

    /// Clear the review flag of one entry. `false` if out of range.
    pub fn mark_reviewed(&mut self, index: usize) -> bool {
        self.ws.events.mark_reviewed(index)
    }

    /// Clear every review flag, returning how many were set.
    pub fn mark_all_reviewed(&mut self) -> usize {
        self.ws.events.mark_all_reviewed()
    }

    // -- Persistence ------------------------------------------------------

    /// Write all unsaved changes to the auto-save artifact.
    ///
    /// Returns `false` when nothing was written: no unsaved changes, or a
    /// kept artifact from an earlier session must not be overwritten.
    ///
    /// # Errors
    ///
    /// Codec or I/O errors from writing the artifact.
    pub fn flush_auto_save(&mut self, now: DateTime<Utc>) -> Result<bool, VaultError> {
        if self.auto_save_suppressed {
            tracing::debug!("auto-save suppressed: unmerged artifact kept on disk");
            return Ok(false);
        }
        if self.ws.pending.is_empty() {
            return Ok(false);
        }

        let bytes = Zeroizing::new(encode_auto_save(
            self.ws.main.sequence,
            now,
            &self.ws.pending,
        )?);
        self.store.write_auto_save(&bytes)?;
        tracing::debug!(changes = self.ws.pending.len(), "auto-save written");
        Ok(true)
    }

    /// Clean save: fold unsaved changes into the main store, bump the
    /// sequence and remove this session's artifact.
    ///
    /// A kept unmerged artifact is left on disk; it is older than the main
    /// store from here on and the next open discards it.
    ///
    /// # Errors
    ///
    /// Store or I/O errors. On failure the session state is unchanged.
    pub fn save(&mut self, now: DateTime<Utc>) -> Result<(), VaultError> {
        let mut events = self.ws.events.clone();
        events.append(
            LogEntry::new(
                now,
                EventType::Lifecycle(LifecycleEvent::Saved),
                SESSION_SOURCE,
                &self.store.name(),
            )
            .with_data(&format!("{} changes", self.ws.pending.len())),
        );

        let next = self.ws.main.committed(
            &self.ws.db,
            &self.ws.pending,
            &events,
            now,
            self.settings.tail_compaction_threshold,
        );
        self.store.save_main(&next)?;

        if self.auto_save_suppressed {
            tracing::warn!("kept auto-save is now older than the main store");
        } else {
            self.store.remove_auto_save()?;
        }

        tracing::info!(
            sequence = next.sequence,
            changes = self.ws.pending.len(),
            tail = next.tail.len(),
            "vault saved"
        );
        self.ws.main = next;
        self.ws.events = events;
        self.ws.pending.clear();
        self.auto_save_suppressed = false;
        Ok(())
    }

    /// End the session without a clean save.
    ///
    /// Unsaved changes are flushed to the artifact so the next open can
    /// offer them back.
    ///
    /// # Errors
    ///
    /// Errors from the final flush.
    pub fn close(mut self, now: DateTime<Utc>) -> Result<(), VaultError> {
        let name = self.store.name();
        self.ws.events.append(LogEntry::new(
            now,
            EventType::Lifecycle(LifecycleEvent::SessionClosed),
            SESSION_SOURCE,
            &name,
        ));
        let flushed = self.flush_auto_save(now)?;
        tracing::info!(vault = %name, flushed, "session closed");
        Ok(())
    }

    // -- Warnings ---------------------------------------------------------

    /// Scan without a breach lookup; the leaked-password rule is skipped.
    #[must_use]
    pub fn warnings(&self, now: DateTime<Utc>) -> WarningSet {
        self.engine()
            .scan(&self.ws.db.accounts(), &self.ws.events, now, &LeakStatus::Unknown)
    }

    /// Full scan: breach lookup under the configured timeout, then every
    /// rule. The result is handed to `listener` and returned.
    pub async fn scan_warnings<L, C>(
        &self,
        lookup: &L,
        now: DateTime<Utc>,
        cancel: C,
        listener: &mut dyn WarningListener,
    ) -> WarningSet
    where
        L: BreachLookup + ?Sized,
        C: Future<Output = ()>,
    {
        let accounts = self.ws.db.accounts();
        let leaks = check_breaches(
            lookup,
            &accounts,
            self.settings.breach_lookup_timeout(),
            cancel,
        )
        .await;
        let set = self.engine().scan(&accounts, &self.ws.events, now, &leaks);
        tracing::info!(warnings = set.len(), "warning scan complete");
        listener.on_warnings(&set);
        set
    }

    fn engine(&self) -> WarningEngine {
        WarningEngine::new(self.settings.password_expiry())
    }
}
