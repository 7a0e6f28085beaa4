//! Auto-save reconciliation.
//!
//! On open, an auto-save artifact left by an interrupted session is folded
//! back into (or discarded from) the main store:
//!
//! ```text
//! NoAutoSave ──► AutoSaveDetected ──► Merging ────┐
//!     │                         └──► Discarding ──┼──► Resolved
//!     └───────────────────────────────────────────┘
//! ```
//!
//! The caller picks the [`MergeBehavior`] through a synchronous
//! [`MergeDecider`] call; no step runs before it answers. Replayed changes
//! always win over what the main store holds, since the artifact can only
//! exist when the previous session never reached a clean save.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use keyward_core::{
    decode_auto_save, decode_auto_save_header, replay, Anomaly, AutoSaveHeader, ChangeLog,
    Database, EventLog, EventType, LogEntry, MergeBehavior,
};

use crate::error::VaultError;
use crate::settings::Settings;
use crate::store::{MainStore, VaultStore};

/// Source recorded on log entries written during reconciliation.
pub const AUTOSAVE_SOURCE: &str = "auto-save";

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Reconciliation lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    NoAutoSave,
    AutoSaveDetected,
    Merging,
    Discarding,
    Resolved,
}

/// What the caller is told when an artifact is found.
#[derive(Debug, Clone)]
pub struct AutoSaveDetection {
    /// Sequence number of the main store on disk.
    pub main_sequence: u64,
    /// Artifact header, or `None` when the header itself is unreadable
    /// (any replaying behavior will then fail with corruption).
    pub header: Option<AutoSaveHeader>,
    /// Behavior the caller gets if it has no opinion.
    pub proposed: MergeBehavior,
}

/// Synchronous request/response step that chooses a [`MergeBehavior`].
pub trait MergeDecider {
    fn decide(&mut self, detection: &AutoSaveDetection) -> MergeBehavior;
}

impl<F> MergeDecider for F
where
    F: FnMut(&AutoSaveDetection) -> MergeBehavior,
{
    fn decide(&mut self, detection: &AutoSaveDetection) -> MergeBehavior {
        self(detection)
    }
}

/// Decider that takes whatever is proposed (the configured default).
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptProposed;

impl MergeDecider for AcceptProposed {
    fn decide(&mut self, detection: &AutoSaveDetection) -> MergeBehavior {
        detection.proposed
    }
}

// ---------------------------------------------------------------------------
// Working state and report
// ---------------------------------------------------------------------------

/// In-memory state of an open vault that reconciliation mutates.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    /// Main store as last loaded or saved.
    pub main: MainStore,
    /// Live database.
    pub db: Database,
    pub events: EventLog,
    /// Changes applied to `db` since `main` was saved.
    pub pending: ChangeLog,
}

impl Workspace {
    /// Materialize a workspace from a loaded main store.
    ///
    /// The tail only holds changes that applied when they were saved, so
    /// an anomaly here is traced but not flagged for review again.
    #[must_use]
    pub fn from_main(main: MainStore) -> Self {
        let (db, outcome) = main.materialize();
        for anomaly in &outcome.anomalies {
            tracing::warn!(
                item = %anomaly.change.item_id,
                index = anomaly.index,
                "main store tail change skipped: item no longer exists"
            );
        }
        let events = main.events.clone();
        Self {
            main,
            db,
            events,
            pending: ChangeLog::new(),
        }
    }
}

/// Result of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Chosen behavior; `None` when no (fresh) artifact was found.
    pub behavior: Option<MergeBehavior>,
    /// Number of artifact changes applied to the database.
    pub replayed: usize,
    /// Artifact changes that targeted missing items.
    pub anomalies: Vec<Anomaly>,
    /// `(item, field)` pairs written by both the main-store tail and the
    /// artifact; the artifact's value won.
    pub overridden: Vec<(String, String)>,
    pub persisted: bool,
    pub artifact_removed: bool,
    /// An artifact older than the main store was found and dropped.
    pub stale_artifact_discarded: bool,
}

impl ReconcileReport {
    const fn empty() -> Self {
        Self {
            behavior: None,
            replayed: 0,
            anomalies: Vec::new(),
            overridden: Vec::new(),
            persisted: false,
            artifact_removed: false,
            stale_artifact_discarded: false,
        }
    }

    /// Whether the artifact from the previous session is still on disk
    /// without its changes having been taken over by this session.
    #[must_use]
    pub fn kept_unmerged_artifact(&self) -> bool {
        self.behavior == Some(MergeBehavior::DontMergeAndKeepAutoSaveFile)
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Drives one store through the reconciliation lifecycle.
pub struct Reconciler<'a, S: VaultStore + ?Sized> {
    store: &'a S,
    settings: &'a Settings,
    state: ReconcileState,
}

impl<'a, S: VaultStore + ?Sized> Reconciler<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S, settings: &'a Settings) -> Self {
        Self {
            store,
            settings,
            state: ReconcileState::NoAutoSave,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ReconcileState {
        self.state
    }

    fn transition(&mut self, next: ReconcileState) {
        tracing::debug!(from = ?self.state, to = ?next, "reconcile state");
        self.state = next;
    }

    /// Run reconciliation to `Resolved`.
    ///
    /// On error nothing from the artifact has been applied to `ws` and the
    /// machine rests in `AutoSaveDetected`; calling `run` again with a
    /// different decision is the retry path.
    ///
    /// # Errors
    ///
    /// - [`VaultError::ArtifactLocked`] if another session holds the artifact.
    /// - [`VaultError::RecoverableCorruption`] if a replaying behavior meets
    ///   an unreadable artifact.
    /// - I/O or store errors from persisting/removing.
    pub fn run(
        &mut self,
        ws: &mut Workspace,
        decider: &mut dyn MergeDecider,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport, VaultError> {
        self.state = ReconcileState::NoAutoSave;
        let _lock = self.store.lock_auto_save(self.settings.stale_lock_after())?;

        let Some(bytes) = self.store.read_auto_save()? else {
            self.transition(ReconcileState::Resolved);
            return Ok(ReconcileReport::empty());
        };

        let header = match decode_auto_save_header(&bytes) {
            Ok(header) => Some(header),
            Err(e) => {
                tracing::warn!("auto-save header unreadable: {e}");
                None
            }
        };

        if let Some(h) = header.as_ref().filter(|h| h.base_sequence < ws.main.sequence) {
            tracing::warn!(
                base_sequence = h.base_sequence,
                main_sequence = ws.main.sequence,
                "discarding auto-save older than the main store"
            );
            self.store.remove_auto_save()?;
            self.transition(ReconcileState::Resolved);
            return Ok(ReconcileReport {
                stale_artifact_discarded: true,
                ..ReconcileReport::empty()
            });
        }

        self.transition(ReconcileState::AutoSaveDetected);
        let detection = AutoSaveDetection {
            main_sequence: ws.main.sequence,
            header,
            proposed: self.settings.default_merge_behavior,
        };
        let behavior = decider.decide(&detection);
        let effects = behavior.effects();
        tracing::info!(?behavior, "auto-save found, behavior chosen");

        let mut report = ReconcileReport {
            behavior: Some(behavior),
            ..ReconcileReport::empty()
        };

        if effects.replay {
            self.transition(ReconcileState::Merging);
            let changes = match decode_auto_save(&bytes) {
                Ok((_, changes)) => changes,
                Err(e) => {
                    self.transition(ReconcileState::AutoSaveDetected);
                    return Err(VaultError::RecoverableCorruption(e.to_string()));
                }
            };

            report.overridden = overlapping_fields(&ws.main.tail, &changes);
            let outcome = replay(&mut ws.db, &changes);
            record_anomalies(&mut ws.events, AUTOSAVE_SOURCE, &outcome.anomalies, now);
            ws.pending.append(&applied_changes(&changes, &outcome.anomalies));

            report.replayed = outcome.applied;
            report.anomalies = outcome.anomalies;
            tracing::info!(
                replayed = report.replayed,
                anomalies = report.anomalies.len(),
                overridden = report.overridden.len(),
                "auto-save replayed"
            );
        } else {
            self.transition(ReconcileState::Discarding);
        }

        let data = detection.header.as_ref().map_or_else(
            || "unreadable artifact".to_string(),
            |h| format!("{} changes", h.entry_count),
        );
        ws.events.append(
            LogEntry::new(now, EventType::AutoSave(behavior), AUTOSAVE_SOURCE, &self.store.name())
                .with_data(&data),
        );

        if effects.persist {
            let next = ws.main.committed(
                &ws.db,
                &ws.pending,
                &ws.events,
                now,
                self.settings.tail_compaction_threshold,
            );
            self.store.save_main(&next)?;
            ws.main = next;
            ws.pending.clear();
            report.persisted = true;
        }

        if effects.remove_artifact {
            self.store.remove_auto_save()?;
            report.artifact_removed = true;
        }

        self.transition(ReconcileState::Resolved);
        Ok(report)
    }
}

/// `(item, field)` pairs both logs write.
fn overlapping_fields(tail: &ChangeLog, artifact: &ChangeLog) -> Vec<(String, String)> {
    let ours: BTreeSet<(&str, &str)> = tail.touched_fields();
    artifact
        .touched_fields()
        .intersection(&ours)
        .map(|(item, field)| ((*item).to_string(), (*field).to_string()))
        .collect()
}

/// The changes of `log` that replay did not skip, in order.
fn applied_changes(log: &ChangeLog, anomalies: &[Anomaly]) -> ChangeLog {
    let skipped: BTreeSet<usize> = anomalies.iter().map(|a| a.index).collect();
    log.iter()
        .enumerate()
        .filter(|(i, _)| !skipped.contains(i))
        .map(|(_, change)| change.clone())
        .collect()
}

fn record_anomalies(events: &mut EventLog, source: &str, anomalies: &[Anomaly], now: DateTime<Utc>) {
    for anomaly in anomalies {
        tracing::warn!(
            item = %anomaly.change.item_id,
            index = anomaly.index,
            source,
            "change skipped: item no longer exists"
        );
        events.append(
            LogEntry::new(now, EventType::ReplayAnomaly, source, &anomaly.change.item_id)
                .with_data(&anomaly.describe())
                .flagged(),
        );
    }
}
