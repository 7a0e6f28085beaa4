//! Persistence collaborator: main store, auto-save artifact, artifact lock.
//!
//! Three files live in a vault directory:
//!
//! - `vault.json`: the main store: database snapshot, trailing change log,
//!   event log and the save sequence number
//! - `vault.autosave`: the auto-save artifact (see [`keyward_core::codec`])
//! - `vault.autosave.lock`: exclusive marker held while an artifact is reconciled
//!
//! Encryption of these files is the caller's concern; this layer only
//! frames and moves bytes.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use keyward_core::{replay, ChangeLog, Database, EventLog, ReplayOutcome};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::VaultError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Main store file name.
pub const MAIN_FILE: &str = "vault.json";

/// Auto-save artifact file name.
pub const AUTOSAVE_FILE: &str = "vault.autosave";

/// Artifact lock file name.
pub const LOCK_FILE: &str = "vault.autosave.lock";

// ---------------------------------------------------------------------------
// Main store record
// ---------------------------------------------------------------------------

/// Persisted form of the main store.
///
/// The live database is `snapshot` with `tail` replayed on top. `sequence`
/// increments on every clean save and serves as the recency marker that
/// auto-save artifacts are compared against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainStore {
    pub sequence: u64,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    pub snapshot: Database,
    #[serde(default)]
    pub tail: ChangeLog,
    #[serde(default)]
    pub events: EventLog,
}

impl MainStore {
    /// Build the live database: snapshot plus the replayed tail.
    #[must_use]
    pub fn materialize(&self) -> (Database, ReplayOutcome) {
        let mut db = self.snapshot.clone();
        let outcome = replay(&mut db, &self.tail);
        (db, outcome)
    }

    /// The record the next clean save writes.
    ///
    /// `db` must be the materialized state with `pending` already applied.
    /// When the combined tail grows past `compaction_threshold` it is folded
    /// into a fresh snapshot.
    #[must_use]
    pub fn committed(
        &self,
        db: &Database,
        pending: &ChangeLog,
        events: &EventLog,
        now: DateTime<Utc>,
        compaction_threshold: usize,
    ) -> Self {
        let mut next = self.clone();
        next.tail.append(pending);
        if next.tail.len() > compaction_threshold {
            next.snapshot = db.clone();
            next.tail.clear();
        }
        next.events = events.clone();
        next.sequence = self.sequence.saturating_add(1);
        next.saved_at = Some(now);
        next
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Durable storage for one vault.
pub trait VaultStore {
    /// Display name of the vault, used as the target of log entries.
    fn name(&self) -> String;

    /// Load the main store. `Ok(None)` when the vault has never been saved.
    ///
    /// # Errors
    ///
    /// [`VaultError::NullPayload`] for an empty record, other variants for
    /// unreadable files.
    fn load_main(&self) -> Result<Option<MainStore>, VaultError>;

    /// Atomically replace the main store.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError`] if encoding or the write fails.
    fn save_main(&self, main: &MainStore) -> Result<(), VaultError>;

    /// Raw artifact bytes, if an artifact exists.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Io`] if the artifact exists but cannot be read.
    fn read_auto_save(&self) -> Result<Option<Vec<u8>>, VaultError>;

    /// Atomically replace the artifact.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Io`] on write failure.
    fn write_auto_save(&self, bytes: &[u8]) -> Result<(), VaultError>;

    /// Remove the artifact. Removing a missing artifact is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Io`] on removal failure.
    fn remove_auto_save(&self) -> Result<(), VaultError>;

    /// Take exclusive ownership of the artifact for reconciliation.
    ///
    /// A lock older than `stale_after` is treated as abandoned and broken.
    ///
    /// # Errors
    ///
    /// [`VaultError::ArtifactLocked`] if another live session holds it.
    fn lock_auto_save(&self, stale_after: chrono::Duration) -> Result<AutoSaveLock, VaultError>;
}

// ---------------------------------------------------------------------------
// Artifact lock
// ---------------------------------------------------------------------------

/// Contents of the lock marker file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockMarker {
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Held artifact lock; the marker file is removed on drop.
#[derive(Debug)]
pub struct AutoSaveLock {
    path: PathBuf,
    holder: String,
}

impl AutoSaveLock {
    /// Random id written into the marker for this holder.
    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }
}

impl Drop for AutoSaveLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), "failed to release auto-save lock: {e}");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// [`VaultStore`] backed by a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn main_path(&self) -> PathBuf {
        self.dir.join(MAIN_FILE)
    }

    #[must_use]
    pub fn auto_save_path(&self) -> PathBuf {
        self.dir.join(AUTOSAVE_FILE)
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    fn try_create_lock(&self) -> Result<Option<AutoSaveLock>, VaultError> {
        let path = self.lock_path();
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let marker = LockMarker {
            holder: random_holder_id(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let lock = AutoSaveLock {
            path,
            holder: marker.holder.clone(),
        };
        // From here on, dropping `lock` cleans the marker up on failure.
        file.write_all(&keyward_core::serialize(&marker)?)?;
        file.sync_all()?;
        Ok(Some(lock))
    }

    /// Age of the existing lock file, from its modification time.
    fn lock_age(&self) -> Option<chrono::Duration> {
        let modified = fs::metadata(self.lock_path()).ok()?.modified().ok()?;
        let modified: DateTime<Utc> = modified.into();
        Some(Utc::now().signed_duration_since(modified))
    }

    fn lock_holder(&self) -> String {
        fs::read(self.lock_path())
            .ok()
            .and_then(|bytes| keyward_core::deserialize::<LockMarker>(&bytes).ok())
            .map_or_else(
                || "an unknown session".to_string(),
                |m| format!("{} (pid {})", m.holder, m.pid),
            )
    }
}

impl VaultStore for FileStore {
    fn name(&self) -> String {
        self.dir
            .file_name()
            .map_or_else(|| "vault".to_string(), |n| n.to_string_lossy().into_owned())
    }

    fn load_main(&self) -> Result<Option<MainStore>, VaultError> {
        let bytes = match fs::read(self.main_path()) {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let main: MainStore = keyward_core::deserialize(&bytes)?;
        Ok(Some(main))
    }

    fn save_main(&self, main: &MainStore) -> Result<(), VaultError> {
        let bytes = Zeroizing::new(keyward_core::serialize(main)?);
        atomic_write(&self.dir, MAIN_FILE, &bytes)?;
        tracing::debug!(sequence = main.sequence, bytes = bytes.len(), "main store written");
        Ok(())
    }

    fn read_auto_save(&self) -> Result<Option<Vec<u8>>, VaultError> {
        match fs::read(self.auto_save_path()) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_auto_save(&self, bytes: &[u8]) -> Result<(), VaultError> {
        atomic_write(&self.dir, AUTOSAVE_FILE, bytes)?;
        Ok(())
    }

    fn remove_auto_save(&self) -> Result<(), VaultError> {
        match fs::remove_file(self.auto_save_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn lock_auto_save(&self, stale_after: chrono::Duration) -> Result<AutoSaveLock, VaultError> {
        if let Some(lock) = self.try_create_lock()? {
            return Ok(lock);
        }

        let holder = self.lock_holder();
        match self.lock_age() {
            Some(age) if age >= stale_after => {
                tracing::warn!(
                    holder = %holder,
                    age_secs = age.num_seconds(),
                    "breaking abandoned auto-save lock"
                );
                match fs::remove_file(self.lock_path()) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                self.try_create_lock()?
                    .ok_or(VaultError::ArtifactLocked { holder })
            }
            _ => Err(VaultError::ArtifactLocked { holder }),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Write `{dir}/{name}` via a hidden tmp file and a rename.
fn atomic_write(dir: &Path, name: &str, bytes: &[u8]) -> std::io::Result<()> {
    let path = dir.join(name);
    let tmp = dir.join(format!(".{name}.tmp"));

    fs::write(&tmp, bytes)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
    }

    fs::rename(&tmp, &path)
}

fn random_holder_id() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    let hex = blake3::hash(&bytes).to_hex();
    hex.as_str()[..16].to_string()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
