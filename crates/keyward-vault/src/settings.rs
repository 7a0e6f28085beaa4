//! Vault settings, stored as plain JSON next to the vault files.
//!
//! Tunables for warning detection and auto-save handling. Every field has a
//! default, so a partial or missing file still yields a usable value.

use std::fs;
use std::path::Path;
use std::time::Duration;

use keyward_core::MergeBehavior;
use serde::{Deserialize, Serialize};

// ── Settings ───────────────────────────────────────────────────────

/// Vault settings.
///
/// Persisted to `{data_dir}/settings.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Password age (days) after which a `RemindToUpdate` account is flagged.
    #[serde(default = "default_password_expiry_days")]
    pub password_expiry_days: u32,

    /// Upper bound for one breach-lookup pass, in milliseconds.
    #[serde(default = "default_breach_lookup_timeout_ms")]
    pub breach_lookup_timeout_ms: u64,

    /// Behavior proposed to the merge decider when an auto-save is found.
    #[serde(default)]
    pub default_merge_behavior: MergeBehavior,

    /// Trailing change-log length above which a save folds the tail into
    /// the snapshot.
    #[serde(default = "default_tail_compaction_threshold")]
    pub tail_compaction_threshold: usize,

    /// Seconds after which an auto-save lock is considered abandoned.
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            password_expiry_days: default_password_expiry_days(),
            breach_lookup_timeout_ms: default_breach_lookup_timeout_ms(),
            default_merge_behavior: MergeBehavior::default(),
            tail_compaction_threshold: default_tail_compaction_threshold(),
            stale_lock_secs: default_stale_lock_secs(),
        }
    }
}

const fn default_password_expiry_days() -> u32 {
    180
}
const fn default_breach_lookup_timeout_ms() -> u64 {
    5_000
}
const fn default_tail_compaction_threshold() -> usize {
    256
}
const fn default_stale_lock_secs() -> u64 {
    300
}

impl Settings {
    /// Password expiry threshold as a calendar duration.
    #[must_use]
    pub fn password_expiry(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.password_expiry_days))
    }

    #[must_use]
    pub const fn breach_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.breach_lookup_timeout_ms)
    }

    #[must_use]
    pub fn stale_lock_after(&self) -> chrono::Duration {
        let capped = self.stale_lock_secs.min(u64::from(u32::MAX));
        chrono::Duration::seconds(i64::try_from(capped).unwrap_or(i64::from(u32::MAX)))
    }
}

// ── File I/O ───────────────────────────────────────────────────────

const SETTINGS_FILE: &str = "settings.json";

impl Settings {
    /// Load settings from `{data_dir}/settings.json`.
    ///
    /// Returns [`Default::default()`] when the file is missing or
    /// contains invalid JSON.
    #[must_use]
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(SETTINGS_FILE);
        fs::read_to_string(&path).map_or_else(
            |_| Self::default(),
            |contents| {
                serde_json::from_str(&contents).unwrap_or_else(|e| {
                    tracing::warn!(path = %path.display(), "unreadable settings, using defaults: {e}");
                    Self::default()
                })
            },
        )
    }

    /// Persist settings to `{data_dir}/settings.json` (tmp file + rename).
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if the directory does not exist or the
    /// file system rejects the write/rename.
    pub fn save(&self, data_dir: &Path) -> std::io::Result<()> {
        let path = data_dir.join(SETTINGS_FILE);
        let tmp = data_dir.join(".settings.json.tmp");

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        fs::write(&tmp, &json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&tmp, &path)?;

        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_values_are_correct() {
        let settings = Settings::default();
        assert_eq!(settings.password_expiry_days, 180);
        assert_eq!(settings.breach_lookup_timeout_ms, 5_000);
        assert_eq!(
            settings.default_merge_behavior,
            MergeBehavior::MergeAndSaveThenRemoveAutoSaveFile
        );
        assert_eq!(settings.tail_compaction_threshold, 256);
        assert_eq!(settings.stale_lock_secs, 300);
    }

    #[test]
    fn durations_follow_fields() {
        let settings = Settings {
            password_expiry_days: 30,
            breach_lookup_timeout_ms: 250,
            ..Settings::default()
        };
        assert_eq!(settings.password_expiry(), chrono::Duration::days(30));
        assert_eq!(settings.breach_lookup_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn load_returns_default_on_missing_file() {
        let dir = TempDir::new().unwrap();
        assert_eq!(Settings::load(dir.path()), Settings::default());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            password_expiry_days: 90,
            default_merge_behavior: MergeBehavior::DontMergeAndKeepAutoSaveFile,
            ..Settings::default()
        };

        settings.save(dir.path()).unwrap();
        assert_eq!(Settings::load(dir.path()), settings);
        assert!(!dir.path().join(".settings.json.tmp").exists());
    }

    #[test]
    fn load_recovers_from_corrupt_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SETTINGS_FILE), "{ nope }}}").unwrap();
        assert_eq!(Settings::load(dir.path()), Settings::default());
    }

    #[test]
    fn load_handles_partial_json_with_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"passwordExpiryDays":45}"#,
        )
        .unwrap();

        let settings = Settings::load(dir.path());
        assert_eq!(settings.password_expiry_days, 45);
        assert_eq!(settings.breach_lookup_timeout_ms, 5_000);
        assert_eq!(settings.default_merge_behavior, MergeBehavior::default());
    }

    #[cfg(unix)]
    #[test]
    fn save_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        Settings::default().save(dir.path()).unwrap();

        let mode = fs::metadata(dir.path().join(SETTINGS_FILE))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn serde_uses_camel_case() {
        let json = serde_json::to_string(&Settings::default()).unwrap();
        assert!(json.contains("passwordExpiryDays"));
        assert!(json.contains("breachLookupTimeoutMs"));
        assert!(json.contains("defaultMergeBehavior"));
        assert!(!json.contains("password_expiry_days"));
    }
}
