#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! Integration tests for warning scans over an open session.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use keyward_core::{fields, EventType, Item, LifecycleEvent, LogEntry, WarningType};
use keyward_vault::{
    never_cancelled, AcceptProposed, BreachLookup, FileStore, LookupError, Session, Settings,
    StaticBreachCorpus, WarningSet,
};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn session(dir: &TempDir, settings: Settings) -> Session<FileStore> {
    Session::open(FileStore::new(dir.path()), settings, &mut AcceptProposed, t0()).unwrap()
}

fn account(id: &str, password: &str, options: &str) -> Item {
    Item::new(id)
        .with_field(fields::NAME, &id.to_uppercase())
        .with_field(fields::PASSWORD, password)
        .with_field(fields::OPTIONS, options)
}

fn account_ids(set: &WarningSet, warning_type: WarningType) -> Vec<String> {
    set.get(warning_type)
        .and_then(|w| w.accounts())
        .map(|accounts| accounts.iter().map(|a| a.id.clone()).collect())
        .unwrap_or_default()
}

struct NeverAnswers;

#[async_trait]
impl BreachLookup for NeverAnswers {
    async fn is_breached(&self, _password: &str) -> Result<bool, LookupError> {
        std::future::pending::<()>().await;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identical_passwords_without_options_are_duplicates() {
    let dir = TempDir::new().unwrap();
    let mut s = session(&dir, Settings::default());
    s.add_item(account("a", "shared", ""), t0()).unwrap();
    s.add_item(account("b", "shared", ""), t0()).unwrap();
    s.add_item(account("c", "unique", ""), t0()).unwrap();

    let corpus = StaticBreachCorpus::from_passwords(["shared"]);
    let mut delivered = Vec::new();
    let set = s
        .scan_warnings(&corpus, t0(), never_cancelled(), &mut |w: &WarningSet| {
            delivered.push(w.clone());
        })
        .await;

    assert_eq!(account_ids(&set, WarningType::DuplicatedPasswords), ["a", "b"]);
    assert!(!set.contains(WarningType::PasswordLeaked));
    assert_eq!(delivered, vec![set]);
}

#[tokio::test]
async fn opted_in_leaked_accounts_are_reported() {
    let dir = TempDir::new().unwrap();
    let mut s = session(&dir, Settings::default());
    s.add_item(account("a", "hunter2", "warn_if_password_leaked"), t0())
        .unwrap();
    s.add_item(account("b", "correct horse", "warn_if_password_leaked"), t0())
        .unwrap();

    let corpus = StaticBreachCorpus::from_passwords(["hunter2", "123456"]);
    let set = s
        .scan_warnings(&corpus, t0(), never_cancelled(), &mut |_: &WarningSet| {})
        .await;

    assert_eq!(account_ids(&set, WarningType::PasswordLeaked), ["a"]);
    let leaked = set.get(WarningType::PasswordLeaked).unwrap();
    assert_eq!(leaked.accounts().unwrap()[0].name, "A");
}

#[tokio::test(start_paused = true)]
async fn lookup_timeout_never_reports_leaks() {
    let dir = TempDir::new().unwrap();
    let settings = Settings {
        breach_lookup_timeout_ms: 50,
        ..Settings::default()
    };
    let mut s = session(&dir, settings);
    s.add_item(account("a", "hunter2", "warn_if_password_leaked"), t0())
        .unwrap();
    s.add_item(account("b", "hunter2", "warn_if_password_leaked"), t0())
        .unwrap();

    let set = s
        .scan_warnings(&NeverAnswers, t0(), never_cancelled(), &mut |_: &WarningSet| {})
        .await;

    assert!(!set.contains(WarningType::PasswordLeaked));
    // Other rules still run.
    assert!(set.contains(WarningType::DuplicatedPasswords));
}

#[tokio::test]
async fn cancelled_lookup_never_reports_leaks() {
    let dir = TempDir::new().unwrap();
    let mut s = session(&dir, Settings::default());
    s.add_item(account("a", "hunter2", "warn_if_password_leaked"), t0())
        .unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tx.send(()).unwrap();
    let cancel = async move {
        let _ = rx.await;
    };

    let corpus = StaticBreachCorpus::from_passwords(["hunter2"]);
    let set = s
        .scan_warnings(&corpus, t0(), cancel, &mut |_: &WarningSet| {})
        .await;
    assert!(!set.contains(WarningType::PasswordLeaked));
}

#[test]
fn stale_passwords_are_reminded() {
    let dir = TempDir::new().unwrap();
    let settings = Settings {
        password_expiry_days: 30,
        ..Settings::default()
    };
    let mut s = session(&dir, settings);
    s.add_item(account("old", "p1", "remind_to_update"), t0())
        .unwrap();
    s.add_item(account("quiet", "p2", ""), t0()).unwrap();
    s.add_item(account("renewed", "p3", "remind_to_update"), t0())
        .unwrap();
    s.set_field("renewed", fields::PASSWORD, "p3-new", t0() + Duration::days(20))
        .unwrap();

    let set = s.warnings(t0() + Duration::days(31));
    assert_eq!(
        account_ids(&set, WarningType::PasswordUpdateReminder),
        ["old"]
    );

    let set = s.warnings(t0() + Duration::days(29));
    assert!(!set.contains(WarningType::PasswordUpdateReminder));
}

#[test]
fn review_clears_activity_warning() {
    let dir = TempDir::new().unwrap();
    let mut s = session(&dir, Settings::default());
    for source in ["alice", "mallory"] {
        s.log_event(
            LogEntry::new(
                t0(),
                EventType::Lifecycle(LifecycleEvent::LoginFailed),
                source,
                "vault",
            )
            .flagged(),
        );
    }

    let set = s.warnings(t0());
    let review = set.get(WarningType::ActivityReview).unwrap();
    assert_eq!(review.activities().unwrap().len(), 2);
    assert_eq!(set.len(), 1);

    assert_eq!(s.mark_all_reviewed(), 2);
    assert!(s.warnings(t0()).is_empty());
}

#[test]
fn replay_anomalies_surface_for_review() {
    use keyward_core::{encode_auto_save, Change, ChangeLog};
    use keyward_vault::VaultStore;

    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path());
    let log: ChangeLog = vec![Change::update("gone", fields::PASSWORD, "x")].into();
    store
        .write_auto_save(&encode_auto_save(0, t0(), &log).unwrap())
        .unwrap();

    let s = session(&dir, Settings::default());
    let set = s.warnings(t0());
    let review = set.get(WarningType::ActivityReview).unwrap();
    let activities = review.activities().unwrap();
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].event_type(), EventType::ReplayAnomaly);
    assert_eq!(activities[0].target(), "gone");
}

#[tokio::test]
async fn long_lookups_within_deadline_succeed() {
    struct Sluggish(StaticBreachCorpus);

    #[async_trait]
    impl BreachLookup for Sluggish {
        async fn is_breached(&self, password: &str) -> Result<bool, LookupError> {
            tokio::time::sleep(StdDuration::from_millis(5)).await;
            self.0.is_breached(password).await
        }
    }

    let dir = TempDir::new().unwrap();
    let mut s = session(&dir, Settings::default());
    s.add_item(account("a", "hunter2", "warn_if_password_leaked"), t0())
        .unwrap();

    let lookup = Sluggish(StaticBreachCorpus::from_passwords(["hunter2"]));
    let set = s
        .scan_warnings(&lookup, t0(), never_cancelled(), &mut |_: &WarningSet| {})
        .await;
    assert!(set.contains(WarningType::PasswordLeaked));
}
