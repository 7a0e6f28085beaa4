//! Warning detection.
//!
//! A scan is a full recompute over an immutable snapshot: accounts, the
//! event log, the current time and a breach-lookup result. Nothing here is
//! persisted. Each rule runs independently and contributes at most one
//! [`Warning`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use keyward_core::{
    Account, AccountOption, AccountRef, EventLog, LogEntry, WarningType, WarningTypes,
};

use crate::breach::LeakStatus;

// ---------------------------------------------------------------------------
// Warning
// ---------------------------------------------------------------------------

/// One detected issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// Every log entry still flagged for review.
    ActivityReview { activities: Vec<LogEntry> },
    /// Opted-in accounts whose password is older than the expiry threshold.
    PasswordUpdateReminder { accounts: Vec<AccountRef> },
    /// All members of every group of accounts sharing a password.
    DuplicatedPasswords { accounts: Vec<AccountRef> },
    /// Opted-in accounts whose password the breach lookup reported.
    PasswordLeaked { accounts: Vec<AccountRef> },
}

impl Warning {
    #[must_use]
    pub const fn warning_type(&self) -> WarningType {
        match self {
            Self::ActivityReview { .. } => WarningType::ActivityReview,
            Self::PasswordUpdateReminder { .. } => WarningType::PasswordUpdateReminder,
            Self::DuplicatedPasswords { .. } => WarningType::DuplicatedPasswords,
            Self::PasswordLeaked { .. } => WarningType::PasswordLeaked,
        }
    }

    /// Flagged entries; `Some` only for [`Warning::ActivityReview`].
    #[must_use]
    pub fn activities(&self) -> Option<&[LogEntry]> {
        match self {
            Self::ActivityReview { activities } => Some(activities),
            _ => None,
        }
    }

    /// Affected accounts; `None` for [`Warning::ActivityReview`].
    #[must_use]
    pub fn accounts(&self) -> Option<&[AccountRef]> {
        match self {
            Self::ActivityReview { .. } => None,
            Self::PasswordUpdateReminder { accounts }
            | Self::DuplicatedPasswords { accounts }
            | Self::PasswordLeaked { accounts } => Some(accounts),
        }
    }
}

// ---------------------------------------------------------------------------
// WarningSet
// ---------------------------------------------------------------------------

/// Result of one scan, at most one warning per type, ordered by type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarningSet {
    warnings: Vec<Warning>,
}

impl WarningSet {
    fn from_unordered(mut warnings: Vec<Warning>) -> Self {
        warnings.sort_by_key(Warning::warning_type);
        warnings.dedup_by_key(|w| w.warning_type());
        Self { warnings }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Warning> {
        self.warnings.iter()
    }

    #[must_use]
    pub fn get(&self, warning_type: WarningType) -> Option<&Warning> {
        self.warnings
            .iter()
            .find(|w| w.warning_type() == warning_type)
    }

    #[must_use]
    pub fn contains(&self, warning_type: WarningType) -> bool {
        self.get(warning_type).is_some()
    }

    /// Union of the types present.
    #[must_use]
    pub fn types(&self) -> WarningTypes {
        self.warnings
            .iter()
            .fold(WarningTypes::NONE, |acc, w| acc.with(w.warning_type()))
    }

    /// Keep only warnings whose type is in `mask`.
    #[must_use]
    pub fn filter(&self, mask: WarningTypes) -> Self {
        Self {
            warnings: self
                .warnings
                .iter()
                .filter(|w| mask.contains(w.warning_type()))
                .cloned()
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a WarningSet {
    type Item = &'a Warning;
    type IntoIter = std::slice::Iter<'a, Warning>;

    fn into_iter(self) -> Self::IntoIter {
        self.warnings.iter()
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Receives the result of each scan.
pub trait WarningListener {
    fn on_warnings(&mut self, warnings: &WarningSet);
}

impl<F> WarningListener for F
where
    F: FnMut(&WarningSet),
{
    fn on_warnings(&mut self, warnings: &WarningSet) {
        self(warnings);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Stateless rule set. Time and breach results are passed in per scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarningEngine {
    password_expiry: chrono::Duration,
}

impl WarningEngine {
    #[must_use]
    pub const fn new(password_expiry: chrono::Duration) -> Self {
        Self { password_expiry }
    }

    /// Run every rule over one snapshot.
    #[must_use]
    pub fn scan(
        &self,
        accounts: &[Account],
        events: &EventLog,
        now: DateTime<Utc>,
        leaks: &LeakStatus,
    ) -> WarningSet {
        let warnings = [
            activity_review(events),
            update_reminder(accounts, now, self.password_expiry),
            duplicated_passwords(accounts),
            password_leaked(accounts, leaks),
        ];
        WarningSet::from_unordered(warnings.into_iter().flatten().collect())
    }
}

fn activity_review(events: &EventLog) -> Option<Warning> {
    let activities: Vec<LogEntry> = events.needing_review().cloned().collect();
    (!activities.is_empty()).then_some(Warning::ActivityReview { activities })
}

/// Accounts without a recorded change time are never reminded: their age
/// is unknown.
fn update_reminder(
    accounts: &[Account],
    now: DateTime<Utc>,
    expiry: chrono::Duration,
) -> Option<Warning> {
    let accounts = sorted_refs(accounts.iter().filter(|a| {
        a.options.contains(AccountOption::RemindToUpdate)
            && a
                .password_changed_at
                .is_some_and(|changed| now.signed_duration_since(changed) > expiry)
    }));
    (!accounts.is_empty()).then_some(Warning::PasswordUpdateReminder { accounts })
}

/// Empty passwords are not grouped.
fn duplicated_passwords(accounts: &[Account]) -> Option<Warning> {
    let mut groups: BTreeMap<[u8; 32], Vec<AccountRef>> = BTreeMap::new();
    for account in accounts.iter().filter(|a| !a.password.is_empty()) {
        let digest: [u8; 32] = blake3::hash(account.password.as_bytes()).into();
        groups.entry(digest).or_default().push(account.to_ref());
    }

    let mut shared: Vec<Vec<AccountRef>> = groups
        .into_values()
        .filter(|members| members.len() >= 2)
        .map(|mut members| {
            members.sort();
            members
        })
        .collect();
    // Group order follows the first member, not the digest.
    shared.sort_by(|a, b| a.first().cmp(&b.first()));

    let accounts: Vec<AccountRef> = shared.into_iter().flatten().collect();
    (!accounts.is_empty()).then_some(Warning::DuplicatedPasswords { accounts })
}

fn password_leaked(accounts: &[Account], leaks: &LeakStatus) -> Option<Warning> {
    if matches!(leaks, LeakStatus::Unknown) {
        return None;
    }
    let accounts = sorted_refs(accounts.iter().filter(|a| {
        a.options.contains(AccountOption::WarnIfPasswordLeaked) && leaks.is_leaked(&a.id)
    }));
    (!accounts.is_empty()).then_some(Warning::PasswordLeaked { accounts })
}

fn sorted_refs<'a>(accounts: impl Iterator<Item = &'a Account>) -> Vec<AccountRef> {
    let mut refs: Vec<AccountRef> = accounts.map(Account::to_ref).collect();
    refs.sort();
    refs
}
