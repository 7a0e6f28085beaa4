//! Activity/event log.
//!
//! Every significant lifecycle or security event becomes a [`LogEntry`].
//! Entries are immutable once appended except for the review flag, which a
//! reviewer clears after inspection. The human-readable message is never
//! stored: [`LogEntry::message`] renders it from the other fields on each read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::merge::MergeBehavior;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Session and user lifecycle markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    SessionOpened,
    SessionClosed,
    Saved,
    LoginSucceeded,
    LoginFailed,
    ImportSucceeded,
    ImportFailed,
    ExportSucceeded,
    ExportFailed,
}

/// What a [`LogEntry`] records.
///
/// Lifecycle markers and auto-save outcomes are separate enumerations; they
/// share no numeric identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum EventType {
    Lifecycle(LifecycleEvent),
    /// Outcome of an auto-save reconciliation.
    AutoSave(MergeBehavior),
    /// A replayed change referenced an item that no longer exists.
    ReplayAnomaly,
}

// ---------------------------------------------------------------------------
// LogEntry
// ---------------------------------------------------------------------------

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    date_time: DateTime<Utc>,
    source: String,
    target: String,
    #[serde(default)]
    data: String,
    event_type: EventType,
    #[serde(default)]
    needs_review: bool,
}

impl LogEntry {
    #[must_use]
    pub fn new(date_time: DateTime<Utc>, event_type: EventType, source: &str, target: &str) -> Self {
        Self {
            date_time,
            source: source.to_string(),
            target: target.to_string(),
            data: String::new(),
            event_type,
            needs_review: false,
        }
    }

    /// Attach free-form event data.
    #[must_use]
    pub fn with_data(mut self, data: &str) -> Self {
        self.data = data.to_string();
        self
    }

    /// Flag the entry for review.
    #[must_use]
    pub const fn flagged(mut self) -> Self {
        self.needs_review = true;
        self
    }

    #[must_use]
    pub const fn date_time(&self) -> DateTime<Utc> {
        self.date_time
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub fn data(&self) -> &str {
        &self.data
    }

    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.event_type
    }

    #[must_use]
    pub const fn needs_review(&self) -> bool {
        self.needs_review
    }

    pub fn set_needs_review(&mut self, needs_review: bool) {
        self.needs_review = needs_review;
    }

    /// Human-readable message, rendered fresh on every call.
    #[must_use]
    pub fn message(&self) -> String {
        render_message(self.event_type, &self.source, &self.target, &self.data)
    }
}

/// Render the message for an event from its parts.
#[must_use]
pub fn render_message(event_type: EventType, source: &str, target: &str, data: &str) -> String {
    match event_type {
        EventType::Lifecycle(event) => match event {
            LifecycleEvent::SessionOpened => format!("{source} opened {target}"),
            LifecycleEvent::SessionClosed => format!("{source} closed {target}"),
            LifecycleEvent::Saved => format!("{source} saved {target}{}", suffix(data)),
            LifecycleEvent::LoginSucceeded => format!("{source} signed in to {target}"),
            LifecycleEvent::LoginFailed => {
                format!("failed sign-in to {target} as {source}{}", suffix(data))
            }
            LifecycleEvent::ImportSucceeded => {
                format!("{source} imported into {target}{}", suffix(data))
            }
            LifecycleEvent::ImportFailed => {
                format!("import into {target} by {source} failed{}", suffix(data))
            }
            LifecycleEvent::ExportSucceeded => {
                format!("{source} exported {target}{}", suffix(data))
            }
            LifecycleEvent::ExportFailed => {
                format!("export of {target} by {source} failed{}", suffix(data))
            }
        },
        EventType::AutoSave(behavior) => {
            format!("auto-save of {target} {}{}", behavior.describe(), suffix(data))
        }
        EventType::ReplayAnomaly => {
            format!("skipped change to missing item {target}{}", suffix(data))
        }
    }
}

fn suffix(data: &str) -> String {
    if data.is_empty() {
        String::new()
    } else {
        format!(" ({data})")
    }
}

// ---------------------------------------------------------------------------
// EventLog
// ---------------------------------------------------------------------------

/// Append-only ordered sequence of [`LogEntry`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventLog {
    entries: Vec<LogEntry>,
}

impl EventLog {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an entry and return its index.
    pub fn append(&mut self, entry: LogEntry) -> usize {
        self.entries.push(entry);
        self.entries.len().saturating_sub(1)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&LogEntry> {
        self.entries.get(index)
    }

    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LogEntry> {
        self.entries.iter()
    }

    /// Entries still waiting for review, in log order.
    pub fn needing_review(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(|e| e.needs_review)
    }

    /// Clear the review flag of one entry. Returns `false` if out of range.
    pub fn mark_reviewed(&mut self, index: usize) -> bool {
        self.entries
            .get_mut(index)
            .map(|entry| entry.needs_review = false)
            .is_some()
    }

    /// Clear every review flag. Returns how many entries were flagged.
    pub fn mark_all_reviewed(&mut self) -> usize {
        let mut cleared = 0usize;
        for entry in self.entries.iter_mut().filter(|e| e.needs_review) {
            entry.needs_review = false;
            cleared = cleared.saturating_add(1);
        }
        cleared
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a LogEntry;
    type IntoIter = std::slice::Iter<'a, LogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn lifecycle_messages() {
        let opened = LogEntry::new(
            at(),
            EventType::Lifecycle(LifecycleEvent::SessionOpened),
            "alice",
            "personal",
        );
        insta::assert_snapshot!(opened.message(), @"alice opened personal");

        let failed = LogEntry::new(
            at(),
            EventType::Lifecycle(LifecycleEvent::ImportFailed),
            "alice",
            "personal",
        )
        .with_data("bad csv header");
        insta::assert_snapshot!(failed.message(), @"import into personal by alice failed (bad csv header)");
    }

    #[test]
    fn auto_save_message_names_the_outcome() {
        let entry = LogEntry::new(
            at(),
            EventType::AutoSave(MergeBehavior::DontMergeAndRemoveAutoSaveFile),
            "keyward",
            "vault",
        )
        .with_data("3 changes");
        insta::assert_snapshot!(entry.message(), @"auto-save of vault discarded and removed (3 changes)");
    }

    #[test]
    fn anomaly_message() {
        let entry = LogEntry::new(at(), EventType::ReplayAnomaly, "auto-save", "id-9")
            .with_data("update pwd");
        insta::assert_snapshot!(entry.message(), @"skipped change to missing item id-9 (update pwd)");
    }

    #[test]
    fn message_is_not_serialized() {
        let entry = LogEntry::new(
            at(),
            EventType::Lifecycle(LifecycleEvent::Saved),
            "alice",
            "personal",
        );
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("message"));
        assert!(json.contains("needsReview"));
    }

    #[test]
    fn review_flags_can_be_cleared() {
        let mut log = EventLog::new();
        log.append(LogEntry::new(at(), EventType::ReplayAnomaly, "a", "x").flagged());
        let idx = log.append(LogEntry::new(at(), EventType::ReplayAnomaly, "a", "y").flagged());
        log.append(LogEntry::new(
            at(),
            EventType::Lifecycle(LifecycleEvent::Saved),
            "a",
            "v",
        ));

        assert_eq!(log.needing_review().count(), 2);
        assert!(log.mark_reviewed(idx));
        assert_eq!(log.needing_review().count(), 1);
        assert_eq!(log.mark_all_reviewed(), 1);
        assert_eq!(log.needing_review().count(), 0);
        assert!(!log.mark_reviewed(99));
    }

    #[test]
    fn event_type_serde_is_tagged() {
        let json = serde_json::to_string(&EventType::AutoSave(
            MergeBehavior::DontMergeAndKeepAutoSaveFile,
        ))
        .unwrap();
        assert_eq!(
            json,
            r#"{"kind":"auto_save","code":"DontMergeAndKeepAutoSaveFile"}"#
        );
        let back: EventType = serde_json::from_str(r#"{"kind":"replay_anomaly"}"#).unwrap();
        assert_eq!(back, EventType::ReplayAnomaly);
    }
}
