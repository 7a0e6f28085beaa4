//! Replay a [`ChangeLog`] onto a [`Database`].
//!
//! Changes apply strictly in log order, so for one `(item, field)` pair the
//! last write wins, and a `Delete` makes every earlier change to that item
//! irrelevant. A change that targets an item absent at replay time is not
//! an error: it is skipped and reported as an [`Anomaly`].

use crate::change::{ActionType, Change, ChangeLog};
use crate::model::Database;

/// Why a change could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyKind {
    /// The change names an item that does not exist.
    DanglingReference,
}

/// A change that replay skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anomaly {
    /// Position of the change in the replayed log.
    pub index: usize,
    pub change: Change,
    pub kind: AnomalyKind,
}

impl Anomaly {
    /// Short description of the skipped change, e.g. `update password`.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.change.field_name.is_empty() {
            self.change.action_type.as_str().to_string()
        } else {
            format!(
                "{} {}",
                self.change.action_type.as_str(),
                self.change.field_name
            )
        }
    }
}

/// Counters and anomalies from one replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Changes that mutated the database.
    pub applied: usize,
    /// `ActionType::None` entries.
    pub skipped: usize,
    pub anomalies: Vec<Anomaly>,
}

/// Apply every change of `changes` to `db`, in order.
pub fn replay(db: &mut Database, changes: &ChangeLog) -> ReplayOutcome {
    let mut outcome = ReplayOutcome::default();

    for (index, change) in changes.iter().enumerate() {
        let applied = match change.action_type {
            ActionType::None => {
                outcome.skipped = outcome.skipped.saturating_add(1);
                continue;
            }
            ActionType::Add => {
                let item = db.ensure(&change.item_id);
                if !change.field_name.is_empty() {
                    item.set(&change.field_name, &change.value);
                }
                true
            }
            ActionType::Update => db.set_field(&change.item_id, &change.field_name, &change.value),
            ActionType::Delete => db.remove(&change.item_id).is_some(),
        };

        if applied {
            outcome.applied = outcome.applied.saturating_add(1);
        } else {
            outcome.anomalies.push(Anomaly {
                index,
                change: change.clone(),
                kind: AnomalyKind::DanglingReference,
            });
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Item;

    #[test]
    fn add_then_update_keeps_last_value() {
        let mut db = Database::new();
        let log: ChangeLog = vec![
            Change::add("id1", "pwd", "a"),
            Change::update("id1", "pwd", "b"),
        ]
        .into();
        let outcome = replay(&mut db, &log);
        assert_eq!(db.field("id1", "pwd"), Some("b"));
        assert_eq!(outcome.applied, 2);
        assert!(outcome.anomalies.is_empty());
    }

    #[test]
    fn add_then_delete_removes_item() {
        let mut db = Database::new();
        let log: ChangeLog = vec![Change::add("id1", "pwd", "a"), Change::delete("id1")].into();
        replay(&mut db, &log);
        assert!(!db.contains("id1"));
    }

    #[test]
    fn update_after_delete_is_an_anomaly() {
        let mut db = Database::new();
        db.insert(Item::new("id1").with_field("pwd", "a"));
        let log: ChangeLog = vec![Change::delete("id1"), Change::update("id1", "pwd", "z")].into();

        let outcome = replay(&mut db, &log);

        assert!(!db.contains("id1"));
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.anomalies.len(), 1);
        assert_eq!(outcome.anomalies[0].index, 1);
        assert_eq!(outcome.anomalies[0].kind, AnomalyKind::DanglingReference);
        assert_eq!(outcome.anomalies[0].describe(), "update pwd");
    }

    #[test]
    fn delete_of_missing_item_is_an_anomaly() {
        let mut db = Database::new();
        let outcome = replay(&mut db, &vec![Change::delete("gone")].into());
        assert_eq!(outcome.anomalies.len(), 1);
        assert_eq!(outcome.anomalies[0].describe(), "delete");
    }

    #[test]
    fn add_overrides_existing_field() {
        let mut db = Database::new();
        db.insert(Item::new("id1").with_field("pwd", "old").with_field("user", "u"));
        replay(&mut db, &vec![Change::add("id1", "pwd", "new")].into());
        assert_eq!(db.field("id1", "pwd"), Some("new"));
        assert_eq!(db.field("id1", "user"), Some("u"));
    }

    #[test]
    fn none_actions_are_counted_but_ignored() {
        let mut db = Database::new();
        let log: ChangeLog = vec![Change {
            action_type: ActionType::None,
            item_id: "x".into(),
            field_name: "pwd".into(),
            value: "v".into(),
        }]
        .into();
        let outcome = replay(&mut db, &log);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.applied, 0);
        assert!(db.is_empty());
    }
}
