//! Field-level change records.
//!
//! A [`ChangeLog`] is the ordered, append-only record of every tracked
//! mutation made during one session. Order is causal order: replaying the
//! log front to back reproduces the session's edits (see [`crate::replay`]).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Change
// ---------------------------------------------------------------------------

/// Kind of mutation a [`Change`] records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Placeholder action; replays as a no-op.
    #[default]
    None,
    /// Create the item (if absent) and set the named field.
    Add,
    /// Set the named field on an existing item.
    Update,
    /// Remove the item.
    Delete,
}

impl ActionType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// One atomic mutation of a named field on an identified item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub action_type: ActionType,
    pub item_id: String,
    #[serde(default)]
    pub field_name: String,
    #[serde(default)]
    pub value: String,
}

impl Change {
    /// `Add(item_id, field_name, value)`.
    #[must_use]
    pub fn add(item_id: &str, field_name: &str, value: &str) -> Self {
        Self {
            action_type: ActionType::Add,
            item_id: item_id.to_string(),
            field_name: field_name.to_string(),
            value: value.to_string(),
        }
    }

    /// `Update(item_id, field_name, value)`.
    #[must_use]
    pub fn update(item_id: &str, field_name: &str, value: &str) -> Self {
        Self {
            action_type: ActionType::Update,
            item_id: item_id.to_string(),
            field_name: field_name.to_string(),
            value: value.to_string(),
        }
    }

    /// `Delete(item_id)`.
    #[must_use]
    pub fn delete(item_id: &str) -> Self {
        Self {
            action_type: ActionType::Delete,
            item_id: item_id.to_string(),
            field_name: String::new(),
            value: String::new(),
        }
    }

    /// Check the shape rules a decoded change must satisfy.
    ///
    /// - every change names an item
    /// - `Update` names a field (`Add` may create a bare item)
    fn check_shape(&self) -> Result<(), &'static str> {
        if self.item_id.is_empty() {
            return Err("empty item id");
        }
        if self.action_type == ActionType::Update && self.field_name.is_empty() {
            return Err("update without a field name");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ChangeLog
// ---------------------------------------------------------------------------

/// Append-only ordered sequence of [`Change`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeLog {
    changes: Vec<Change>,
}

impl ChangeLog {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            changes: Vec::new(),
        }
    }

    /// Append one change at the end of the log.
    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    /// Append every change of `other`, preserving its order.
    pub fn append(&mut self, other: &Self) {
        self.changes.extend(other.changes.iter().cloned());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Change] {
        &self.changes
    }

    /// Drop every change. Used once a log has been folded into a snapshot.
    pub fn clear(&mut self) {
        self.changes.clear();
    }

    /// `(item_id, field_name)` pairs this log writes through `Add`/`Update`.
    #[must_use]
    pub fn touched_fields(&self) -> BTreeSet<(&str, &str)> {
        self.changes
            .iter()
            .filter(|c| matches!(c.action_type, ActionType::Add | ActionType::Update))
            .filter(|c| !c.field_name.is_empty())
            .map(|c| (c.item_id.as_str(), c.field_name.as_str()))
            .collect()
    }

    /// Validate every change against the shape rules.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedChange`] for the first offending change.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (index, change) in self.changes.iter().enumerate() {
            change
                .check_shape()
                .map_err(|reason| CoreError::MalformedChange {
                    index,
                    reason: reason.to_string(),
                })?;
        }
        Ok(())
    }
}

impl From<Vec<Change>> for ChangeLog {
    fn from(changes: Vec<Change>) -> Self {
        Self { changes }
    }
}

impl FromIterator<Change> for ChangeLog {
    fn from_iter<I: IntoIterator<Item = Change>>(iter: I) -> Self {
        Self {
            changes: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ChangeLog {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}
