//! `keyward-core`: change log, event log and warning data model for KEYWARD.
//!
//! This crate is the audit target: zero I/O, zero async, zero logging.
//! Everything here is deterministic given its inputs.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod error;

pub mod change;
pub mod event;

pub mod merge;

pub mod options;

pub mod model;

pub mod replay;

pub mod codec;

pub use change::{ActionType, Change, ChangeLog};
pub use codec::{
    decode_auto_save, decode_auto_save_header, deserialize, encode_auto_save, serialize,
    AutoSaveHeader, FORMAT_VERSION, MAGIC,
};
pub use error::CoreError;
pub use event::{render_message, EventLog, EventType, LifecycleEvent, LogEntry};
pub use merge::{MergeBehavior, MergeEffects};
pub use model::{generate_item_id, fields, Account, AccountRef, Database, Item};
pub use options::{AccountOption, AccountOptions, WarningType, WarningTypes};
pub use replay::{replay, Anomaly, AnomalyKind, ReplayOutcome};
