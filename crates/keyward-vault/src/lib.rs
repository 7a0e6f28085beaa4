//! `keyward-vault`: vault business logic for KEYWARD.
//!
//! Auto-save reconciliation on open, field-level change tracking,
//! persistence of the main store and the auto-save artifact, and
//! warning detection over the reconciled database.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod error;
pub mod store;

pub mod reconcile;

pub mod breach;
pub mod warnings;

pub mod settings;

pub mod session;

pub use breach::{
    check_breaches, never_cancelled, BreachLookup, LeakStatus, LookupError, StaticBreachCorpus,
};
pub use error::VaultError;
pub use reconcile::{
    AcceptProposed, AutoSaveDetection, MergeDecider, ReconcileReport, ReconcileState, Reconciler,
    Workspace, AUTOSAVE_SOURCE,
};
pub use session::{Session, SESSION_SOURCE};
pub use settings::Settings;
pub use store::{
    AutoSaveLock, FileStore, MainStore, VaultStore, AUTOSAVE_FILE, LOCK_FILE, MAIN_FILE,
};
pub use warnings::{Warning, WarningEngine, WarningListener, WarningSet};
