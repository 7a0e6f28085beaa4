//! Auto-save merge behaviors and their fixed effects.

use serde::{Deserialize, Serialize};

/// What to do with an auto-save artifact found at open time.
///
/// Exactly four behaviors exist; each maps to one fixed [`MergeEffects`]
/// triple. There is no way to build any other combination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MergeBehavior {
    /// Replay, persist the main store, then remove the artifact.
    #[default]
    MergeAndSaveThenRemoveAutoSaveFile,
    /// Replay in memory only; keep the artifact on disk.
    MergeWithoutSavingAndKeepAutoSaveFile,
    /// Drop the unsaved changes and remove the artifact.
    DontMergeAndRemoveAutoSaveFile,
    /// Ignore the artifact and leave it where it is.
    DontMergeAndKeepAutoSaveFile,
}

/// The effects a [`MergeBehavior`] applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeEffects {
    pub replay: bool,
    pub persist: bool,
    pub remove_artifact: bool,
}

impl MergeBehavior {
    /// Every legal behavior, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::MergeAndSaveThenRemoveAutoSaveFile,
        Self::MergeWithoutSavingAndKeepAutoSaveFile,
        Self::DontMergeAndRemoveAutoSaveFile,
        Self::DontMergeAndKeepAutoSaveFile,
    ];

    #[must_use]
    pub const fn effects(self) -> MergeEffects {
        match self {
            Self::MergeAndSaveThenRemoveAutoSaveFile => MergeEffects {
                replay: true,
                persist: true,
                remove_artifact: true,
            },
            Self::MergeWithoutSavingAndKeepAutoSaveFile => MergeEffects {
                replay: true,
                persist: false,
                remove_artifact: false,
            },
            Self::DontMergeAndRemoveAutoSaveFile => MergeEffects {
                replay: false,
                persist: false,
                remove_artifact: true,
            },
            Self::DontMergeAndKeepAutoSaveFile => MergeEffects {
                replay: false,
                persist: false,
                remove_artifact: false,
            },
        }
    }

    /// Short human-readable description, used in rendered log messages.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::MergeAndSaveThenRemoveAutoSaveFile => "merged, saved and removed",
            Self::MergeWithoutSavingAndKeepAutoSaveFile => "merged without saving, kept",
            Self::DontMergeAndRemoveAutoSaveFile => "discarded and removed",
            Self::DontMergeAndKeepAutoSaveFile => "ignored and kept",
        }
    }
}
