//! Flag sets: per-account options and warning-type filters.
//!
//! Both are small bitsets over a closed enumeration. Individual flags OR
//! together into a set and every bit can be tested on its own.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Account options
// ---------------------------------------------------------------------------

/// Opt-in switches an owner sets on an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountOption {
    /// Remind the owner when the password grows older than the expiry threshold.
    RemindToUpdate,
    /// Warn when the password shows up in a breach corpus.
    WarnIfPasswordLeaked,
}

impl AccountOption {
    pub const ALL: [Self; 2] = [Self::RemindToUpdate, Self::WarnIfPasswordLeaked];

    const fn bit(self) -> u8 {
        match self {
            Self::RemindToUpdate => 0b01,
            Self::WarnIfPasswordLeaked => 0b10,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RemindToUpdate => "remind_to_update",
            Self::WarnIfPasswordLeaked => "warn_if_password_leaked",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.as_str() == name)
    }
}

/// Set of [`AccountOption`] flags. `AccountOptions::NONE` is the empty set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountOptions(u8);

impl AccountOptions {
    pub const NONE: Self = Self(0);

    #[must_use]
    pub const fn contains(self, option: AccountOption) -> bool {
        self.0 & option.bit() != 0
    }

    #[must_use]
    pub const fn with(self, option: AccountOption) -> Self {
        Self(self.0 | option.bit())
    }

    #[must_use]
    pub const fn without(self, option: AccountOption) -> Self {
        Self(self.0 & !option.bit())
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<AccountOption> for AccountOptions {
    fn from(option: AccountOption) -> Self {
        Self(option.bit())
    }
}

impl BitOr for AccountOption {
    type Output = AccountOptions;

    fn bitor(self, rhs: Self) -> AccountOptions {
        AccountOptions(self.bit() | rhs.bit())
    }
}

impl BitOr<AccountOption> for AccountOptions {
    type Output = Self;

    fn bitor(self, rhs: AccountOption) -> Self {
        self.with(rhs)
    }
}

impl BitOrAssign<AccountOption> for AccountOptions {
    fn bitor_assign(&mut self, rhs: AccountOption) {
        *self = self.with(rhs);
    }
}

/// Textual form stored in an item's `options` field: flag names joined by `|`.
impl fmt::Display for AccountOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = AccountOption::ALL
            .iter()
            .filter(|o| self.contains(**o))
            .map(|o| o.as_str())
            .collect();
        f.write_str(&names.join("|"))
    }
}

impl FromStr for AccountOptions {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut options = Self::NONE;
        for name in option_names(s) {
            let option = AccountOption::from_name(name)
                .ok_or_else(|| CoreError::Codec(format!("unknown account option: {name}")))?;
            options |= option;
        }
        Ok(options)
    }
}

impl AccountOptions {
    /// Parse the text form, keeping every recognised flag and ignoring
    /// unknown names.
    #[must_use]
    pub fn parse_lenient(s: &str) -> Self {
        option_names(s)
            .filter_map(AccountOption::from_name)
            .fold(Self::NONE, Self::with)
    }
}

fn option_names(s: &str) -> impl Iterator<Item = &str> {
    s.split('|').map(str::trim).filter(|n| !n.is_empty())
}

// ---------------------------------------------------------------------------
// Warning types
// ---------------------------------------------------------------------------

/// Kind of a detected warning. Each warning carries exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningType {
    ActivityReview,
    PasswordUpdateReminder,
    DuplicatedPasswords,
    PasswordLeaked,
}

impl WarningType {
    pub const ALL: [Self; 4] = [
        Self::ActivityReview,
        Self::PasswordUpdateReminder,
        Self::DuplicatedPasswords,
        Self::PasswordLeaked,
    ];

    const fn bit(self) -> u8 {
        match self {
            Self::ActivityReview => 0b0001,
            Self::PasswordUpdateReminder => 0b0010,
            Self::DuplicatedPasswords => 0b0100,
            Self::PasswordLeaked => 0b1000,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ActivityReview => "activity_review",
            Self::PasswordUpdateReminder => "password_update_reminder",
            Self::DuplicatedPasswords => "duplicated_passwords",
            Self::PasswordLeaked => "password_leaked",
        }
    }
}

/// Set of [`WarningType`]s, used to filter scan results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WarningTypes(u8);

impl WarningTypes {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(0b1111);

    #[must_use]
    pub const fn contains(self, warning_type: WarningType) -> bool {
        self.0 & warning_type.bit() != 0
    }

    #[must_use]
    pub const fn with(self, warning_type: WarningType) -> Self {
        Self(self.0 | warning_type.bit())
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Member types in declaration order.
    pub fn iter(self) -> impl Iterator<Item = WarningType> {
        WarningType::ALL.into_iter().filter(move |t| self.contains(*t))
    }
}

impl From<WarningType> for WarningTypes {
    fn from(warning_type: WarningType) -> Self {
        Self(warning_type.bit())
    }
}

impl BitOr for WarningType {
    type Output = WarningTypes;

    fn bitor(self, rhs: Self) -> WarningTypes {
        WarningTypes(self.bit() | rhs.bit())
    }
}

impl BitOr<WarningType> for WarningTypes {
    type Output = Self;

    fn bitor(self, rhs: WarningType) -> Self {
        self.with(rhs)
    }
}

impl BitOr for WarningTypes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign<WarningType> for WarningTypes {
    fn bitor_assign(&mut self, rhs: WarningType) {
        *self = self.with(rhs);
    }
}
