//! In-memory credential database: items, fields and the account view.
//!
//! Items are bags of named string fields. An item that carries a
//! [`fields::PASSWORD`] field is an *account*; [`Database::accounts`]
//! projects those into typed [`Account`] values for warning detection.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::options::AccountOptions;

/// Well-known field names.
pub mod fields {
    pub const NAME: &str = "name";
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    /// RFC 3339 timestamp of the last password change.
    pub const PASSWORD_CHANGED_AT: &str = "passwordChangedAt";
    /// [`AccountOptions`](crate::AccountOptions) in textual form.
    pub const OPTIONS: &str = "options";
}

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// A stored record: an id plus named string fields.
///
/// Field values are zeroized when the item is dropped.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    id: String,
    fields: BTreeMap<String, String>,
}

impl Item {
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.set(name, value);
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Set a field, returning the previous value if it differed.
    pub fn set(&mut self, name: &str, value: &str) -> Option<String> {
        match self.fields.get_mut(name) {
            Some(existing) if existing == value => None,
            Some(existing) => Some(std::mem::replace(existing, value.to_string())),
            None => {
                self.fields.insert(name.to_string(), value.to_string());
                None
            }
        }
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl Drop for Item {
    fn drop(&mut self) {
        for value in self.fields.values_mut() {
            value.zeroize();
        }
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("id", &self.id)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// All items of one vault, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Database {
    items: BTreeMap<String, Item>,
}

impl Database {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Item> {
        self.items.get(id)
    }

    /// Insert or replace an item, returning the replaced one.
    pub fn insert(&mut self, item: Item) -> Option<Item> {
        self.items.insert(item.id.clone(), item)
    }

    /// Get the item with `id`, creating an empty one if absent.
    pub fn ensure(&mut self, id: &str) -> &mut Item {
        self.items
            .entry(id.to_string())
            .or_insert_with(|| Item::new(id))
    }

    pub fn remove(&mut self, id: &str) -> Option<Item> {
        self.items.remove(id)
    }

    #[must_use]
    pub fn field(&self, id: &str, name: &str) -> Option<&str> {
        self.items.get(id).and_then(|item| item.get(name))
    }

    /// Set a field on an existing item. Returns `false` if the item is absent.
    pub fn set_field(&mut self, id: &str, name: &str, value: &str) -> bool {
        self.items
            .get_mut(id)
            .map(|item| {
                item.set(name, value);
            })
            .is_some()
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    /// Typed view of every item carrying a password, ordered by id.
    #[must_use]
    pub fn accounts(&self) -> Vec<Account> {
        self.items.values().filter_map(Account::from_item).collect()
    }
}

// ---------------------------------------------------------------------------
// Account view
// ---------------------------------------------------------------------------

/// Secret-free reference to an account, carried by warnings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountRef {
    pub id: String,
    pub name: String,
}

/// Snapshot of an account as the warning engine sees it.
#[derive(Clone)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub password: Zeroizing<String>,
    /// `None` when the item has no (or an unparsable) change timestamp.
    pub password_changed_at: Option<DateTime<Utc>>,
    pub options: AccountOptions,
}

impl Account {
    /// Project an item into an account. Returns `None` when it has no password.
    ///
    /// An unparsable timestamp reads as absent; unknown option names are
    /// dropped while recognised ones are kept.
    #[must_use]
    pub fn from_item(item: &Item) -> Option<Self> {
        let password = item.get(fields::PASSWORD)?;
        let password_changed_at = item
            .get(fields::PASSWORD_CHANGED_AT)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let options = item
            .get(fields::OPTIONS)
            .map(AccountOptions::parse_lenient)
            .unwrap_or_default();
        Some(Self {
            id: item.id.clone(),
            name: item.get(fields::NAME).unwrap_or(&item.id).to_string(),
            password: Zeroizing::new(password.to_string()),
            password_changed_at,
            options,
        })
    }

    #[must_use]
    pub fn to_ref(&self) -> AccountRef {
        AccountRef {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("password", &"***")
            .field("password_changed_at", &self.password_changed_at)
            .field("options", &self.options)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

/// Generate a random RFC 4122 version 4 id for a new item.
#[must_use]
pub fn generate_item_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);

    bytes[6] = (bytes[6] & 0x0F) | 0x40; // version 4
    bytes[8] = (bytes[8] & 0x3F) | 0x80; // variant 1

    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        bytes[6], bytes[7],
        bytes[8], bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    )
}
