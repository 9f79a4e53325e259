use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

pub const MAX_CATEGORY_BYTES: usize = 255;
pub const MAX_KEY_BYTES: usize = 255;
pub const MAX_VALUE_BYTES: usize = 4096;

/// Id of the page a set of triples was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct OwnerId(pub i64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OwnerId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// One `category|key|value` record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Triple {
    pub category: String,
    pub key: String,
    pub value: String,
}

impl Triple {
    pub fn new(
        category: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    /// Compares on `(category, key)` only; triples that differ only in
    /// value compare equal.
    pub fn compare_key(&self, other: &Self) -> Ordering {
        self.category
            .as_bytes()
            .cmp(other.category.as_bytes())
            .then_with(|| self.key.as_bytes().cmp(other.key.as_bytes()))
    }

    /// Clamps every field to its column limit.
    pub fn clamped(self) -> Self {
        Self {
            category: truncate_to_boundary(self.category, MAX_CATEGORY_BYTES),
            key: truncate_to_boundary(self.key, MAX_KEY_BYTES),
            value: truncate_to_boundary(self.value, MAX_VALUE_BYTES),
        }
    }

    /// The directive that re-embeds this triple in page text.
    pub fn to_directive(&self, marker: &str) -> String {
        format!(
            "{{{{#{marker}: {} | {} | {} }}}}",
            self.category, self.key, self.value
        )
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}->{}={}]", self.category, self.key, self.value)
    }
}

/// A triple annotated with the owner it is persisted under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnedTriple {
    pub owner_id: OwnerId,
    #[serde(flatten)]
    pub triple: Triple,
}

fn truncate_to_boundary(mut value: String, max_bytes: usize) -> String {
    if value.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    value.truncate(cut);
    value
}
