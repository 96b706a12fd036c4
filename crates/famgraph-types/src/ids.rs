//! Typed identifiers for persons, family trees, and users.
//!
//! The backend hands out identifiers as JSON numbers on some endpoints and as
//! strings on others. All ID types normalize to a single string form at the
//! deserialization boundary, so the rest of the engine compares strings only.
//!
//! A `PersonId` may be a server-permanent id (`"42"`) or, transiently, a
//! client-temporary id minted by the visualization surface (`"_ft3a"`). The
//! type doesn't distinguish the two; reconciliation is what turns one into
//! the other.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// A person identifier, unique within a family tree.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct PersonId(String);

/// A family tree identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct FamilyTreeId(String);

/// A backend user account identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

/// Wire representation accepted for any identifier field.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

impl IdRepr {
    fn into_text(self) -> String {
        match self {
            IdRepr::Text(s) => s.trim().to_string(),
            IdRepr::Signed(n) => n.to_string(),
            IdRepr::Unsigned(n) => n.to_string(),
        }
    }
}

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_typed_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Wrap an identifier string as-is.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Normalize a JSON value (string or integer) into an id.
            ///
            /// Returns `None` for `null`, empty strings, and non-id types.
            pub fn from_wire(value: &serde_json::Value) -> Option<Self> {
                let repr: IdRepr = serde_json::from_value(value.clone()).ok()?;
                let text = repr.into_text();
                if text.is_empty() { None } else { Some(Self(text)) }
            }

            /// The id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True when the backend would accept this id as an integer key.
            pub fn is_numeric(&self) -> bool {
                self.0.parse::<i64>().is_ok()
            }

            /// JSON form for payloads that want integer keys when possible.
            pub fn to_wire(&self) -> serde_json::Value {
                match self.0.parse::<i64>() {
                    Ok(n) => serde_json::Value::from(n),
                    Err(_) => serde_json::Value::from(self.0.clone()),
                }
            }
        }

        impl<'de> Deserialize<'de> for $T {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                IdRepr::deserialize(deserializer).map(|r| Self(r.into_text()))
            }
        }

        impl From<&str> for $T {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $T {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<i64> for $T {
            fn from(n: i64) -> Self {
                Self(n.to_string())
            }
        }

        impl AsRef<str> for $T {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $T {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $T {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.0)
            }
        }
    };
}

impl_typed_id!(PersonId, "PersonId");
impl_typed_id!(FamilyTreeId, "FamilyTreeId");
impl_typed_id!(UserId, "UserId");

// ============================================================================
// Tests
// ============================================================================
