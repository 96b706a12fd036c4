//! Person Transform: raw backend records into canonical [`Person`]s.
//!
//! Backend endpoints disagree on casing (`name` vs `Name`) and on id typing
//! (numbers vs strings). All of that is absorbed here, once. Callers never
//! look at raw JSON keys.
//!
//! A record without a usable `id` or `name` is a [`TransformError`]. In a
//! batch ([`transform_records`]) such records are logged and skipped; the
//! rest of the batch still loads.

use serde::Deserialize;
use tracing::warn;

use crate::ids::PersonId;
use crate::person::{Gender, Person, PersonDate};

/// Error produced while transforming a single raw record.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("malformed person record #{index}: {reason}")]
    MalformedRecord { index: usize, reason: String },
}

/// A person record exactly as the backend sent it.
///
/// Every field is optional and accepts camelCase or PascalCase keys.
/// Id-bearing fields keep the raw JSON value until [`Person::try_from`]
/// normalizes them.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawPersonRecord {
    #[serde(default, alias = "Id")]
    pub id: serde_json::Value,
    #[serde(default, alias = "Name")]
    pub name: Option<String>,
    #[serde(default, alias = "Gender")]
    pub gender: serde_json::Value,
    #[serde(default, alias = "birthDate", alias = "BirthDate")]
    pub birth_date: Option<String>,
    #[serde(default, alias = "deathDate", alias = "DeathDate")]
    pub death_date: Option<String>,
    #[serde(default, alias = "Fid")]
    pub fid: serde_json::Value,
    #[serde(default, alias = "Mid")]
    pub mid: serde_json::Value,
    #[serde(default, alias = "Pids")]
    pub pids: Option<Vec<serde_json::Value>>,
}

impl RawPersonRecord {
    /// Parse one JSON object, tolerating either key casing.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

impl TryFrom<RawPersonRecord> for Person {
    type Error = TransformError;

    fn try_from(raw: RawPersonRecord) -> Result<Self, Self::Error> {
        transform_record(0, raw)
    }
}

/// Transform one raw record; `index` is only used for error reporting.
pub fn transform_record(index: usize, raw: RawPersonRecord) -> Result<Person, TransformError> {
    let id = PersonId::from_wire(&raw.id).ok_or_else(|| TransformError::MalformedRecord {
        index,
        reason: "missing id".to_string(),
    })?;

    let name = raw
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| TransformError::MalformedRecord {
            index,
            reason: format!("person {} has no name", id),
        })?;

    let gender = parse_gender(&raw.gender).unwrap_or_else(|unknown| {
        warn!(person = %id, gender = %unknown, "unrecognized gender, leaving unset");
        None
    });

    let mut pids: Vec<PersonId> = Vec::new();
    for pid in raw.pids.unwrap_or_default().iter().filter_map(PersonId::from_wire) {
        if !pids.contains(&pid) {
            pids.push(pid);
        }
    }

    Ok(Person {
        id,
        name,
        gender,
        birth_date: raw.birth_date.as_deref().and_then(PersonDate::parse),
        death_date: raw.death_date.as_deref().and_then(PersonDate::parse),
        fid: PersonId::from_wire(&raw.fid),
        mid: PersonId::from_wire(&raw.mid),
        pids,
    })
}

/// Read a raw `gender` value. Null and blank are absent; anything that is
/// not a recognized gender string comes back as `Err` with its JSON text.
fn parse_gender(value: &serde_json::Value) -> Result<Option<Gender>, String> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(g) if g.trim().is_empty() => Ok(None),
        serde_json::Value::String(g) => Gender::parse(g.trim()).map(Some).ok_or_else(|| g.clone()),
        other => Err(other.to_string()),
    }
}

/// Transform a batch of raw JSON records.
///
/// Malformed records are logged at `warn` and skipped. The returned errors
/// let callers surface how many records were dropped.
pub fn transform_records(
    values: impl IntoIterator<Item = serde_json::Value>,
) -> (Vec<Person>, Vec<TransformError>) {
    let mut persons = Vec::new();
    let mut errors = Vec::new();

    for (index, value) in values.into_iter().enumerate() {
        let result = RawPersonRecord::from_value(value)
            .map_err(|e| TransformError::MalformedRecord {
                index,
                reason: e.to_string(),
            })
            .and_then(|raw| transform_record(index, raw));

        match result {
            Ok(person) => persons.push(person),
            Err(e) => {
                warn!("skipping record: {}", e);
                errors.push(e);
            }
        }
    }

    (persons, errors)
}

// ============================================================================
// Tests
// ============================================================================
