//! The canonical in-memory person.
//!
//! `Person` is what the graph model stores and what the visualization surface
//! receives. It serializes in the surface's camelCase node shape
//! (`id, name, gender, birthDate, deathDate, fid, mid, pids`) and deserializes
//! through the Person Transform, so any JSON accepted by
//! [`RawPersonRecord`](crate::RawPersonRecord) is accepted here too.

use std::fmt;

use chrono::NaiveDate;
use serde::{Serialize, Serializer};

use crate::ids::PersonId;
use crate::record::RawPersonRecord;

/// Biological gender, used to filter father/mother candidates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    /// Parse `male`/`female` case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A birth or death date as received from the backend.
///
/// Absence is modelled by `Option<PersonDate>`; this type only exists for
/// present values, so an unparseable date never collapses into "absent".
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PersonDate {
    /// A calendar date (time-of-day, if the backend sent one, is dropped).
    Date(NaiveDate),
    /// A present but unparseable value, kept verbatim.
    Unparsed(String),
}

impl PersonDate {
    /// Parse a backend date string.
    ///
    /// Accepts `YYYY-MM-DD` and ISO date-times (`1990-04-01T00:00:00`,
    /// with or without offset). Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let date_part = raw.get(..10).unwrap_or(raw);
        let parsed = NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
            .ok()
            .filter(|_| match raw.get(10..) {
                Some(rest) => rest.is_empty() || rest.starts_with(['T', ' ']),
                None => true,
            });
        Some(match parsed {
            Some(date) => PersonDate::Date(date),
            None => PersonDate::Unparsed(raw.to_string()),
        })
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, PersonDate::Date(_))
    }
}

impl fmt::Display for PersonDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersonDate::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            PersonDate::Unparsed(raw) => f.write_str(raw),
        }
    }
}

impl Serialize for PersonDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A member of a family tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawPersonRecord")]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<PersonDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub death_date: Option<PersonDate>,
    /// Father.
    pub fid: Option<PersonId>,
    /// Mother.
    pub mid: Option<PersonId>,
    /// Partners, ordered, without duplicates.
    pub pids: Vec<PersonId>,
}

impl Person {
    pub fn new(id: impl Into<PersonId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            gender: None,
            birth_date: None,
            death_date: None,
            fid: None,
            mid: None,
            pids: Vec::new(),
        }
    }

    pub fn with_gender(mut self, gender: Gender) -> Self {
        self.gender = Some(gender);
        self
    }

    pub fn with_father(mut self, fid: impl Into<PersonId>) -> Self {
        self.fid = Some(fid.into());
        self
    }

    pub fn with_mother(mut self, mid: impl Into<PersonId>) -> Self {
        self.mid = Some(mid.into());
        self
    }

    /// Add a partner, keeping `pids` free of duplicates.
    pub fn with_partner(mut self, pid: impl Into<PersonId>) -> Self {
        self.add_partner(pid.into());
        self
    }

    pub fn with_birth_date(mut self, raw: &str) -> Self {
        self.birth_date = PersonDate::parse(raw);
        self
    }

    /// Add a partner if not already listed. Returns true if added.
    pub fn add_partner(&mut self, pid: PersonId) -> bool {
        if self.pids.contains(&pid) {
            false
        } else {
            self.pids.push(pid);
            true
        }
    }

    /// Father and mother ids, in that order, skipping absent ones.
    pub fn parent_ids(&self) -> impl Iterator<Item = &PersonId> {
        self.fid.iter().chain(self.mid.iter())
    }

    /// Every id this person references (parents then partners).
    pub fn referenced_ids(&self) -> impl Iterator<Item = &PersonId> {
        self.parent_ids().chain(self.pids.iter())
    }

    /// True if `id` is this person's father or mother.
    pub fn is_child_of(&self, id: &PersonId) -> bool {
        self.fid.as_ref() == Some(id) || self.mid.as_ref() == Some(id)
    }

    /// Remove every reference to `id` from `fid`, `mid` and `pids`.
    ///
    /// Returns true if anything changed.
    pub fn strip_reference(&mut self, id: &PersonId) -> bool {
        let mut changed = false;
        if self.fid.as_ref() == Some(id) {
            self.fid = None;
            changed = true;
        }
        if self.mid.as_ref() == Some(id) {
            self.mid = None;
            changed = true;
        }
        let before = self.pids.len();
        self.pids.retain(|p| p != id);
        changed || self.pids.len() != before
    }
}

// ============================================================================
// Tests
// ============================================================================
