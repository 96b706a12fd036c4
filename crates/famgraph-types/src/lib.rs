//! Shared person and graph types for famgraph.
//!
//! This crate is the data foundation: typed ids, the canonical [`Person`],
//! the Person Transform that normalizes raw backend records, and the
//! [`GraphModel`] that holds one family tree in memory. It does no I/O and
//! has **no internal famgraph dependencies**.
//!
//! # Relationship Overview
//!
//! ```text
//! FamilyTree (FamilyTreeId)
//!     └── contains Person (PersonId)
//!             ├── fid  → father (Person)
//!             ├── mid  → mother (Person)
//!             └── pids → partners (Person, symmetric)
//! ```
//!
//! # Key Types
//!
//! |---------------------|--------------------------------------------|
//! | Type                | Purpose                                    |
//! |---------------------|--------------------------------------------|
//! | [`Person`]          | Canonical person (surface node shape)      |
//! | [`RawPersonRecord`] | Backend record, any key casing             |
//! | [`GraphModel`]      | One family tree, lookups + validation      |
//! | [`Violation`]       | Advisory integrity finding                 |
//! | [`PersonId`]        | Permanent or client-temporary person id    |
//! | [`FamilyTreeId`]    | Which family tree                          |
//! | [`UserId`]          | Backend user account                       |
//! |---------------------|--------------------------------------------|

pub mod graph;
pub mod ids;
pub mod person;
pub mod record;

pub use graph::{GraphModel, RelationField, Violation};
pub use ids::{FamilyTreeId, PersonId, UserId};
pub use person::{Gender, Person, PersonDate};
pub use record::{RawPersonRecord, TransformError, transform_record, transform_records};
