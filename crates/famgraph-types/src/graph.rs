//! The in-memory family graph for the active family tree.
//!
//! `GraphModel` owns every [`Person`] of one family tree, keyed by id and kept
//! in load order. Lookups are pure. [`GraphModel::load`] replaces the whole
//! working set; there is no incremental merge, so entries removed on the
//! backend can't linger here.
//!
//! [`GraphModel::validate`] is advisory: it reports [`Violation`]s and leaves
//! the data alone. A partially inconsistent tree must still be renderable so
//! the user can fix it.

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::warn;

use crate::ids::{FamilyTreeId, PersonId};
use crate::person::{Gender, Person};

/// Which relationship slot holds a reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RelationField {
    Father,
    Mother,
    Partner,
}

impl std::fmt::Display for RelationField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RelationField::Father => "fid",
            RelationField::Mother => "mid",
            RelationField::Partner => "pids",
        })
    }
}

/// A referential-integrity or acyclicity finding.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Hash)]
pub enum Violation {
    /// A `fid`/`mid`/`pids` entry names a person that isn't in the graph.
    #[error("person {person} references missing person {target} via {field}")]
    DanglingReference {
        person: PersonId,
        field: RelationField,
        target: PersonId,
    },
    /// Following `fid`/`mid` links from `person` leads back to `person`.
    #[error("person {person} is their own ancestor")]
    Cycle { person: PersonId },
    /// The same id appeared more than once in the loaded records.
    #[error("duplicate person id {person}")]
    DuplicateId { person: PersonId },
    /// `person` lists `partner`, but `partner` doesn't list `person` back.
    #[error("person {person} lists partner {partner} without a reciprocal entry")]
    AsymmetricPartnership { person: PersonId, partner: PersonId },
    /// A person names themselves as a partner.
    #[error("person {person} lists themselves as a partner")]
    SelfPartner { person: PersonId },
}

/// All persons of one family tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphModel {
    family_tree_id: Option<FamilyTreeId>,
    persons: IndexMap<PersonId, Person>,
    /// Ids seen more than once during the last `load`.
    duplicates: Vec<PersonId>,
}

impl GraphModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a model for `family_tree_id` from `persons`.
    pub fn with_persons(family_tree_id: FamilyTreeId, persons: Vec<Person>) -> Self {
        let mut model = Self::new();
        model.load(family_tree_id, persons);
        model
    }

    /// Replace the entire working set.
    ///
    /// The first occurrence of a duplicated id wins; later ones are dropped
    /// and reported by [`validate`](Self::validate).
    pub fn load(&mut self, family_tree_id: FamilyTreeId, persons: Vec<Person>) {
        self.replace(Some(family_tree_id), persons);
    }

    /// A new model for the same family tree holding `persons`.
    ///
    /// Used to build a rewritten copy that callers swap in whole, so no
    /// reader ever sees a half-applied change.
    pub fn rebuilt(&self, persons: Vec<Person>) -> GraphModel {
        let mut model = GraphModel::new();
        model.replace(self.family_tree_id.clone(), persons);
        model
    }

    fn replace(&mut self, family_tree_id: Option<FamilyTreeId>, persons: Vec<Person>) {
        let mut map = IndexMap::with_capacity(persons.len());
        let mut duplicates = Vec::new();

        for person in persons {
            if map.contains_key(&person.id) {
                warn!(person = %person.id, "duplicate person id in load, keeping first");
                duplicates.push(person.id.clone());
                continue;
            }
            map.insert(person.id.clone(), person);
        }

        self.family_tree_id = family_tree_id;
        self.persons = map;
        self.duplicates = duplicates;
    }

    pub fn family_tree_id(&self) -> Option<&FamilyTreeId> {
        self.family_tree_id.as_ref()
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }

    pub fn contains(&self, id: &PersonId) -> bool {
        self.persons.contains_key(id)
    }

    pub fn get(&self, id: &PersonId) -> Option<&Person> {
        self.persons.get(id)
    }

    /// Persons in load order.
    pub fn iter(&self) -> impl Iterator<Item = &Person> {
        self.persons.values()
    }

    /// Persons whose father or mother is `id`, in load order.
    pub fn children_of(&self, id: &PersonId) -> Vec<&Person> {
        self.persons.values().filter(|p| p.is_child_of(id)).collect()
    }

    /// Resolved father and mother of `id`.
    pub fn parents_of(&self, id: &PersonId) -> Vec<&Person> {
        self.get(id)
            .map(|p| p.parent_ids().filter_map(|pid| self.get(pid)).collect())
            .unwrap_or_default()
    }

    /// Resolved partners of `id`, in `pids` order. Dangling entries are skipped.
    pub fn partners_of(&self, id: &PersonId) -> Vec<&Person> {
        self.get(id)
            .map(|p| p.pids.iter().filter_map(|pid| self.get(pid)).collect())
            .unwrap_or_default()
    }

    /// Male persons other than `exclude`; candidates for a `fid`.
    pub fn father_candidates(&self, exclude: Option<&PersonId>) -> Vec<&Person> {
        self.candidates(Gender::Male, exclude)
    }

    /// Female persons other than `exclude`; candidates for a `mid`.
    pub fn mother_candidates(&self, exclude: Option<&PersonId>) -> Vec<&Person> {
        self.candidates(Gender::Female, exclude)
    }

    fn candidates(&self, gender: Gender, exclude: Option<&PersonId>) -> Vec<&Person> {
        self.persons
            .values()
            .filter(|p| p.gender == Some(gender) && Some(&p.id) != exclude)
            .collect()
    }

    /// Insert or replace a person. Returns the previous value if any.
    pub fn upsert(&mut self, person: Person) -> Option<Person> {
        self.persons.insert(person.id.clone(), person)
    }

    /// Remove a person and strip every reference to them from the others.
    pub fn remove(&mut self, id: &PersonId) -> Option<Person> {
        let removed = self.persons.shift_remove(id)?;
        for other in self.persons.values_mut() {
            other.strip_reference(id);
        }
        Some(removed)
    }

    /// True if chained `fid`/`mid` links starting at `id` reach `id` again.
    pub fn is_own_ancestor(&self, id: &PersonId) -> bool {
        let Some(start) = self.get(id) else {
            return false;
        };
        let mut seen: HashSet<&PersonId> = HashSet::new();
        let mut stack: Vec<&PersonId> = start.parent_ids().collect();

        while let Some(current) = stack.pop() {
            if current == id {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(p) = self.get(current) {
                stack.extend(p.parent_ids());
            }
        }
        false
    }

    /// Check referential integrity, acyclicity, id uniqueness, and
    /// partnership symmetry. Empty result means the graph is consistent.
    pub fn validate(&self) -> Vec<Violation> {
        let mut violations: Vec<Violation> = self
            .duplicates
            .iter()
            .map(|id| Violation::DuplicateId { person: id.clone() })
            .collect();

        for person in self.persons.values() {
            let slots = person
                .fid
                .iter()
                .map(|t| (RelationField::Father, t))
                .chain(person.mid.iter().map(|t| (RelationField::Mother, t)))
                .chain(person.pids.iter().map(|t| (RelationField::Partner, t)));

            for (field, target) in slots {
                if !self.contains(target) {
                    violations.push(Violation::DanglingReference {
                        person: person.id.clone(),
                        field,
                        target: target.clone(),
                    });
                }
            }

            for partner in &person.pids {
                if partner == &person.id {
                    violations.push(Violation::SelfPartner { person: person.id.clone() });
                } else if let Some(other) = self.get(partner)
                    && !other.pids.contains(&person.id)
                {
                    violations.push(Violation::AsymmetricPartnership {
                        person: person.id.clone(),
                        partner: partner.clone(),
                    });
                }
            }

            if self.is_own_ancestor(&person.id) {
                violations.push(Violation::Cycle { person: person.id.clone() });
            }
        }

        violations
    }
}

// ============================================================================
// Tests
// ============================================================================
