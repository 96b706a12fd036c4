//! Edit batches and the Mutation Submitter.
//!
//! The visualization surface emits an [`EditBatch`]: nodes it added (with
//! client-temporary ids) and nodes it changed. [`MutationSubmitter`] sends the
//! whole batch as one `POST /api/Persons/Update` and returns the backend's
//! temporary → permanent [`IdMapping`]. Nothing is retried here; the caller
//! decides whether to resubmit.

use indexmap::IndexMap;
use tracing::{info, warn};

use famgraph_types::{FamilyTreeId, Person, PersonId, TransformError, transform_records};

use crate::store::{BatchUpdateRequest, PersonStore, StoreError};

/// A set of add/update operations emitted by one user interaction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EditBatch {
    /// New nodes, carrying client-temporary ids.
    pub add_nodes: Vec<Person>,
    /// Existing nodes with changed fields.
    pub update_nodes: Vec<Person>,
}

impl EditBatch {
    pub fn new(add_nodes: Vec<Person>, update_nodes: Vec<Person>) -> Self {
        Self { add_nodes, update_nodes }
    }

    pub fn is_empty(&self) -> bool {
        self.add_nodes.is_empty() && self.update_nodes.is_empty()
    }

    /// Temporary ids introduced by this batch.
    pub fn temporary_ids(&self) -> impl Iterator<Item = &PersonId> {
        self.add_nodes.iter().map(|p| &p.id)
    }

    /// Parse the surface's `{addNodesData, updateNodesData}` payload.
    ///
    /// Nodes go through the Person Transform; malformed ones are skipped and
    /// returned alongside the batch.
    pub fn from_surface_json(value: &serde_json::Value) -> (Self, Vec<TransformError>) {
        let list = |key: &str| -> Vec<serde_json::Value> {
            value
                .get(key)
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default()
        };
        let (add_nodes, mut errors) = transform_records(list("addNodesData"));
        let (update_nodes, update_errors) = transform_records(list("updateNodesData"));
        errors.extend(update_errors);
        (Self { add_nodes, update_nodes }, errors)
    }
}

/// Temporary id → permanent id, as returned by a successful batch update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdMapping(IndexMap<PersonId, PersonId>);

impl IdMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, temporary: PersonId, permanent: PersonId) {
        self.0.insert(temporary, permanent);
    }

    pub fn get(&self, temporary: &PersonId) -> Option<&PersonId> {
        self.0.get(temporary)
    }

    /// Map `id` through the mapping, or return it unchanged.
    pub fn resolve<'a>(&'a self, id: &'a PersonId) -> &'a PersonId {
        self.0.get(id).unwrap_or(id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PersonId, &PersonId)> {
        self.0.iter()
    }

    /// Parse the batch-update response body.
    ///
    /// The backend contract is still settling, so two shapes are accepted:
    /// an object `{"_ft1": 42}` and a list of pairs
    /// `[{"oldId": "_ft1", "newId": 42}]`. Ids may be strings or numbers.
    /// An empty body (`null`) is an empty mapping.
    pub fn from_wire(value: &serde_json::Value) -> Result<Self, StoreError> {
        let mut mapping = Self::new();
        match value {
            serde_json::Value::Null => {}
            serde_json::Value::Object(map) => {
                for (old, new) in map {
                    let new = PersonId::from_wire(new).ok_or_else(|| {
                        StoreError::Decode(format!("no permanent id for '{}'", old))
                    })?;
                    mapping.insert(PersonId::new(old.as_str()), new);
                }
            }
            serde_json::Value::Array(pairs) => {
                for pair in pairs {
                    let field = |keys: [&str; 2]| {
                        keys.iter().find_map(|k| pair.get(*k)).and_then(PersonId::from_wire)
                    };
                    match (field(["oldId", "OldId"]), field(["newId", "NewId"])) {
                        (Some(old), Some(new)) => mapping.insert(old, new),
                        _ => {
                            return Err(StoreError::Decode(format!(
                                "malformed id pair: {}",
                                pair
                            )));
                        }
                    }
                }
            }
            other => {
                return Err(StoreError::Decode(format!("unexpected id mapping: {}", other)));
            }
        }
        Ok(mapping)
    }
}

impl FromIterator<(PersonId, PersonId)> for IdMapping {
    fn from_iter<I: IntoIterator<Item = (PersonId, PersonId)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// An edit batch the backend refused. The local graph stays untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("edit batch rejected: {message}")]
pub struct MutationFailed {
    pub message: String,
    #[source]
    pub source: StoreError,
}

/// Turns edit batches into backend requests.
pub struct MutationSubmitter<'a, S: PersonStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: PersonStore + ?Sized> MutationSubmitter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Submit `batch` for `family_tree_id` as a single request.
    ///
    /// An empty batch makes no request and yields an empty mapping. Every
    /// temporary id in `add_nodes` is expected in the returned mapping; a
    /// missing one is logged, since the mandatory reload still converges.
    pub async fn submit(
        &self,
        token: &str,
        family_tree_id: &FamilyTreeId,
        batch: &EditBatch,
    ) -> Result<IdMapping, MutationFailed> {
        if batch.is_empty() {
            return Ok(IdMapping::new());
        }

        let request = BatchUpdateRequest {
            family_tree_id: family_tree_id.clone(),
            add_nodes_data: batch.add_nodes.clone(),
            update_nodes_data: batch.update_nodes.clone(),
        };

        info!(
            family_tree = %family_tree_id,
            added = batch.add_nodes.len(),
            updated = batch.update_nodes.len(),
            "submitting edit batch"
        );

        let mapping = self
            .store
            .update_batch(token, &request)
            .await
            .map_err(|source| MutationFailed { message: source.message(), source })?;

        for temporary in batch.temporary_ids() {
            if mapping.get(temporary).is_none() {
                warn!(
                    family_tree = %family_tree_id,
                    "backend returned no permanent id for added node {}",
                    temporary
                );
            }
        }

        Ok(mapping)
    }
}

// ============================================================================
// Tests
// ============================================================================
