//! Id Reconciler.
//!
//! After a successful batch update the backend tells us which permanent id
//! each temporary id became. [`reconcile`] rewrites the graph so that no
//! person carries a temporary id, either as its own id or in `fid`, `mid`
//! or `pids`.
//!
//! The rewrite builds a fresh [`GraphModel`]; the controller swaps it in
//! whole. It is a bridge to avoid an identifier flash on screen. The reload
//! that follows is what becomes authoritative.

use tracing::{debug, warn};

use famgraph_types::{GraphModel, Person, PersonId};

use crate::mutation::{EditBatch, IdMapping};

/// Overlay an edit batch onto `graph`, returning the edited copy.
///
/// The surface never applies its own edits (the adapter tells it not to),
/// so this is how added nodes enter the model before their ids are
/// reconciled.
pub fn apply_edits(graph: &GraphModel, batch: &EditBatch) -> GraphModel {
    let mut next = graph.clone();
    for person in batch.add_nodes.iter().chain(batch.update_nodes.iter()) {
        next.upsert(person.clone());
    }
    next
}

/// Rewrite every temporary id in `graph` through `mapping`.
///
/// An empty mapping returns an identical copy. If a permanent id is already
/// present (a reload raced ahead of us), the temporary twin is dropped so the
/// same person never appears twice.
pub fn reconcile(graph: &GraphModel, mapping: &IdMapping) -> GraphModel {
    if mapping.is_empty() {
        return graph.clone();
    }

    let mut persons = Vec::with_capacity(graph.len());
    for person in graph.iter() {
        if let Some(permanent) = mapping.get(&person.id) {
            if graph.contains(permanent) {
                warn!(
                    "permanent id {} already loaded, dropping temporary {}",
                    permanent, person.id
                );
                continue;
            }
            debug!("reconciling {} -> {}", person.id, permanent);
        }
        persons.push(rewrite_person(person, mapping));
    }

    graph.rebuilt(persons)
}

fn rewrite_person(person: &Person, mapping: &IdMapping) -> Person {
    let resolve = |id: &PersonId| mapping.resolve(id).clone();

    let mut pids: Vec<PersonId> = Vec::with_capacity(person.pids.len());
    for pid in person.pids.iter().map(resolve) {
        if !pids.contains(&pid) {
            pids.push(pid);
        }
    }

    Person {
        id: resolve(&person.id),
        fid: person.fid.as_ref().map(resolve),
        mid: person.mid.as_ref().map(resolve),
        pids,
        ..person.clone()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use famgraph_types::FamilyTreeId;

    fn id(s: &str) -> PersonId {
        PersonId::new(s)
    }

    fn base() -> GraphModel {
        GraphModel::with_persons(
            FamilyTreeId::new("1"),
            vec![Person::new("1", "A"), Person::new("2", "B").with_father("1")],
        )
    }

    fn mapping(pairs: &[(&str, &str)]) -> IdMapping {
        pairs.iter().map(|(a, b)| (id(a), id(b))).collect()
    }

    fn mentions(graph: &GraphModel, needle: &PersonId) -> bool {
        graph
            .iter()
            .any(|p| &p.id == needle || p.referenced_ids().any(|r| r == needle))
    }

    #[test]
    fn test_temporary_id_fully_replaced() {
        let batch = EditBatch::new(vec![Person::new("tmp-1", "New").with_father("1")], vec![]);
        let edited = apply_edits(&base(), &batch);
        let reconciled = reconcile(&edited, &mapping(&[("tmp-1", "42")]));

        assert!(!mentions(&reconciled, &id("tmp-1")));
        assert_eq!(reconciled.iter().filter(|p| p.id == "42").count(), 1);
        assert_eq!(reconciled.len(), 3);
    }

    #[test]
    fn test_added_child_keeps_parent_link() {
        let batch = EditBatch::new(vec![Person::new("tmpA", "C").with_father("1")], vec![]);
        let reconciled = reconcile(&apply_edits(&base(), &batch), &mapping(&[("tmpA", "3")]));

        let c = reconciled.get(&id("3")).expect("person 3");
        assert_eq!(c.fid, Some(id("1")));
        assert_eq!(c.name, "C");
        let children: Vec<_> = reconciled.children_of(&id("1")).iter().map(|p| p.id.clone()).collect();
        assert_eq!(children, vec![id("2"), id("3")]);
    }

    #[test]
    fn test_references_in_updated_nodes_rewritten() {
        let batch = EditBatch::new(
            vec![Person::new("_ft1", "Partner").with_partner("1")],
            vec![Person::new("1", "A").with_partner("_ft1")],
        );
        let reconciled = reconcile(&apply_edits(&base(), &batch), &mapping(&[("_ft1", "10")]));

        assert_eq!(reconciled.get(&id("1")).unwrap().pids, vec![id("10")]);
        assert_eq!(reconciled.get(&id("10")).unwrap().pids, vec![id("1")]);
        assert!(reconciled.validate().is_empty());
    }

    #[test]
    fn test_empty_mapping_is_noop() {
        let graph = base();
        assert_eq!(reconcile(&graph, &IdMapping::new()), graph);
    }

    #[test]
    fn test_existing_permanent_id_drops_temporary_twin() {
        let graph = GraphModel::with_persons(
            FamilyTreeId::new("1"),
            vec![
                Person::new("1", "A").with_partner("tmp"),
                Person::new("tmp", "Twin"),
                Person::new("5", "Twin (saved)"),
            ],
        );
        let reconciled = reconcile(&graph, &mapping(&[("tmp", "5")]));

        assert_eq!(reconciled.len(), 2);
        assert_eq!(reconciled.get(&id("5")).unwrap().name, "Twin (saved)");
        assert_eq!(reconciled.get(&id("1")).unwrap().pids, vec![id("5")]);
        assert!(reconciled.validate().iter().all(|v| !matches!(
            v,
            famgraph_types::Violation::DuplicateId { .. }
        )));
    }

    #[test]
    fn test_apply_edits_leaves_source_untouched() {
        let graph = base();
        let batch = EditBatch::new(vec![], vec![Person::new("2", "Renamed")]);
        let edited = apply_edits(&graph, &batch);
        assert_eq!(graph.get(&id("2")).unwrap().name, "B");
        assert_eq!(edited.get(&id("2")).unwrap().name, "Renamed");
    }
}
