//! End-to-end sync cycle against an in-memory backend and a headless surface.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use async_trait::async_trait;

use famgraph_client::{
    AddPartnerRequest, BatchUpdateRequest, ContainerHandle, CreatePersonRequest,
    CreatePersonResponse, EditBatch, FamilyTreeMember, FamilyTreeSummary, HeadlessSurfaceFactory,
    IdMapping,
    NewFamilyTree, PersonDraft, PersonStore, Session, StoreError, SurfaceEvent, SurfaceOptions,
    SyncController, SyncError, SyncState, UpdatePersonRequest,
};
use famgraph_types::{FamilyTreeId, Gender, Person, PersonId, UserId};

// ============================================================================
// Fake backend
// ============================================================================

type Hook = Box<dyn FnMut(&str)>;

/// Backend that assigns sequential permanent ids and cascades deletes.
struct FakeStore {
    trees: RefCell<HashMap<FamilyTreeId, Vec<Person>>>,
    next_id: Cell<u64>,
    list_calls: Cell<usize>,
    batches: RefCell<Vec<BatchUpdateRequest>>,
    reject_batches: Cell<bool>,
    /// Called with the operation name before each request is served.
    hook: RefCell<Option<Hook>>,
}

impl FakeStore {
    fn new(next_id: u64) -> Self {
        Self {
            trees: RefCell::new(HashMap::new()),
            next_id: Cell::new(next_id),
            list_calls: Cell::new(0),
            batches: RefCell::new(Vec::new()),
            reject_batches: Cell::new(false),
            hook: RefCell::new(None),
        }
    }

    fn with_tree(self, id: &str, persons: Vec<Person>) -> Self {
        self.trees.borrow_mut().insert(FamilyTreeId::new(id), persons);
        self
    }

    fn set_hook(&self, hook: impl FnMut(&str) + 'static) {
        *self.hook.borrow_mut() = Some(Box::new(hook));
    }

    fn call(&self, op: &str) {
        if let Some(hook) = self.hook.borrow_mut().as_mut() {
            hook(op);
        }
    }

    fn allocate(&self) -> PersonId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        PersonId::from(id as i64)
    }

    fn upsert(&self, tree: &FamilyTreeId, person: Person) {
        let mut trees = self.trees.borrow_mut();
        let persons = trees.entry(tree.clone()).or_default();
        match persons.iter_mut().find(|p| p.id == person.id) {
            Some(existing) => *existing = person,
            None => persons.push(person),
        }
    }

    fn with_person(&self, id: &PersonId, f: impl FnOnce(&mut Person)) -> Result<(), StoreError> {
        let mut trees = self.trees.borrow_mut();
        let person = trees
            .values_mut()
            .flat_map(|persons| persons.iter_mut())
            .find(|p| &p.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        f(person);
        Ok(())
    }
}

#[async_trait(?Send)]
impl PersonStore for FakeStore {
    async fn list_persons(
        &self,
        _token: &str,
        family_tree_id: &FamilyTreeId,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        self.call("list_persons");
        self.list_calls.set(self.list_calls.get() + 1);
        let trees = self.trees.borrow();
        let persons = trees
            .get(family_tree_id)
            .ok_or_else(|| StoreError::NotFound(family_tree_id.to_string()))?;
        Ok(persons.iter().map(|p| serde_json::to_value(p).unwrap()).collect())
    }

    async fn get_person(&self, _token: &str, id: &PersonId) -> Result<serde_json::Value, StoreError> {
        self.call("get_person");
        let trees = self.trees.borrow();
        trees
            .values()
            .flatten()
            .find(|p| &p.id == id)
            .map(|p| serde_json::to_value(p).unwrap())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn create_person(
        &self,
        _token: &str,
        request: &CreatePersonRequest,
    ) -> Result<CreatePersonResponse, StoreError> {
        self.call("create_person");
        let id = self.allocate();
        let mut person = Person::new(id.clone(), request.name.clone()).with_gender(request.gender);
        person.fid = request.fid.clone();
        person.mid = request.mid.clone();
        self.upsert(&request.family_tree_id, person);
        Ok(CreatePersonResponse { success: true, message: None, id: id.to_wire() })
    }

    async fn update_batch(
        &self,
        _token: &str,
        request: &BatchUpdateRequest,
    ) -> Result<IdMapping, StoreError> {
        self.call("update_batch");
        self.batches.borrow_mut().push(request.clone());
        if self.reject_batches.get() {
            return Err(StoreError::Status { status: 400, message: "Fid does not exist".into() });
        }

        let mapping: IdMapping = request
            .add_nodes_data
            .iter()
            .map(|p| (p.id.clone(), self.allocate()))
            .collect();
        let rewrite = |p: &Person| {
            let mut p = p.clone();
            p.id = mapping.resolve(&p.id).clone();
            p.fid = p.fid.as_ref().map(|id| mapping.resolve(id).clone());
            p.mid = p.mid.as_ref().map(|id| mapping.resolve(id).clone());
            p.pids = p.pids.iter().map(|id| mapping.resolve(id).clone()).collect();
            p
        };
        for person in request.add_nodes_data.iter().chain(&request.update_nodes_data) {
            self.upsert(&request.family_tree_id, rewrite(person));
        }
        Ok(mapping)
    }

    async fn update_person(
        &self,
        _token: &str,
        id: &PersonId,
        request: &UpdatePersonRequest,
    ) -> Result<(), StoreError> {
        self.call("update_person");
        self.with_person(id, |p| {
            p.name = request.name.clone();
            p.gender = request.gender;
            p.fid = PersonId::from_wire(&request.fid);
            p.mid = PersonId::from_wire(&request.mid);
        })
    }

    async fn delete_person(&self, _token: &str, id: &PersonId) -> Result<(), StoreError> {
        self.call("delete_person");
        let mut trees = self.trees.borrow_mut();
        let mut found = false;
        for persons in trees.values_mut() {
            let before = persons.len();
            persons.retain(|p| &p.id != id);
            found |= persons.len() != before;
            for p in persons.iter_mut() {
                p.strip_reference(id);
            }
        }
        if found { Ok(()) } else { Err(StoreError::NotFound(id.to_string())) }
    }

    async fn add_partner(
        &self,
        _token: &str,
        id: &PersonId,
        request: &AddPartnerRequest,
    ) -> Result<(), StoreError> {
        self.call("add_partner");
        let partner = PersonId::from_wire(&request.partner_id)
            .ok_or_else(|| StoreError::Status { status: 400, message: "partnerId".into() })?;
        self.with_person(id, |p| {
            p.add_partner(partner.clone());
        })?;
        self.with_person(&partner, |p| {
            p.add_partner(id.clone());
        })
    }

    async fn list_family_trees(
        &self,
        _token: &str,
        _user_id: &str,
    ) -> Result<Vec<FamilyTreeSummary>, StoreError> {
        self.call("list_family_trees");
        let mut ids: Vec<_> = self.trees.borrow().keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids
            .into_iter()
            .map(|id| FamilyTreeSummary { id, last_name: Some("Curie".into()), description: None })
            .collect())
    }

    async fn create_family_tree(&self, _token: &str, _request: &NewFamilyTree) -> Result<(), StoreError> {
        self.call("create_family_tree");
        Ok(())
    }

    async fn list_family_tree_users(
        &self,
        _token: &str,
        family_tree_id: &FamilyTreeId,
    ) -> Result<Vec<FamilyTreeMember>, StoreError> {
        self.call("list_family_tree_users");
        if !self.trees.borrow().contains_key(family_tree_id) {
            return Err(StoreError::NotFound(family_tree_id.to_string()));
        }
        Ok(vec![FamilyTreeMember {
            id: Some(UserId::new("u1")),
            first_name: Some("Marie".into()),
            last_name: Some("Curie".into()),
            ..Default::default()
        }])
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn id(s: &str) -> PersonId {
    PersonId::new(s)
}

fn tree(s: &str) -> FamilyTreeId {
    FamilyTreeId::new(s)
}

fn two_generations() -> Vec<Person> {
    vec![Person::new("1", "A"), Person::new("2", "B").with_father("1")]
}

fn harness(store: FakeStore, session: Session) -> (SyncController<FakeStore>, HeadlessSurfaceFactory) {
    let factory = HeadlessSurfaceFactory::new();
    let controller = SyncController::new(
        store,
        session,
        Box::new(factory.clone()),
        ContainerHandle::new("tree"),
        SurfaceOptions::default(),
    );
    (controller, factory)
}

fn signed_in() -> Session {
    let session = Session::with_token("t0ken");
    session.set_user_id(Some("u1".into()));
    session
}

fn ids_of(persons: &[&Person]) -> Vec<PersonId> {
    persons.iter().map(|p| p.id.clone()).collect()
}

// ============================================================================
// Loading
// ============================================================================

#[tokio::test]
async fn load_exposes_children() {
    let store = FakeStore::new(3).with_tree("1", two_generations());
    let (mut c, factory) = harness(store, signed_in());

    c.select_family_tree(tree("1")).await.unwrap();

    assert_eq!(c.state(), &SyncState::Ready);
    assert_eq!(ids_of(&c.graph().children_of(&id("1"))), vec![id("2")]);
    assert_eq!(factory.live_count(), 1);
    assert_eq!(factory.live_nodes().unwrap().len(), 2);
}

#[tokio::test]
async fn reload_is_idempotent() {
    let store = FakeStore::new(3).with_tree("1", two_generations());
    let (mut c, factory) = harness(store, signed_in());

    c.select_family_tree(tree("1")).await.unwrap();
    let first = c.graph();
    c.load().await.unwrap();

    assert_eq!(*first, *c.graph());
    assert_eq!(factory.live_count(), 1);
}

#[tokio::test]
async fn missing_token_sends_nothing() {
    let store = FakeStore::new(3).with_tree("1", two_generations());
    let (mut c, factory) = harness(store, Session::new());

    let err = c.select_family_tree(tree("1")).await.unwrap_err();

    assert_eq!(err, SyncError::AuthMissing);
    assert_eq!(c.store().list_calls.get(), 0);
    assert_eq!(factory.live_count(), 0);
}

#[tokio::test]
async fn stale_load_result_is_discarded() {
    let store = FakeStore::new(3)
        .with_tree("1", two_generations())
        .with_tree("2", vec![Person::new("9", "Z")]);
    let session = signed_in();
    let switcher = session.clone();
    let switched = Rc::new(Cell::new(false));
    let flag = Rc::clone(&switched);
    store.set_hook(move |op| {
        if op == "list_persons" && !flag.get() {
            flag.set(true);
            switcher.select_family_tree(tree("2"));
        }
    });
    let (mut c, factory) = harness(store, session);

    c.select_family_tree(tree("1")).await.unwrap();

    assert!(switched.get());
    assert_eq!(c.store().list_calls.get(), 2);
    assert_eq!(c.graph().family_tree_id(), Some(&tree("2")));
    assert!(!c.graph().contains(&id("1")));
    // tree 1 was never bound
    assert_eq!(factory.events(), vec![SurfaceEvent::Created { instance: 1, nodes: 1 }]);
}

#[tokio::test]
async fn failed_switch_drops_previous_tree() {
    let store = FakeStore::new(3).with_tree("1", two_generations());
    let (mut c, factory) = harness(store, signed_in());
    c.select_family_tree(tree("1")).await.unwrap();

    let err = c.select_family_tree(tree("77")).await.unwrap_err();

    assert_eq!(err, SyncError::NotFound("77".into()));
    assert_eq!(c.session().family_tree_id(), Some(tree("77")));
    assert!(c.graph().is_empty());
    assert_eq!(c.graph().family_tree_id(), None);
    assert!(c.warnings().is_empty());
    assert!(matches!(c.state(), SyncState::Error { stale: false, .. }));
    assert_eq!(factory.live_count(), 0);
}

#[tokio::test]
async fn detached_delete_binds_nothing() {
    let store = FakeStore::new(3).with_tree("1", two_generations());
    let (mut c, factory) = harness(store, signed_in());
    c.select_family_tree(tree("1")).await.unwrap();

    c.detach();
    c.delete_person(&id("2")).await.unwrap();

    assert_eq!(factory.live_count(), 0);
    assert!(!c.adapter().edits_enabled());
    assert!(!c.graph().contains(&id("2")));
    assert_eq!(c.state(), &SyncState::Ready);

    c.attach(ContainerHandle::new("tree")).unwrap();
    assert_eq!(factory.live_count(), 1);
    assert_eq!(factory.live_nodes().unwrap().len(), 1);
    assert!(c.adapter().edits_enabled());
}

#[tokio::test]
async fn clearing_selection_unbinds() {
    let store = FakeStore::new(3).with_tree("1", two_generations());
    let (mut c, factory) = harness(store, signed_in());

    c.select_family_tree(tree("1")).await.unwrap();
    c.clear_selection();

    assert_eq!(c.state(), &SyncState::Idle);
    assert!(c.graph().is_empty());
    assert_eq!(factory.live_count(), 0);
    assert_eq!(c.session().family_tree_id(), None);
}

// ============================================================================
// Edits
// ============================================================================

#[tokio::test]
async fn surface_edit_is_reconciled_and_reloaded() {
    let store = FakeStore::new(3).with_tree("1", two_generations());
    let (mut c, factory) = harness(store, signed_in());
    c.select_family_tree(tree("1")).await.unwrap();

    let batch = EditBatch::new(vec![Person::new("tmpA", "C").with_father("1")], vec![]);
    assert_eq!(factory.emit(batch), Some(false));
    assert_eq!(c.process_pending_edits().await.unwrap(), 1);

    let graph = c.graph();
    let added = graph.get(&id("3")).expect("permanent id assigned");
    assert_eq!(added.fid, Some(id("1")));
    assert!(graph.get(&id("tmpA")).is_none());
    assert!(graph.iter().all(|p| p.referenced_ids().all(|r| r != "tmpA")));
    assert_eq!(c.state(), &SyncState::Ready);

    // initial load + mandatory reload
    assert_eq!(c.store().list_calls.get(), 2);
    assert_eq!(c.store().batches.borrow().len(), 1);
    assert_eq!(
        factory.events(),
        vec![
            SurfaceEvent::Created { instance: 1, nodes: 2 },
            SurfaceEvent::IdsReplaced { instance: 1, count: 1 },
            SurfaceEvent::Destroyed { instance: 1 },
            SurfaceEvent::Created { instance: 2, nodes: 3 },
        ]
    );
}

#[tokio::test]
async fn handle_edit_returns_mapping() {
    let store = FakeStore::new(10).with_tree("1", two_generations());
    let (mut c, _factory) = harness(store, signed_in());
    c.select_family_tree(tree("1")).await.unwrap();

    let batch = EditBatch::new(
        vec![Person::new("_ft1", "P").with_partner("2")],
        vec![Person::new("2", "B").with_father("1").with_partner("_ft1")],
    );
    let mapping = c.handle_edit(batch).await.unwrap();

    assert_eq!(mapping.get(&id("_ft1")), Some(&id("10")));
    let graph = c.graph();
    assert_eq!(graph.get(&id("2")).unwrap().pids, vec![id("10")]);
    assert_eq!(ids_of(&graph.partners_of(&id("10"))), vec![id("2")]);
    assert!(c.warnings().is_empty());
}

#[tokio::test]
async fn rejected_batch_leaves_graph_untouched() {
    let store = FakeStore::new(3).with_tree("1", two_generations());
    store.reject_batches.set(true);
    let (mut c, _factory) = harness(store, signed_in());
    c.select_family_tree(tree("1")).await.unwrap();
    let before = c.graph();

    let batch = EditBatch::new(vec![Person::new("tmpA", "C").with_father("404")], vec![]);
    let err = c.handle_edit(batch.clone()).await.unwrap_err();

    assert_eq!(err, SyncError::MutationFailed { message: "Fid does not exist".into() });
    assert!(Rc::ptr_eq(&before, &c.graph()));
    assert!(matches!(c.state(), SyncState::Error { stale: true, .. }));
    assert_eq!(c.store().list_calls.get(), 1);

    // no second submission until the error is cleared
    assert_eq!(c.handle_edit(batch).await, Err(SyncError::Busy { state: "error" }));
    assert_eq!(c.store().batches.borrow().len(), 1);

    c.store().reject_batches.set(false);
    c.retry().await.unwrap();
    assert!(c.state().is_ready());
}

#[tokio::test]
async fn edits_emitted_mid_submit_are_rejected() {
    let store = FakeStore::new(3).with_tree("1", two_generations());
    let (mut c, factory) = harness(store, signed_in());
    c.select_family_tree(tree("1")).await.unwrap();

    let emitter = factory.clone();
    let answers = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&answers);
    c.store().set_hook(move |op| {
        if op == "update_batch" {
            let late = EditBatch::new(vec![Person::new("tmpB", "D")], vec![]);
            sink.borrow_mut().push(emitter.emit(late));
        }
    });

    let batch = EditBatch::new(vec![Person::new("tmpA", "C").with_father("1")], vec![]);
    assert_eq!(factory.emit(batch), Some(false));
    assert_eq!(c.process_pending_edits().await.unwrap(), 1);

    assert_eq!(answers.borrow().as_slice(), &[Some(false)]);
    assert_eq!(c.process_pending_edits().await.unwrap(), 0);
    assert_eq!(c.store().batches.borrow().len(), 1);
    assert!(!c.graph().contains(&id("tmpB")));
}

#[tokio::test]
async fn selection_switch_during_submit_is_not_reconciled() {
    let store = FakeStore::new(3)
        .with_tree("1", two_generations())
        .with_tree("2", vec![Person::new("9", "Z")]);
    let session = signed_in();
    let switcher = session.clone();
    store.set_hook(move |op| {
        if op == "update_batch" {
            switcher.select_family_tree(tree("2"));
        }
    });
    let (mut c, factory) = harness(store, session);
    c.select_family_tree(tree("1")).await.unwrap();

    let batch = EditBatch::new(vec![Person::new("tmpA", "C").with_father("1")], vec![]);
    let mapping = c.handle_edit(batch).await.unwrap();

    // the backend still answered for tree 1
    assert_eq!(mapping.get(&id("tmpA")), Some(&id("3")));

    let graph = c.graph();
    assert_eq!(c.state(), &SyncState::Ready);
    assert_eq!(graph.family_tree_id(), Some(&tree("2")));
    assert_eq!(ids_of(&graph.iter().collect::<Vec<_>>()), vec![id("9")]);
    assert!(!factory.events().iter().any(|e| matches!(e, SurfaceEvent::IdsReplaced { .. })));
    assert_eq!(factory.live_count(), 1);
    assert_eq!(factory.live_nodes().unwrap().len(), 1);
}

#[tokio::test]
async fn selection_switch_during_delete_keeps_new_tree() {
    let store = FakeStore::new(3)
        .with_tree("1", two_generations())
        .with_tree("2", vec![Person::new("9", "Z")]);
    let session = signed_in();
    let switcher = session.clone();
    store.set_hook(move |op| {
        if op == "delete_person" {
            switcher.select_family_tree(tree("2"));
        }
    });
    let (mut c, _factory) = harness(store, session);
    c.select_family_tree(tree("1")).await.unwrap();

    c.delete_person(&id("2")).await.unwrap();

    let graph = c.graph();
    assert_eq!(graph.family_tree_id(), Some(&tree("2")));
    assert!(graph.contains(&id("9")));
    assert!(!graph.contains(&id("1")));
    assert_eq!(c.state(), &SyncState::Ready);
    assert_eq!(c.store().list_calls.get(), 2);
}

// ============================================================================
// Forms
// ============================================================================

#[tokio::test]
async fn delete_strips_partner_reference() {
    let store = FakeStore::new(3).with_tree(
        "1",
        vec![
            Person::new("1", "A").with_partner("2"),
            Person::new("2", "B").with_partner("1"),
        ],
    );
    let (mut c, _factory) = harness(store, signed_in());
    c.select_family_tree(tree("1")).await.unwrap();

    c.delete_person(&id("2")).await.unwrap();

    let graph = c.graph();
    assert!(graph.get(&id("2")).is_none());
    assert!(graph.get(&id("1")).unwrap().pids.is_empty());
    assert!(graph.validate().is_empty());
    assert_eq!(c.store().list_calls.get(), 2);
}

#[tokio::test]
async fn create_person_then_partner() {
    let store = FakeStore::new(3).with_tree(
        "1",
        vec![Person::new("1", "A").with_gender(Gender::Male), Person::new("2", "B").with_gender(Gender::Female)],
    );
    let (mut c, _factory) = harness(store, signed_in());
    c.select_family_tree(tree("1")).await.unwrap();

    let draft = PersonDraft {
        name: "C".into(),
        gender: Gender::Female,
        birth_date: None,
        death_date: None,
        fid: Some(id("1")),
        mid: Some(id("2")),
    };
    let created = c.create_person(draft).await.unwrap();
    assert_eq!(created, Some(id("3")));
    assert_eq!(ids_of(&c.graph().children_of(&id("2"))), vec![id("3")]);

    c.add_partner(&id("1"), &id("2")).await.unwrap();
    let graph = c.graph();
    assert_eq!(graph.get(&id("1")).unwrap().pids, vec![id("2")]);
    assert_eq!(graph.get(&id("2")).unwrap().pids, vec![id("1")]);
    assert_eq!(c.state(), &SyncState::Ready);
}

#[tokio::test]
async fn update_person_changes_parents() {
    let store = FakeStore::new(3).with_tree(
        "1",
        vec![
            Person::new("1", "A").with_gender(Gender::Male),
            Person::new("2", "B").with_gender(Gender::Female),
        ],
    );
    let (mut c, _factory) = harness(store, signed_in());
    c.select_family_tree(tree("1")).await.unwrap();

    let mut b = c.fetch_person(&id("2")).await.unwrap();
    b.fid = Some(id("1"));
    c.update_person(b).await.unwrap();

    assert_eq!(c.graph().get(&id("2")).unwrap().fid, Some(id("1")));
    assert_eq!(ids_of(&c.graph().parents_of(&id("2"))), vec![id("1")]);
}

#[tokio::test]
async fn family_trees_listed_for_user() {
    let store = FakeStore::new(3)
        .with_tree("1", two_generations())
        .with_tree("2", vec![]);
    let (c, _factory) = harness(store, signed_in());

    let trees = c.list_family_trees().await.unwrap();
    assert_eq!(trees.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["1", "2"]);
    assert_eq!(trees[0].display_name(), "Curie");

    assert!(matches!(c.create_family_tree("  ", "").await, Err(SyncError::InvalidInput(_))));
    c.create_family_tree("Curie", "Paris branch").await.unwrap();
}

#[tokio::test]
async fn unknown_tree_is_retryable_not_found() {
    let store = FakeStore::new(3);
    let (mut c, _factory) = harness(store, signed_in());

    let err = c.select_family_tree(tree("77")).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(c.state(), SyncState::Error { stale: false, .. }));
    assert!(err.to_string().contains("77"));
}

#[tokio::test]
async fn members_listed_for_tree() {
    let store = FakeStore::new(3).with_tree("1", two_generations());
    let (c, _factory) = harness(store, signed_in());

    let members = c.list_family_tree_users(&tree("1")).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].display_name(), "Marie Curie");

    let err = c.list_family_tree_users(&tree("5")).await.unwrap_err();
    assert_eq!(err, SyncError::NotFound("5".into()));
    // reads never move the controller
    assert_eq!(c.state(), &SyncState::Idle);
}
