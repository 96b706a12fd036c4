//! Sync Controller: the state machine that owns the graph.
//!
//! ```text
//!   Idle ──select──▶ Loading ──▶ Ready ──edit──▶ Submitting ──▶ Reconciling
//!                      ▲           ▲                                 │
//!                      │           └──────────── Loading ◀───────────┘
//!                      │
//!                    retry ◀── Error ◀── (any failure)
//! ```
//!
//! The controller is the only component that replaces the [`GraphModel`].
//! It does so by swapping an `Rc` snapshot, so a reader holding the previous
//! snapshot never sees a half-applied rewrite.
//!
//! Every operation takes `&mut self`, which already serializes them. Edits
//! emitted by the surface while an operation is in flight are rejected by the
//! adapter, and results that arrive after the family tree selection changed
//! are discarded via [`SelectionTicket`](crate::session::SelectionTicket).

use std::rc::Rc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use famgraph_types::{
    FamilyTreeId, GraphModel, Person, PersonId, RawPersonRecord, TransformError, Violation,
    transform_record, transform_records,
};

use crate::adapter::VisualizationAdapter;
use crate::config::{ClientConfig, ConfigError, SurfaceOptions};
use crate::http::HttpStore;
use crate::mutation::{EditBatch, IdMapping, MutationFailed, MutationSubmitter};
use crate::reconcile::{apply_edits, reconcile};
use crate::session::{SelectionTicket, Session};
use crate::store::{
    AddPartnerRequest, CreatePersonRequest, FamilyTreeMember, FamilyTreeSummary, NewFamilyTree,
    PersonDraft, PersonStore, StoreError, UpdatePersonRequest,
};
use crate::surface::{ContainerHandle, SurfaceError, SurfaceFactory};

/// Where the controller is in the sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// No family tree selected.
    Idle,
    /// Fetch in flight.
    Loading,
    /// Graph bound to the surface, accepting edits.
    Ready,
    /// An edit batch or form mutation is in flight.
    Submitting,
    /// Id rewrite in progress; a reload follows.
    Reconciling,
    /// Last operation failed. `stale` is set when a previous graph is still
    /// displayed.
    Error { message: String, stale: bool },
}

impl SyncState {
    pub fn name(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Loading => "loading",
            SyncState::Ready => "ready",
            SyncState::Submitting => "submitting",
            SyncState::Reconciling => "reconciling",
            SyncState::Error { .. } => "error",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, SyncState::Ready)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SyncState::Error { .. })
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Error { message, stale: true } => write!(f, "error (stale graph): {}", message),
            SyncState::Error { message, stale: false } => write!(f, "error: {}", message),
            other => f.write_str(other.name()),
        }
    }
}

/// Error surfaced by the controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// No bearer token; nothing was sent.
    #[error("not signed in")]
    AuthMissing,
    /// The backend refused the token.
    #[error("backend rejected the session token")]
    Unauthorized,
    #[error("no family tree selected")]
    NoFamilyTreeSelected,
    #[error("no user in session")]
    UserMissing,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("network failure: {0}")]
    NetworkFailure(String),
    /// The backend rejected a mutation. The graph was left unchanged.
    #[error("mutation failed: {message}")]
    MutationFailed { message: String },
    /// A detail fetch returned a record that could not be transformed.
    #[error(transparent)]
    MalformedRecord(#[from] TransformError),
    /// Form input rejected before anything was sent.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation not allowed in the current state.
    #[error("controller is {state}")]
    Busy { state: &'static str },
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Errors a retry may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::NotFound(_) | SyncError::NetworkFailure(_))
    }

    /// Map a store error from a mutation endpoint.
    fn from_mutation(error: StoreError) -> Self {
        match error {
            StoreError::Unauthorized => SyncError::Unauthorized,
            other => SyncError::MutationFailed { message: other.message() },
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(what) => SyncError::NotFound(what),
            StoreError::Unauthorized => SyncError::Unauthorized,
            StoreError::Network(message)
            | StoreError::Decode(message)
            | StoreError::Status { message, .. } => SyncError::NetworkFailure(message),
        }
    }
}

impl From<ConfigError> for SyncError {
    fn from(error: ConfigError) -> Self {
        SyncError::Config(error.to_string())
    }
}

impl From<MutationFailed> for SyncError {
    fn from(error: MutationFailed) -> Self {
        SyncError::from_mutation(error.source)
    }
}

/// Owns the graph, the adapter, and the sync cycle for one mounted view.
pub struct SyncController<S: PersonStore> {
    store: S,
    session: Session,
    adapter: VisualizationAdapter,
    edits: mpsc::UnboundedReceiver<EditBatch>,
    /// `None` while detached; loads then update the graph without binding.
    container: Option<ContainerHandle>,
    options: SurfaceOptions,
    graph: Rc<GraphModel>,
    state: SyncState,
    warnings: Vec<Violation>,
    skipped: Vec<TransformError>,
}

impl<S: PersonStore> SyncController<S> {
    pub fn new(
        store: S,
        session: Session,
        factory: Box<dyn SurfaceFactory>,
        container: ContainerHandle,
        options: SurfaceOptions,
    ) -> Self {
        let (adapter, edits) = VisualizationAdapter::new(factory);
        Self {
            store,
            session,
            adapter,
            edits,
            container: Some(container),
            options,
            graph: Rc::new(GraphModel::new()),
            state: SyncState::Idle,
            warnings: Vec::new(),
            skipped: Vec::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Current graph snapshot. Never mutated after it is handed out.
    pub fn graph(&self) -> Rc<GraphModel> {
        Rc::clone(&self.graph)
    }

    /// Validation findings from the last load.
    pub fn warnings(&self) -> &[Violation] {
        &self.warnings
    }

    /// Records skipped by the Person Transform in the last load.
    pub fn skipped(&self) -> &[TransformError] {
        &self.skipped
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn adapter(&self) -> &VisualizationAdapter {
        &self.adapter
    }

    // ========================================================================
    // State helpers
    // ========================================================================

    fn transition(&mut self, next: SyncState) {
        if self.state != next {
            debug!(from = self.state.name(), to = next.name(), "sync state");
        }
        // Edits flow only while Ready and attached.
        self.adapter.set_edits_enabled(next.is_ready() && self.container.is_some());
        self.state = next;
    }

    /// Enter `Error`, keeping the current graph (marked stale).
    fn fail(&mut self, error: SyncError) -> SyncError {
        error!(state = self.state.name(), "sync failed: {}", error);
        let stale = !self.graph.is_empty();
        self.transition(SyncState::Error { message: error.to_string(), stale });
        error
    }

    /// Token for reads that leave the sync state alone.
    fn token(&self) -> Result<String, SyncError> {
        self.session.token().ok_or(SyncError::AuthMissing)
    }

    /// Token for sync-cycle operations; a missing one enters `Error`.
    fn require_token(&mut self) -> Result<String, SyncError> {
        match self.token() {
            Ok(token) => Ok(token),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn require_ticket(&self) -> Result<SelectionTicket, SyncError> {
        self.session.ticket().ok_or(SyncError::NoFamilyTreeSelected)
    }

    fn ensure_ready(&self) -> Result<(), SyncError> {
        match &self.state {
            SyncState::Ready => Ok(()),
            SyncState::Idle => Err(SyncError::NoFamilyTreeSelected),
            other => Err(SyncError::Busy { state: other.name() }),
        }
    }

    fn swap_graph(&mut self, graph: GraphModel) {
        self.graph = Rc::new(graph);
    }

    // ========================================================================
    // Selection and loading
    // ========================================================================

    /// Select a family tree and load it.
    ///
    /// Any bound surface is released first. Selecting also abandons a
    /// previous `Error`, since the error belonged to the old selection.
    /// Switching to a different tree drops the old graph before loading, so
    /// a failed switch never leaves another tree's persons in place.
    pub async fn select_family_tree(
        &mut self,
        id: FamilyTreeId,
    ) -> Result<(), SyncError> {
        self.adapter.unbind();
        if self.graph.family_tree_id() != Some(&id) {
            self.swap_graph(GraphModel::new());
            self.warnings.clear();
            self.skipped.clear();
        }
        let generation = self.session.select_family_tree(id.clone());
        info!(family_tree = %id, generation = generation.0, "family tree selected");
        self.transition(SyncState::Idle);
        self.load().await
    }

    /// Drop the selection, the graph, and the surface.
    pub fn clear_selection(&mut self) {
        self.adapter.unbind();
        self.session.clear_family_tree();
        self.swap_graph(GraphModel::new());
        self.warnings.clear();
        self.skipped.clear();
        self.transition(SyncState::Idle);
    }

    /// Release the surface because its container went away.
    ///
    /// Until [`attach`](Self::attach) is called, loads and mutations still
    /// update the graph but nothing is bound and no edits are accepted.
    pub fn detach(&mut self) {
        if let Some(container) = self.container.take() {
            info!(container = container.as_str(), "container detached");
        }
        self.adapter.unbind();
        self.adapter.set_edits_enabled(false);
    }

    /// Bind the current graph into a new container.
    pub fn attach(&mut self, container: ContainerHandle) -> Result<(), SyncError> {
        if self.state.is_ready() {
            self.adapter.bind(&container, &self.graph, &self.options)?;
        }
        self.container = Some(container);
        self.adapter.set_edits_enabled(self.state.is_ready());
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.container.is_some()
    }

    /// Fetch the selected family tree and bind it.
    ///
    /// Not allowed from `Error`; use [`retry`](Self::retry).
    pub async fn load(&mut self) -> Result<(), SyncError> {
        if self.state.is_error() {
            return Err(SyncError::Busy { state: self.state.name() });
        }
        self.require_ticket()?;
        let token = self.require_token()?;
        self.fetch_and_bind(&token).await
    }

    /// Leave `Error` by loading again.
    pub async fn retry(&mut self) -> Result<(), SyncError> {
        if !self.state.is_error() {
            return Err(SyncError::Busy { state: self.state.name() });
        }
        info!("retrying after error");
        let token = self.require_token()?;
        if self.session.ticket().is_none() {
            self.clear_selection();
            return Err(SyncError::NoFamilyTreeSelected);
        }
        self.fetch_and_bind(&token).await
    }

    /// Load whatever is selected when the fetch completes.
    ///
    /// A result for a selection that changed in flight is dropped and the new
    /// selection is fetched instead. If the selection was cleared, the
    /// controller goes `Idle`.
    async fn fetch_and_bind(&mut self, token: &str) -> Result<(), SyncError> {
        loop {
            let Some(ticket) = self.session.ticket() else {
                info!("selection cleared while loading");
                self.clear_selection();
                return Ok(());
            };

            self.transition(SyncState::Loading);
            let fetched = self.store.list_persons(token, &ticket.family_tree_id).await;

            if !self.session.is_current(&ticket) {
                info!(
                    family_tree = %ticket.family_tree_id,
                    generation = ticket.generation.0,
                    "discarding stale load result"
                );
                continue;
            }

            let records = match fetched {
                Ok(records) => records,
                Err(e) => return Err(self.fail(e.into())),
            };

            let (persons, skipped) = transform_records(records);
            let graph = GraphModel::with_persons(ticket.family_tree_id.clone(), persons);
            let warnings = graph.validate();
            for violation in &warnings {
                warn!(family_tree = %ticket.family_tree_id, "graph integrity: {}", violation);
            }

            let bound = match &self.container {
                Some(container) => self.adapter.bind(container, &graph, &self.options),
                None => {
                    debug!(family_tree = %ticket.family_tree_id, "detached, graph not bound");
                    Ok(())
                }
            };
            if let Err(e) = bound {
                return Err(self.fail(e.into()));
            }

            info!(
                family_tree = %ticket.family_tree_id,
                persons = graph.len(),
                skipped = skipped.len(),
                warnings = warnings.len(),
                "family tree loaded"
            );
            self.swap_graph(graph);
            self.warnings = warnings;
            self.skipped = skipped;
            self.transition(SyncState::Ready);
            return Ok(());
        }
    }

    // ========================================================================
    // Surface edits
    // ========================================================================

    /// Wait for the next batch emitted by the surface.
    pub async fn next_edit(&mut self) -> Option<EditBatch> {
        self.edits.recv().await
    }

    /// Handle every batch already queued, in order.
    ///
    /// Stops at the first failure; later batches stay queued.
    pub async fn process_pending_edits(&mut self) -> Result<usize, SyncError> {
        let mut handled = 0;
        while let Ok(batch) = self.edits.try_recv() {
            self.handle_edit(batch).await?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Submit one edit batch and run the reconcile-and-reload cycle.
    ///
    /// On success the returned mapping has already been applied. On failure
    /// the graph is unchanged and the controller is in `Error`.
    pub async fn handle_edit(&mut self, batch: EditBatch) -> Result<IdMapping, SyncError> {
        self.ensure_ready()?;
        if batch.is_empty() {
            return Ok(IdMapping::new());
        }
        let token = self.require_token()?;
        let ticket = self.require_ticket()?;

        self.transition(SyncState::Submitting);
        let submitted = MutationSubmitter::new(&self.store)
            .submit(&token, &ticket.family_tree_id, &batch)
            .await;

        if !self.session.is_current(&ticket) {
            info!(family_tree = %ticket.family_tree_id, "selection changed during submit, not reconciling");
            self.fetch_and_bind(&token).await?;
            return submitted.map_err(SyncError::from);
        }

        let mapping = match submitted {
            Ok(mapping) => mapping,
            Err(e) => return Err(self.fail(e.into())),
        };

        self.transition(SyncState::Reconciling);
        let edited = apply_edits(&self.graph, &batch);
        self.swap_graph(reconcile(&edited, &mapping));
        self.adapter.replace_ids(&mapping);

        self.fetch_and_bind(&token).await?;
        Ok(mapping)
    }

    // ========================================================================
    // Form operations
    // ========================================================================

    /// Run a form mutation: submit, apply `local` to the graph, then reload.
    ///
    /// Callers have already validated input and captured token and ticket.
    async fn finish_mutation<T>(
        &mut self,
        token: &str,
        ticket: &SelectionTicket,
        result: Result<T, SyncError>,
        local: impl FnOnce(&mut GraphModel),
    ) -> Result<T, SyncError> {
        if !self.session.is_current(ticket) {
            info!(family_tree = %ticket.family_tree_id, "selection changed during mutation, not applying");
            self.fetch_and_bind(token).await?;
            return result;
        }
        let value = match result {
            Ok(value) => value,
            Err(e) => return Err(self.fail(e)),
        };

        self.transition(SyncState::Reconciling);
        let mut next = GraphModel::clone(&self.graph);
        local(&mut next);
        self.swap_graph(next);

        self.fetch_and_bind(token).await?;
        Ok(value)
    }

    /// Create a person from form input. Returns the permanent id when the
    /// backend reports one.
    pub async fn create_person(&mut self, draft: PersonDraft) -> Result<Option<PersonId>, SyncError> {
        self.ensure_ready()?;
        if draft.name.trim().is_empty() {
            return Err(SyncError::InvalidInput("name is required".into()));
        }
        self.check_parents(None, draft.fid.as_ref(), draft.mid.as_ref())?;
        let token = self.require_token()?;
        let ticket = self.require_ticket()?;

        self.transition(SyncState::Submitting);
        let request = CreatePersonRequest::new(&draft, &ticket.family_tree_id);
        let result = match self.store.create_person(&token, &request).await {
            Ok(response) if response.success => Ok(response.person_id()),
            Ok(response) => Err(SyncError::MutationFailed {
                message: response
                    .message
                    .unwrap_or_else(|| "person was not created".to_string()),
            }),
            Err(e) => Err(SyncError::from_mutation(e)),
        };

        let created = self.finish_mutation(&token, &ticket, result, |_| {}).await?;
        info!(person = ?created, "person created");
        Ok(created)
    }

    /// Update one person from form input.
    pub async fn update_person(&mut self, person: Person) -> Result<(), SyncError> {
        self.ensure_ready()?;
        if person.name.trim().is_empty() {
            return Err(SyncError::InvalidInput("name is required".into()));
        }
        if !self.graph.contains(&person.id) {
            return Err(SyncError::NotFound(person.id.to_string()));
        }
        self.check_parents(Some(&person.id), person.fid.as_ref(), person.mid.as_ref())?;
        let mut candidate = GraphModel::clone(&self.graph);
        candidate.upsert(person.clone());
        if candidate.is_own_ancestor(&person.id) {
            return Err(SyncError::InvalidInput(format!(
                "{} would become their own ancestor",
                person.id
            )));
        }
        let token = self.require_token()?;
        let ticket = self.require_ticket()?;

        self.transition(SyncState::Submitting);
        let request = UpdatePersonRequest::new(&person, &ticket.family_tree_id);
        let result = self
            .store
            .update_person(&token, &person.id, &request)
            .await
            .map_err(SyncError::from_mutation);

        let id = person.id.clone();
        self.finish_mutation(&token, &ticket, result, move |graph| {
            graph.upsert(person);
        })
        .await?;
        info!(person = %id, "person updated");
        Ok(())
    }

    /// Delete a person. References to them are stripped locally before the
    /// reload confirms the backend's cascade.
    pub async fn delete_person(&mut self, id: &PersonId) -> Result<(), SyncError> {
        self.ensure_ready()?;
        let token = self.require_token()?;
        let ticket = self.require_ticket()?;

        self.transition(SyncState::Submitting);
        let result = self
            .store
            .delete_person(&token, id)
            .await
            .map_err(SyncError::from_mutation);

        self.finish_mutation(&token, &ticket, result, |graph| {
            graph.remove(id);
        })
        .await?;
        info!(person = %id, "person deleted");
        Ok(())
    }

    /// Record a partnership between `id` and `partner`.
    pub async fn add_partner(&mut self, id: &PersonId, partner: &PersonId) -> Result<(), SyncError> {
        self.ensure_ready()?;
        if id == partner {
            return Err(SyncError::InvalidInput("a person cannot partner themselves".into()));
        }
        for who in [id, partner] {
            if !self.graph.contains(who) {
                return Err(SyncError::NotFound(who.to_string()));
            }
        }
        let token = self.require_token()?;
        let ticket = self.require_ticket()?;

        self.transition(SyncState::Submitting);
        let request = AddPartnerRequest::new(partner, &ticket.family_tree_id);
        let result = self
            .store
            .add_partner(&token, id, &request)
            .await
            .map_err(SyncError::from_mutation);

        self.finish_mutation(&token, &ticket, result, |graph| {
            for (a, b) in [(id, partner), (partner, id)] {
                if let Some(mut person) = graph.get(a).cloned() {
                    person.add_partner(b.clone());
                    graph.upsert(person);
                }
            }
        })
        .await?;
        info!(person = %id, partner = %partner, "partner added");
        Ok(())
    }

    /// Parents must exist, differ from the person, and have the right gender
    /// when the model knows it.
    fn check_parents(
        &self,
        person: Option<&PersonId>,
        fid: Option<&PersonId>,
        mid: Option<&PersonId>,
    ) -> Result<(), SyncError> {
        let slots = [
            ("father", fid, self.graph.father_candidates(person)),
            ("mother", mid, self.graph.mother_candidates(person)),
        ];
        for (role, parent, candidates) in slots {
            let Some(parent) = parent else { continue };
            if Some(parent) == person {
                return Err(SyncError::InvalidInput(format!("{} cannot be their own {}", parent, role)));
            }
            let Some(found) = self.graph.get(parent) else {
                return Err(SyncError::InvalidInput(format!("{} {} is not in this family tree", role, parent)));
            };
            if found.gender.is_some() && !candidates.iter().any(|c| &c.id == parent) {
                return Err(SyncError::InvalidInput(format!("{} cannot be a {}", parent, role)));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Reads that leave the graph and the sync state alone
    // ========================================================================

    /// Fetch one person for a detail or edit form.
    pub async fn fetch_person(&self, id: &PersonId) -> Result<Person, SyncError> {
        let token = self.token()?;
        let value = self.store.get_person(&token, id).await?;
        let raw = RawPersonRecord::from_value(value).map_err(|e| TransformError::MalformedRecord {
            index: 0,
            reason: e.to_string(),
        })?;
        Ok(transform_record(0, raw)?)
    }

    /// Family trees the signed-in user belongs to.
    pub async fn list_family_trees(&self) -> Result<Vec<FamilyTreeSummary>, SyncError> {
        let token = self.token()?;
        let user_id = self.session.user_id().ok_or(SyncError::UserMissing)?;
        Ok(self.store.list_family_trees(&token, &user_id).await?)
    }

    /// Users with access to `family_tree_id`.
    pub async fn list_family_tree_users(
        &self,
        family_tree_id: &FamilyTreeId,
    ) -> Result<Vec<FamilyTreeMember>, SyncError> {
        let token = self.token()?;
        Ok(self.store.list_family_tree_users(&token, family_tree_id).await?)
    }

    /// Create a new, empty family tree.
    pub async fn create_family_tree(
        &self,
        last_name: &str,
        description: &str,
    ) -> Result<(), SyncError> {
        if last_name.trim().is_empty() {
            return Err(SyncError::InvalidInput("last name is required".into()));
        }
        let token = self.token()?;
        let request = NewFamilyTree {
            last_name: last_name.trim().to_string(),
            description: description.trim().to_string(),
        };
        self.store
            .create_family_tree(&token, &request)
            .await
            .map_err(SyncError::from_mutation)?;
        info!(last_name = %request.last_name, "family tree created");
        Ok(())
    }
}

impl SyncController<HttpStore> {
    /// Controller talking to the backend described by `config`.
    pub fn connect(
        config: &ClientConfig,
        session: Session,
        factory: Box<dyn SurfaceFactory>,
        container: ContainerHandle,
    ) -> Result<Self, SyncError> {
        let store = HttpStore::new(config)?;
        Ok(Self::new(store, session, factory, container, config.surface.clone()))
    }
}

// ============================================================================
// Tests
// ============================================================================
