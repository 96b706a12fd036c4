//! Explicit session context: who is signed in and what is selected.
//!
//! A [`Session`] is a cheap, clonable, single-threaded handle. The host (UI,
//! CLI, tests) owns the source of truth and hands clones to the engine, so
//! the engine never reaches into ambient storage.
//!
//! Every change of family tree selection bumps a [`SelectionGeneration`].
//! Async work captures the generation when it starts and drops its result if
//! the generation moved while it was in flight.

use std::cell::RefCell;
use std::rc::Rc;

use famgraph_types::{FamilyTreeId, PersonId};

/// Monotonic counter bumped on every family tree selection change.
///
/// Consumers compare generations to detect stale results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct SelectionGeneration(pub u64);

#[derive(Debug, Default)]
struct SessionState {
    token: Option<String>,
    user_id: Option<String>,
    family_tree_id: Option<FamilyTreeId>,
    person_id: Option<PersonId>,
    generation: SelectionGeneration,
}

/// Shared session handle.
#[derive(Clone, Debug, Default)]
pub struct Session {
    inner: Rc<RefCell<SessionState>>,
}

/// A family tree selection captured at request start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionTicket {
    pub family_tree_id: FamilyTreeId,
    pub generation: SelectionGeneration,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session with a bearer token already set.
    pub fn with_token(token: impl Into<String>) -> Self {
        let session = Self::new();
        session.set_token(Some(token.into()));
        session
    }

    pub fn token(&self) -> Option<String> {
        self.inner.borrow().token.clone()
    }

    /// Set or clear the bearer token. Empty tokens count as absent.
    pub fn set_token(&self, token: Option<String>) {
        self.inner.borrow_mut().token = token.filter(|t| !t.trim().is_empty());
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.borrow().user_id.clone()
    }

    pub fn set_user_id(&self, user_id: Option<String>) {
        self.inner.borrow_mut().user_id = user_id;
    }

    pub fn family_tree_id(&self) -> Option<FamilyTreeId> {
        self.inner.borrow().family_tree_id.clone()
    }

    /// Select a family tree. Bumps the generation even when re-selecting the
    /// same tree, so a deliberate re-select also discards in-flight results.
    pub fn select_family_tree(&self, id: FamilyTreeId) -> SelectionGeneration {
        let mut state = self.inner.borrow_mut();
        state.family_tree_id = Some(id);
        state.person_id = None;
        state.generation.0 += 1;
        state.generation
    }

    /// Clear the family tree selection.
    pub fn clear_family_tree(&self) -> SelectionGeneration {
        let mut state = self.inner.borrow_mut();
        state.family_tree_id = None;
        state.person_id = None;
        state.generation.0 += 1;
        state.generation
    }

    pub fn person_id(&self) -> Option<PersonId> {
        self.inner.borrow().person_id.clone()
    }

    /// Select the person a detail/edit form is about.
    pub fn select_person(&self, id: Option<PersonId>) {
        self.inner.borrow_mut().person_id = id;
    }

    pub fn generation(&self) -> SelectionGeneration {
        self.inner.borrow().generation
    }

    /// Capture the current selection, if any.
    pub fn ticket(&self) -> Option<SelectionTicket> {
        let state = self.inner.borrow();
        state.family_tree_id.clone().map(|family_tree_id| SelectionTicket {
            family_tree_id,
            generation: state.generation,
        })
    }

    /// True if `ticket` still describes the current selection.
    pub fn is_current(&self, ticket: &SelectionTicket) -> bool {
        let state = self.inner.borrow();
        state.generation == ticket.generation
            && state.family_tree_id.as_ref() == Some(&ticket.family_tree_id)
    }
}

// ============================================================================
// Tests
// ============================================================================
