//! famgraph sync engine.
//!
//! Keeps an in-memory family tree ([`GraphModel`]) consistent with the
//! backend while a user edits it through an external visualization surface.
//! Single-threaded: futures are `?Send`, shared state is `Rc`, and network
//! calls are the only suspension points. Run it on a current-thread runtime
//! or inside a `tokio::task::LocalSet`.
//!
//! # Sync Cycle
//!
//! ```text
//! select tree ─▶ fetch ─▶ transform ─▶ GraphModel ─▶ bind surface
//!                                                        │ edit batch
//!   reload ◀── reconcile ids ◀── submit (POST /api/Persons/Update)
//! ```
//!
//! # Key Types
//!
//! |--------------------------|---------------------------------------------|
//! | Type                     | Purpose                                     |
//! |--------------------------|---------------------------------------------|
//! | [`SyncController`]       | State machine, sole owner of the graph      |
//! | [`VisualizationAdapter`] | One live surface, edit queue, edit gating   |
//! | [`MutationSubmitter`]    | Edit batch → one backend request            |
//! | [`reconcile`]            | Temporary → permanent id rewrite            |
//! | [`PersonStore`]          | Backend REST contract ([`HttpStore`])       |
//! | [`Session`]              | Token, user, selection, generation          |
//! | [`ClientConfig`]         | Backend origin, timeout, surface options    |
//! |--------------------------|---------------------------------------------|
//!
//! [`GraphModel`]: famgraph_types::GraphModel

pub mod adapter;
pub mod config;
pub mod constants;
pub mod controller;
pub mod http;
pub mod mutation;
pub mod reconcile;
pub mod session;
pub mod store;
pub mod surface;

pub use adapter::VisualizationAdapter;
pub use config::{ClientConfig, ConfigError, ExportFormat, SurfaceMode, SurfaceOptions};
pub use controller::{SyncController, SyncError, SyncState};
pub use http::HttpStore;
pub use mutation::{EditBatch, IdMapping, MutationFailed, MutationSubmitter};
pub use reconcile::{apply_edits, reconcile};
pub use session::{SelectionGeneration, SelectionTicket, Session};
pub use store::{
    AddPartnerRequest, BatchUpdateRequest, CreatePersonRequest, CreatePersonResponse,
    FamilyTreeMember, FamilyTreeSummary, NewFamilyTree, PersonDraft, PersonStore, StoreError,
    UpdatePersonRequest,
};
pub use surface::{
    ContainerHandle, HeadlessSurface, HeadlessSurfaceFactory, MenuItem, SurfaceConfig, SurfaceError,
    SurfaceEvent, SurfaceFactory, UpdateHandler, VisualizationSurface,
};
