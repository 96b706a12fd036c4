//! Visualization Adapter: owns the single live surface instance.
//!
//! The adapter binds a [`GraphModel`] to a surface created by the injected
//! [`SurfaceFactory`], and turns the surface's edit callback into an mpsc
//! queue the controller drains. At most one instance is live at a time:
//! [`bind`](VisualizationAdapter::bind) always destroys the previous one
//! before asking the factory for a new one.

use std::cell::Cell;
use std::rc::Rc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use famgraph_types::GraphModel;

use crate::config::SurfaceOptions;
use crate::mutation::{EditBatch, IdMapping};
use crate::surface::{
    ContainerHandle, SurfaceConfig, SurfaceError, SurfaceFactory, UpdateHandler,
    VisualizationSurface,
};

/// Bridge between the graph model and the external surface.
pub struct VisualizationAdapter {
    factory: Box<dyn SurfaceFactory>,
    bound: Option<Box<dyn VisualizationSurface>>,
    /// Shared with every handler handed to the surface.
    edits_enabled: Rc<Cell<bool>>,
    edit_tx: mpsc::UnboundedSender<EditBatch>,
}

impl VisualizationAdapter {
    /// Create an adapter and the receiving end of its edit queue.
    ///
    /// Edits start disabled; the controller enables them once it is Ready.
    pub fn new(factory: Box<dyn SurfaceFactory>) -> (Self, mpsc::UnboundedReceiver<EditBatch>) {
        let (edit_tx, edit_rx) = mpsc::unbounded_channel();
        let adapter = Self {
            factory,
            bound: None,
            edits_enabled: Rc::new(Cell::new(false)),
            edit_tx,
        };
        (adapter, edit_rx)
    }

    /// Bind `graph` into `container`, replacing any live instance.
    ///
    /// The previous instance is destroyed before the factory is called, so
    /// two instances never coexist. If construction fails nothing is bound.
    pub fn bind(
        &mut self,
        container: &ContainerHandle,
        graph: &GraphModel,
        options: &SurfaceOptions,
    ) -> Result<(), SurfaceError> {
        self.unbind();

        let config = SurfaceConfig::new(options, graph.iter().cloned().collect());
        let surface = self.factory.create(container, config, self.update_handler())?;

        info!(container = container.as_str(), nodes = graph.len(), "surface bound");
        self.bound = Some(surface);
        Ok(())
    }

    /// Edit callback for a new instance: queue the batch, never apply locally.
    fn update_handler(&self) -> UpdateHandler {
        let tx = self.edit_tx.clone();
        let enabled = Rc::clone(&self.edits_enabled);
        Box::new(move |batch: EditBatch| {
            if !enabled.get() {
                warn!(
                    added = batch.add_nodes.len(),
                    updated = batch.update_nodes.len(),
                    "edit rejected while a sync is in progress"
                );
                return false;
            }
            if tx.send(batch).is_err() {
                warn!("edit queue closed, dropping batch");
            }
            false
        })
    }

    /// Destroy the live instance, if any. Safe to call repeatedly.
    pub fn unbind(&mut self) {
        if let Some(mut surface) = self.bound.take() {
            surface.destroy();
            debug!("surface unbound");
        }
    }

    /// Forward an id rewrite to the live instance.
    pub fn replace_ids(&mut self, mapping: &IdMapping) {
        if mapping.is_empty() {
            return;
        }
        match self.bound.as_mut() {
            Some(surface) => surface.replace_ids(mapping),
            None => debug!("replace_ids with nothing bound"),
        }
    }

    /// Allow or suppress edit emission from the surface.
    pub fn set_edits_enabled(&self, enabled: bool) {
        self.edits_enabled.set(enabled);
    }

    pub fn edits_enabled(&self) -> bool {
        self.edits_enabled.get()
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    /// Node count of the live instance.
    pub fn node_count(&self) -> Option<usize> {
        self.bound.as_ref().map(|s| s.node_count())
    }
}

impl Drop for VisualizationAdapter {
    fn drop(&mut self) {
        self.unbind();
    }
}

// ============================================================================
// Tests
// ============================================================================
