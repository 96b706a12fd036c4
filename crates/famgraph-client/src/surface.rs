//! Visualization surface contract.
//!
//! The surface (a family-tree rendering widget) is external: it is created
//! by a [`SurfaceFactory`], fed a node list, and talks back through one
//! callback. The engine never touches its rendering or layout. This module
//! only pins down the four things the engine relies on:
//!
//! ```text
//!   factory.create(container, config, on_update)  →  surface
//!   on_update(EditBatch) -> bool                     (surface → engine)
//!   surface.replace_ids(mapping)                     (engine → surface)
//!   surface.destroy()                                (exactly once)
//! ```
//!
//! [`HeadlessSurfaceFactory`] is an in-process implementation for hosts
//! without a screen (the CLI) and for tests.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, warn};

use famgraph_types::Person;

use crate::config::{ExportFormat, SurfaceMode, SurfaceOptions};
use crate::mutation::{EditBatch, IdMapping};

/// Error raised while constructing a surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    #[error("visualization library is not available: {0}")]
    Unavailable(String),
    #[error("surface construction failed: {0}")]
    Construct(String),
}

/// Opaque handle to the place a surface renders into (e.g. a DOM element id).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One entry of the surface's export menu.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MenuItem {
    pub text: &'static str,
}

/// Configuration object passed to the surface constructor, in the
/// surface's own key names.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceConfig {
    pub mode: SurfaceMode,
    pub ctrl_zoom: bool,
    pub node_tree_menu: bool,
    pub node_binding: BTreeMap<String, String>,
    /// `{"pdf": {"text": "Export PDF"}, ...}` in configured order.
    pub menu: IndexMap<ExportFormat, MenuItem>,
    /// Initial node list, in graph order.
    pub nodes: Vec<Person>,
}

impl SurfaceConfig {
    pub fn new(options: &SurfaceOptions, nodes: Vec<Person>) -> Self {
        Self {
            mode: options.mode,
            ctrl_zoom: options.ctrl_zoom,
            node_tree_menu: options.node_tree_menu,
            node_binding: options.node_binding.clone(),
            menu: options
                .exports
                .iter()
                .map(|format| (*format, MenuItem { text: format.label() }))
                .collect(),
            nodes,
        }
    }
}

/// Edit callback registered with the surface.
///
/// The return value tells the surface whether to apply the edit to its own
/// state. The engine's handler always answers `false`.
pub type UpdateHandler = Box<dyn FnMut(EditBatch) -> bool>;

/// A live surface instance.
pub trait VisualizationSurface {
    /// Push a temporary → permanent id rewrite into the rendered state.
    fn replace_ids(&mut self, mapping: &IdMapping);

    /// Release everything the instance holds, listeners included.
    fn destroy(&mut self);

    /// Number of nodes currently rendered.
    fn node_count(&self) -> usize;
}

/// Creates surface instances.
pub trait SurfaceFactory {
    fn create(
        &self,
        container: &ContainerHandle,
        config: SurfaceConfig,
        on_update: UpdateHandler,
    ) -> Result<Box<dyn VisualizationSurface>, SurfaceError>;
}

// ============================================================================
// Headless surface
// ============================================================================

/// Lifecycle event recorded by the headless factory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SurfaceEvent {
    Created { instance: u64, nodes: usize },
    IdsReplaced { instance: u64, count: usize },
    Destroyed { instance: u64 },
}

struct LiveInstance {
    instance: u64,
    container: ContainerHandle,
    nodes: Vec<Person>,
    on_update: Option<UpdateHandler>,
}

#[derive(Default)]
struct HeadlessState {
    next_instance: u64,
    live: Vec<LiveInstance>,
    events: Vec<SurfaceEvent>,
}

/// Surface factory that keeps nodes in memory instead of drawing them.
///
/// Clones share state, so a host can keep one clone to inspect the live
/// instance or inject edits with [`emit`](Self::emit) while the adapter
/// owns another.
#[derive(Clone, Default)]
pub struct HeadlessSurfaceFactory {
    state: Rc<RefCell<HeadlessState>>,
}

impl HeadlessSurfaceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every lifecycle event so far, oldest first.
    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.state.borrow().events.clone()
    }

    /// Number of instances created and not yet destroyed.
    pub fn live_count(&self) -> usize {
        self.state.borrow().live.len()
    }

    /// Node list of the most recently created live instance.
    pub fn live_nodes(&self) -> Option<Vec<Person>> {
        self.state.borrow().live.last().map(|l| l.nodes.clone())
    }

    /// Container of the most recently created live instance.
    pub fn live_container(&self) -> Option<ContainerHandle> {
        self.state.borrow().live.last().map(|l| l.container.clone())
    }

    /// Simulate a user edit on the live instance.
    ///
    /// Returns what the edit callback answered, or `None` if nothing is live.
    /// When the callback answers `true` the edit is applied locally, as a
    /// real surface would.
    pub fn emit(&self, batch: EditBatch) -> Option<bool> {
        // Take the handler out so the callback can't observe a held borrow.
        let mut handler = {
            let mut state = self.state.borrow_mut();
            state.live.last_mut()?.on_update.take()?
        };
        let apply_locally = handler(batch.clone());

        let mut state = self.state.borrow_mut();
        if let Some(live) = state.live.last_mut() {
            live.on_update = Some(handler);
            if apply_locally {
                for person in batch.add_nodes.into_iter().chain(batch.update_nodes) {
                    match live.nodes.iter_mut().find(|n| n.id == person.id) {
                        Some(existing) => *existing = person,
                        None => live.nodes.push(person),
                    }
                }
            }
        }
        Some(apply_locally)
    }
}

impl SurfaceFactory for HeadlessSurfaceFactory {
    fn create(
        &self,
        container: &ContainerHandle,
        config: SurfaceConfig,
        on_update: UpdateHandler,
    ) -> Result<Box<dyn VisualizationSurface>, SurfaceError> {
        let mut state = self.state.borrow_mut();
        state.next_instance += 1;
        let instance = state.next_instance;

        debug!(instance, container = container.as_str(), "creating headless surface");
        state.events.push(SurfaceEvent::Created { instance, nodes: config.nodes.len() });
        state.live.push(LiveInstance {
            instance,
            container: container.clone(),
            nodes: config.nodes,
            on_update: Some(on_update),
        });

        Ok(Box::new(HeadlessSurface {
            instance,
            state: Rc::clone(&self.state),
            destroyed: false,
        }))
    }
}

/// Instance handed out by [`HeadlessSurfaceFactory`].
pub struct HeadlessSurface {
    instance: u64,
    state: Rc<RefCell<HeadlessState>>,
    destroyed: bool,
}

impl VisualizationSurface for HeadlessSurface {
    fn replace_ids(&mut self, mapping: &IdMapping) {
        let mut state = self.state.borrow_mut();
        let Some(live) = state.live.iter_mut().find(|l| l.instance == self.instance) else {
            warn!(instance = self.instance, "replace_ids on a destroyed surface");
            return;
        };
        for node in &mut live.nodes {
            node.id = mapping.resolve(&node.id).clone();
            node.fid = node.fid.as_ref().map(|id| mapping.resolve(id).clone());
            node.mid = node.mid.as_ref().map(|id| mapping.resolve(id).clone());
            for pid in &mut node.pids {
                *pid = mapping.resolve(pid).clone();
            }
        }
        let count = mapping.len();
        state.events.push(SurfaceEvent::IdsReplaced { instance: self.instance, count });
    }

    fn destroy(&mut self) {
        if self.destroyed {
            warn!(instance = self.instance, "surface destroyed twice");
            return;
        }
        self.destroyed = true;
        let mut state = self.state.borrow_mut();
        state.live.retain(|l| l.instance != self.instance);
        state.events.push(SurfaceEvent::Destroyed { instance: self.instance });
    }

    fn node_count(&self) -> usize {
        self.state
            .borrow()
            .live
            .iter()
            .find(|l| l.instance == self.instance)
            .map_or(0, |l| l.nodes.len())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use famgraph_types::PersonId;

    fn config(nodes: Vec<Person>) -> SurfaceConfig {
        SurfaceConfig::new(&SurfaceOptions::default(), nodes)
    }

    #[test]
    fn test_config_uses_surface_key_names() {
        let value = serde_json::to_value(config(vec![Person::new("1", "A")])).unwrap();
        assert_eq!(value["mode"], serde_json::json!("dark"));
        assert_eq!(value["ctrlZoom"], serde_json::json!(true));
        assert_eq!(value["nodeBinding"]["field_0"], serde_json::json!("name"));
        assert_eq!(value["nodes"][0]["name"], serde_json::json!("A"));
    }

    #[test]
    fn test_menu_is_built_from_exports() {
        let options = SurfaceOptions {
            exports: vec![ExportFormat::Svg, ExportFormat::Pdf],
            ..Default::default()
        };
        let value = serde_json::to_value(SurfaceConfig::new(&options, vec![])).unwrap();
        assert_eq!(
            value["menu"],
            serde_json::json!({
                "svg": { "text": "Export SVG" },
                "pdf": { "text": "Export PDF" },
            })
        );
    }

    #[test]
    fn test_emit_reaches_handler_and_respects_answer() {
        let factory = HeadlessSurfaceFactory::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut surface = factory
            .create(
                &ContainerHandle::new("tree"),
                config(vec![Person::new("1", "A")]),
                Box::new(move |batch| {
                    sink.borrow_mut().push(batch);
                    false
                }),
            )
            .unwrap();

        let batch = EditBatch::new(vec![Person::new("_ft1", "B")], vec![]);
        assert_eq!(factory.emit(batch.clone()), Some(false));
        assert_eq!(seen.borrow().as_slice(), &[batch]);
        // answered false: the surface did not apply the edit itself
        assert_eq!(factory.live_nodes().unwrap().len(), 1);

        surface.destroy();
        assert_eq!(factory.emit(EditBatch::default()), None);
    }

    #[test]
    fn test_replace_ids_rewrites_live_nodes() {
        let factory = HeadlessSurfaceFactory::new();
        let mut surface = factory
            .create(
                &ContainerHandle::new("tree"),
                config(vec![Person::new("_ft1", "B").with_partner("1"), Person::new("1", "A").with_partner("_ft1")]),
                Box::new(|_| false),
            )
            .unwrap();

        let mapping: IdMapping = [(PersonId::new("_ft1"), PersonId::new("9"))].into_iter().collect();
        surface.replace_ids(&mapping);
        assert_eq!(surface.node_count(), 2);

        let nodes = factory.live_nodes().unwrap();
        assert_eq!(nodes[0].id, "9");
        assert_eq!(nodes[1].pids, vec![PersonId::new("9")]);
    }

    #[test]
    fn test_destroy_is_recorded_once() {
        let factory = HeadlessSurfaceFactory::new();
        let mut surface = factory
            .create(&ContainerHandle::new("tree"), config(vec![]), Box::new(|_| false))
            .unwrap();
        surface.destroy();
        surface.destroy();

        assert_eq!(factory.live_count(), 0);
        assert_eq!(
            factory.events(),
            vec![
                SurfaceEvent::Created { instance: 1, nodes: 0 },
                SurfaceEvent::Destroyed { instance: 1 },
            ]
        );
    }
}
