//! The application-facing root: layers, sync loop and renderer events.

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::time::Duration;

use calloop::EventLoop;

use crate::connection::{
    BatchReport, Capabilities, ConnectionManager, ConnectionState, RendererEvent, Spawner,
    ThreadSpawner,
};
use crate::error::{Result, StageError};
use crate::layout::Size;
use crate::sync::{Batch, Command, Scheduler, Wake, WireId};
use crate::tree::{CallTarget, NodeId, PendingCall, Tree};
use crate::value::{AttrMap, Value};

/// How long [`Stage::run`] waits for a wake before polling renderer events.
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

pub struct StageConfig {
    pub name: String,
    pub width: f32,
    pub height: f32,
    /// Handshake attempts before giving up on a renderer
    pub connect_retries: u32,
    pub connect_backoff: Duration,
    /// Logical size layers are laid out in; scaled to the stage size
    pub content_geometry: Option<Size>,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            name: "stagehand".to_string(),
            width: 1280.0,
            height: 720.0,
            connect_retries: 50,
            connect_backoff: Duration::from_millis(100),
            content_geometry: None,
        }
    }
}

impl StageConfig {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn width(mut self, width: f32) -> Self {
        self.width = width;
        self
    }

    pub fn height(mut self, height: f32) -> Self {
        self.height = height;
        self
    }

    pub fn connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries;
        self
    }

    pub fn connect_backoff(mut self, backoff: Duration) -> Self {
        self.connect_backoff = backoff;
        self
    }

    pub fn content_geometry(mut self, width: f32, height: f32) -> Self {
        self.content_geometry = Some(Size::new(width, height));
        self
    }

    fn logical_size(&self) -> Size {
        self.content_geometry
            .unwrap_or(Size::new(self.width, self.height))
    }
}

/// Something the renderer reported.
#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    KeyPress(String),
    WidgetCall {
        node: NodeId,
        method: String,
        args: Vec<Value>,
    },
}

pub struct Stage {
    config: StageConfig,
    tree: Tree,
    scheduler: Scheduler,
    connection: ConnectionManager,
    event_loop: EventLoop<'static, ()>,
    main_layer: NodeId,
    events: VecDeque<StageEvent>,
    capabilities: Option<Capabilities>,
    last_batch: Batch,
    last_report: BatchReport,
}

impl Stage {
    /// Create a stage backed by a headless renderer thread.
    pub fn new(config: StageConfig) -> Result<Self> {
        Self::with_spawner(config, Box::new(ThreadSpawner::new()))
    }

    pub fn with_spawner(config: StageConfig, spawner: Box<dyn Spawner>) -> Result<Self> {
        let (wake, ping) = Wake::new().map_err(StageError::Wake)?;
        let event_loop = EventLoop::try_new()?;
        // The wake flag carries the state; the ping only interrupts the wait
        event_loop
            .handle()
            .insert_source(ping, |_, _, _| {})
            .map_err(|err| err.error)?;

        let connection = ConnectionManager::new(
            spawner,
            config.connect_retries,
            config.connect_backoff,
        );
        let mut tree = Tree::with_wake(wake);
        let main_layer = tree.create_layer(config.logical_size());
        scale_layer(&mut tree, &config, main_layer);

        Ok(Self {
            config,
            tree,
            scheduler: Scheduler::new(),
            connection,
            event_loop,
            main_layer,
            events: VecDeque::new(),
            capabilities: None,
            last_batch: Batch::new(),
            last_report: BatchReport::default(),
        })
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// The layer created with the stage.
    pub fn layer(&self) -> NodeId {
        self.main_layer
    }

    /// Add a layer on top of the existing ones, sized to the stage.
    pub fn add_layer(&mut self) -> NodeId {
        let layer = self.tree.create_layer(self.config.logical_size());
        scale_layer(&mut self.tree, &self.config, layer);
        layer
    }

    /// Attach `node` to the top of `layer`.
    pub fn add(&mut self, node: NodeId, layer: NodeId) -> Result<()> {
        self.tree.set_parent(node, Some(layer))?;
        Ok(())
    }

    /// Detach `node` from the scene, keeping it alive.
    pub fn remove(&mut self, node: NodeId) -> Result<()> {
        self.tree.detach(node)?;
        Ok(())
    }

    pub fn hide(&mut self) {
        for layer in self.tree.layers().to_vec() {
            self.tree.call(layer, "hide", Vec::new());
        }
    }

    pub fn show(&mut self) {
        for layer in self.tree.layers().to_vec() {
            self.tree.call(layer, "show", Vec::new());
        }
        self.tree
            .queue_call(CallTarget::Stage, "ensure_redraw", Vec::new());
    }

    /// Lay layers out in a `width` x `height` space scaled to the stage.
    pub fn set_content_geometry(&mut self, width: f32, height: f32) {
        self.config.content_geometry = Some(Size::new(width, height));
        for layer in self.tree.layers().to_vec() {
            self.tree.set_width(layer, width);
            self.tree.set_height(layer, height);
            scale_layer(&mut self.tree, &self.config, layer);
        }
    }

    /// Find a node by name in any layer.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.tree
            .layers()
            .iter()
            .find_map(|&layer| self.tree.find(layer, name))
    }

    /// Register a module of node kinds. It is sent before the next batch
    /// and replayed on every reconnect.
    pub fn import(&mut self, name: &str, path: &str) {
        self.connection.register_import(name, path);
        if self.connection.is_running() {
            self.scheduler.import(name, path);
            self.tree.wake().request();
        }
    }

    /// Finish a node's replace transition early.
    pub fn settle_replace(&mut self, node: NodeId) {
        self.tree.settle_replace(node);
    }

    pub fn take_events(&mut self) -> Vec<StageEvent> {
        self.events.drain(..).collect()
    }

    /// Announcements from the current renderer, once connected.
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    /// The batch produced by the last sync pass.
    pub fn last_batch(&self) -> &Batch {
        &self.last_batch
    }

    pub fn last_report(&self) -> BatchReport {
        self.last_report
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn generation(&self) -> u64 {
        self.connection.generation()
    }

    pub fn cycles(&self) -> u64 {
        self.scheduler.cycles()
    }

    fn bootstrap(&self) -> Vec<Command> {
        let mut attrs = AttrMap::new();
        attrs.insert("name".to_string(), Value::from(self.config.name.as_str()));
        vec![
            Command::Update {
                id: WireId::STAGE,
                attrs,
            },
            Command::Call {
                id: WireId::STAGE,
                method: "init".to_string(),
                args: vec![self.config.width.into(), self.config.height.into()],
            },
        ]
    }

    /// Run one sync pass and deliver its batch.
    ///
    /// Connects first if needed. Only a connection that cannot be
    /// established at all is an error; a renderer lost mid-way is recovered
    /// on the next pass.
    pub fn sync(&mut self) -> Result<()> {
        let bootstrap = self.bootstrap();
        if let Some(capabilities) = self.connection.ensure_running(bootstrap)? {
            log::info!(
                "renderer offers players {:?} at {:?} Hz",
                capabilities.player_backends,
                capabilities.refresh_rates
            );
            self.capabilities = Some(capabilities);
        }
        if !self.connection.is_running() {
            self.tree.wake().request();
            return Ok(());
        }

        let batch = self.scheduler.run(&mut self.tree, self.config.logical_size())?;
        if !batch.is_empty() {
            match self.connection.deliver(batch.commands()) {
                Ok(report) => self.last_report = report,
                Err(_) => self.recover(&batch),
            }
        }
        self.last_batch = batch;
        self.drain_events();
        Ok(())
    }

    /// Forget the lost renderer's state so the next pass rebuilds the
    /// scene, replaying the calls it may not have seen.
    fn recover(&mut self, failed: &Batch) {
        let replay: Vec<PendingCall> = failed
            .iter()
            .filter_map(|command| match command {
                Command::Call { id, method, args } => {
                    let target = if *id == WireId::STAGE {
                        CallTarget::Stage
                    } else {
                        CallTarget::Node(self.tree.node_for_wire(*id)?)
                    };
                    Some(PendingCall {
                        target,
                        method: method.clone(),
                        args: args.clone(),
                    })
                }
                _ => None,
            })
            .collect();
        self.tree.requeue_calls(replay);
        self.tree.reset_wire_state();
    }

    fn drain_events(&mut self) {
        let events = match self.connection.poll_events() {
            Ok(events) => events,
            Err(_) => {
                // Nothing was in flight; rebuild on the next pass
                self.tree.reset_wire_state();
                return;
            }
        };
        for event in events {
            match event {
                RendererEvent::KeyPress(key) => self.events.push_back(StageEvent::KeyPress(key)),
                RendererEvent::WidgetCall { id, method, args } => {
                    let Some(node) = self.tree.node_for_wire(id) else {
                        log::debug!("dropping `{method}` from unknown renderer node {id:?}");
                        continue;
                    };
                    if method == "replaced" {
                        self.tree.settle_replace(node);
                    }
                    self.events
                        .push_back(StageEvent::WidgetCall { node, method, args });
                }
            }
        }
    }

    /// Wait up to `timeout` for a wake, then sync if one was requested.
    pub fn dispatch(&mut self, timeout: Option<Duration>) -> Result<()> {
        let timeout = if self.tree.wake().is_requested() {
            Some(Duration::ZERO)
        } else {
            timeout
        };
        self.event_loop.dispatch(timeout, &mut ())?;
        if self.tree.wake().is_requested() {
            self.sync()
        } else {
            self.drain_events();
            Ok(())
        }
    }

    /// Drive the stage until `handler` breaks.
    pub fn run<F>(mut self, mut handler: F) -> Result<()>
    where
        F: FnMut(&mut Stage, StageEvent) -> ControlFlow<()>,
    {
        let _ = env_logger::try_init();
        self.sync()?;
        loop {
            self.dispatch(Some(FRAME_INTERVAL))?;
            while let Some(event) = self.events.pop_front() {
                if handler(&mut self, event).is_break() {
                    return Ok(());
                }
            }
        }
    }
}

fn scale_layer(tree: &mut Tree, config: &StageConfig, layer: NodeId) {
    let Some(content) = config.content_geometry else {
        return;
    };
    if content.width > 0.0 && content.height > 0.0 {
        tree.set(layer, "scale_x", config.width / content.width);
        tree.set(layer, "scale_y", config.height / content.height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::kinds;

    #[test]
    fn test_config_builder() {
        let config = StageConfig::default()
            .name("menu")
            .width(800.0)
            .height(600.0)
            .connect_retries(3);
        assert_eq!(config.name, "menu");
        assert_eq!(config.logical_size(), Size::new(800.0, 600.0));
        assert_eq!(config.connect_retries, 3);
        assert_eq!(config.connect_backoff, Duration::from_millis(100));
    }

    #[test]
    fn test_content_geometry_scales_layers() {
        let config = StageConfig::default().width(1920.0).height(1080.0);
        let mut stage = Stage::new(config).unwrap();
        stage.set_content_geometry(1280.0, 720.0);
        let second = stage.add_layer();
        for layer in [stage.layer(), second] {
            assert_eq!(
                stage.tree().get(layer, "scale_x"),
                Some(&Value::from(1.5f32))
            );
            assert_eq!(
                stage.tree().size_spec(layer, crate::layout::Axis::Horizontal),
                Some(crate::layout::SizeSpec::Fixed(1280.0))
            );
        }
    }

    #[test]
    fn test_find_searches_all_layers() {
        let mut stage = Stage::new(StageConfig::default()).unwrap();
        let second = stage.add_layer();
        let label = stage.tree_mut().create(kinds::TEXT);
        stage.tree_mut().set_name(label, "clock");
        stage.add(label, second).unwrap();
        assert_eq!(stage.find("clock"), Some(label));
        assert_eq!(stage.find("missing"), None);
    }
}
