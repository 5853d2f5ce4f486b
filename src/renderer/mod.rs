//! Headless renderer running on its own thread.
//!
//! This is the reference applier for batches: it keeps a [`Scene`] instead
//! of drawing, but follows the same contract a drawing renderer does. Each
//! command is applied in isolation, so a failing command is logged and the
//! rest of the batch still goes through. Commands before the freeze marker
//! are interleaved with yield points; everything after it is applied in one
//! go.
//!
//! The thread owns a `calloop` event loop fed through a
//! [`calloop::channel`], mirroring how a windowed renderer would wait on its
//! display connection and the application link at the same time.

pub mod scene;

use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use calloop::EventLoop;
use calloop::channel::{self, Channel, Sender};

pub use scene::{ApplyError, Scene, SceneNode};

use crate::connection::protocol::{
    BatchReport, Capabilities, FromRenderer, RendererEvent, ToRenderer,
};
use crate::sync::command::Command;

struct Shared {
    inbox: Option<Sender<ToRenderer>>,
    scene: Scene,
    spawns: u32,
}

/// Test and tooling handle to the current renderer thread.
///
/// It survives respawns: after a crash the same handle controls the new
/// renderer.
#[derive(Clone)]
pub struct RendererControl {
    shared: Arc<Mutex<Shared>>,
}

impl RendererControl {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                inbox: None,
                scene: Scene::new(),
                spawns: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, message: ToRenderer) -> bool {
        match &self.lock().inbox {
            Some(inbox) => inbox.send(message).is_ok(),
            None => false,
        }
    }

    /// Stop the renderer as if it crashed. Returns false if none is running.
    pub fn kill(&self) -> bool {
        let killed = self.send(ToRenderer::Shutdown);
        self.lock().inbox = None;
        killed
    }

    /// Make the renderer report a key press.
    pub fn inject_key(&self, key: impl Into<String>) -> bool {
        self.send(ToRenderer::InjectKey(key.into()))
    }

    /// A copy of the current scene.
    pub fn scene(&self) -> Scene {
        self.lock().scene.clone()
    }

    /// How many renderer threads have been started.
    pub fn spawns(&self) -> u32 {
        self.lock().spawns
    }
}

impl Default for RendererControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Start a renderer thread with a fresh scene.
pub fn spawn(
    control: RendererControl,
    capabilities: Capabilities,
) -> std::io::Result<(Sender<ToRenderer>, Receiver<FromRenderer>, JoinHandle<()>)> {
    let (inbox, channel) = channel::channel();
    let (outbox, replies) = mpsc::channel();

    let spawn_number = {
        let mut shared = control.lock();
        shared.scene = Scene::new();
        shared.inbox = Some(inbox.clone());
        shared.spawns += 1;
        shared.spawns
    };

    let state = RendererState {
        control,
        capabilities,
        outbox,
        running: true,
    };
    let thread = thread::Builder::new()
        .name(format!("renderer-{spawn_number}"))
        .spawn(move || {
            if let Err(err) = run(channel, state) {
                log::error!("renderer event loop failed: {err}");
            }
        })?;
    Ok((inbox, replies, thread))
}

struct RendererState {
    control: RendererControl,
    capabilities: Capabilities,
    outbox: mpsc::Sender<FromRenderer>,
    running: bool,
}

fn run(channel: Channel<ToRenderer>, mut state: RendererState) -> Result<(), calloop::Error> {
    let mut event_loop: EventLoop<RendererState> = EventLoop::try_new()?;
    event_loop
        .handle()
        .insert_source(channel, |event, _, state: &mut RendererState| match event {
            channel::Event::Msg(message) => state.handle(message),
            channel::Event::Closed => state.running = false,
        })
        .map_err(|err| err.error)?;

    while state.running {
        event_loop.dispatch(None, &mut state)?;
    }
    log::debug!("renderer thread exiting");
    Ok(())
}

impl RendererState {
    fn reply(&mut self, message: FromRenderer) {
        if self.outbox.send(message).is_err() {
            // Application side is gone
            self.running = false;
        }
    }

    fn handle(&mut self, message: ToRenderer) {
        // Messages queued behind a shutdown are never answered
        if !self.running {
            return;
        }
        match message {
            ToRenderer::Hello => {
                let capabilities = self.capabilities.clone();
                self.reply(FromRenderer::Ready(capabilities));
            }
            ToRenderer::Batch(commands) => {
                let (report, events) = {
                    let mut shared = self.control.lock();
                    let report = apply_batch(&mut shared.scene, &commands);
                    (report, shared.scene.take_events())
                };
                for event in events {
                    self.reply(FromRenderer::Event(event));
                }
                self.reply(FromRenderer::Ack(report));
            }
            ToRenderer::InjectKey(key) => {
                self.reply(FromRenderer::Event(RendererEvent::KeyPress(key)));
            }
            ToRenderer::Shutdown => self.running = false,
        }
    }
}

/// Apply commands in order, isolating failures.
pub fn apply_batch(scene: &mut Scene, commands: &[Command]) -> BatchReport {
    let mut report = BatchReport::default();
    let mut frozen = false;
    for command in commands {
        if let Command::Freeze = command {
            frozen = true;
            continue;
        }
        if !frozen {
            // A drawing renderer would run pending animation frames here
            report.yields += 1;
        }
        match command.apply(scene) {
            Ok(()) => report.applied += 1,
            Err(err) => {
                log::error!("failed to apply {}: {err}", command.name());
                report.failed += 1;
            }
        }
    }
    report
}
