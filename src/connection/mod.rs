//! The link to the renderer and its lifecycle.
//!
//! ```text
//!   DOWN --spawn--> INITIALIZING --handshake--> RUNNING
//!    ^                                             |
//!    +------------- transport error ---------------+
//! ```
//!
//! Connecting spawns a renderer and retries the handshake a bounded number
//! of times with a fixed backoff; running out of attempts is fatal. Once a
//! handshake succeeds every registered import is replayed, followed by the
//! stage bootstrap commands, and a new connection generation begins. A
//! failed delivery, or a link found closed while polling for events, drops
//! the link back to DOWN; the caller is expected to
//! reset its wire state so the next pass rebuilds the whole scene.

pub mod protocol;
pub mod thread;

use std::thread::sleep;
use std::time::Duration;

pub use protocol::{BatchReport, Capabilities, FromRenderer, RendererEvent, ToRenderer};
pub use thread::{ThreadSpawner, ThreadTransport};

use crate::error::{ConnectError, TransportError};
use crate::sync::command::{Batch, Command, WireId};

/// An open link to one renderer instance.
pub trait Transport {
    /// Perform one connection attempt and return the renderer's
    /// announcements.
    fn handshake(&mut self) -> Result<Capabilities, TransportError>;

    /// Deliver one batch in wire order and block until the renderer
    /// acknowledges it.
    fn deliver(&mut self, commands: Vec<Command>) -> Result<BatchReport, TransportError>;

    /// Events received since the last call, without blocking. Reports
    /// [`TransportError::Closed`] once the renderer is gone.
    fn poll_events(&mut self) -> Result<Vec<RendererEvent>, TransportError>;
}

/// Starts renderer instances.
pub trait Spawner {
    fn spawn(&mut self) -> Result<Box<dyn Transport>, ConnectError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Down,
    Initializing,
    Running,
}

/// Owns the renderer link and drives the connection state machine.
pub struct ConnectionManager {
    spawner: Box<dyn Spawner>,
    transport: Option<Box<dyn Transport>>,
    state: ConnectionState,
    retries: u32,
    backoff: Duration,
    imports: Vec<(String, String)>,
    generation: u64,
}

impl ConnectionManager {
    pub fn new(spawner: Box<dyn Spawner>, retries: u32, backoff: Duration) -> Self {
        Self {
            spawner,
            transport: None,
            state: ConnectionState::Down,
            retries,
            backoff,
            imports: Vec::new(),
            generation: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ConnectionState::Running
    }

    /// Number of connections established so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Remember an import so it is replayed on every new connection.
    pub fn register_import(&mut self, name: &str, path: &str) {
        if !self.imports.iter().any(|(n, _)| n == name) {
            self.imports.push((name.to_string(), path.to_string()));
        }
    }

    /// Bring the link up if it is down.
    ///
    /// Returns the renderer's capabilities when a new connection was made,
    /// `None` if the link was already running or the bootstrap batch could
    /// not be delivered.
    pub fn ensure_running(
        &mut self,
        bootstrap: Vec<Command>,
    ) -> Result<Option<Capabilities>, ConnectError> {
        if self.is_running() {
            return Ok(None);
        }

        self.state = ConnectionState::Initializing;
        let mut transport = match self.spawner.spawn() {
            Ok(transport) => transport,
            Err(err) => {
                self.state = ConnectionState::Down;
                return Err(err);
            }
        };

        let mut capabilities = None;
        for attempt in 1..=self.retries {
            match transport.handshake() {
                Ok(caps) => {
                    capabilities = Some(caps);
                    break;
                }
                Err(err) => {
                    log::debug!("connect attempt {attempt}/{} failed: {err}", self.retries);
                    sleep(self.backoff);
                }
            }
        }
        let Some(capabilities) = capabilities else {
            self.state = ConnectionState::Down;
            return Err(ConnectError::RetriesExhausted {
                attempts: self.retries,
            });
        };

        let mut batch = Batch::new();
        for (name, path) in &self.imports {
            batch.staging.push(Command::Import {
                name: name.clone(),
                path: path.clone(),
            });
        }
        batch.staging.push(Command::Add {
            id: WireId::STAGE,
            kind: crate::tree::kinds::STAGE.to_string(),
        });
        batch.commit.extend(bootstrap);

        if let Err(err) = transport.deliver(batch.into_commands()) {
            log::warn!("renderer failed during bootstrap: {err}");
            self.state = ConnectionState::Down;
            return Ok(None);
        }

        self.transport = Some(transport);
        self.state = ConnectionState::Running;
        self.generation += 1;
        log::info!("renderer connected (generation {})", self.generation);
        Ok(Some(capabilities))
    }

    /// Deliver a batch. Any failure drops the link.
    pub fn deliver(&mut self, commands: Vec<Command>) -> Result<BatchReport, TransportError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(TransportError::Closed);
        };
        match transport.deliver(commands) {
            Ok(report) => {
                if report.failed > 0 {
                    log::warn!("renderer skipped {} of {} commands", report.failed, report.applied + report.failed);
                }
                Ok(report)
            }
            Err(err) => {
                log::warn!("renderer link lost: {err}");
                self.disconnect();
                Err(err)
            }
        }
    }

    /// Collect pending renderer events. A closed link drops back to DOWN
    /// even when no batch is in flight.
    pub fn poll_events(&mut self) -> Result<Vec<RendererEvent>, TransportError> {
        let Some(transport) = self.transport.as_mut() else {
            return Ok(Vec::new());
        };
        match transport.poll_events() {
            Ok(events) => Ok(events),
            Err(err) => {
                log::warn!("renderer link lost while idle: {err}");
                self.disconnect();
                Err(err)
            }
        }
    }

    /// Drop the current link and go back to DOWN.
    pub fn disconnect(&mut self) {
        self.transport = None;
        self.state = ConnectionState::Down;
    }
}
