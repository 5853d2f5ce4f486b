//! Transport to a renderer running on its own thread in this process.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;

use calloop::channel::Sender;

use super::protocol::{BatchReport, Capabilities, FromRenderer, RendererEvent, ToRenderer};
use super::{Spawner, Transport};
use crate::error::{ConnectError, TransportError};
use crate::renderer::{self, RendererControl};
use crate::sync::command::Command;

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Spawns a [headless renderer](crate::renderer) thread per connection.
pub struct ThreadSpawner {
    capabilities: Capabilities,
    control: RendererControl,
    handshake_timeout: Duration,
}

impl ThreadSpawner {
    pub fn new() -> Self {
        Self {
            capabilities: Capabilities {
                player_backends: vec!["headless".to_string()],
                refresh_rates: vec![60.0],
            },
            control: RendererControl::new(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Handle to whichever renderer thread is currently running.
    pub fn control(&self) -> RendererControl {
        self.control.clone()
    }
}

impl Default for ThreadSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl Spawner for ThreadSpawner {
    fn spawn(&mut self) -> Result<Box<dyn Transport>, ConnectError> {
        let (inbox, outbox, thread) =
            renderer::spawn(self.control.clone(), self.capabilities.clone())?;
        Ok(Box::new(ThreadTransport {
            inbox,
            outbox,
            events: Vec::new(),
            handshake_timeout: self.handshake_timeout,
            _thread: thread,
        }))
    }
}

/// App side of the channels to a renderer thread.
pub struct ThreadTransport {
    inbox: Sender<ToRenderer>,
    outbox: Receiver<FromRenderer>,
    /// Events that arrived while waiting for an answer
    events: Vec<RendererEvent>,
    handshake_timeout: Duration,
    _thread: JoinHandle<()>,
}

impl ThreadTransport {
    fn send(&self, message: ToRenderer) -> Result<(), TransportError> {
        self.inbox
            .send(message)
            .map_err(|err| TransportError::Send(err.to_string()))
    }
}

impl Drop for ThreadTransport {
    fn drop(&mut self) {
        // Stop the thread when the link is abandoned; fails if it is gone
        let _ = self.inbox.send(ToRenderer::Shutdown);
    }
}

impl Transport for ThreadTransport {
    fn handshake(&mut self) -> Result<Capabilities, TransportError> {
        self.send(ToRenderer::Hello)?;
        loop {
            match self.outbox.recv_timeout(self.handshake_timeout) {
                Ok(FromRenderer::Ready(capabilities)) => return Ok(capabilities),
                Ok(FromRenderer::Event(event)) => self.events.push(event),
                Ok(FromRenderer::Ack(_)) => {}
                Err(RecvTimeoutError::Timeout) => {
                    return Err(TransportError::Timeout(self.handshake_timeout));
                }
                Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Closed),
            }
        }
    }

    fn deliver(&mut self, commands: Vec<Command>) -> Result<BatchReport, TransportError> {
        self.send(ToRenderer::Batch(commands))?;
        // No timeout: a stalled renderer only shows up as a closed channel
        loop {
            match self.outbox.recv() {
                Ok(FromRenderer::Ack(report)) => return Ok(report),
                Ok(FromRenderer::Event(event)) => self.events.push(event),
                // Late answer to an earlier handshake attempt
                Ok(FromRenderer::Ready(_)) => {}
                Err(_) => return Err(TransportError::Closed),
            }
        }
    }

    fn poll_events(&mut self) -> Result<Vec<RendererEvent>, TransportError> {
        loop {
            match self.outbox.try_recv() {
                Ok(FromRenderer::Event(event)) => self.events.push(event),
                Ok(_) => {}
                Err(TryRecvError::Empty) => return Ok(std::mem::take(&mut self.events)),
                Err(TryRecvError::Disconnected) => return Err(TransportError::Closed),
            }
        }
    }
}
