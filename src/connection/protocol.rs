//! Messages exchanged with a renderer.

use crate::sync::command::{Command, WireId};
use crate::value::Value;

/// Application -> renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum ToRenderer {
    /// Connection attempt; answered with [`FromRenderer::Ready`].
    Hello,
    /// One batch in wire order; answered with [`FromRenderer::Ack`].
    Batch(Vec<Command>),
    /// Simulate a key press on the renderer side.
    InjectKey(String),
    /// Stop the renderer without answering anything else.
    Shutdown,
}

/// Renderer -> application.
#[derive(Debug, Clone, PartialEq)]
pub enum FromRenderer {
    Ready(Capabilities),
    Ack(BatchReport),
    Event(RendererEvent),
}

/// One-time announcements made by a renderer when a connection comes up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capabilities {
    pub player_backends: Vec<String>,
    pub refresh_rates: Vec<f32>,
}

/// How a batch went on the renderer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub applied: usize,
    pub failed: usize,
    /// Points at which the renderer yielded to its own loop.
    pub yields: usize,
}

/// Notifications raised by the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum RendererEvent {
    KeyPress(String),
    WidgetCall {
        id: WireId,
        method: String,
        args: Vec<Value>,
    },
}
