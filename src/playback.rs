//! Playback widgets.
//!
//! A playback widget is an ordinary node of kind `video`: controlling it
//! queues calls like any other node, and the renderer reports back through
//! the usual widget-call events.

use crate::tree::{NodeId, Tree, kinds};
use crate::value::{AttrMap, Value};

/// Handle to a video node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Playback {
    node: NodeId,
}

impl Playback {
    /// Create a new, detached video node.
    pub fn create(tree: &mut Tree) -> Self {
        Self {
            node: tree.create(kinds::VIDEO),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn play(&self, tree: &mut Tree, uri: &str) {
        tree.call(self.node, "play", vec![uri.into()]);
    }

    pub fn stop(&self, tree: &mut Tree) {
        tree.call(self.node, "stop", Vec::new());
    }

    pub fn pause(&self, tree: &mut Tree) {
        tree.call(self.node, "pause", Vec::new());
    }

    pub fn resume(&self, tree: &mut Tree) {
        tree.call(self.node, "resume", Vec::new());
    }

    /// Seek to `position` seconds from the start.
    pub fn seek(&self, tree: &mut Tree, position: f64) {
        tree.call(self.node, "seek", vec![position.into()]);
    }

    pub fn set_audio(&self, tree: &mut Tree, track: i64) {
        tree.call(self.node, "set_audio", vec![track.into()]);
    }

    /// Select a subtitle track, or turn subtitles off with `None`.
    pub fn set_subtitle(&self, tree: &mut Tree, track: Option<i64>) {
        tree.call(self.node, "set_subtitle", vec![track.into()]);
    }

    pub fn set_aspect(&self, tree: &mut Tree, aspect: &str) {
        tree.call(self.node, "set_aspect", vec![aspect.into()]);
    }
}

/// Notification from a playback widget.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Progress {
        position: f64,
        duration: Option<f64>,
    },
    Finished,
    StreamInfo(AttrMap),
}

impl PlaybackEvent {
    /// Decode a widget call, if it is a playback notification.
    pub fn from_widget_call(method: &str, args: &[Value]) -> Option<Self> {
        match method {
            "progress" => {
                let position = args.first().and_then(Value::as_f64)?;
                let duration = args.get(1).and_then(Value::as_f64);
                Some(PlaybackEvent::Progress { position, duration })
            }
            "finished" => Some(PlaybackEvent::Finished),
            "streaminfo" => match args.first() {
                Some(Value::Map(info)) => Some(PlaybackEvent::StreamInfo(info.clone())),
                _ => Some(PlaybackEvent::StreamInfo(AttrMap::new())),
            },
            _ => None,
        }
    }
}
