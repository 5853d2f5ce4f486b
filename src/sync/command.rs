//! Batch command definitions for the renderer link.

use std::fmt;

use crate::value::{AttrMap, Value};

/// Identifier of a node on the renderer side.
///
/// Wire ids are scoped to one connection generation: they are handed out in
/// creation order when a node's `add` is emitted and are never reused while
/// the generation lives. After a resync every node gets a fresh one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WireId(pub u64);

impl WireId {
    /// The renderer's stage object.
    pub const STAGE: WireId = WireId(0);
}

impl fmt::Debug for WireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A single renderer operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Load a module providing additional node kinds.
    Import { name: String, path: String },
    /// Create a node of the given kind.
    Add { id: WireId, kind: String },
    /// Move a node under `parent`, directly above `sibling` in stacking
    /// order (or at the bottom when `sibling` is `None`). A `None` parent
    /// detaches the node.
    Reparent {
        id: WireId,
        parent: Option<WireId>,
        sibling: Option<WireId>,
    },
    /// Move a node without touching its content.
    Position { id: WireId, x: f32, y: f32 },
    /// Changed attributes of a node.
    Update { id: WireId, attrs: AttrMap },
    /// Invoke a method on a node.
    Call {
        id: WireId,
        method: String,
        args: Vec<Value>,
    },
    /// Destroy a node.
    Delete { id: WireId },
    /// Everything after this marker must be applied without yielding.
    Freeze,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Import { .. } => "import",
            Command::Add { .. } => "add",
            Command::Reparent { .. } => "reparent",
            Command::Position { .. } => "position",
            Command::Update { .. } => "update",
            Command::Call { .. } => "call",
            Command::Delete { .. } => "delete",
            Command::Freeze => "freeze",
        }
    }

    /// The node this command targets, if any.
    pub fn target(&self) -> Option<WireId> {
        match self {
            Command::Add { id, .. }
            | Command::Reparent { id, .. }
            | Command::Position { id, .. }
            | Command::Update { id, .. }
            | Command::Call { id, .. }
            | Command::Delete { id } => Some(*id),
            Command::Import { .. } | Command::Freeze => None,
        }
    }
}

/// The ordered command list produced by one sync pass.
///
/// Commands are split at the freeze marker: `staging` holds what may be
/// applied while the renderer keeps animating (imports, creation of new
/// nodes and their first update), `commit` holds what changes the visible
/// scene and must be applied in one go.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub staging: Vec<Command>,
    pub commit: Vec<Command>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.staging.is_empty() && self.commit.is_empty()
    }

    /// Number of commands, not counting the freeze marker.
    pub fn len(&self) -> usize {
        self.staging.len() + self.commit.len()
    }

    /// The wire form: staging commands, the freeze marker, commit commands.
    /// An empty batch has no marker.
    pub fn commands(&self) -> Vec<Command> {
        if self.is_empty() {
            return Vec::new();
        }
        let mut commands = Vec::with_capacity(self.len() + 1);
        commands.extend(self.staging.iter().cloned());
        commands.push(Command::Freeze);
        commands.extend(self.commit.iter().cloned());
        commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        if self.is_empty() {
            return Vec::new();
        }
        let mut commands = self.staging;
        commands.push(Command::Freeze);
        commands.extend(self.commit);
        commands
    }

    /// Iterate all commands in wire order, marker included.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        static FREEZE: Command = Command::Freeze;
        let marker = (!self.is_empty()).then_some(&FREEZE);
        self.staging.iter().chain(marker).chain(self.commit.iter())
    }
}
