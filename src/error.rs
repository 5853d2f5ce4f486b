use std::time::Duration;

use thiserror::Error;

use crate::tree::NodeId;

/// Errors raised while building or mutating the node tree.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error("node {0:?} does not exist")]
    UnknownNode(NodeId),
    #[error("attaching {child:?} to {parent:?} would make it its own ancestor")]
    ParentCycle { child: NodeId, parent: NodeId },
    #[error("sibling references form a cycle: {nodes:?}")]
    ReferenceCycle { nodes: Vec<NodeId> },
    #[error("{node:?} references {target:?}, which is not one of its siblings")]
    NotASibling { node: NodeId, target: NodeId },
}

/// Layout misconfiguration found while resolving geometry.
pub type LayoutError = TreeError;

/// Failure of the link to the renderer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("renderer link closed")]
    Closed,
    #[error("failed to send to renderer: {0}")]
    Send(String),
    #[error("renderer did not answer within {0:?}")]
    Timeout(Duration),
}

/// Failure to bring the renderer up.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("failed to spawn renderer: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("renderer did not accept a connection after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Errors returned by the [`Stage`](crate::Stage).
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("event loop error: {0}")]
    EventLoop(#[from] calloop::Error),
    #[error("failed to create wake primitive: {0}")]
    Wake(std::io::Error),
}

pub type Result<T> = std::result::Result<T, StageError>;
