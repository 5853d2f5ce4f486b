//! Scene model maintained by the headless renderer.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::connection::RendererEvent;
use crate::sync::command::{Command, WireId};
use crate::tree::kinds;
use crate::value::{AttrMap, Value};

const BUILTIN_KINDS: &[&str] = &[
    kinds::STAGE,
    kinds::GROUP,
    kinds::RECTANGLE,
    kinds::TEXT,
    kinds::IMAGE,
    kinds::VIDEO,
];

/// Why a single command could not be applied.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApplyError {
    #[error("no node {0:?}")]
    UnknownNode(WireId),
    #[error("node {0:?} already exists")]
    DuplicateNode(WireId),
    #[error("unknown node kind `{0}`")]
    UnknownKind(String),
    #[error("kind `{kind}` needs module `{module}`, which was not imported")]
    NotImported { module: String, kind: String },
    #[error("cannot move {id:?} under its own descendant {parent:?}")]
    Cycle { id: WireId, parent: WireId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub kind: String,
    pub parent: Option<WireId>,
    /// Bottom to top
    pub children: Vec<WireId>,
    pub attrs: AttrMap,
    pub hidden: bool,
    /// Every method called on this node, in order
    pub calls: Vec<String>,
}

impl SceneNode {
    fn new(kind: String) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            attrs: AttrMap::new(),
            hidden: false,
            calls: Vec::new(),
        }
    }
}

/// Renderer-side view of the scene, keyed by wire id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scene {
    nodes: HashMap<WireId, SceneNode>,
    imports: BTreeMap<String, String>,
    events: Vec<RendererEvent>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: WireId) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn attr(&self, id: WireId, name: &str) -> Option<&Value> {
        self.nodes.get(&id).and_then(|n| n.attrs.get(name))
    }

    pub fn children(&self, id: WireId) -> &[WireId] {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Ids of nodes of the given kind, in ascending order.
    pub fn nodes_of_kind(&self, kind: &str) -> Vec<WireId> {
        let mut ids: Vec<WireId> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.kind == kind)
            .map(|(&id, _)| id)
            .collect();
        ids.sort();
        ids
    }

    /// Whether `id` is reachable from the stage.
    pub fn is_attached(&self, id: WireId) -> bool {
        let mut current = id;
        loop {
            if current == WireId::STAGE {
                return self.nodes.contains_key(&current);
            }
            match self.nodes.get(&current).and_then(|n| n.parent) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    pub fn imports(&self) -> &BTreeMap<String, String> {
        &self.imports
    }

    pub(crate) fn take_events(&mut self) -> Vec<RendererEvent> {
        std::mem::take(&mut self.events)
    }

    fn node_mut(&mut self, id: WireId) -> Result<&mut SceneNode, ApplyError> {
        self.nodes.get_mut(&id).ok_or(ApplyError::UnknownNode(id))
    }

    fn check_kind(&self, kind: &str) -> Result<(), ApplyError> {
        if BUILTIN_KINDS.contains(&kind) {
            return Ok(());
        }
        match kind.rsplit_once('.') {
            Some((module, _)) if self.imports.contains_key(module) => Ok(()),
            Some((module, _)) => Err(ApplyError::NotImported {
                module: module.to_string(),
                kind: kind.to_string(),
            }),
            None => Err(ApplyError::UnknownKind(kind.to_string())),
        }
    }

    fn unlink(&mut self, id: WireId) {
        let parent = self.nodes.get_mut(&id).and_then(|n| n.parent.take());
        if let Some(node) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            node.children.retain(|&c| c != id);
        }
    }

    fn emit(&mut self, id: WireId, method: &str, args: Vec<Value>) {
        self.events.push(RendererEvent::WidgetCall {
            id,
            method: method.to_string(),
            args,
        });
    }

    fn call(&mut self, id: WireId, method: &str, args: &[Value]) -> Result<(), ApplyError> {
        let node = self.node_mut(id)?;
        node.calls.push(method.to_string());
        let is_video = node.kind == kinds::VIDEO;

        match method {
            "hide" => node.hidden = true,
            "show" => node.hidden = false,
            "init" => {
                if let [width, height, ..] = args {
                    node.attrs.insert("width".into(), width.clone());
                    node.attrs.insert("height".into(), height.clone());
                }
            }
            "ensure_redraw" => {}
            "replace" => self.emit(id, "replaced", Vec::new()),
            "play" if is_video => {
                let uri = args.first().cloned().unwrap_or_default();
                node.attrs.insert("uri".into(), uri.clone());
                node.attrs.insert("state".into(), "playing".into());
                let mut info = BTreeMap::new();
                info.insert("uri".to_string(), uri);
                info.insert("audio_tracks".to_string(), Value::from(1));
                info.insert("subtitles".to_string(), Value::from(0));
                self.emit(id, "streaminfo", vec![Value::Map(info)]);
            }
            "stop" if is_video => {
                node.attrs.insert("state".into(), "stopped".into());
                self.emit(id, "finished", Vec::new());
            }
            "pause" if is_video => {
                node.attrs.insert("state".into(), "paused".into());
            }
            "resume" if is_video => {
                node.attrs.insert("state".into(), "playing".into());
            }
            "seek" if is_video => {
                let position = args.first().cloned().unwrap_or_default();
                node.attrs.insert("position".into(), position.clone());
                self.emit(id, "progress", vec![position, Value::Null]);
            }
            "set_audio" | "set_subtitle" | "set_aspect" if is_video => {
                let key = method.trim_start_matches("set_");
                let value = args.first().cloned().unwrap_or_default();
                node.attrs.insert(key.into(), value);
            }
            other => log::warn!("ignoring unknown method `{other}` on {id:?}"),
        }
        Ok(())
    }
}

impl Command {
    /// Apply this command to a renderer scene.
    pub fn apply(&self, scene: &mut Scene) -> Result<(), ApplyError> {
        match self {
            Command::Import { name, path } => {
                scene.imports.insert(name.clone(), path.clone());
            }
            Command::Add { id, kind } => {
                if scene.nodes.contains_key(id) {
                    return Err(ApplyError::DuplicateNode(*id));
                }
                scene.check_kind(kind)?;
                scene.nodes.insert(*id, SceneNode::new(kind.clone()));
            }
            Command::Reparent {
                id,
                parent,
                sibling,
            } => {
                if !scene.nodes.contains_key(id) {
                    return Err(ApplyError::UnknownNode(*id));
                }
                if let Some(parent) = parent {
                    if !scene.nodes.contains_key(parent) {
                        return Err(ApplyError::UnknownNode(*parent));
                    }
                    // Walk up from the new parent looking for `id`
                    let mut current = Some(*parent);
                    while let Some(ancestor) = current {
                        if ancestor == *id {
                            return Err(ApplyError::Cycle {
                                id: *id,
                                parent: *parent,
                            });
                        }
                        current = scene.nodes.get(&ancestor).and_then(|n| n.parent);
                    }
                }

                scene.unlink(*id);
                if let Some(parent) = parent {
                    let children = &mut scene.node_mut(*parent)?.children;
                    let index = match sibling {
                        None => 0,
                        Some(sibling) => match children.iter().position(|c| c == sibling) {
                            Some(pos) => pos + 1,
                            None => {
                                log::warn!("stacking sibling {sibling:?} not under {parent:?}");
                                children.len()
                            }
                        },
                    };
                    children.insert(index, *id);
                    scene.node_mut(*id)?.parent = Some(*parent);
                }
            }
            Command::Position { id, x, y } => {
                let node = scene.node_mut(*id)?;
                node.attrs.insert("x".into(), Value::from(*x));
                node.attrs.insert("y".into(), Value::from(*y));
            }
            Command::Update { id, attrs } => {
                let node = scene.node_mut(*id)?;
                for (key, value) in attrs {
                    node.attrs.insert(key.clone(), value.clone());
                }
            }
            Command::Call { id, method, args } => scene.call(*id, method, args)?,
            Command::Delete { id } => {
                scene.unlink(*id);
                let node = scene
                    .nodes
                    .remove(id)
                    .ok_or(ApplyError::UnknownNode(*id))?;
                for child in node.children {
                    if let Some(child) = scene.nodes.get_mut(&child) {
                        child.parent = None;
                    }
                }
            }
            Command::Freeze => {}
        }
        Ok(())
    }
}
