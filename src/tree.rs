//! Arena-based node storage with dirty tracking.
//!
//! The Tree owns every node of the scene graph. Nodes address each other by
//! [`NodeId`]: a node's children are an owned id list and its parent is a
//! plain id back-reference, so ownership stays tree-shaped and there is no
//! reference cycle to manage.
//!
//! ## Key Features
//!
//! - **Monotonic Ids**: ids are handed out in creation order and never
//!   reused, so sorting by id yields creation order.
//!
//! - **Dirty Bubbling**: [`Tree::mark_dirty`] flags a node and walks up its
//!   ancestors, stopping at the first one that is already dirty. A burst of
//!   mutations under the same subtree costs O(depth) once per sync pass.
//!
//! - **Edge-Triggered Wake**: every clean -> dirty transition requests a sync
//!   pass on the injected [`Wake`]; requests coalesce until the pass runs.
//!
//! - **Last-Sent Cache**: each node remembers the attribute values the
//!   renderer last received, so [`Tree::diff`] yields exactly what changed.

use std::collections::HashMap;
use std::fmt;

use bitflags::bitflags;

use crate::context::{Binding, Context, Dependencies, FactoryRef};
use crate::error::TreeError;
use crate::layout::{Align, Axis, PerAxis, Rect, Reference, Size, SizeSpec};
use crate::sync::command::WireId;
use crate::sync::wake::Wake;
use crate::value::{AttrMap, Value};

/// Common node kinds understood by the renderer without imports.
pub mod kinds {
    pub const STAGE: &str = "stage";
    pub const GROUP: &str = "group";
    pub const RECTANGLE: &str = "rectangle";
    pub const TEXT: &str = "text";
    pub const IMAGE: &str = "image";
    pub const VIDEO: &str = "video";
}

/// Attribute names carrying resolved geometry.
pub mod attrs {
    pub const X: &str = "x";
    pub const Y: &str = "y";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
}

/// Unique identifier for a node. Never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

bitflags! {
    /// Synchronization state of a node.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// Node (or a descendant) has changes the renderer has not seen
        const DIRTY     = 0b0001;
        /// Node does not exist on the renderer yet
        const UNCREATED = 0b0010;
        /// Node's parent or stacking position changed
        const REPARENT  = 0b0100;
        /// Node is animating out after being replaced
        const OUTGOING  = 0b1000;
    }
}

/// Target of a queued imperative call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    Stage,
    Node(NodeId),
}

/// An imperative call waiting for the next batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCall {
    pub target: CallTarget,
    pub method: String,
    pub args: Vec<Value>,
}

/// A node in the tree.
pub(crate) struct Node {
    pub kind: String,
    pub name: Option<String>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub flags: NodeFlags,
    pub is_layer: bool,

    // Declared geometry
    pub x: f32,
    pub y: f32,
    pub size: PerAxis<SizeSpec>,
    pub align: PerAxis<Align>,
    pub reference: PerAxis<Reference>,
    pub content_size: Option<Size>,

    // Derived geometry
    pub resolved: Rect,
    pub intrinsic: Option<Size>,

    pub attrs: AttrMap,
    /// Values the renderer last received, by attribute
    pub sent: AttrMap,
    pub wire: Option<WireId>,

    pub context: Context,
    pub pending_context: Option<Context>,
    pub dependencies: Dependencies,
    pub origin: Option<FactoryRef>,
}

impl Node {
    fn new(kind: String) -> Self {
        Self {
            kind,
            name: None,
            parent: None,
            children: Vec::new(),
            flags: NodeFlags::DIRTY | NodeFlags::UNCREATED | NodeFlags::REPARENT,
            is_layer: false,
            x: 0.0,
            y: 0.0,
            size: PerAxis::default(),
            align: PerAxis::default(),
            reference: PerAxis::default(),
            content_size: None,
            resolved: Rect::default(),
            intrinsic: None,
            attrs: AttrMap::new(),
            sent: AttrMap::new(),
            wire: None,
            context: Context::new(),
            pending_context: None,
            dependencies: Dependencies::default(),
            origin: None,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(NodeFlags::DIRTY)
    }

    /// Reference mode that applies on `axis`: only percentages look past the
    /// parent.
    pub fn effective_reference(&self, axis: Axis) -> Reference {
        match self.size.get(axis) {
            SizeSpec::Percent(_) => self.reference.get(axis),
            _ => Reference::Parent,
        }
    }

    /// Every tracked attribute with its current resolved value.
    fn tracked(&self) -> AttrMap {
        let mut tracked = self.attrs.clone();
        tracked.insert(attrs::X.into(), Value::from(self.resolved.x));
        tracked.insert(attrs::Y.into(), Value::from(self.resolved.y));
        tracked.insert(attrs::WIDTH.into(), Value::from(self.resolved.width));
        tracked.insert(attrs::HEIGHT.into(), Value::from(self.resolved.height));
        tracked
    }

    /// Compare tracked values against the last-sent cache, update the cache
    /// and return the entries that changed.
    fn diff(&mut self) -> AttrMap {
        let mut changed = AttrMap::new();
        for (key, value) in self.tracked() {
            if self.sent.get(&key) != Some(&value) {
                self.sent.insert(key.clone(), value.clone());
                changed.insert(key, value);
            }
        }
        changed
    }
}

/// Central arena for nodes and their sync bookkeeping.
pub struct Tree {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
    layers: Vec<NodeId>,
    wake: Wake,
    calls: Vec<PendingCall>,
    deletes: Vec<WireId>,
    /// Detached nodes that still exist on the renderer
    detached: Vec<NodeId>,
    /// Outgoing node -> the group it was replaced in
    outgoing: HashMap<NodeId, NodeId>,
    wire_index: HashMap<WireId, NodeId>,
    next_wire: u64,
    dirty_marks: u64,
}

impl Tree {
    /// Create an empty tree that is synced manually.
    pub fn new() -> Self {
        Self::with_wake(Wake::detached())
    }

    /// Create an empty tree that requests sync passes on `wake`.
    pub fn with_wake(wake: Wake) -> Self {
        Self {
            nodes: HashMap::new(),
            next_id: 1,
            layers: Vec::new(),
            wake,
            calls: Vec::new(),
            deletes: Vec::new(),
            detached: Vec::new(),
            outgoing: HashMap::new(),
            wire_index: HashMap::new(),
            next_wire: 1,
            dirty_marks: 0,
        }
    }

    pub fn wake(&self) -> &Wake {
        &self.wake
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    /// Create a detached node of the given kind.
    ///
    /// The node is queued for creation on the renderer once it is attached
    /// to a layer.
    pub fn create(&mut self, kind: impl Into<String>) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node::new(kind.into()));
        id
    }

    /// Create a top-level layer with a fixed size.
    pub fn create_layer(&mut self, size: Size) -> NodeId {
        let id = self.create(kinds::GROUP);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.is_layer = true;
            node.size = PerAxis {
                horizontal: SizeSpec::Fixed(size.width),
                vertical: SizeSpec::Fixed(size.height),
            };
        }
        self.layers.push(id);
        self.wake.request();
        id
    }

    /// Layers in stacking order.
    pub fn layers(&self) -> &[NodeId] {
        &self.layers
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn kind(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(&id).map(|n| n.kind.as_str())
    }

    /// Attach `child` as the last child of `parent`, or detach it with
    /// `None`.
    pub fn set_parent(&mut self, child: NodeId, parent: Option<NodeId>) -> Result<(), TreeError> {
        match parent {
            Some(parent) => {
                let index = self.children(parent).len();
                self.insert_child(parent, index, child)
            }
            None => self.detach(child),
        }
    }

    /// Attach `child` under `parent` at `index` in stacking order.
    pub fn insert_child(
        &mut self,
        parent: NodeId,
        index: usize,
        child: NodeId,
    ) -> Result<(), TreeError> {
        if !self.contains(child) {
            return Err(TreeError::UnknownNode(child));
        }
        if !self.contains(parent) {
            return Err(TreeError::UnknownNode(parent));
        }
        if self.is_ancestor_or_self(child, parent) {
            return Err(TreeError::ParentCycle { child, parent });
        }

        let old_parent = self.parent(child);
        self.unlink(child);
        self.detached.retain(|&d| d != child);
        let parent_context = match self.nodes.get_mut(&parent) {
            Some(node) => {
                let index = index.min(node.children.len());
                node.children.insert(index, child);
                node.context.clone()
            }
            None => Context::default(),
        };
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = Some(parent);
            node.flags |= NodeFlags::REPARENT | NodeFlags::DIRTY;
            // Inherit the parent's context unless the node was built for one
            if node.origin.is_none() {
                node.context = parent_context;
            }
        }
        // The old parent lost a child: its box and intrinsic size may shrink
        if let Some(old_parent) = old_parent
            && old_parent != parent
        {
            self.mark_dirty(old_parent);
        }
        self.mark_dirty(parent);
        Ok(())
    }

    /// Detach a node from its parent. The node stays alive and keeps its
    /// renderer object.
    pub fn detach(&mut self, id: NodeId) -> Result<(), TreeError> {
        if !self.contains(id) {
            return Err(TreeError::UnknownNode(id));
        }
        let Some(parent) = self.parent(id) else {
            return Ok(());
        };
        self.unlink(id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.flags |= NodeFlags::REPARENT | NodeFlags::DIRTY;
        }
        if !self.detached.contains(&id) {
            self.detached.push(id);
        }
        self.mark_dirty(parent);
        Ok(())
    }

    /// Remove `id` from its parent's child list without flagging anything.
    fn unlink(&mut self, id: NodeId) {
        let Some(parent) = self.nodes.get_mut(&id).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.retain(|&c| c != id);
            node.intrinsic = None;
        }
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, mut id: NodeId) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match self.parent(id) {
                Some(parent) => id = parent,
                None => return false,
            }
        }
    }

    /// Destroy a node and its subtree.
    ///
    /// Every destroyed node that exists on the renderer is queued for
    /// deletion, children before parents. Destroying an unknown id is a
    /// no-op.
    pub fn destroy(&mut self, id: NodeId) {
        if !self.contains(id) {
            return;
        }
        if let Some(parent) = self.parent(id) {
            self.unlink(id);
            self.mark_dirty(parent);
        }
        self.layers.retain(|&l| l != id);
        self.destroy_subtree(id);
        self.wake.request();
    }

    fn destroy_subtree(&mut self, id: NodeId) {
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        for child in node.children {
            self.destroy_subtree(child);
        }
        // Nodes still animating out of this group go with it
        let outgoing: Vec<NodeId> = self
            .outgoing
            .iter()
            .filter(|&(_, &group)| group == id)
            .map(|(&o, _)| o)
            .collect();
        for o in outgoing {
            self.outgoing.remove(&o);
            self.destroy_subtree(o);
        }
        self.outgoing.remove(&id);
        self.detached.retain(|&d| d != id);
        if let Some(wire) = node.wire {
            self.wire_index.remove(&wire);
            self.deletes.push(wire);
        }
    }

    /// Find a node by name in the subtree rooted at `root`.
    pub fn find(&self, root: NodeId, name: &str) -> Option<NodeId> {
        let node = self.nodes.get(&root)?;
        if node.name.as_deref() == Some(name) {
            return Some(root);
        }
        node.children.iter().find_map(|&c| self.find(c, name))
    }

    // ------------------------------------------------------------------
    // Dirty tracking
    // ------------------------------------------------------------------

    /// Mark a node as having unsynchronized changes.
    ///
    /// The flag bubbles up through the ancestors and stops at the first one
    /// that is already dirty, since its ancestors must be dirty as well.
    pub fn mark_dirty(&mut self, id: NodeId) {
        self.invalidate_intrinsic(id);

        let mut current = id;
        let mut transitioned = false;

        loop {
            let Some(node) = self.nodes.get_mut(&current) else {
                break;
            };
            // Stop if already dirty - the rest of the chain is flagged too
            if node.is_dirty() {
                break;
            }
            node.flags |= NodeFlags::DIRTY;
            self.dirty_marks += 1;
            transitioned = true;

            match node.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }

        if transitioned {
            self.wake.request();
        }
    }

    /// Drop the cached intrinsic size of `id` and of every ancestor.
    ///
    /// Unlike the dirty flag this never stops early: an ancestor may have
    /// cached its size while already dirty.
    fn invalidate_intrinsic(&mut self, id: NodeId) {
        let mut current = id;
        while let Some(node) = self.nodes.get_mut(&current) {
            node.intrinsic = None;
            match node.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
    }

    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(Node::is_dirty)
    }

    pub fn flags(&self, id: NodeId) -> Option<NodeFlags> {
        self.nodes.get(&id).map(|n| n.flags)
    }

    /// Number of clean -> dirty transitions so far.
    pub fn dirty_marks(&self) -> u64 {
        self.dirty_marks
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    /// Set a tracked attribute. Setting the current value is a no-op.
    pub fn set(&mut self, id: NodeId, attr: &str, value: impl Into<Value>) {
        let value = value.into();
        let Some(node) = self.nodes.get_mut(&id) else {
            log::warn!("set `{attr}` on unknown node {id:?}");
            return;
        };
        if node.attrs.get(attr) == Some(&value) {
            return;
        }
        node.attrs.insert(attr.to_string(), value);
        self.mark_dirty(id);
    }

    pub fn get(&self, id: NodeId, attr: &str) -> Option<&Value> {
        self.nodes.get(&id).and_then(|n| n.attrs.get(attr))
    }

    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.name = Some(name.into());
        }
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(&id).and_then(|n| n.name.as_deref())
    }

    /// Apply `f` to a node's declared geometry and mark it dirty if
    /// anything changed.
    fn update_geometry(&mut self, id: NodeId, f: impl FnOnce(&mut Node) -> bool) {
        let changed = match self.nodes.get_mut(&id) {
            Some(node) => f(node),
            None => false,
        };
        if changed {
            self.mark_dirty(id);
        }
    }

    pub fn set_x(&mut self, id: NodeId, x: f32) {
        self.update_geometry(id, |n| std::mem::replace(&mut n.x, x) != x);
    }

    pub fn set_y(&mut self, id: NodeId, y: f32) {
        self.update_geometry(id, |n| std::mem::replace(&mut n.y, y) != y);
    }

    pub fn set_position(&mut self, id: NodeId, x: f32, y: f32) {
        self.set_x(id, x);
        self.set_y(id, y);
    }

    pub fn set_size_spec(&mut self, id: NodeId, axis: Axis, spec: SizeSpec) {
        self.update_geometry(id, |n| {
            let old = n.size.get(axis);
            n.size.set(axis, spec);
            old != spec
        });
    }

    pub fn set_width(&mut self, id: NodeId, width: impl Into<SizeSpec>) {
        self.set_size_spec(id, Axis::Horizontal, width.into());
    }

    pub fn set_height(&mut self, id: NodeId, height: impl Into<SizeSpec>) {
        self.set_size_spec(id, Axis::Vertical, height.into());
    }

    pub fn set_align(&mut self, id: NodeId, axis: Axis, align: Align) {
        self.update_geometry(id, |n| {
            let old = n.align.get(axis);
            n.align.set(axis, align);
            old != align
        });
    }

    /// Natural content size of a leaf (text extents, image dimensions).
    pub fn set_content_size(&mut self, id: NodeId, size: Option<Size>) {
        self.update_geometry(id, |n| std::mem::replace(&mut n.content_size, size) != size);
    }

    /// Set what a percentage size on `axis` is relative to.
    ///
    /// A reference to a specific sibling must not close a cycle of sibling
    /// references; such a configuration is rejected with the offending
    /// nodes.
    pub fn set_reference(
        &mut self,
        id: NodeId,
        axis: Axis,
        reference: Reference,
    ) -> Result<(), TreeError> {
        if !self.contains(id) {
            return Err(TreeError::UnknownNode(id));
        }
        if let Reference::Sibling(target) = reference {
            if !self.contains(target) {
                return Err(TreeError::UnknownNode(target));
            }
            if let Some(parent) = self.parent(id)
                && self.parent(target) != Some(parent)
            {
                return Err(TreeError::NotASibling { node: id, target });
            }
            if let Some(nodes) = self.reference_cycle(id, axis, reference) {
                return Err(TreeError::ReferenceCycle { nodes });
            }
        }
        self.update_geometry(id, |n| {
            let old = n.reference.get(axis);
            n.reference.set(axis, reference);
            old != reference
        });
        Ok(())
    }

    /// The chain of nodes that would form a cycle if `id` referenced
    /// `reference` on `axis`.
    pub(crate) fn reference_cycle(
        &self,
        id: NodeId,
        axis: Axis,
        reference: Reference,
    ) -> Option<Vec<NodeId>> {
        let Reference::Sibling(mut current) = reference else {
            return None;
        };
        let mut path = vec![id];
        loop {
            if current == id {
                return Some(path);
            }
            if path.contains(&current) {
                // A cycle not involving `id`; reported when it was formed
                return None;
            }
            path.push(current);
            match self.nodes.get(&current).map(|n| n.reference.get(axis)) {
                Some(Reference::Sibling(next)) => current = next,
                _ => return None,
            }
        }
    }

    pub fn size_spec(&self, id: NodeId, axis: Axis) -> Option<SizeSpec> {
        self.nodes.get(&id).map(|n| n.size.get(axis))
    }

    /// The box computed by the last layout pass.
    pub fn resolved(&self, id: NodeId) -> Option<Rect> {
        self.nodes.get(&id).map(|n| n.resolved)
    }

    /// Content-derived natural size.
    ///
    /// Leaves use their content size, falling back to fixed sizes; nodes
    /// with children use the union of their parent-referenced children's
    /// boxes. Cached until the node or one of its descendants changes.
    pub fn intrinsic_size(&mut self, id: NodeId) -> Size {
        let Some(node) = self.nodes.get(&id) else {
            return Size::zero();
        };
        if let Some(cached) = node.intrinsic {
            return cached;
        }
        let size = self.compute_intrinsic(id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.intrinsic = Some(size);
        }
        size
    }

    pub(crate) fn compute_intrinsic(&mut self, id: NodeId) -> Size {
        let Some(node) = self.nodes.get(&id) else {
            return Size::zero();
        };
        if node.children.is_empty() {
            if let Some(content) = node.content_size {
                return content;
            }
            let fixed = |spec: SizeSpec| match spec {
                SizeSpec::Fixed(px) => px,
                _ => 0.0,
            };
            return Size::new(
                fixed(node.size.horizontal),
                fixed(node.size.vertical),
            );
        }

        let children = node.children.clone();
        let mut size = Size::zero();
        for child in children {
            let child_intrinsic = self.intrinsic_size(child);
            let Some(c) = self.nodes.get(&child) else {
                continue;
            };
            let origin = [c.x, c.y];
            for (i, axis) in Axis::BOTH.into_iter().enumerate() {
                if !c.effective_reference(axis).is_parent() {
                    continue;
                }
                let end = origin[i] + child_intrinsic.along(axis);
                if end > size.along(axis) {
                    size.set_along(axis, end);
                }
            }
        }
        size
    }

    // ------------------------------------------------------------------
    // Context
    // ------------------------------------------------------------------

    /// Build a node from `factory` bound to `context`, recording the
    /// context keys it consulted.
    pub fn instantiate(&mut self, factory: FactoryRef, context: &Context) -> NodeId {
        let mut binding = Binding::new(context);
        let id = factory.instantiate(self, &mut binding);
        let dependencies = binding.into_dependencies();
        if let Some(node) = self.nodes.get_mut(&id) {
            node.origin = Some(factory);
            node.context = context.clone();
            node.dependencies = dependencies;
        }
        id
    }

    /// Whether the node would be built the same way under `context`.
    pub fn supports(&self, id: NodeId, context: &Context) -> bool {
        self.nodes
            .get(&id)
            .is_some_and(|n| n.dependencies.supported_by(context))
    }

    /// Change the context of a node; applied to its subtree on the next
    /// sync pass.
    pub fn set_context(&mut self, id: NodeId, context: Context) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        if node.context == context && node.pending_context.is_none() {
            return;
        }
        node.pending_context = Some(context);
        // Force the reconciler through this node even if it was dirty
        // already
        self.mark_dirty(id);
    }

    pub fn context(&self, id: NodeId) -> Option<&Context> {
        self.nodes.get(&id).map(|n| &n.context)
    }

    pub fn dependencies(&self, id: NodeId) -> Option<&Dependencies> {
        self.nodes.get(&id).map(|n| &n.dependencies)
    }

    // ------------------------------------------------------------------
    // Replacement
    // ------------------------------------------------------------------

    /// Put `replacement` at `old`'s sibling index and start `old`'s replace
    /// transition.
    ///
    /// `old` is detached from layout and sync immediately but stays on the
    /// renderer until [`Tree::settle_replace`] is called.
    pub(crate) fn begin_replace(&mut self, old: NodeId, replacement: NodeId) -> Result<(), TreeError> {
        let parent = self.parent(old).ok_or(TreeError::UnknownNode(old))?;
        let index = self
            .children(parent)
            .iter()
            .position(|&c| c == old)
            .ok_or(TreeError::UnknownNode(old))?;
        // Checked up front so a rejected replacement leaves `old` in place
        if !self.contains(replacement) {
            return Err(TreeError::UnknownNode(replacement));
        }
        if replacement == old || self.is_ancestor_or_self(replacement, parent) {
            return Err(TreeError::ParentCycle {
                child: replacement,
                parent,
            });
        }

        self.unlink(old);
        self.insert_child(parent, index, replacement)?;

        let created = self.nodes.get(&old).is_some_and(|n| n.wire.is_some());
        if !created {
            self.destroy_subtree(old);
            return Ok(());
        }
        if let Some(node) = self.nodes.get_mut(&old) {
            node.flags |= NodeFlags::OUTGOING;
            node.flags.remove(NodeFlags::DIRTY);
        }
        self.outgoing.insert(old, parent);
        self.calls.push(PendingCall {
            target: CallTarget::Node(old),
            method: "replace".into(),
            args: Vec::new(),
        });
        Ok(())
    }

    /// Finish the replace transition of `old` and queue its deletion.
    ///
    /// Tolerates nodes that were destroyed in the meantime.
    pub fn settle_replace(&mut self, old: NodeId) {
        if self.outgoing.remove(&old).is_some() {
            self.destroy_subtree(old);
            self.wake.request();
        }
    }

    pub fn is_outgoing(&self, id: NodeId) -> bool {
        self.outgoing.contains_key(&id)
    }

    // ------------------------------------------------------------------
    // Imperative calls
    // ------------------------------------------------------------------

    /// Queue a method call on a node for the next batch.
    pub fn call(&mut self, id: NodeId, method: impl Into<String>, args: Vec<Value>) {
        self.queue_call(CallTarget::Node(id), method, args);
    }

    pub fn queue_call(&mut self, target: CallTarget, method: impl Into<String>, args: Vec<Value>) {
        self.calls.push(PendingCall {
            target,
            method: method.into(),
            args,
        });
        self.wake.request();
    }

    pub fn pending_calls(&self) -> &[PendingCall] {
        &self.calls
    }

    // ------------------------------------------------------------------
    // Wire state (used by the scheduler)
    // ------------------------------------------------------------------

    pub(crate) fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn wire_id(&self, id: NodeId) -> Option<WireId> {
        self.nodes.get(&id).and_then(|n| n.wire)
    }

    /// Map a renderer id back to the node it belongs to.
    pub fn node_for_wire(&self, wire: WireId) -> Option<NodeId> {
        self.wire_index.get(&wire).copied()
    }

    /// Assign a wire id for the current generation.
    pub(crate) fn assign_wire(&mut self, id: NodeId) -> Option<WireId> {
        let node = self.nodes.get_mut(&id)?;
        if let Some(wire) = node.wire {
            return Some(wire);
        }
        let wire = WireId(self.next_wire);
        self.next_wire += 1;
        node.wire = Some(wire);
        node.flags.remove(NodeFlags::UNCREATED);
        self.wire_index.insert(wire, id);
        Some(wire)
    }

    pub(crate) fn diff(&mut self, id: NodeId) -> AttrMap {
        self.nodes
            .get_mut(&id)
            .map(Node::diff)
            .unwrap_or_default()
    }

    pub(crate) fn take_calls(&mut self) -> Vec<PendingCall> {
        std::mem::take(&mut self.calls)
    }

    pub(crate) fn requeue_calls(&mut self, calls: Vec<PendingCall>) {
        // Keep queue order: calls carried over come before newer ones
        let newer = std::mem::replace(&mut self.calls, calls);
        self.calls.extend(newer);
    }

    pub(crate) fn take_deletes(&mut self) -> Vec<WireId> {
        std::mem::take(&mut self.deletes)
    }

    pub(crate) fn take_detached(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.detached)
    }

    /// Clear every dirty flag without syncing.
    #[cfg(test)]
    pub(crate) fn settle(&mut self) {
        for node in self.nodes.values_mut() {
            node.flags.remove(NodeFlags::DIRTY);
        }
    }

    /// Forget everything the renderer knew.
    ///
    /// Every live node becomes uncreated and dirty so the next pass rebuilds
    /// the whole scene, in creation order, under fresh wire ids. Queued
    /// calls survive and are replayed once; queued deletes are dropped.
    pub fn reset_wire_state(&mut self) {
        for node in self.nodes.values_mut() {
            node.wire = None;
            node.sent.clear();
            node.flags |= NodeFlags::UNCREATED | NodeFlags::REPARENT | NodeFlags::DIRTY;
            node.intrinsic = None;
        }
        // Outgoing nodes have nothing left to animate on a fresh renderer
        let outgoing: Vec<NodeId> = self.outgoing.drain().map(|(o, _)| o).collect();
        for o in outgoing {
            self.destroy_subtree(o);
        }
        self.calls.retain(|call| match call.target {
            CallTarget::Node(id) => self.nodes.contains_key(&id),
            CallTarget::Stage => true,
        });
        self.deletes.clear();
        self.detached.clear();
        self.wire_index.clear();
        self.next_wire = 1;
        self.wake.request();
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}
