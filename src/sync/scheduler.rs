//! The per-wake sync pass.
//!
//! One [`Scheduler::run`] turns the current tree state into a single
//! [`Batch`]:
//!
//! 1. pending imports, which must be applied before anything uses the kinds
//!    they provide
//! 2. context reconciliation, top-down from the dirty layers
//! 3. layout resolution of the dirty subtrees
//! 4. a pre-order walk of the dirty nodes emitting `add`, `reparent` and
//!    `position`/`update` commands, clearing dirty flags on the way
//! 5. queued imperative calls, detachments, then every `delete`
//!
//! Creation of new nodes and their first full update goes before the
//! freeze marker; everything that touches nodes already visible on screen
//! goes after it.

use std::collections::HashSet;

use super::command::{Batch, Command, WireId};
use crate::context::reconcile::reconcile;
use crate::error::TreeError;
use crate::layout::{Size, resolve};
use crate::tree::{CallTarget, NodeFlags, NodeId, Tree, attrs};

/// Builds one batch per sync pass.
#[derive(Debug, Default)]
pub struct Scheduler {
    imports: Vec<Command>,
    cycles: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a module import for the next batch.
    pub fn import(&mut self, name: impl Into<String>, path: impl Into<String>) {
        self.imports.push(Command::Import {
            name: name.into(),
            path: path.into(),
        });
    }

    /// Number of passes run so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run one sync pass over `tree`, with layers laid out in `viewport`.
    pub fn run(&mut self, tree: &mut Tree, viewport: Size) -> Result<Batch, TreeError> {
        self.cycles += 1;
        let replaced = reconcile(tree)?;
        let moved = resolve(tree, viewport)?;

        // Imports stay queued until a batch that will be delivered exists
        let mut batch = Batch::new();
        batch.staging.append(&mut self.imports);

        let mut walk = Vec::new();
        for &layer in tree.layers() {
            collect_dirty(tree, layer, &mut walk);
        }

        // Wire ids follow creation order, not tree order
        let mut created: Vec<NodeId> = walk
            .iter()
            .copied()
            .filter(|&id| {
                tree.flags(id)
                    .is_some_and(|f| f.contains(NodeFlags::UNCREATED))
            })
            .collect();
        created.sort();
        for &id in &created {
            let Some(wire) = tree.assign_wire(id) else {
                continue;
            };
            let kind = tree.kind(id).unwrap_or_default().to_string();
            batch.staging.push(Command::Add { id: wire, kind });
        }
        let created: HashSet<NodeId> = created.into_iter().collect();

        for &id in &walk {
            emit_node(tree, id, &created, &mut batch);
        }

        emit_calls(tree, &mut batch);

        for id in tree.take_detached() {
            let detached = tree.parent(id).is_none() && !tree.layers().contains(&id);
            if let Some(wire) = tree.wire_id(id)
                && detached
            {
                batch.commit.push(Command::Reparent {
                    id: wire,
                    parent: None,
                    sibling: None,
                });
                if let Some(node) = tree.node_mut(id) {
                    node.flags.remove(NodeFlags::REPARENT);
                }
            }
        }

        for wire in tree.take_deletes() {
            batch.commit.push(Command::Delete { id: wire });
        }

        // Everything marked during this pass has been handled
        tree.wake().take();

        log::debug!(
            "sync cycle {}: {} staged, {} committed ({} new, {} moved, {} replaced)",
            self.cycles,
            batch.staging.len(),
            batch.commit.len(),
            created.len(),
            moved,
            replaced
        );
        Ok(batch)
    }
}

fn collect_dirty(tree: &Tree, id: NodeId, walk: &mut Vec<NodeId>) {
    // A clean node has no dirty descendants
    if !tree.is_dirty(id) {
        return;
    }
    walk.push(id);
    for &child in tree.children(id) {
        collect_dirty(tree, child, walk);
    }
}

fn emit_node(tree: &mut Tree, id: NodeId, created: &HashSet<NodeId>, batch: &mut Batch) {
    let Some(flags) = tree.flags(id) else {
        return;
    };
    let Some(wire) = tree.wire_id(id) else {
        return;
    };
    let is_new = created.contains(&id);

    if flags.contains(NodeFlags::REPARENT) {
        let parent = tree.parent(id);
        // Attaching to a node that is itself new stays invisible until the
        // new subtree is attached, so it can be staged
        let staged = is_new && parent.is_some_and(|p| created.contains(&p));
        let command = Command::Reparent {
            id: wire,
            parent: match parent {
                Some(parent) => tree.wire_id(parent),
                None => Some(WireId::STAGE),
            },
            sibling: stacking_sibling(tree, id, staged.then_some(created)),
        };
        if staged {
            batch.staging.push(command);
        } else {
            batch.commit.push(command);
        }
    }

    let changes = tree.diff(id);
    if is_new {
        batch.staging.push(Command::Update {
            id: wire,
            attrs: changes,
        });
    } else if !changes.is_empty() {
        let position_only = changes.keys().all(|k| k == attrs::X || k == attrs::Y);
        let command = match tree.resolved(id) {
            Some(rect) if position_only => Command::Position {
                id: wire,
                x: rect.x,
                y: rect.y,
            },
            _ => Command::Update {
                id: wire,
                attrs: changes,
            },
        };
        batch.commit.push(command);
    }

    if let Some(node) = tree.node_mut(id) {
        node.flags.remove(NodeFlags::DIRTY | NodeFlags::REPARENT);
    }
}

/// The renderer object directly below `id` in stacking order.
///
/// Staged reparents run before any existing node is moved under the new
/// parent, so they only stack on siblings from `staged`. Existing siblings
/// slot themselves in when the commit half runs.
fn stacking_sibling(
    tree: &Tree,
    id: NodeId,
    staged: Option<&HashSet<NodeId>>,
) -> Option<WireId> {
    let siblings = match tree.parent(id) {
        Some(parent) => tree.children(parent),
        None => tree.layers(),
    };
    let index = siblings.iter().position(|&s| s == id)?;
    let below = siblings[..index]
        .iter()
        .rev()
        .find(|s| staged.is_none_or(|staged| staged.contains(*s)))?;
    tree.wire_id(*below)
}

fn emit_calls(tree: &mut Tree, batch: &mut Batch) {
    let mut waiting = Vec::new();
    for call in tree.take_calls() {
        let wire = match call.target {
            CallTarget::Stage => WireId::STAGE,
            CallTarget::Node(id) => {
                if !tree.contains(id) {
                    log::debug!("dropping `{}` call on destroyed {id:?}", call.method);
                    continue;
                }
                match tree.wire_id(id) {
                    Some(wire) => wire,
                    // Not on the renderer yet: keep it for a later pass
                    None => {
                        waiting.push(call);
                        continue;
                    }
                }
            }
        };
        batch.commit.push(Command::Call {
            id: wire,
            method: call.method,
            args: call.args,
        });
    }
    tree.requeue_calls(waiting);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Axis, Reference, percent};
    use crate::renderer::Scene;
    use crate::tree::kinds;
    use crate::value::{AttrMap, Value};

    const VIEWPORT: Size = Size::new(800.0, 600.0);

    fn update_of(batch: &Batch, wire: WireId) -> Option<&AttrMap> {
        batch.iter().find_map(|c| match c {
            Command::Update { id, attrs } if *id == wire => Some(attrs),
            _ => None,
        })
    }

    fn freeze_index(batch: &Batch) -> usize {
        batch.staging.len()
    }

    fn position_in(batch: &Batch, pred: impl Fn(&Command) -> bool) -> usize {
        batch.iter().position(pred).unwrap()
    }

    #[test]
    fn test_first_batch_builds_scene() {
        let mut tree = Tree::new();
        let mut scheduler = Scheduler::new();
        let layer = tree.create_layer(VIEWPORT);
        let rect = tree.create(kinds::RECTANGLE);
        tree.set_parent(rect, Some(layer)).unwrap();
        tree.set(rect, "color", "red");

        let batch = scheduler.run(&mut tree, VIEWPORT).unwrap();
        let (lw, rw) = (tree.wire_id(layer).unwrap(), tree.wire_id(rect).unwrap());
        assert_eq!(lw, WireId(1));
        assert_eq!(rw, WireId(2));
        assert_eq!(
            &batch.staging[..2],
            &[
                Command::Add {
                    id: lw,
                    kind: kinds::GROUP.into()
                },
                Command::Add {
                    id: rw,
                    kind: kinds::RECTANGLE.into()
                },
            ]
        );
        // The rect attaches to a new layer while staging; the layer attaches
        // to the stage after the freeze
        assert!(batch.staging.contains(&Command::Reparent {
            id: rw,
            parent: Some(lw),
            sibling: None
        }));
        assert_eq!(
            batch.commit,
            vec![Command::Reparent {
                id: lw,
                parent: Some(WireId::STAGE),
                sibling: None
            }]
        );
        assert_eq!(
            update_of(&batch, rw).unwrap().get("color"),
            Some(&Value::from("red"))
        );
    }

    #[test]
    fn test_second_pass_is_empty() {
        let mut tree = Tree::new();
        let mut scheduler = Scheduler::new();
        let layer = tree.create_layer(VIEWPORT);
        let rect = tree.create(kinds::RECTANGLE);
        tree.set_parent(rect, Some(layer)).unwrap();

        assert!(!scheduler.run(&mut tree, VIEWPORT).unwrap().is_empty());
        assert!(scheduler.run(&mut tree, VIEWPORT).unwrap().is_empty());
        assert_eq!(scheduler.cycles(), 2);
        assert!(!tree.wake().is_requested());
    }

    #[test]
    fn test_update_contains_only_changes() {
        let mut tree = Tree::new();
        let mut scheduler = Scheduler::new();
        let layer = tree.create_layer(VIEWPORT);
        let rect = tree.create(kinds::RECTANGLE);
        tree.set_parent(rect, Some(layer)).unwrap();
        tree.set_width(rect, percent(50.0));
        tree.set_height(rect, 100.0);
        tree.set(rect, "color", "red");
        scheduler.run(&mut tree, VIEWPORT).unwrap();
        assert_eq!(
            tree.resolved(rect).map(|r| r.size()),
            Some(Size::new(400.0, 100.0))
        );

        tree.set_width(layer, 400.0);
        let batch = scheduler.run(&mut tree, VIEWPORT).unwrap();
        let update = update_of(&batch, tree.wire_id(rect).unwrap()).unwrap();
        assert_eq!(update.len(), 1);
        assert_eq!(update.get(attrs::WIDTH), Some(&Value::Float(200.0)));
        assert!(batch.staging.is_empty());
    }

    #[test]
    fn test_position_only_change() {
        let mut tree = Tree::new();
        let mut scheduler = Scheduler::new();
        let layer = tree.create_layer(VIEWPORT);
        let rect = tree.create(kinds::RECTANGLE);
        tree.set_parent(rect, Some(layer)).unwrap();
        tree.set_width(rect, 10.0);
        scheduler.run(&mut tree, VIEWPORT).unwrap();

        tree.set_position(rect, 15.0, 25.0);
        let batch = scheduler.run(&mut tree, VIEWPORT).unwrap();
        assert_eq!(
            batch.commit,
            vec![Command::Position {
                id: tree.wire_id(rect).unwrap(),
                x: 15.0,
                y: 25.0
            }]
        );

        tree.set_position(rect, 0.0, 0.0);
        tree.set(rect, "color", "blue");
        let batch = scheduler.run(&mut tree, VIEWPORT).unwrap();
        assert!(matches!(batch.commit[0], Command::Update { .. }));
    }

    #[test]
    fn test_freeze_separates_new_and_existing() {
        let mut tree = Tree::new();
        let mut scheduler = Scheduler::new();
        let layer = tree.create_layer(VIEWPORT);
        let old = tree.create(kinds::RECTANGLE);
        tree.set_parent(old, Some(layer)).unwrap();
        scheduler.run(&mut tree, VIEWPORT).unwrap();

        let new = tree.create(kinds::TEXT);
        tree.set_parent(new, Some(layer)).unwrap();
        tree.set(new, "text", "hello");
        tree.set(old, "color", "green");
        let batch = scheduler.run(&mut tree, VIEWPORT).unwrap();

        let (ow, nw) = (tree.wire_id(old).unwrap(), tree.wire_id(new).unwrap());
        let freeze = freeze_index(&batch);
        let new_update = position_in(&batch, |c| matches!(c, Command::Update { id, .. } if *id == nw));
        let old_update = position_in(&batch, |c| matches!(c, Command::Update { id, .. } if *id == ow));
        assert!(new_update < freeze);
        assert!(old_update > freeze);
        // Attached above the existing rect
        assert!(batch.commit.contains(&Command::Reparent {
            id: nw,
            parent: tree.wire_id(layer),
            sibling: Some(ow)
        }));
    }

    #[test]
    fn test_calls_and_deletes_close_the_batch() {
        let mut tree = Tree::new();
        let mut scheduler = Scheduler::new();
        let layer = tree.create_layer(VIEWPORT);
        let a = tree.create(kinds::RECTANGLE);
        let b = tree.create(kinds::RECTANGLE);
        tree.set_parent(a, Some(layer)).unwrap();
        tree.set_parent(b, Some(layer)).unwrap();
        scheduler.run(&mut tree, VIEWPORT).unwrap();
        let bw = tree.wire_id(b).unwrap();

        let pending = tree.create(kinds::TEXT);
        tree.call(pending, "blink", vec![]);
        tree.call(a, "animate", vec![Value::from("fade")]);
        tree.destroy(b);
        tree.set(a, "color", "red");
        let batch = scheduler.run(&mut tree, VIEWPORT).unwrap();

        let names: Vec<_> = batch.commit.iter().map(Command::name).collect();
        assert_eq!(names, ["update", "call", "delete"]);
        assert_eq!(batch.commit.last(), Some(&Command::Delete { id: bw }));
        // The call on the uncreated node waits for its `add`
        assert_eq!(tree.pending_calls().len(), 1);

        tree.set_parent(pending, Some(layer)).unwrap();
        let batch = scheduler.run(&mut tree, VIEWPORT).unwrap();
        assert!(batch.commit.iter().any(|c| matches!(
            c,
            Command::Call { method, .. } if method == "blink"
        )));
        assert!(tree.pending_calls().is_empty());
    }

    #[test]
    fn test_detach_keeps_node_alive() {
        let mut tree = Tree::new();
        let mut scheduler = Scheduler::new();
        let layer = tree.create_layer(VIEWPORT);
        let rect = tree.create(kinds::RECTANGLE);
        tree.set_parent(rect, Some(layer)).unwrap();
        scheduler.run(&mut tree, VIEWPORT).unwrap();
        let wire = tree.wire_id(rect).unwrap();

        tree.set_parent(rect, None).unwrap();
        let batch = scheduler.run(&mut tree, VIEWPORT).unwrap();
        assert_eq!(
            batch.commit,
            vec![Command::Reparent {
                id: wire,
                parent: None,
                sibling: None
            }]
        );
        assert!(tree.contains(rect));

        tree.set_parent(rect, Some(layer)).unwrap();
        let batch = scheduler.run(&mut tree, VIEWPORT).unwrap();
        assert!(batch.commit.contains(&Command::Reparent {
            id: wire,
            parent: tree.wire_id(layer),
            sibling: None
        }));
    }

    #[test]
    fn test_resync_recreates_in_creation_order() {
        let mut tree = Tree::new();
        let mut scheduler = Scheduler::new();
        let layer = tree.create_layer(VIEWPORT);
        let a = tree.create(kinds::RECTANGLE);
        let b = tree.create(kinds::RECTANGLE);
        tree.set_parent(a, Some(layer)).unwrap();
        tree.set_parent(b, Some(layer)).unwrap();
        scheduler.run(&mut tree, VIEWPORT).unwrap();

        // Inserted first in stacking order but created last
        let c = tree.create(kinds::TEXT);
        tree.insert_child(layer, 0, c).unwrap();
        scheduler.run(&mut tree, VIEWPORT).unwrap();
        tree.queue_call(CallTarget::Node(layer), "hide", vec![]);

        tree.reset_wire_state();
        let batch = scheduler.run(&mut tree, VIEWPORT).unwrap();
        let added: Vec<WireId> = batch
            .iter()
            .filter_map(|cmd| match cmd {
                Command::Add { id, .. } => Some(*id),
                _ => None,
            })
            .collect();
        let expected: Vec<WireId> = [layer, a, b, c]
            .iter()
            .map(|&id| tree.wire_id(id).unwrap())
            .collect();
        assert_eq!(added, expected);
        assert_eq!(added, vec![WireId(1), WireId(2), WireId(3), WireId(4)]);

        let hides = |batch: &Batch| {
            batch
                .iter()
                .filter(|c| matches!(c, Command::Call { method, .. } if method == "hide"))
                .count()
        };
        assert_eq!(hides(&batch), 1);
        assert_eq!(hides(&scheduler.run(&mut tree, VIEWPORT).unwrap()), 0);
    }

    #[test]
    fn test_imports_lead_the_batch() {
        let mut tree = Tree::new();
        let mut scheduler = Scheduler::new();
        let layer = tree.create_layer(VIEWPORT);
        let clock = tree.create("widgets.Clock");
        tree.set_parent(clock, Some(layer)).unwrap();
        scheduler.import("widgets", "/opt/widgets");

        let batch = scheduler.run(&mut tree, VIEWPORT).unwrap();
        assert_eq!(
            batch.staging[0],
            Command::Import {
                name: "widgets".into(),
                path: "/opt/widgets".into()
            }
        );
    }

    #[test]
    fn test_imports_survive_failed_pass() {
        let mut tree = Tree::new();
        let mut scheduler = Scheduler::new();
        let layer = tree.create_layer(VIEWPORT);
        let a = tree.create(kinds::RECTANGLE);
        let b = tree.create(kinds::RECTANGLE);
        for id in [a, b] {
            tree.set_parent(id, Some(layer)).unwrap();
            tree.set_width(id, percent(50.0));
        }
        tree.set_reference(a, Axis::Horizontal, Reference::Sibling(b))
            .unwrap();
        tree.node_mut(b).unwrap().reference.horizontal = Reference::Sibling(a);
        scheduler.import("widgets", "/opt/widgets");

        assert!(scheduler.run(&mut tree, VIEWPORT).is_err());

        tree.node_mut(b).unwrap().reference.horizontal = Reference::Parent;
        let batch = scheduler.run(&mut tree, VIEWPORT).unwrap();
        assert_eq!(
            batch.staging[0],
            Command::Import {
                name: "widgets".into(),
                path: "/opt/widgets".into()
            }
        );
    }

    #[test]
    fn test_moving_a_node_resends_its_old_parent() {
        let mut tree = Tree::new();
        let mut scheduler = Scheduler::new();
        let layer = tree.create_layer(VIEWPORT);
        let frame = tree.create(kinds::GROUP);
        let auto = tree.create(kinds::GROUP);
        let leaf = tree.create(kinds::RECTANGLE);
        let target = tree.create(kinds::GROUP);
        tree.set_parent(frame, Some(layer)).unwrap();
        tree.set_width(frame, 300.0);
        tree.set_height(frame, 300.0);
        tree.set_parent(auto, Some(frame)).unwrap();
        tree.set_parent(leaf, Some(auto)).unwrap();
        tree.set_width(leaf, 50.0);
        tree.set_height(leaf, 20.0);
        tree.set_parent(target, Some(layer)).unwrap();
        scheduler.run(&mut tree, VIEWPORT).unwrap();
        assert_eq!(
            tree.resolved(auto).map(|r| r.size()),
            Some(Size::new(50.0, 20.0))
        );

        tree.set_parent(leaf, Some(target)).unwrap();
        let batch = scheduler.run(&mut tree, VIEWPORT).unwrap();
        assert_eq!(tree.resolved(auto).map(|r| r.size()), Some(Size::zero()));
        let update = update_of(&batch, tree.wire_id(auto).unwrap()).unwrap();
        assert_eq!(update.get(attrs::WIDTH), Some(&Value::Float(0.0)));
        assert_eq!(update.get(attrs::HEIGHT), Some(&Value::Float(0.0)));
        assert!(scheduler.run(&mut tree, VIEWPORT).unwrap().is_empty());
    }

    #[test]
    fn test_staged_node_stacks_on_staged_siblings_only() {
        let mut tree = Tree::new();
        let mut scheduler = Scheduler::new();
        let mut scene = Scene::new();
        Command::Add {
            id: WireId::STAGE,
            kind: kinds::STAGE.into(),
        }
        .apply(&mut scene)
        .unwrap();
        let layer = tree.create_layer(VIEWPORT);
        let existing = tree.create(kinds::RECTANGLE);
        tree.set_parent(existing, Some(layer)).unwrap();
        for command in scheduler.run(&mut tree, VIEWPORT).unwrap().iter() {
            command.apply(&mut scene).unwrap();
        }

        let group = tree.create(kinds::GROUP);
        let fresh = tree.create(kinds::TEXT);
        tree.set_parent(group, Some(layer)).unwrap();
        tree.set_parent(existing, Some(group)).unwrap();
        tree.set_parent(fresh, Some(group)).unwrap();
        let batch = scheduler.run(&mut tree, VIEWPORT).unwrap();

        let (gw, ew, fw) = (
            tree.wire_id(group).unwrap(),
            tree.wire_id(existing).unwrap(),
            tree.wire_id(fresh).unwrap(),
        );
        assert!(batch.staging.contains(&Command::Reparent {
            id: fw,
            parent: Some(gw),
            sibling: None
        }));
        assert!(batch.commit.contains(&Command::Reparent {
            id: ew,
            parent: Some(gw),
            sibling: None
        }));
        for command in batch.iter() {
            command.apply(&mut scene).unwrap();
        }
        assert_eq!(scene.children(gw), [ew, fw]);
    }
}
