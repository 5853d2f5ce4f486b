//! Context propagation and node replacement.
//!
//! When a group receives a new context, each child is asked whether it
//! [supports](crate::Tree::supports) it. A supporting child simply takes the
//! new context and passes it on to its own children. Any other child is
//! rebuilt from the factory it came from and the replacement takes its
//! sibling index; the old node starts a `replace` transition on the renderer
//! and is deleted once the transition settles.

use super::Context;
use crate::error::TreeError;
use crate::tree::{NodeId, Tree};

/// Apply pending context changes in every layer, top-down.
///
/// Returns the number of nodes that were replaced.
pub fn reconcile(tree: &mut Tree) -> Result<usize, TreeError> {
    let mut replaced = 0;
    for layer in tree.layers().to_vec() {
        visit(tree, layer, &mut replaced)?;
    }
    Ok(replaced)
}

fn visit(tree: &mut Tree, id: NodeId, replaced: &mut usize) -> Result<(), TreeError> {
    // Pending contexts always mark their node, so clean subtrees have none
    if !tree.is_dirty(id) {
        return Ok(());
    }
    if let Some(context) = tree.node_mut(id).and_then(|n| n.pending_context.take()) {
        push_context(tree, id, context, replaced)?;
    }
    for child in tree.children(id).to_vec() {
        visit(tree, child, replaced)?;
    }
    Ok(())
}

fn push_context(
    tree: &mut Tree,
    id: NodeId,
    context: Context,
    replaced: &mut usize,
) -> Result<(), TreeError> {
    if let Some(node) = tree.node_mut(id) {
        node.context = context.clone();
        node.pending_context = None;
    }

    for child in tree.children(id).to_vec() {
        if tree.supports(child, &context) {
            push_context(tree, child, context.clone(), replaced)?;
            continue;
        }

        let origin = tree.node(child).and_then(|n| n.origin.clone());
        let Some(factory) = origin else {
            log::warn!("{child:?} depends on a changed context key but has no factory, keeping it");
            push_context(tree, child, context.clone(), replaced)?;
            continue;
        };

        let replacement = tree.instantiate(factory, &context);
        tree.begin_replace(child, replacement)?;
        *replaced += 1;
        log::debug!("replaced {child:?} with {replacement:?} under {id:?}");
    }
    Ok(())
}
