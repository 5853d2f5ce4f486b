//! Resolution of declared geometry into concrete boxes.
//!
//! Each group is resolved in two passes per axis. Pass 1 places the children
//! whose size is relative to the parent and collects their bounding box;
//! pass 2 places the children that reference that bounding box or one
//! specific sibling. Only pass-1 children feed into a group's intrinsic
//! size, so a sibling-referenced child can never influence the box it is
//! measured against.
//!
//! Resolution walks top-down from the layers and only descends into
//! children that are dirty or whose box moved; a clean subtree whose box is
//! unchanged is skipped entirely.

use std::collections::HashMap;

use super::geometry::Span;
use super::{Align, Axis, Rect, Reference, Size, SizeSpec};
use crate::error::LayoutError;
use crate::tree::{NodeFlags, NodeId, Tree};

/// Resolve every layer against the viewport.
///
/// Returns how many boxes changed. Nodes whose box changed are flagged dirty
/// so the scheduler emits their new geometry.
pub fn resolve(tree: &mut Tree, viewport: Size) -> Result<usize, LayoutError> {
    let mut changed = 0;
    for layer in tree.layers().to_vec() {
        let was_dirty = tree.is_dirty(layer);
        let mut rect = Rect::default();
        for axis in Axis::BOTH {
            let reference = Span {
                start: 0.0,
                end: viewport.along(axis),
            };
            let span = place(tree, layer, axis, reference);
            rect.set_axis(axis, span.start, span.extent());
        }
        let moved = store(tree, layer, rect);
        if moved {
            changed += 1;
        }
        if was_dirty || moved {
            resolve_children(tree, layer, &mut changed)?;
        }
    }
    log::trace!("layout pass resolved {changed} changed boxes");
    Ok(changed)
}

fn resolve_children(tree: &mut Tree, group: NodeId, changed: &mut usize) -> Result<(), LayoutError> {
    let Some(parent_rect) = tree.resolved(group) else {
        return Ok(());
    };
    let children = tree.children(group).to_vec();
    if children.is_empty() {
        return Ok(());
    }

    let mut boxes: HashMap<NodeId, Rect> = HashMap::with_capacity(children.len());
    for axis in Axis::BOTH {
        let parent_span = Span {
            start: 0.0,
            end: parent_rect.extent(axis),
        };
        let mut spans: HashMap<NodeId, Span> = HashMap::with_capacity(children.len());

        // Pass 1: parent-referenced children and their bounding box
        let mut bbox: Option<Span> = None;
        for &child in &children {
            if effective_reference(tree, child, axis).is_parent() {
                let span = place(tree, child, axis, parent_span);
                bbox = Some(Span::union(bbox, span));
                spans.insert(child, span);
            }
        }
        let bbox = bbox.unwrap_or(Span {
            start: 0.0,
            end: 0.0,
        });

        // Pass 2: everything measured against siblings
        let mut pass = SiblingPass {
            axis,
            bbox,
            parent_span,
            group,
            spans,
        };
        for &child in &children {
            let mut visiting = Vec::new();
            pass.place(tree, child, &mut visiting)?;
        }

        for (child, span) in pass.spans {
            boxes
                .entry(child)
                .or_default()
                .set_axis(axis, span.start, span.extent());
        }
    }

    for child in children {
        let was_dirty = tree.is_dirty(child);
        let rect = boxes.get(&child).copied().unwrap_or_default();
        let moved = store(tree, child, rect);
        if moved {
            *changed += 1;
        }
        if was_dirty || moved {
            resolve_children(tree, child, changed)?;
        }
    }
    Ok(())
}

/// Places sibling-referenced children of one group along one axis.
struct SiblingPass {
    axis: Axis,
    bbox: Span,
    parent_span: Span,
    group: NodeId,
    spans: HashMap<NodeId, Span>,
}

impl SiblingPass {
    fn place(
        &mut self,
        tree: &mut Tree,
        child: NodeId,
        visiting: &mut Vec<NodeId>,
    ) -> Result<Span, LayoutError> {
        if let Some(span) = self.spans.get(&child) {
            return Ok(*span);
        }
        if let Some(pos) = visiting.iter().position(|&v| v == child) {
            return Err(LayoutError::ReferenceCycle {
                nodes: visiting[pos..].to_vec(),
            });
        }

        let reference = match effective_reference(tree, child, self.axis) {
            Reference::Parent => self.parent_span,
            Reference::Siblings => self.bbox,
            Reference::Sibling(target) if tree.parent(target) == Some(self.group) => {
                visiting.push(child);
                let span = self.place(tree, target, visiting)?;
                visiting.pop();
                span
            }
            Reference::Sibling(target) => {
                log::warn!(
                    "{child:?} references {target:?} which is not a sibling, sizing against parent"
                );
                self.parent_span
            }
        };

        let span = place(tree, child, self.axis, reference);
        self.spans.insert(child, span);
        Ok(span)
    }
}

fn effective_reference(tree: &Tree, id: NodeId, axis: Axis) -> Reference {
    tree.node(id)
        .map(|n| n.effective_reference(axis))
        .unwrap_or_default()
}

/// Place one node along `axis` inside `reference`.
fn place(tree: &mut Tree, id: NodeId, axis: Axis, reference: Span) -> Span {
    let intrinsic = tree.intrinsic_size(id).along(axis);
    let Some(node) = tree.node(id) else {
        return Span {
            start: 0.0,
            end: 0.0,
        };
    };

    let offset = match axis {
        Axis::Horizontal => node.x,
        Axis::Vertical => node.y,
    };
    let origin = reference.start + offset;
    let declared = match node.size.get(axis) {
        SizeSpec::Fixed(px) => px,
        SizeSpec::Percent(pct) => reference.extent() * pct / 100.0,
        SizeSpec::Auto => intrinsic,
    };

    let (start, extent) = match node.align.get(axis) {
        Align::Start => (origin, declared),
        Align::Center => (origin + (declared - intrinsic) / 2.0, intrinsic),
        Align::End => (origin + declared - intrinsic, intrinsic),
        Align::Shrink => (origin, intrinsic),
    };
    Span {
        start,
        end: start + extent.max(0.0),
    }
}

/// Store a resolved box, flagging the node if it moved.
fn store(tree: &mut Tree, id: NodeId, rect: Rect) -> bool {
    let Some(node) = tree.node_mut(id) else {
        return false;
    };
    if node.resolved == rect {
        return false;
    }
    node.resolved = rect;
    // Ancestors are dirty already: resolution only descends through them
    node.flags |= NodeFlags::DIRTY;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::percent;
    use crate::tree::kinds;

    const VIEWPORT: Size = Size::new(800.0, 600.0);

    fn layer_with_group(tree: &mut Tree, width: f32, height: f32) -> (NodeId, NodeId) {
        let layer = tree.create_layer(VIEWPORT);
        let group = tree.create(kinds::GROUP);
        tree.set_parent(group, Some(layer)).unwrap();
        tree.set_width(group, width);
        tree.set_height(group, height);
        (layer, group)
    }

    #[test]
    fn test_percent_of_parent() {
        let mut tree = Tree::new();
        let (_layer, group) = layer_with_group(&mut tree, 600.0, 200.0);
        let child = tree.create(kinds::RECTANGLE);
        tree.set_parent(child, Some(group)).unwrap();
        tree.set_width(child, percent(50.0));
        tree.set_height(child, 10.0);

        resolve(&mut tree, VIEWPORT).unwrap();
        assert_eq!(tree.resolved(child).unwrap().width, 300.0);

        tree.settle();
        tree.set_width(group, 800.0);
        resolve(&mut tree, VIEWPORT).unwrap();
        assert_eq!(tree.resolved(child).unwrap().width, 400.0);
        assert!(tree.is_dirty(child));
    }

    #[test]
    fn test_siblings_reference_matches_bbox() {
        let mut tree = Tree::new();
        let (_layer, group) = layer_with_group(&mut tree, 500.0, 500.0);
        let a = tree.create(kinds::RECTANGLE);
        let b = tree.create(kinds::RECTANGLE);
        tree.set_parent(a, Some(group)).unwrap();
        tree.set_parent(b, Some(group)).unwrap();
        tree.set_position(a, 10.0, 20.0);
        tree.set_width(a, 100.0);
        tree.set_height(a, 100.0);
        tree.set_width(b, percent(100.0));
        tree.set_height(b, percent(100.0));
        for axis in Axis::BOTH {
            tree.set_reference(b, axis, Reference::Siblings).unwrap();
        }

        resolve(&mut tree, VIEWPORT).unwrap();
        assert_eq!(tree.resolved(b), tree.resolved(a));
        assert_eq!(tree.resolved(b), Some(Rect::new(10.0, 20.0, 100.0, 100.0)));
        // Sibling-referenced children stay out of the group's intrinsic size
        assert_eq!(tree.intrinsic_size(group), Size::new(110.0, 120.0));
    }

    #[test]
    fn test_specific_sibling_reference() {
        let mut tree = Tree::new();
        let (_layer, group) = layer_with_group(&mut tree, 500.0, 500.0);
        let a = tree.create(kinds::RECTANGLE);
        let b = tree.create(kinds::RECTANGLE);
        let c = tree.create(kinds::RECTANGLE);
        for id in [a, b, c] {
            tree.set_parent(id, Some(group)).unwrap();
        }
        tree.set_width(a, 200.0);
        tree.set_width(b, percent(50.0));
        tree.set_reference(b, Axis::Horizontal, Reference::Sibling(a))
            .unwrap();
        // c is declared before its target is placed
        tree.set_width(c, percent(50.0));
        tree.set_reference(c, Axis::Horizontal, Reference::Sibling(b))
            .unwrap();

        resolve(&mut tree, VIEWPORT).unwrap();
        assert_eq!(tree.resolved(b).unwrap().width, 100.0);
        assert_eq!(tree.resolved(c).unwrap().width, 50.0);
    }

    #[test]
    fn test_reference_cycle_is_reported() {
        let mut tree = Tree::new();
        let (_layer, group) = layer_with_group(&mut tree, 500.0, 500.0);
        let a = tree.create(kinds::RECTANGLE);
        let b = tree.create(kinds::RECTANGLE);
        for id in [a, b] {
            tree.set_parent(id, Some(group)).unwrap();
            tree.set_width(id, percent(50.0));
        }
        tree.set_reference(a, Axis::Horizontal, Reference::Sibling(b))
            .unwrap();
        // Bypass the check performed on assignment
        tree.node_mut(b).unwrap().reference.horizontal = Reference::Sibling(a);

        let err = resolve(&mut tree, VIEWPORT).unwrap_err();
        assert_eq!(err, LayoutError::ReferenceCycle { nodes: vec![a, b] });
    }

    #[test]
    fn test_alignment() {
        let mut tree = Tree::new();
        let (_layer, group) = layer_with_group(&mut tree, 400.0, 400.0);
        let text = |tree: &mut Tree, align: Align| {
            let id = tree.create(kinds::TEXT);
            tree.set_parent(id, Some(group)).unwrap();
            tree.set_width(id, 100.0);
            tree.set_content_size(id, Some(Size::new(40.0, 10.0)));
            tree.set_x(id, 10.0);
            tree.set_align(id, Axis::Horizontal, align);
            id
        };
        let start = text(&mut tree, Align::Start);
        let center = text(&mut tree, Align::Center);
        let end = text(&mut tree, Align::End);
        let shrink = text(&mut tree, Align::Shrink);

        resolve(&mut tree, VIEWPORT).unwrap();
        let h = |id| {
            let r = tree.resolved(id).unwrap();
            (r.x, r.width)
        };
        assert_eq!(h(start), (10.0, 100.0));
        assert_eq!(h(center), (40.0, 40.0));
        assert_eq!(h(end), (70.0, 40.0));
        assert_eq!(h(shrink), (10.0, 40.0));
    }

    #[test]
    fn test_auto_group_uses_children() {
        let mut tree = Tree::new();
        let layer = tree.create_layer(VIEWPORT);
        let group = tree.create(kinds::GROUP);
        let leaf = tree.create(kinds::RECTANGLE);
        tree.set_parent(group, Some(layer)).unwrap();
        tree.set_parent(leaf, Some(group)).unwrap();
        tree.set_position(leaf, 5.0, 5.0);
        tree.set_width(leaf, 50.0);
        tree.set_height(leaf, 20.0);

        resolve(&mut tree, VIEWPORT).unwrap();
        assert_eq!(tree.resolved(group), Some(Rect::new(0.0, 0.0, 55.0, 25.0)));
    }

    #[test]
    fn test_clean_subtree_is_skipped() {
        let mut tree = Tree::new();
        let (layer, group) = layer_with_group(&mut tree, 100.0, 100.0);
        let other = tree.create(kinds::GROUP);
        tree.set_parent(other, Some(layer)).unwrap();
        tree.set_width(other, 100.0);
        let leaf = tree.create(kinds::RECTANGLE);
        tree.set_parent(leaf, Some(other)).unwrap();
        tree.set_width(leaf, percent(10.0));
        resolve(&mut tree, VIEWPORT).unwrap();
        tree.settle();

        tree.set_x(group, 30.0);
        assert_eq!(resolve(&mut tree, VIEWPORT).unwrap(), 1);
        assert!(!tree.is_dirty(leaf));
    }
}
