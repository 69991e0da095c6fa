//! Coordinate resolution between render handles and points, and the
//! selection normalization applied at commit.

use super::{Point, PointKind, RangeSelection, Selection};
use crate::key::NodeKey;
use crate::node::NodeKind;
use crate::registry::NodeRegistry;
use crate::state::EditorState;
use crate::surface::{HandleMap, RenderHandle};
use crate::transaction::Transaction;
use tracing::debug;

/// Moves a text point sitting on a node boundary to the position text
/// should actually go: offset 0 prefers the end of a preceding text sibling,
/// and the end of a node that refuses trailing text prefers the start of a
/// following inline element.
pub fn normalize_boundary(state: &EditorState, registry: &NodeRegistry, point: Point, backward: bool) -> Point {
    if point.kind != PointKind::Text {
        return point;
    }
    let Some(node) = state.get(point.key) else {
        return point;
    };
    let Some(text) = node.as_text() else {
        return point;
    };
    let is_inline_element = |key: NodeKey| {
        state
            .get(key)
            .is_some_and(|n| n.is_element() && registry.behavior(n).inline)
    };

    if point.offset == 0 {
        if backward {
            return point;
        }
        match node.prev.and_then(|prev| state.get(prev)) {
            Some(prev) => match &prev.kind {
                NodeKind::Text(data) => Point::text(prev.key, data.len()),
                _ => point,
            },
            None => {
                // First child of an inline element: step out to the text
                // before the element.
                let Some(parent) = node.parent.filter(|p| is_inline_element(*p)) else {
                    return point;
                };
                match state.prev_sibling(parent).and_then(|k| state.get(k)) {
                    Some(outer) => match outer.as_text() {
                        Some(data) => Point::text(outer.key, data.len()),
                        None => point,
                    },
                    None => point,
                }
            }
        }
    } else if point.offset == text.len() {
        let behavior = registry.behavior(node);
        let refuses_trailing = !behavior.can_insert_text_after || text.is_token_or_segmented();
        if let Some(next) = node.next {
            if (backward || refuses_trailing) && is_inline_element(next) {
                return Point::element(next, 0);
            }
            return point;
        }
        let Some(parent) = node.parent.filter(|p| is_inline_element(*p)) else {
            return point;
        };
        let parent_behavior = state.get(parent).map(|p| registry.behavior(p));
        if parent_behavior.is_some_and(|b| !b.can_insert_text_after) {
            if let Some(outer) = state.next_sibling(parent).and_then(|k| state.get(k)) {
                if outer.is_text() {
                    return Point::text(outer.key, 0);
                }
            }
        }
        point
    } else {
        point
    }
}

/// Maps a render position to a point. For element handles `offset` is a
/// child index; for text handles a char offset; for other leaves 0 means
/// before the leaf and anything else after it. Returns `None` when the
/// handle is not managed by the editor.
pub fn resolve_point(
    state: &EditorState,
    registry: &NodeRegistry,
    handles: &HandleMap,
    handle: RenderHandle,
    offset: usize,
) -> Option<Point> {
    let Some(key) = handles.key_of(handle) else {
        debug!(handle = handle.0, "unresolvable render handle");
        return None;
    };
    let node = state.get(key)?;
    let point = match &node.kind {
        NodeKind::Text(data) => Point::text(key, offset.min(data.len())),
        NodeKind::Element(data) => {
            if data.size == 0 {
                Point::element(key, 0)
            } else {
                let to_end = offset >= data.size;
                let index = offset.min(data.size - 1);
                let child = state.child_at(key, index)?;
                resolve_child(state, key, child, index, to_end)?
            }
        }
        NodeKind::LineBreak | NodeKind::Decorator => {
            let parent = node.parent?;
            let index = state.index_within_parent(key)?;
            Point::element(parent, if offset == 0 { index } else { index + 1 })
        }
    };
    Some(normalize_boundary(state, registry, point, false))
}

fn resolve_child(state: &EditorState, parent: NodeKey, child: NodeKey, index: usize, to_end: bool) -> Option<Point> {
    let node = state.get(child)?;
    match &node.kind {
        NodeKind::Text(data) => Some(Point::text(child, if to_end { data.len() } else { 0 })),
        NodeKind::Element(data) => {
            let inner = if to_end {
                state.last_descendant(child)
            } else {
                state.first_descendant(child)
            };
            match inner.and_then(|k| state.get(k)) {
                Some(leaf) => match &leaf.kind {
                    NodeKind::Text(text) => Some(Point::text(leaf.key, if to_end { text.len() } else { 0 })),
                    NodeKind::Element(inner_data) => {
                        Some(Point::element(leaf.key, if to_end { inner_data.size } else { 0 }))
                    }
                    _ => {
                        let leaf_parent = leaf.parent?;
                        let leaf_index = state.index_within_parent(leaf.key)?;
                        Some(Point::element(leaf_parent, if to_end { leaf_index + 1 } else { leaf_index }))
                    }
                },
                None => Some(Point::element(child, if to_end { data.size } else { 0 })),
            }
        }
        _ => Some(Point::element(parent, if to_end { index + 1 } else { index })),
    }
}

/// Clamps offsets and drops selections that reference vanished or
/// detached nodes.
pub(crate) fn normalize_selection(state: &mut EditorState) {
    let selection = match state.selection.take() {
        Some(Selection::Range(range)) => clamp_range(state, range).map(Selection::Range),
        Some(Selection::Node(mut nodes)) => {
            nodes.retain(|key| state.is_attached(key));
            (!nodes.is_empty()).then_some(Selection::Node(nodes))
        }
        None => None,
    };
    state.selection = selection;
}

fn clamp_range(state: &EditorState, mut range: RangeSelection) -> Option<RangeSelection> {
    for point in [&mut range.anchor, &mut range.focus] {
        if !state.is_attached(point.key) {
            debug!(key = %point.key, "dropping selection on detached node");
            return None;
        }
        let node = state.get(point.key)?;
        let size = match (&node.kind, point.kind) {
            (NodeKind::Text(data), PointKind::Text) => data.len(),
            (NodeKind::Element(data), PointKind::Element) => data.size,
            _ => return None,
        };
        point.offset = point.offset.min(size);
    }
    Some(range)
}

impl<'a> Transaction<'a> {
    /// Resolves a render position against the pending state.
    pub fn resolve_point(&self, handle: RenderHandle, offset: usize) -> Option<Point> {
        resolve_point(self.state(), self.registry(), self.handles, handle, offset)
    }

    /// Element points become text points when a text node sits right at
    /// the position.
    pub(crate) fn element_point_to_text(&self, point: Point) -> Point {
        if point.kind != PointKind::Element {
            return point;
        }
        let state = self.state();
        if point.offset > 0 {
            if let Some(prev) = state.child_at(point.key, point.offset - 1) {
                if let Some(text) = state.get(prev).and_then(|n| n.as_text()) {
                    return Point::text(prev, text.len());
                }
            }
        }
        match state.child_at(point.key, point.offset) {
            Some(child) if state.get(child).is_some_and(|n| n.is_text()) => Point::text(child, 0),
            _ => point,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::node::{ElementData, Node, TextData};

    fn build() -> (EditorState, NodeKey, NodeKey, NodeKey) {
        let mut state = EditorState::empty();
        let paragraph = NodeKey::from_raw(1);
        let first = NodeKey::from_raw(2);
        let second = NodeKey::from_raw(3);

        let mut root = Node::root();
        if let Some(data) = root.as_element_mut() {
            data.first = Some(paragraph);
            data.last = Some(paragraph);
            data.size = 1;
        }
        let mut p = Node::new(
            paragraph,
            "paragraph",
            NodeKind::Element(ElementData {
                first: Some(first),
                last: Some(second),
                size: 2,
                ..ElementData::default()
            }),
        );
        p.parent = Some(NodeKey::ROOT);
        let mut a = Node::new(first, "text", NodeKind::Text(TextData::new("ab")));
        a.parent = Some(paragraph);
        a.next = Some(second);
        let mut b = Node::new(second, "text", NodeKind::Text(TextData::new("cd")));
        b.parent = Some(paragraph);
        b.prev = Some(first);

        for node in [root, p, a, b] {
            state.nodes.insert(node.key, Arc::new(node));
        }
        (state, paragraph, first, second)
    }

    #[test]
    fn test_offset_zero_prefers_previous_text() {
        let (state, _, first, second) = build();
        let registry = NodeRegistry::with_builtins();
        let point = normalize_boundary(&state, &registry, Point::text(second, 0), false);
        assert_eq!(point, Point::text(first, 2));

        let backward = normalize_boundary(&state, &registry, Point::text(second, 0), true);
        assert_eq!(backward, Point::text(second, 0));
    }

    #[test]
    fn test_resolve_element_offset_past_end() {
        let (state, paragraph, _, second) = build();
        let registry = NodeRegistry::with_builtins();
        let mut handles = HandleMap::default();
        handles.insert(paragraph, RenderHandle(40));

        let point = resolve_point(&state, &registry, &handles, RenderHandle(40), 9);
        assert_eq!(point, Some(Point::text(second, 2)));
        assert_eq!(resolve_point(&state, &registry, &handles, RenderHandle(41), 0), None);
    }

    #[test]
    fn test_normalize_drops_detached_points() {
        let (mut state, _, first, _) = build();
        state.selection = Some(Selection::Range(RangeSelection::collapsed(Point::text(first, 99))));
        normalize_selection(&mut state);
        assert_eq!(
            state.selection.as_ref().and_then(|s| s.as_range()).map(|r| r.anchor),
            Some(Point::text(first, 2))
        );

        state.selection = Some(Selection::Range(RangeSelection::collapsed(Point::text(
            NodeKey::from_raw(77),
            0,
        ))));
        normalize_selection(&mut state);
        assert!(state.selection.is_none());
    }
}
