//! # Selection Engine
//!
//! Points, range and node selections, coordinate resolution, and the
//! text-editing operations that run against the active range selection.
//!
//! Editing operations are methods on [`Transaction`] because they mutate the
//! tree and the stored selection together: node primitives relocate selection
//! points as they go, so the selection is never held outside the pending
//! state while an operation runs.

mod caret;
mod edit;
mod format;
mod insert;
mod resolve;

pub use caret::Granularity;
pub use resolve::{normalize_boundary, resolve_point};

pub(crate) use resolve::normalize_selection;

use crate::errors::{EditorResult, TreeError};
use crate::key::NodeKey;
use crate::node::TextFormat;
use crate::registry::NodeRegistry;
use crate::state::EditorState;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    /// Offset is a char offset into a text node.
    Text,
    /// Offset is a child index of an element.
    Element,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub key: NodeKey,
    pub offset: usize,
    pub kind: PointKind,
}

impl Point {
    pub fn text(key: NodeKey, offset: usize) -> Self {
        Self {
            key,
            offset,
            kind: PointKind::Text,
        }
    }

    pub fn element(key: NodeKey, offset: usize) -> Self {
        Self {
            key,
            offset,
            kind: PointKind::Element,
        }
    }

    fn position(&self, state: &EditorState) -> Vec<usize> {
        let mut path = state.path(self.key);
        path.push(self.offset);
        path
    }

    /// Document-order comparison. An element point at index `i` sorts
    /// before anything inside child `i`.
    pub fn compare(&self, other: &Point, state: &EditorState) -> Ordering {
        if self.key == other.key {
            return self.offset.cmp(&other.offset);
        }
        self.position(state).cmp(&other.position(state))
    }

    pub fn is_before(&self, other: &Point, state: &EditorState) -> bool {
        self.compare(other, state) == Ordering::Less
    }
}

/// Capabilities shared by range and node selections.
pub trait BaseSelection {
    /// Nodes touched by the selection, in document order.
    fn nodes(&self, state: &EditorState) -> Vec<NodeKey>;

    fn is_collapsed(&self) -> bool;

    fn text_content(&self, state: &EditorState, registry: &NodeRegistry) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSelection {
    pub anchor: Point,
    pub focus: Point,
    /// Format applied to text typed at a collapsed caret.
    pub format: TextFormat,
    pub style: String,
}

impl RangeSelection {
    pub fn new(anchor: Point, focus: Point) -> Self {
        Self {
            anchor,
            focus,
            format: TextFormat::empty(),
            style: String::new(),
        }
    }

    pub fn collapsed(point: Point) -> Self {
        Self::new(point, point)
    }

    pub fn is_backward(&self, state: &EditorState) -> bool {
        self.focus.is_before(&self.anchor, state)
    }

    /// (start, end) in document order.
    pub fn ordered(&self, state: &EditorState) -> (Point, Point) {
        if self.is_backward(state) {
            (self.focus, self.anchor)
        } else {
            (self.anchor, self.focus)
        }
    }

    pub fn has_format(&self, flag: TextFormat) -> bool {
        self.format.contains(flag)
    }

    pub fn toggle_format(&mut self, flag: TextFormat) {
        self.format = self.format.toggled(flag, None);
    }

    pub fn set_style(&mut self, style: impl Into<String>) {
        self.style = style.into();
    }
}

impl BaseSelection for RangeSelection {
    fn nodes(&self, state: &EditorState) -> Vec<NodeKey> {
        let (start, end) = self.ordered(state);
        let mut first = start.key;
        let mut last = end.key;

        if state.get(first).is_some_and(|n| n.is_element()) {
            if let Some(descendant) = state.descendant_by_index(first, start.offset) {
                first = descendant;
            }
        }
        if state.get(last).is_some_and(|n| n.is_element()) {
            let mut descendant = state.descendant_by_index(last, end.offset);
            // An element point selects up to, not including, the child at
            // its offset.
            if let Some(d) = descendant {
                if d != first && state.child_at(last, end.offset) == Some(d) {
                    descendant = state.prev_sibling(d);
                }
            }
            if let Some(d) = descendant {
                last = d;
            }
        }

        if first == last {
            match state.get(first) {
                Some(node) if node.is_element() && node.children_size() > 0 => Vec::new(),
                Some(_) => vec![first],
                None => Vec::new(),
            }
        } else {
            state.nodes_between(first, last)
        }
    }

    fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }

    fn text_content(&self, state: &EditorState, registry: &NodeRegistry) -> String {
        let nodes = self.nodes(state);
        let (Some(&first), Some(&last)) = (nodes.first(), nodes.last()) else {
            return String::new();
        };
        let (start, end) = self.ordered(state);
        let start_offset = if start.kind == PointKind::Text { start.offset } else { 0 };
        let end_offset = if end.kind == PointKind::Text { Some(end.offset) } else { None };

        let mut out = String::new();
        let mut prev_was_element = true;
        for key in nodes {
            let Some(node) = state.get(key) else {
                continue;
            };
            if node.is_element() && !registry.behavior(node).inline {
                if !prev_was_element {
                    out.push('\n');
                }
                prev_was_element = node.children_size() > 0;
                continue;
            }
            prev_was_element = false;
            if let Some(text) = node.as_text() {
                let chars: Vec<char> = text.text.chars().collect();
                let from = if key == first { start_offset.min(chars.len()) } else { 0 };
                let to = match end_offset {
                    Some(offset) if key == last => offset.min(chars.len()),
                    _ => chars.len(),
                };
                if from < to {
                    out.extend(&chars[from..to]);
                }
            } else if key != last || !self.is_collapsed() {
                out.push_str(node.leaf_text());
            }
        }
        out
    }
}

/// A set of whole nodes, typically decorators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSelection {
    keys: BTreeSet<NodeKey>,
}

impl NodeSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: NodeKey) {
        self.keys.insert(key);
    }

    pub fn delete(&mut self, key: NodeKey) {
        self.keys.remove(&key);
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    pub fn has(&self, key: NodeKey) -> bool {
        self.keys.contains(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.keys.iter().copied()
    }

    pub(crate) fn retain(&mut self, mut keep: impl FnMut(NodeKey) -> bool) {
        self.keys.retain(|k| keep(*k));
    }
}

impl BaseSelection for NodeSelection {
    fn nodes(&self, state: &EditorState) -> Vec<NodeKey> {
        let mut nodes: Vec<NodeKey> = self.keys.iter().copied().filter(|k| state.contains(*k)).collect();
        nodes.sort_by(|a, b| state.compare_order(*a, *b));
        nodes
    }

    fn is_collapsed(&self) -> bool {
        false
    }

    fn text_content(&self, state: &EditorState, registry: &NodeRegistry) -> String {
        self.nodes(state)
            .into_iter()
            .map(|key| state.text_content(key, registry))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Range(RangeSelection),
    Node(NodeSelection),
}

impl Selection {
    pub fn as_range(&self) -> Option<&RangeSelection> {
        match self {
            Selection::Range(range) => Some(range),
            Selection::Node(_) => None,
        }
    }

    pub fn as_node(&self) -> Option<&NodeSelection> {
        match self {
            Selection::Node(nodes) => Some(nodes),
            Selection::Range(_) => None,
        }
    }
}

impl BaseSelection for Selection {
    fn nodes(&self, state: &EditorState) -> Vec<NodeKey> {
        match self {
            Selection::Range(range) => range.nodes(state),
            Selection::Node(nodes) => nodes.nodes(state),
        }
    }

    fn is_collapsed(&self) -> bool {
        match self {
            Selection::Range(range) => range.is_collapsed(),
            Selection::Node(nodes) => nodes.is_collapsed(),
        }
    }

    fn text_content(&self, state: &EditorState, registry: &NodeRegistry) -> String {
        match self {
            Selection::Range(range) => range.text_content(state, registry),
            Selection::Node(nodes) => nodes.text_content(state, registry),
        }
    }
}

impl<'a> Transaction<'a> {
    /// Sets a range selection, keeping the current typing format and style.
    pub fn select_range(&mut self, anchor: Point, focus: Point) {
        match self.range_selection_mut() {
            Some(range) => {
                range.anchor = anchor;
                range.focus = focus;
            }
            None => self.set_selection(Some(Selection::Range(RangeSelection::new(anchor, focus)))),
        }
    }

    /// Selects a range inside one text node. A collapsed caret picks up the
    /// node's format and style for subsequent typing.
    pub fn select_text(&mut self, key: NodeKey, anchor: usize, focus: usize) -> EditorResult<()> {
        let text = self.text(key)?;
        let size = text.len();
        for offset in [anchor, focus] {
            if offset > size {
                return Err(TreeError::OffsetOutOfRange { key, offset, size }.into());
            }
        }
        let (format, style) = (text.format, text.style.clone());
        self.select_range(Point::text(key, anchor), Point::text(key, focus));
        if anchor == focus {
            if let Some(range) = self.range_selection_mut() {
                range.format = format;
                range.style = style;
            }
        }
        Ok(())
    }

    pub fn select_element(&mut self, key: NodeKey, anchor: usize, focus: usize) -> EditorResult<()> {
        let size = self.element(key)?.size;
        for offset in [anchor, focus] {
            if offset > size {
                return Err(TreeError::OffsetOutOfRange { key, offset, size }.into());
            }
        }
        self.select_range(Point::element(key, anchor), Point::element(key, focus));
        Ok(())
    }

    /// Selects a single point, choosing the text or element form from `point`.
    pub fn select_point(&mut self, point: Point) -> EditorResult<()> {
        match point.kind {
            PointKind::Text => self.select_text(point.key, point.offset, point.offset),
            PointKind::Element => self.select_element(point.key, point.offset, point.offset),
        }
    }

    pub fn select_start(&mut self, key: NodeKey) -> EditorResult<()> {
        let point = self.start_point_of(key)?;
        self.select_point(point)
    }

    pub fn select_end(&mut self, key: NodeKey) -> EditorResult<()> {
        let point = self.end_point_of(key)?;
        self.select_point(point)
    }

    /// Replaces the selection with a node selection holding `key`.
    pub fn select_node(&mut self, key: NodeKey) -> EditorResult<()> {
        self.node(key)?;
        let mut nodes = NodeSelection::new();
        nodes.add(key);
        self.set_selection(Some(Selection::Node(nodes)));
        Ok(())
    }

    /// First caret position inside `key`.
    pub fn start_point_of(&self, key: NodeKey) -> EditorResult<Point> {
        let node = self.node(key)?;
        if node.is_element() {
            return match self.state().first_descendant(key) {
                Some(descendant) => self.start_point_of(descendant),
                None => Ok(Point::element(key, 0)),
            };
        }
        if node.is_text() {
            return Ok(Point::text(key, 0));
        }
        let parent = node.parent.ok_or(TreeError::ParentNotFound(key))?;
        match node.prev {
            Some(prev) if self.node(prev)?.is_text() => Ok(Point::text(prev, self.text_size(prev)?)),
            Some(prev) if self.node(prev)?.is_element() => self.end_point_of(prev),
            _ => {
                let index = self.state().index_within_parent(key).unwrap_or(0);
                Ok(Point::element(parent, index))
            }
        }
    }

    /// Last caret position inside `key`.
    pub fn end_point_of(&self, key: NodeKey) -> EditorResult<Point> {
        let node = self.node(key)?;
        if let Some(element) = node.as_element() {
            return match self.state().last_descendant(key) {
                Some(descendant) => self.end_point_of(descendant),
                None => Ok(Point::element(key, element.size)),
            };
        }
        if let Some(text) = node.as_text() {
            return Ok(Point::text(key, text.len()));
        }
        let parent = node.parent.ok_or(TreeError::ParentNotFound(key))?;
        match node.next {
            Some(next) if self.node(next)?.is_text() => Ok(Point::text(next, 0)),
            Some(next) if self.node(next)?.is_element() => Ok(Point::element(next, 0)),
            _ => {
                let index = self.state().index_within_parent(key).unwrap_or(0);
                Ok(Point::element(parent, index + 1))
            }
        }
    }

    /// Nodes covered by the current selection.
    pub fn selected_nodes(&self) -> Vec<NodeKey> {
        match self.selection() {
            Some(selection) => selection.nodes(self.state()),
            None => Vec::new(),
        }
    }

    /// Splits boundary text nodes so the selection covers whole nodes, and
    /// returns those nodes.
    pub fn extract_selection(&mut self) -> EditorResult<Vec<NodeKey>> {
        let range = match self.selection() {
            Some(Selection::Range(range)) => range.clone(),
            Some(Selection::Node(nodes)) => return Ok(nodes.nodes(self.state())),
            None => return Ok(Vec::new()),
        };
        let mut nodes = range.nodes(self.state());
        if nodes.is_empty() {
            return Ok(nodes);
        }
        let (start, end) = range.ordered(self.state());

        if nodes.len() == 1 {
            let only = nodes[0];
            if self.node(only)?.is_text() && !range.is_collapsed() {
                let (from, to) = (start.offset, end.offset);
                let parts = self.split_text(only, &[from, to])?;
                let index = if from == 0 { 0 } else { 1 };
                return Ok(parts.get(index).copied().into_iter().collect());
            }
            return Ok(nodes);
        }

        let first = nodes[0];
        if start.kind == PointKind::Text && self.node(first)?.is_text() {
            let size = self.text_size(first)?;
            if start.offset == size {
                nodes.remove(0);
            } else if start.offset != 0 {
                let parts = self.split_text(first, &[start.offset])?;
                if let Some(right) = parts.get(1) {
                    nodes[0] = *right;
                }
            }
        }
        if let Some(&last) = nodes.last() {
            if end.kind == PointKind::Text && end.key == last && self.node(last)?.is_text() {
                let size = self.text_size(last)?;
                if end.offset == 0 {
                    nodes.pop();
                } else if end.offset != size {
                    self.split_text(last, &[end.offset])?;
                }
            }
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapsed_range() {
        let point = Point::text(NodeKey::from_raw(3), 2);
        let range = RangeSelection::collapsed(point);
        assert!(range.is_collapsed());
        assert!(Selection::Range(range).as_range().is_some());
    }

    #[test]
    fn test_node_selection_coarse_ops() {
        let mut nodes = NodeSelection::new();
        let key = NodeKey::from_raw(5);
        nodes.add(key);
        assert!(nodes.has(key));
        assert!(!nodes.is_collapsed());
        nodes.delete(key);
        assert!(nodes.is_empty());
        nodes.add(key);
        nodes.clear();
        assert!(nodes.is_empty());
    }

    #[test]
    fn test_toggle_selection_format() {
        let mut range = RangeSelection::collapsed(Point::element(NodeKey::ROOT, 0));
        range.toggle_format(TextFormat::BOLD);
        assert!(range.has_format(TextFormat::BOLD));
        range.toggle_format(TextFormat::BOLD);
        assert!(!range.has_format(TextFormat::BOLD));
    }
}
