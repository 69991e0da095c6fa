//! Structural operations: linking, unlinking, splicing and replacing nodes.
//!
//! Every primitive keeps parent/sibling linkage and child counts consistent
//! and goes through [`Transaction::writable`], so touched nodes and their
//! ancestors end up in the dirty sets. Element points of the active range
//! selection are shifted when children are inserted or removed before them.

use crate::errors::{EditorResult, TreeError};
use crate::key::NodeKey;
use crate::node::{Direction, ElementData, ElementFormat, NodeKind};
use crate::selection::{Point, Selection};
use crate::transaction::Transaction;
use std::collections::HashSet;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endpoint {
    Anchor,
    Focus,
}

impl<'a> Transaction<'a> {
    pub(crate) fn writable_element(&mut self, key: NodeKey) -> EditorResult<&mut ElementData> {
        let node = self.writable(key)?;
        match &mut node.kind {
            NodeKind::Element(data) => Ok(data),
            _ => Err(TreeError::NotAnElement(key).into()),
        }
    }

    /// Validates that `key` may become a child of `parent`.
    fn check_insertion(&self, parent: NodeKey, key: NodeKey) -> EditorResult<()> {
        if key.is_root() {
            return Err(TreeError::RootOperation("insert").into());
        }
        if key == parent || self.state().is_parent_of(key, parent) {
            return Err(TreeError::CycleDetected.into());
        }
        self.element(parent)?;
        let node = self.node(key)?;
        if parent.is_root() && (node.is_text() || node.is_line_break()) {
            return Err(TreeError::InvalidStructure(format!(
                "{} node {} cannot be a child of the root",
                node.node_type, key
            ))
            .into());
        }
        Ok(())
    }

    /// Unlinks `key` from its parent without touching the selection.
    pub(crate) fn detach(&mut self, key: NodeKey) -> EditorResult<()> {
        let node = self.node(key)?;
        let Some(parent) = node.parent else {
            return Ok(());
        };
        let (prev, next) = (node.prev, node.next);

        match prev {
            Some(p) => self.writable(p)?.next = next,
            None => self.writable_element(parent)?.first = next,
        }
        match next {
            Some(n) => self.writable(n)?.prev = prev,
            None => self.writable_element(parent)?.last = prev,
        }
        let element = self.writable_element(parent)?;
        element.size = element.size.saturating_sub(1);

        let node = self.writable(key)?;
        node.parent = None;
        node.prev = None;
        node.next = None;
        Ok(())
    }

    /// Links a detached node into `parent` right after `after`, or as the
    /// first child when `after` is `None`.
    pub(crate) fn link(&mut self, parent: NodeKey, after: Option<NodeKey>, key: NodeKey) -> EditorResult<()> {
        let next = match after {
            Some(a) => self.node(a)?.next,
            None => self.element(parent)?.first,
        };
        {
            let node = self.writable(key)?;
            node.parent = Some(parent);
            node.prev = after;
            node.next = next;
        }
        match after {
            Some(a) => self.writable(a)?.next = Some(key),
            None => self.writable_element(parent)?.first = Some(key),
        }
        match next {
            Some(n) => self.writable(n)?.prev = Some(key),
            None => self.writable_element(parent)?.last = Some(key),
        }
        self.writable_element(parent)?.size += 1;
        Ok(())
    }

    /// Detaches `key`, shifting element points on its old parent.
    fn detach_tracked(&mut self, key: NodeKey) -> EditorResult<()> {
        let Some(parent) = self.state().parent(key) else {
            return Ok(());
        };
        let index = self.state().index_within_parent(key);
        self.detach(key)?;
        if let Some(index) = index {
            self.shift_element_points(parent, index, -1);
        }
        Ok(())
    }

    /// Shifts element points on `parent` after a child was inserted at
    /// (`delta > 0`) or removed from (`delta < 0`) `index`.
    pub(crate) fn shift_element_points(&mut self, parent: NodeKey, index: usize, delta: isize) {
        let Some(range) = self.range_selection_mut() else {
            return;
        };
        for point in [&mut range.anchor, &mut range.focus] {
            if point.kind != crate::selection::PointKind::Element || point.key != parent {
                continue;
            }
            let hit = (delta > 0 && index <= point.offset) || (delta < 0 && index < point.offset);
            if hit {
                point.offset = point.offset.saturating_add_signed(delta);
            }
        }
    }

    pub fn append(&mut self, parent: NodeKey, child: NodeKey) -> EditorResult<()> {
        let size = self.element(parent)?.size;
        self.splice(parent, size, 0, &[child])
    }

    pub fn append_all(&mut self, parent: NodeKey, children: &[NodeKey]) -> EditorResult<()> {
        let size = self.element(parent)?.size;
        self.splice(parent, size, 0, children)
    }

    pub fn insert_after(&mut self, target: NodeKey, key: NodeKey) -> EditorResult<()> {
        let parent = self
            .state()
            .parent(target)
            .ok_or(TreeError::ParentNotFound(target))?;
        self.check_insertion(parent, key)?;
        if key == target {
            return Err(TreeError::CycleDetected.into());
        }
        self.detach_tracked(key)?;
        self.link(parent, Some(target), key)?;
        if let Some(index) = self.state().index_within_parent(key) {
            self.shift_element_points(parent, index, 1);
        }
        Ok(())
    }

    pub fn insert_before(&mut self, target: NodeKey, key: NodeKey) -> EditorResult<()> {
        let parent = self
            .state()
            .parent(target)
            .ok_or(TreeError::ParentNotFound(target))?;
        self.check_insertion(parent, key)?;
        if key == target {
            return Err(TreeError::CycleDetected.into());
        }
        self.detach_tracked(key)?;
        let after = self.node(target)?.prev;
        self.link(parent, after, key)?;
        if let Some(index) = self.state().index_within_parent(key) {
            self.shift_element_points(parent, index, 1);
        }
        Ok(())
    }

    /// Removes `key` (and its subtree) from the tree. Parents that cannot be
    /// empty are removed as well once they lose their last child.
    pub fn remove(&mut self, key: NodeKey) -> EditorResult<()> {
        self.remove_node(key, true, false)
    }

    pub fn remove_with(&mut self, key: NodeKey, preserve_empty_parent: bool) -> EditorResult<()> {
        self.remove_node(key, true, preserve_empty_parent)
    }

    pub(crate) fn remove_node(
        &mut self,
        key: NodeKey,
        restore_selection: bool,
        preserve_empty_parent: bool,
    ) -> EditorResult<()> {
        if key.is_root() {
            return Err(TreeError::RootOperation("remove").into());
        }
        let node = self.node(key)?;
        let Some(parent) = node.parent else {
            return Ok(());
        };
        let (prev, next) = (node.prev, node.next);
        let is_element = node.is_element();

        if is_element {
            self.move_points_out_of(key);
        }

        let mut moved = false;
        if restore_selection {
            let hits: Vec<Endpoint> = match self.range_selection() {
                Some(range) => {
                    let mut hits = Vec::new();
                    if range.anchor.key == key {
                        hits.push(Endpoint::Anchor);
                    }
                    if range.focus.key == key {
                        hits.push(Endpoint::Focus);
                    }
                    hits
                }
                None => Vec::new(),
            };
            if !hits.is_empty() {
                let target = self.sibling_point(key, parent, prev, next)?;
                for endpoint in hits {
                    self.set_endpoint(endpoint, target);
                }
                moved = true;
            }
            if let Some(Selection::Node(nodes)) = self.pending.state.selection.as_mut() {
                nodes.delete(key);
            }
        }

        if restore_selection && !moved && self.range_selection().is_some() {
            self.detach_tracked(key)?;
        } else {
            self.detach(key)?;
        }
        trace!(key = %key, parent = %parent, "removed node");

        if !preserve_empty_parent && !parent.is_root() {
            let behavior = self.behavior(parent)?;
            if !behavior.can_be_empty && self.element(parent)?.size == 0 {
                self.remove_node(parent, restore_selection, false)?;
            }
        }
        if restore_selection && parent.is_root() && self.element(parent)?.size == 0 {
            self.select_end(parent)?;
        }
        Ok(())
    }

    pub(crate) fn set_endpoint(&mut self, endpoint: Endpoint, point: Point) {
        if let Some(range) = self.range_selection_mut() {
            match endpoint {
                Endpoint::Anchor => range.anchor = point,
                Endpoint::Focus => range.focus = point,
            }
        }
    }

    /// Points inside the subtree of `key` collapse onto `key` itself so a
    /// following sibling relocation catches them.
    fn move_points_out_of(&mut self, key: NodeKey) {
        let Some(range) = self.range_selection() else {
            return;
        };
        let (anchor, focus) = (range.anchor.key, range.focus.key);
        let anchor_inside = self.state().is_parent_of(key, anchor);
        let focus_inside = self.state().is_parent_of(key, focus);
        if anchor_inside {
            self.set_endpoint(Endpoint::Anchor, Point::element(key, 0));
        }
        if focus_inside {
            self.set_endpoint(Endpoint::Focus, Point::element(key, 0));
        }
    }

    /// Where a point on a removed node should go: the end of the previous
    /// sibling, the start of the next one, or the parent.
    fn sibling_point(
        &self,
        key: NodeKey,
        parent: NodeKey,
        prev: Option<NodeKey>,
        next: Option<NodeKey>,
    ) -> EditorResult<Point> {
        if let Some(prev) = prev {
            let node = self.node(prev)?;
            if let Some(text) = node.as_text() {
                return Ok(Point::text(prev, text.len()));
            }
            if let Some(element) = node.as_element() {
                return Ok(Point::element(prev, element.size));
            }
        } else if let Some(next) = next {
            let node = self.node(next)?;
            if node.is_text() {
                return Ok(Point::text(next, 0));
            }
            if node.is_element() {
                return Ok(Point::element(next, 0));
            }
        }
        let offset = match self.state().index_within_parent(key) {
            Some(index) => index,
            None => self.element(parent)?.size,
        };
        Ok(Point::element(parent, offset))
    }

    /// Replaces `old` with `new` in place. With `include_children`, the
    /// children of `old` move into `new`.
    pub fn replace(&mut self, old: NodeKey, new: NodeKey, include_children: bool) -> EditorResult<NodeKey> {
        if old.is_root() {
            return Err(TreeError::RootOperation("replace").into());
        }
        let parent = self.state().parent(old).ok_or(TreeError::ParentNotFound(old))?;
        self.check_insertion(parent, new)?;
        if include_children {
            self.element(old)?;
            self.element(new)?;
        }
        let saved = self.selection().cloned();
        self.detach(new)?;
        let after = self.node(old)?.prev;
        self.remove_node(old, false, true)?;
        self.link(parent, after, new)?;

        if include_children {
            for child in self.state().children(old) {
                self.append(new, child)?;
            }
        }

        self.set_selection(saved);
        if let Some(range) = self.range_selection() {
            let anchor_hit = range.anchor.key == old;
            let focus_hit = range.focus.key == old;
            if anchor_hit || focus_hit {
                let end = self.end_point_of(new)?;
                if anchor_hit {
                    self.set_endpoint(Endpoint::Anchor, end);
                }
                if focus_hit {
                    self.set_endpoint(Endpoint::Focus, end);
                }
            }
        }
        if self.composition_key() == Some(old) {
            self.set_composition_key(Some(new));
        }
        Ok(new)
    }

    /// Removes `delete_count` children of `parent` starting at `start` and
    /// inserts `nodes` in their place.
    pub fn splice(
        &mut self,
        parent: NodeKey,
        start: usize,
        delete_count: usize,
        nodes: &[NodeKey],
    ) -> EditorResult<()> {
        self.element(parent)?;
        let children = self.state().children(parent);
        if start > children.len() {
            return Err(TreeError::OffsetOutOfRange {
                key: parent,
                offset: start,
                size: children.len(),
            }
            .into());
        }
        for &key in nodes {
            self.check_insertion(parent, key)?;
        }
        let end = start.saturating_add(delete_count).min(children.len());
        let removed: Vec<NodeKey> = children[start..end].to_vec();
        let mut before = if start == 0 { None } else { Some(children[start - 1]) };
        let after_range = children.get(end).copied();

        for &key in &removed {
            self.detach(key)?;
        }
        let mut anchor = before;
        for &key in nodes {
            if Some(key) == anchor {
                anchor = self.node(key)?.prev;
                before = anchor;
            }
            self.detach(key)?;
            self.link(parent, anchor, key)?;
            anchor = Some(key);
        }

        if !removed.is_empty() {
            let inserted: HashSet<NodeKey> = nodes.iter().copied().collect();
            let gone: HashSet<NodeKey> = removed.into_iter().filter(|k| !inserted.contains(k)).collect();
            self.relocate_removed_points(parent, &gone, before, after_range)?;
            let behavior = self.behavior(parent)?;
            if !parent.is_root() && !behavior.can_be_empty && self.element(parent)?.size == 0 {
                self.remove(parent)?;
            }
        }
        Ok(())
    }

    fn relocate_removed_points(
        &mut self,
        parent: NodeKey,
        gone: &HashSet<NodeKey>,
        before: Option<NodeKey>,
        after: Option<NodeKey>,
    ) -> EditorResult<()> {
        let Some(range) = self.range_selection() else {
            return Ok(());
        };
        let (anchor, focus) = (range.anchor.key, range.focus.key);
        let removed = |key: NodeKey, tx: &Self| {
            std::iter::once(key)
                .chain(tx.state().ancestors(key))
                .any(|k| gone.contains(&k))
        };
        let anchor_removed = removed(anchor, self);
        let focus_removed = removed(focus, self);
        if anchor_removed {
            let point = self.sibling_point(anchor, parent, before, after)?;
            self.set_endpoint(Endpoint::Anchor, point);
        }
        if focus_removed {
            let point = self.sibling_point(focus, parent, before, after)?;
            self.set_endpoint(Endpoint::Focus, point);
        }
        Ok(())
    }

    /// Removes every child of `parent`, keeping `parent` itself.
    pub fn clear(&mut self, parent: NodeKey) -> EditorResult<()> {
        for child in self.state().children(parent) {
            self.remove_node(child, true, true)?;
        }
        Ok(())
    }

    pub fn is_empty_element(&self, key: NodeKey) -> EditorResult<bool> {
        Ok(self.element(key)?.size == 0)
    }

    pub fn set_indent(&mut self, key: NodeKey, indent: u32) -> EditorResult<()> {
        self.writable_element(key)?.indent = indent;
        Ok(())
    }

    pub fn set_element_format(&mut self, key: NodeKey, format: ElementFormat) -> EditorResult<()> {
        self.writable_element(key)?.format = format;
        Ok(())
    }

    pub fn set_direction(&mut self, key: NodeKey, direction: Option<Direction>) -> EditorResult<()> {
        if self.element(key)?.direction == direction {
            return Ok(());
        }
        self.writable_element(key)?.direction = direction;
        Ok(())
    }

    /// Sets a type-specific property. `Value::Null` removes it.
    pub fn set_prop(&mut self, key: NodeKey, name: &str, value: serde_json::Value) -> EditorResult<()> {
        let node = self.writable(key)?;
        if value.is_null() {
            node.props.remove(name);
        } else {
            node.props.insert(name.to_string(), value);
        }
        Ok(())
    }
}
