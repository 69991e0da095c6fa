//! Text insertion and deletion against the active range selection.

use super::{BaseSelection, Granularity, Point, PointKind, Selection};
use crate::errors::{EditorResult, TreeError};
use crate::key::NodeKey;
use crate::node::{TextFormat, TextMode};
use crate::transaction::Transaction;
use tracing::trace;

/// Removal range on one side of a multi-node deletion, expressed as a
/// position between children so it survives sibling removal.
#[derive(Debug, Clone, Copy)]
struct Boundary {
    parent: NodeKey,
    /// Start side: the child the boundary sits after. End side: the child it
    /// sits before. `None` is the start (or end) of `parent`.
    child: Option<NodeKey>,
}

impl<'a> Transaction<'a> {
    /// Inserts `text` at the selection, replacing any selected content.
    pub fn insert_text(&mut self, text: &str) -> EditorResult<()> {
        let Some(range) = self.range_selection().cloned() else {
            return Ok(());
        };
        if !range.is_collapsed() {
            let (start, end) = range.ordered(self.state());
            let same_text = start.key == end.key && start.kind == PointKind::Text && end.kind == PointKind::Text;
            if !same_text || self.text(start.key)?.mode == TextMode::Token {
                self.remove_text()?;
                return if text.is_empty() { Ok(()) } else { self.insert_text(text) };
            }
            if self.text(start.key)?.mode == TextMode::Segmented {
                self.set_mode(start.key, TextMode::Normal)?;
            }
            let key = self.splice_text(start.key, start.offset, end.offset - start.offset, text, true)?;
            if self.text(key)?.is_empty() {
                self.remove_node(key, true, false)?;
            }
            return Ok(());
        }
        if text.is_empty() {
            return Ok(());
        }

        let mut point = range.anchor;
        if point.kind == PointKind::Element {
            point = self.transfer_element_point(point, range.format, &range.style)?;
        }
        let key = point.key;
        let offset = point.offset;
        let data = self.text(key)?.clone();
        let behavior = self.behavior(key)?;
        let node = self.node(key)?;
        let (prev, next) = (node.prev, node.next);
        let parent = node.parent.ok_or(TreeError::ParentNotFound(key))?;
        let parent_behavior = self.behavior(parent)?;
        let locked = data.is_token_or_segmented();

        if offset == data.len()
            && (locked
                || !behavior.can_insert_text_after
                || (!parent_behavior.can_insert_text_after && next.is_none()))
        {
            let reusable = next.filter(|n| self.accepts_text_before(*n));
            let target = match reusable {
                Some(existing) => existing,
                None => {
                    let fresh = self.create_formatted_text(range.format, &range.style)?;
                    if parent_behavior.can_insert_text_after {
                        self.insert_after(key, fresh)?;
                    } else {
                        self.insert_after(parent, fresh)?;
                    }
                    fresh
                }
            };
            self.select_text(target, 0, 0)?;
            return self.insert_text(text);
        }
        if offset == 0
            && (locked
                || !behavior.can_insert_text_before
                || (!parent_behavior.can_insert_text_before && prev.is_none()))
        {
            let reusable = prev.filter(|p| {
                self.text(*p)
                    .map(|t| !t.is_token_or_segmented())
                    .unwrap_or(false)
            });
            let target = match reusable {
                Some(existing) => existing,
                None => {
                    let fresh = self.create_formatted_text(range.format, &range.style)?;
                    if parent_behavior.can_insert_text_before {
                        self.insert_before(key, fresh)?;
                    } else {
                        self.insert_before(parent, fresh)?;
                    }
                    fresh
                }
            };
            self.select_end(target)?;
            return self.insert_text(text);
        }

        let mut key = key;
        if data.mode == TextMode::Segmented {
            let plain = self.create_text_like(key, &data.text)?;
            self.set_mode_unchecked(plain, TextMode::Normal)?;
            self.replace(key, plain, false)?;
            key = plain;
        }
        if data.mode == TextMode::Token {
            let fresh = self.create_formatted_text(range.format, &range.style)?;
            self.set_text(fresh, text)?;
            self.replace(key, fresh, false)?;
            let size = self.text_size(fresh)?;
            return self.select_text(fresh, size, size);
        }

        if data.format != range.format || data.style != range.style {
            if data.is_empty() {
                self.set_format(key, range.format)?;
                self.set_style(key, &range.style)?;
            } else {
                let fresh = self.create_formatted_text(range.format, &range.style)?;
                self.set_text(fresh, text)?;
                if offset == 0 {
                    self.insert_before(key, fresh)?;
                } else {
                    let parts = self.split_text(key, &[offset])?;
                    let left = parts.first().copied().unwrap_or(key);
                    self.insert_after(left, fresh)?;
                }
                let size = self.text_size(fresh)?;
                return self.select_text(fresh, size, size);
            }
        }

        trace!(key = %key, offset, "insert text");
        self.splice_text(key, offset, 0, text, true)?;
        Ok(())
    }

    fn accepts_text_before(&self, key: NodeKey) -> bool {
        match (self.text(key), self.behavior(key)) {
            (Ok(text), Ok(behavior)) => behavior.can_insert_text_before && !text.is_token_or_segmented(),
            _ => false,
        }
    }

    fn create_formatted_text(&mut self, format: TextFormat, style: &str) -> EditorResult<NodeKey> {
        let key = self.create_text("")?;
        self.set_format(key, format)?;
        self.set_style(key, style)?;
        Ok(key)
    }

    /// Places an empty text node at an element point so typing has a target.
    /// Points on the root get a paragraph around the text.
    fn transfer_element_point(&mut self, point: Point, format: TextFormat, style: &str) -> EditorResult<Point> {
        let text = self.create_formatted_text(format, style)?;
        let target = if point.key.is_root() {
            let paragraph = self.create_paragraph()?;
            self.append(paragraph, text)?;
            paragraph
        } else {
            text
        };
        match self.state().child_at(point.key, point.offset) {
            Some(placement) => self.insert_before(placement, target)?,
            None => self.append(point.key, target)?,
        }
        self.select_text(text, 0, 0)?;
        if let Some(range) = self.range_selection_mut() {
            range.format = format;
            range.style = style.to_string();
        }
        Ok(Point::text(text, 0))
    }

    /// Deletes the selected content, merging the blocks at either end.
    pub fn remove_text(&mut self) -> EditorResult<()> {
        let Some(range) = self.range_selection().cloned() else {
            return Ok(());
        };
        if range.is_collapsed() {
            return Ok(());
        }
        let (start, end) = range.ordered(self.state());

        if start.key == end.key && start.kind == PointKind::Text {
            return self.remove_within_text(start.key, start.offset, end.offset);
        }

        let end_boundary = self.end_boundary(end)?;
        let start_boundary = self.start_boundary(start)?;
        let common = self
            .state()
            .common_ancestor(start_boundary.parent, end_boundary.parent)
            .unwrap_or(NodeKey::ROOT);

        // Start side: everything after the boundary, level by level.
        let mut left = start_boundary;
        while left.parent != common {
            self.remove_children_after(left.parent, left.child)?;
            left = Boundary {
                parent: self.state().parent(left.parent).unwrap_or(common),
                child: Some(left.parent),
            };
        }
        // End side: everything before the boundary.
        let mut right = end_boundary;
        while right.parent != common {
            self.remove_children_before(right.parent, right.child)?;
            right = Boundary {
                parent: self.state().parent(right.parent).unwrap_or(common),
                child: Some(right.parent),
            };
        }
        self.remove_children_between(common, left.child, right.child)?;

        let start_block = self.block_below(start_boundary.parent, common);
        let end_block = self.block_below(end_boundary.parent, common);
        if let (Some(start_block), Some(end_block)) = (start_block, end_block) {
            if start_block != end_block && self.state().is_attached(end_block) {
                for child in self.state().children(end_block) {
                    self.detach(child)?;
                    let last = self.element(start_block)?.last;
                    self.link(start_block, last, child)?;
                }
                let mut cursor = Some(end_block);
                while let Some(key) = cursor.filter(|k| *k != common && !k.is_root()) {
                    let parent = self.state().parent(key);
                    if self.element(key)?.size > 0 {
                        break;
                    }
                    self.remove_node(key, false, true)?;
                    cursor = parent;
                }
            }
        }

        self.prune_empty_inline(start_boundary.parent)?;
        self.prune_empty_inline(end_boundary.parent)?;

        let caret = self.caret_after_removal(start_boundary, start_block)?;
        let caret = self.element_point_to_text(caret);
        self.select_point(caret)
    }

    fn remove_within_text(&mut self, key: NodeKey, from: usize, to: usize) -> EditorResult<()> {
        let mode = self.text(key)?.mode;
        if mode == TextMode::Token {
            // Tokens are never partially deleted.
            self.select_text(key, 0, 0)?;
            self.remove_node(key, true, false)?;
            if let Some(anchor) = self.range_selection().map(|r| r.anchor) {
                let point = self.element_point_to_text(anchor);
                self.select_point(point)?;
            }
            return Ok(());
        }
        if mode == TextMode::Segmented {
            self.set_mode(key, TextMode::Normal)?;
        }
        self.splice_text(key, from, to - from, "", false)?;
        self.select_text(key, from, from)?;
        if self.text(key)?.is_empty() {
            self.remove_node(key, true, false)?;
        }
        Ok(())
    }

    fn start_boundary(&mut self, point: Point) -> EditorResult<Boundary> {
        if point.kind == PointKind::Element {
            let child = point
                .offset
                .checked_sub(1)
                .and_then(|i| self.state().child_at(point.key, i));
            return Ok(Boundary {
                parent: point.key,
                child,
            });
        }
        let key = point.key;
        let parent = self.state().parent(key).ok_or(TreeError::ParentNotFound(key))?;
        let data = self.text(key)?.clone();
        let size = data.len();
        let offset = if data.mode == TextMode::Token && point.offset < size {
            0
        } else {
            point.offset
        };
        let child = if offset == 0 {
            self.node(key)?.prev
        } else if offset >= size {
            Some(key)
        } else {
            if data.mode == TextMode::Segmented {
                self.set_mode(key, TextMode::Normal)?;
            }
            self.split_text(key, &[offset])?;
            Some(key)
        };
        Ok(Boundary { parent, child })
    }

    fn end_boundary(&mut self, point: Point) -> EditorResult<Boundary> {
        if point.kind == PointKind::Element {
            return Ok(Boundary {
                parent: point.key,
                child: self.state().child_at(point.key, point.offset),
            });
        }
        let key = point.key;
        let parent = self.state().parent(key).ok_or(TreeError::ParentNotFound(key))?;
        let data = self.text(key)?.clone();
        let size = data.len();
        let offset = if data.mode == TextMode::Token && point.offset > 0 {
            size
        } else {
            point.offset
        };
        let child = if offset == 0 {
            Some(key)
        } else if offset >= size {
            self.node(key)?.next
        } else {
            if data.mode == TextMode::Segmented {
                self.set_mode(key, TextMode::Normal)?;
            }
            let parts = self.split_text(key, &[offset])?;
            parts.get(1).copied()
        };
        Ok(Boundary { parent, child })
    }

    fn remove_children_after(&mut self, parent: NodeKey, after: Option<NodeKey>) -> EditorResult<()> {
        let children = self.state().children(parent);
        let skip = match after {
            Some(child) => children.iter().position(|c| *c == child).map(|i| i + 1).unwrap_or(children.len()),
            None => 0,
        };
        for child in children.into_iter().skip(skip) {
            self.remove_node(child, false, true)?;
        }
        Ok(())
    }

    fn remove_children_before(&mut self, parent: NodeKey, before: Option<NodeKey>) -> EditorResult<()> {
        let children = self.state().children(parent);
        let take = match before {
            Some(child) => children.iter().position(|c| *c == child).unwrap_or(0),
            None => children.len(),
        };
        for child in children.into_iter().take(take) {
            self.remove_node(child, false, true)?;
        }
        Ok(())
    }

    fn remove_children_between(
        &mut self,
        parent: NodeKey,
        after: Option<NodeKey>,
        before: Option<NodeKey>,
    ) -> EditorResult<()> {
        let children = self.state().children(parent);
        let from = match after {
            Some(child) => children.iter().position(|c| *c == child).map(|i| i + 1).unwrap_or(children.len()),
            None => 0,
        };
        let to = match before {
            Some(child) => children.iter().position(|c| *c == child).unwrap_or(children.len()),
            None => children.len(),
        };
        if from < to {
            for child in children[from..to].iter().copied() {
                self.remove_node(child, false, true)?;
            }
        }
        Ok(())
    }

    /// Nearest non-inline element at or above `key`, if it lies strictly
    /// below `common`.
    fn block_below(&self, key: NodeKey, common: NodeKey) -> Option<NodeKey> {
        std::iter::once(key)
            .chain(self.state().ancestors(key))
            .take_while(|k| *k != common)
            .find(|k| self.state().get(*k).is_some_and(|n| n.is_element()) && !self.is_inline(*k))
    }

    fn prune_empty_inline(&mut self, from: NodeKey) -> EditorResult<()> {
        let chain: Vec<NodeKey> = std::iter::once(from).chain(self.state().ancestors(from)).collect();
        for key in chain {
            if key.is_root() || !self.state().is_attached(key) {
                continue;
            }
            let Ok(element) = self.element(key) else {
                continue;
            };
            let behavior = self.behavior(key)?;
            if behavior.inline && !behavior.can_be_empty && element.size == 0 {
                self.remove_node(key, false, false)?;
            }
        }
        Ok(())
    }

    fn caret_after_removal(&self, start: Boundary, start_block: Option<NodeKey>) -> EditorResult<Point> {
        let state = self.state();
        if state.is_attached(start.parent) {
            let index = match start.child.filter(|c| state.parent(*c) == Some(start.parent)) {
                Some(child) => state.index_within_parent(child).map(|i| i + 1).unwrap_or(0),
                None => 0,
            };
            return Ok(Point::element(start.parent, index));
        }
        if let Some(block) = start_block.filter(|b| state.is_attached(*b)) {
            return Ok(Point::element(block, self.element(block)?.size));
        }
        let fallback = state
            .ancestors(start.parent)
            .find(|k| state.is_attached(*k))
            .unwrap_or(NodeKey::ROOT);
        Ok(Point::element(fallback, self.element(fallback)?.size))
    }

    /// Deletes one character, or the selection when it is not collapsed.
    pub fn delete_character(&mut self, backward: bool) -> EditorResult<()> {
        let Some(range) = self.range_selection().cloned() else {
            if let Some(Selection::Node(nodes)) = self.selection().cloned() {
                for key in nodes.keys() {
                    self.remove(key)?;
                }
                self.set_selection(None);
            }
            return Ok(());
        };
        let was_collapsed = range.is_collapsed();
        if was_collapsed {
            let anchor = range.anchor;
            let anchor_is_empty_element = self.element(anchor.key).map(|e| e.size == 0).unwrap_or(false);

            if let Some(adjacent) = self.adjacent_node(range.focus, backward) {
                let node = self.node(adjacent)?;
                let behavior = self.behavior(adjacent)?;
                if node.is_decorator() && !behavior.isolated {
                    if behavior.keyboard_selectable && anchor_is_empty_element && !anchor.key.is_root() {
                        self.remove(anchor.key)?;
                        self.select_node(adjacent)?;
                    } else {
                        self.remove(adjacent)?;
                    }
                    return Ok(());
                }
                if !backward && node.is_element() && anchor_is_empty_element && !anchor.key.is_root() {
                    self.remove(anchor.key)?;
                    self.select_start(adjacent)?;
                    return Ok(());
                }
            }

            self.extend_focus(backward, Granularity::Character)?;
            let Some(extended) = self.range_selection().cloned() else {
                return Ok(());
            };
            if !extended.is_collapsed() {
                if let Some((key, offset)) = self.segmented_endpoint(extended.anchor, extended.focus, backward) {
                    return self.remove_segment(key, backward, offset);
                }
            } else if backward && extended.anchor.offset == 0 {
                let element = match extended.anchor.kind {
                    PointKind::Element => Some(extended.anchor.key),
                    PointKind::Text => self.state().parent(extended.anchor.key),
                };
                if let Some(element) = element {
                    if self.collapse_at_start(element)? {
                        return Ok(());
                    }
                }
            }
        }

        self.remove_text()?;

        if backward && !was_collapsed {
            if let Some(range) = self.range_selection().cloned() {
                let anchor = range.anchor;
                if range.is_collapsed() && anchor.kind == PointKind::Element && anchor.offset == 0 {
                    let at_top = self.state().parent(anchor.key) == Some(NodeKey::ROOT)
                        && self.state().index_within_parent(anchor.key) == Some(0);
                    if at_top && self.element(anchor.key)?.size == 0 {
                        self.collapse_at_start(anchor.key)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// The segmented text node and offset that a character deletion should
    /// remove a whole segment from, if any.
    fn segmented_endpoint(&self, anchor: Point, focus: Point, backward: bool) -> Option<(NodeKey, usize)> {
        let segmented = |point: Point| {
            (point.kind == PointKind::Text)
                .then(|| self.text(point.key).ok())
                .flatten()
                .filter(|t| t.mode == TextMode::Segmented)
                .map(|t| t.len())
        };
        if let Some(size) = segmented(focus) {
            let offset = focus.offset;
            if focus.key == anchor.key || (backward && offset != size) || (!backward && offset != 0) {
                return Some((focus.key, offset));
            }
        } else if let Some(size) = segmented(anchor) {
            let offset = anchor.offset;
            if (backward && offset != 0) || (!backward && offset != size) {
                return Some((anchor.key, offset));
            }
        }
        None
    }

    fn collapse_at_start(&mut self, element: NodeKey) -> EditorResult<bool> {
        let node_type = self.node(element)?.node_type;
        match self.registry().get(node_type).and_then(|class| class.collapse_at_start) {
            Some(hook) => hook(self, element),
            None => Ok(false),
        }
    }

    /// Removes the whitespace-delimited segment of a segmented node that
    /// contains `offset`. Segments start at each whitespace char.
    pub fn remove_segment(&mut self, key: NodeKey, backward: bool, offset: usize) -> EditorResult<()> {
        let content = self.text(key)?.text.clone();
        let mut segments: Vec<String> = Vec::new();
        for c in content.chars() {
            match segments.last_mut() {
                Some(current) if !c.is_whitespace() => current.push(c),
                _ => segments.push(c.to_string()),
            }
        }

        let count = segments.len();
        let mut segment_end = 0;
        let mut restore = Some(0);
        for i in 0..count {
            restore = Some(segment_end);
            segment_end += segments[i].chars().count();
            let is_last = i + 1 == count;
            if (backward && segment_end == offset) || segment_end > offset || is_last {
                segments.remove(i);
                if is_last {
                    restore = None;
                }
                break;
            }
        }

        let joined: String = segments.concat();
        let remaining = joined.trim();
        if remaining.is_empty() {
            return self.remove(key);
        }
        self.set_text(key, remaining)?;
        let size = self.text_size(key)?;
        let caret = restore.unwrap_or(size).min(size);
        self.select_text(key, caret, caret)
    }

    /// Deletes to the next word boundary, or the selection.
    pub fn delete_word(&mut self, backward: bool) -> EditorResult<()> {
        if self.range_selection().is_some_and(|r| r.is_collapsed()) {
            self.extend_focus(backward, Granularity::Word)?;
        }
        self.remove_text()
    }

    /// Deletes to the line boundary. At the boundary itself this removes a
    /// single character instead.
    pub fn delete_line(&mut self, backward: bool) -> EditorResult<()> {
        if self.range_selection().is_some_and(|r| r.is_collapsed()) {
            self.extend_focus(backward, Granularity::Line)?;
            if self.range_selection().is_some_and(|r| r.is_collapsed()) {
                return self.delete_character(backward);
            }
        }
        self.remove_text()
    }
}
