//! Caret movement over the model.
//!
//! A surface that knows its own layout can answer through
//! `RenderSurface::extend_point`; otherwise movement is computed from the
//! text of the block holding the focus. Inside a block, line breaks read as
//! `'\n'` and inline decorators as U+FFFC, so grapheme and word boundaries
//! come straight from `unicode-segmentation`.

use super::{Point, PointKind};
use crate::errors::EditorResult;
use crate::key::NodeKey;
use crate::node::NodeKind;
use crate::state::EditorState;
use crate::transaction::Transaction;
use crate::tree::Endpoint;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

const OBJECT_REPLACEMENT: char = '\u{FFFC}';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Character,
    Word,
    Line,
}

#[derive(Debug, Clone, Copy)]
struct LeafSpan {
    key: NodeKey,
    start: usize,
    len: usize,
    is_text: bool,
}

impl LeafSpan {
    fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Flattened text of one block with the leaf that owns each char range.
#[derive(Debug)]
struct BlockText {
    block: NodeKey,
    text: String,
    len: usize,
    leaves: Vec<LeafSpan>,
}

impl BlockText {
    fn build(state: &EditorState, block: NodeKey) -> Self {
        let mut text = String::new();
        let mut leaves = Vec::new();
        let mut len = 0;
        let mut stack: Vec<NodeKey> = state.children(block).into_iter().rev().collect();
        while let Some(key) = stack.pop() {
            let Some(node) = state.get(key) else {
                continue;
            };
            let (piece_len, is_text) = match &node.kind {
                NodeKind::Element(_) => {
                    stack.extend(state.children(key).into_iter().rev());
                    continue;
                }
                NodeKind::Text(data) => {
                    text.push_str(&data.text);
                    (data.len(), true)
                }
                NodeKind::LineBreak => {
                    text.push('\n');
                    (1, false)
                }
                NodeKind::Decorator => {
                    text.push(OBJECT_REPLACEMENT);
                    (1, false)
                }
            };
            leaves.push(LeafSpan {
                key,
                start: len,
                len: piece_len,
                is_text,
            });
            len += piece_len;
        }
        Self {
            block,
            text,
            len,
            leaves,
        }
    }

    fn char_index(&self, byte: usize) -> usize {
        self.text[..byte].chars().count()
    }

    /// Position of `point` within the block text.
    fn offset_of(&self, state: &EditorState, point: Point) -> usize {
        if point.kind == PointKind::Text {
            return self
                .leaves
                .iter()
                .find(|span| span.key == point.key)
                .map(|span| span.start + point.offset.min(span.len))
                .unwrap_or(0);
        }
        let at_or_after = |leaf: NodeKey| match state.child_at(point.key, point.offset) {
            Some(child) => leaf == child || state.is_parent_of(child, leaf) || state.is_before(child, leaf),
            None => !state.is_parent_of(point.key, leaf) && state.is_before(point.key, leaf),
        };
        self.leaves
            .iter()
            .find(|span| at_or_after(span.key))
            .map(|span| span.start)
            .unwrap_or(self.len)
    }

    /// Point for block position `offset`. Moving backward prefers the leaf
    /// ending at `offset`, forward the one starting there.
    fn point_at(&self, state: &EditorState, offset: usize, backward: bool) -> Point {
        let ending = |span: &&LeafSpan| span.start < offset && offset <= span.end();
        let starting = |span: &&LeafSpan| span.start <= offset && offset < span.end();
        let span = if backward {
            self.leaves.iter().find(ending).or_else(|| self.leaves.iter().find(starting))
        } else {
            self.leaves.iter().find(starting).or_else(|| self.leaves.iter().find(ending))
        };
        let Some(span) = span else {
            return Point::element(self.block, if offset == 0 { 0 } else { state.children(self.block).len() });
        };
        if span.is_text {
            return Point::text(span.key, offset - span.start);
        }
        match (state.parent(span.key), state.index_within_parent(span.key)) {
            (Some(parent), Some(index)) => {
                Point::element(parent, if offset > span.start { index + 1 } else { index })
            }
            _ => Point::element(self.block, 0),
        }
    }

    fn grapheme_boundaries(&self) -> Vec<usize> {
        let mut bounds: Vec<usize> = self
            .text
            .grapheme_indices(true)
            .map(|(byte, _)| self.char_index(byte))
            .collect();
        bounds.push(self.len);
        bounds
    }

    fn character_step(&self, offset: usize, backward: bool) -> Option<usize> {
        let bounds = self.grapheme_boundaries();
        if backward {
            bounds.into_iter().filter(|b| *b < offset).last()
        } else {
            bounds.into_iter().find(|b| *b > offset)
        }
    }

    fn word_step(&self, offset: usize, backward: bool) -> Option<usize> {
        let words: Vec<(usize, usize)> = self
            .text
            .split_word_bound_indices()
            .filter(|(_, segment)| segment.chars().any(char::is_alphanumeric))
            .map(|(byte, segment)| {
                let start = self.char_index(byte);
                (start, start + segment.chars().count())
            })
            .collect();
        if backward {
            if offset == 0 {
                return None;
            }
            let start = words
                .iter()
                .map(|(start, _)| *start)
                .filter(|start| *start < offset)
                .last()
                .unwrap_or(0);
            Some(start)
        } else {
            if offset >= self.len {
                return None;
            }
            let end = words
                .iter()
                .map(|(_, end)| *end)
                .find(|end| *end > offset)
                .unwrap_or(self.len);
            Some(end)
        }
    }

    fn line_step(&self, offset: usize, backward: bool) -> usize {
        let chars: Vec<char> = self.text.chars().collect();
        if backward {
            chars[..offset.min(chars.len())]
                .iter()
                .rposition(|c| *c == '\n')
                .map(|i| i + 1)
                .unwrap_or(0)
        } else {
            chars
                .iter()
                .skip(offset)
                .position(|c| *c == '\n')
                .map(|i| offset + i)
                .unwrap_or(self.len)
        }
    }
}

impl<'a> Transaction<'a> {
    /// Moves the focus by one unit of `granularity`. Without `extend` the
    /// anchor follows, collapsing the selection.
    pub fn move_caret(&mut self, backward: bool, granularity: Granularity, extend: bool) -> EditorResult<()> {
        self.extend_focus(backward, granularity)?;
        if !extend {
            if let Some(range) = self.range_selection_mut() {
                range.anchor = range.focus;
            }
        }
        Ok(())
    }

    pub(crate) fn extend_focus(&mut self, backward: bool, granularity: Granularity) -> EditorResult<()> {
        let Some(focus) = self.range_selection().map(|r| r.focus) else {
            return Ok(());
        };
        let from_surface = self
            .surface
            .and_then(|surface| surface.extend_point(focus, backward, granularity))
            .filter(|point| self.state().is_attached(point.key));
        let target = match from_surface {
            Some(point) => Some(point),
            None => self.step_point(focus, backward, granularity)?,
        };
        if let Some(point) = target {
            self.set_endpoint(Endpoint::Focus, point);
        }
        Ok(())
    }

    fn step_point(&self, point: Point, backward: bool, granularity: Granularity) -> EditorResult<Option<Point>> {
        let Some(block) = self.block_of(point.key) else {
            return Ok(None);
        };
        let text = BlockText::build(self.state(), block);
        let offset = text.offset_of(self.state(), point);
        let target = match granularity {
            Granularity::Character => text.character_step(offset, backward),
            Granularity::Word => text.word_step(offset, backward),
            Granularity::Line => {
                let line_edge = text.line_step(offset, backward);
                return Ok((line_edge != offset).then(|| text.point_at(self.state(), line_edge, backward)));
            }
        };
        if let Some(target) = target {
            return Ok(Some(text.point_at(self.state(), target, backward)));
        }
        // Crossing into the neighbouring block counts as one step.
        match self.adjacent_block(block, backward) {
            Some(next) if backward => Ok(Some(self.end_point_of(next)?)),
            Some(next) => Ok(Some(self.start_point_of(next)?)),
            None => Ok(None),
        }
    }

    /// Closest block before (or after) `block` in document order.
    fn adjacent_block(&self, block: NodeKey, backward: bool) -> Option<NodeKey> {
        let state = self.state();
        let mut cursor = block;
        loop {
            if cursor.is_root() {
                return None;
            }
            let sibling = if backward {
                state.prev_sibling(cursor)
            } else {
                state.next_sibling(cursor)
            };
            if let Some(mut target) = sibling {
                while !self.is_block(target) {
                    let edge = if backward {
                        state.last_child(target)
                    } else {
                        state.first_child(target)
                    };
                    match edge {
                        Some(child) => target = child,
                        None => break,
                    }
                }
                return Some(target);
            }
            cursor = state.parent(cursor)?;
        }
    }

    /// The node directly next to `focus` in the given direction, stepping
    /// out to the parent's sibling at the edge of a text node.
    pub(crate) fn adjacent_node(&self, focus: Point, backward: bool) -> Option<NodeKey> {
        let state = self.state();
        match focus.kind {
            PointKind::Element => {
                if backward {
                    focus.offset.checked_sub(1).and_then(|i| state.child_at(focus.key, i))
                } else {
                    state.child_at(focus.key, focus.offset)
                }
            }
            PointKind::Text => {
                let size = state.get(focus.key)?.leaf_size();
                let at_edge = (backward && focus.offset == 0) || (!backward && focus.offset == size);
                if !at_edge {
                    return None;
                }
                let sibling = if backward {
                    state.prev_sibling(focus.key)
                } else {
                    state.next_sibling(focus.key)
                };
                sibling.or_else(|| {
                    let parent = state.parent(focus.key)?;
                    if backward {
                        state.prev_sibling(parent)
                    } else {
                        state.next_sibling(parent)
                    }
                })
            }
        }
    }
}
