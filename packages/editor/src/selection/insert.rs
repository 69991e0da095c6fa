//! Node insertion at the selection: inline splices, block wrapping and
//! paragraph splitting.

use super::{BaseSelection, Selection};
use crate::errors::{EditorResult, TreeError};
use crate::key::NodeKey;
use crate::transaction::Transaction;
use tracing::debug;

impl<'a> Transaction<'a> {
    /// Inserts `nodes` at the selection.
    ///
    /// Inline-only input is spliced into the current block. Input containing
    /// blocks splits the current block at the caret, merges the first
    /// inserted block into it and the trailing content into the last
    /// inserted block. Blocks marked `literal_text` only receive text.
    pub fn insert_nodes(&mut self, nodes: &[NodeKey]) -> EditorResult<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        if let Some(Selection::Node(selected)) = self.selection().cloned() {
            return self.insert_nodes_replacing(selected.nodes(self.state()), nodes);
        }
        let Some(range) = self.range_selection().cloned() else {
            return Ok(());
        };
        if range.anchor.key.is_root() {
            self.insert_paragraph()?;
            return self.insert_nodes(nodes);
        }

        let (start, _) = range.ordered(self.state());
        let first_block = self
            .block_of(start.key)
            .ok_or(TreeError::ParentNotFound(start.key))?;
        let last = nodes[nodes.len() - 1];

        if self.behavior(first_block)?.literal_text {
            return self.insert_literal(nodes);
        }

        let blocks_present = nodes.iter().any(|key| {
            self.state()
                .get(*key)
                .is_some_and(|n| (n.is_element() || n.is_decorator()) && !self.is_inline(*key))
        });
        if !blocks_present {
            let (block, index) = self.remove_text_and_split_block()?;
            self.splice(block, index, 0, nodes)?;
            return self.select_end(last);
        }

        if !range.is_collapsed() {
            self.remove_text()?;
        }
        let anchor = self
            .range_selection()
            .map(|r| r.anchor.key)
            .unwrap_or(start.key);
        let first_block = self.block_of(anchor).unwrap_or(first_block);

        let wrapper = self.wrap_inline_nodes(nodes)?;
        let node_to_select = self.state().last_descendant(wrapper).unwrap_or(wrapper);
        let blocks = self.state().children(wrapper);
        let first_is_element = self.element(first_block).is_ok();
        let first_is_empty = self.element(first_block).map(|e| e.size == 0).unwrap_or(false);

        let inserted_paragraph = if !first_is_element || !first_is_empty {
            self.insert_paragraph()?
        } else {
            None
        };

        let mut remaining = blocks.as_slice();
        if let Some(&head) = blocks.first() {
            let mergeable = self.element(head).map(|e| e.size > 0).unwrap_or(false)
                && self.is_block(head)
                && first_is_element
                && !first_is_empty;
            if mergeable {
                for child in self.state().children(head) {
                    self.append(first_block, child)?;
                }
                remaining = &blocks[1..];
            }
        }
        let mut after = first_block;
        for &block in remaining {
            self.insert_after(after, block)?;
            after = block;
        }

        let last_inserted_block = self.block_of(node_to_select);
        if let (Some(paragraph), Some(target)) = (inserted_paragraph, last_inserted_block) {
            let tail_is_block = blocks.last().is_some_and(|b| self.is_block(*b));
            if self.element(target).is_ok() && tail_is_block && target != paragraph {
                for child in self.state().children(paragraph) {
                    self.append(target, child)?;
                }
                self.remove(paragraph)?;
            }
        }
        if first_is_element
            && !first_block.is_root()
            && self.state().is_attached(first_block)
            && self.element(first_block)?.size == 0
        {
            self.remove(first_block)?;
        }
        self.select_end(node_to_select)?;

        if self.state().is_attached(first_block) && last_inserted_block != Some(first_block) {
            if let Some(trailing) = self.state().last_child(first_block) {
                if self.node(trailing)?.is_line_break() {
                    self.remove(trailing)?;
                }
            }
        }
        debug!(count = nodes.len(), "inserted nodes");
        Ok(())
    }

    /// Puts the caret after the last selected node, inserts there, then
    /// removes what was selected.
    fn insert_nodes_replacing(&mut self, selected: Vec<NodeKey>, nodes: &[NodeKey]) -> EditorResult<()> {
        let Some(&last_selected) = selected.last() else {
            return Ok(());
        };
        if self.node(last_selected)?.is_text() {
            let size = self.text_size(last_selected)?;
            self.set_selection(None);
            self.select_text(last_selected, size, size)?;
        } else {
            let parent = self
                .state()
                .parent(last_selected)
                .ok_or(TreeError::ParentNotFound(last_selected))?;
            let index = self.state().index_within_parent(last_selected).unwrap_or(0) + 1;
            self.set_selection(None);
            self.select_element(parent, index, index)?;
        }
        self.insert_nodes(nodes)?;
        for key in selected {
            if self.state().is_attached(key) {
                self.remove(key)?;
            }
        }
        Ok(())
    }

    /// Insertion into a `literal_text` block: element structure is
    /// flattened to its text.
    fn insert_literal(&mut self, nodes: &[NodeKey]) -> EditorResult<()> {
        let head = nodes[0];
        if self.element(head).is_ok() && self.behavior(head)?.literal_text {
            let text = self.state().text_content(head, self.registry());
            return self.insert_text(&text);
        }
        let mut flattened = Vec::with_capacity(nodes.len());
        for &key in nodes {
            if self.element(key).is_ok() {
                let text = self.state().text_content(key, self.registry());
                flattened.push(self.create_text(&text)?);
            } else {
                flattened.push(key);
            }
        }
        let (block, index) = self.remove_text_and_split_block()?;
        self.splice(block, index, 0, &flattened)?;
        match flattened.last() {
            Some(last) => self.select_end(*last),
            None => Ok(()),
        }
    }

    /// Groups runs of inline nodes into fresh paragraphs under a detached
    /// holder element. Block nodes are appended as they are. A line break
    /// that would start a new paragraph is dropped.
    fn wrap_inline_nodes(&mut self, nodes: &[NodeKey]) -> EditorResult<NodeKey> {
        let holder = self.create_paragraph()?;
        let mut current: Option<NodeKey> = None;
        for &key in nodes {
            let node = self.node(key)?;
            let is_line_break = node.is_line_break();
            let inline = node.is_text() || is_line_break || self.is_inline(key);
            if !inline {
                self.append(holder, key)?;
                current = None;
                continue;
            }
            let block = match current {
                Some(block) => block,
                None => {
                    let block = self.create_paragraph()?;
                    self.append(holder, block)?;
                    current = Some(block);
                    if is_line_break {
                        continue;
                    }
                    block
                }
            };
            self.append(block, key)?;
        }
        Ok(holder)
    }

    /// Splits the block at the caret after deleting any selected content.
    /// Returns the block and the child index where content can be spliced.
    pub(crate) fn remove_text_and_split_block(&mut self) -> EditorResult<(NodeKey, usize)> {
        if self.range_selection().is_some_and(|r| !r.is_collapsed()) {
            self.remove_text()?;
        }
        let Some(anchor) = self.range_selection().map(|r| r.anchor) else {
            return Err(TreeError::InvalidStructure("no range selection".into()).into());
        };
        let (mut node, mut offset) = (anchor.key, anchor.offset);
        while !self.is_block(node) {
            (node, offset) = self.split_node_at_point(node, offset)?;
        }
        Ok((node, offset))
    }

    fn split_node_at_point(&mut self, key: NodeKey, offset: usize) -> EditorResult<(NodeKey, usize)> {
        let parent = self.state().parent(key).ok_or(TreeError::ParentNotFound(key))?;
        if self.node(key)?.is_text() {
            let parts = self.split_text(key, &[offset])?;
            let Some(&head) = parts.first() else {
                return Ok((parent, self.state().index_within_parent(key).unwrap_or(0)));
            };
            let shift = if offset == 0 { 0 } else { 1 };
            let index = self.state().index_within_parent(head).unwrap_or(0) + shift;
            return Ok((parent, index));
        }
        let index = self.state().index_within_parent(key).unwrap_or(0);
        if self.element(key).is_err() || offset == 0 {
            return Ok((parent, index));
        }
        let moving: Vec<NodeKey> = self.state().children(key).into_iter().skip(offset).collect();
        if !moving.is_empty() {
            let sibling = match self.insert_new_after(key)? {
                Some(sibling) => sibling,
                None => {
                    let node_type = self.node(key)?.node_type;
                    let sibling = self.create_node(node_type)?;
                    self.insert_after(key, sibling)?;
                    sibling
                }
            };
            for child in moving {
                self.append(sibling, child)?;
            }
        }
        Ok((parent, self.state().index_within_parent(key).unwrap_or(index) + 1))
    }

    fn insert_new_after(&mut self, key: NodeKey) -> EditorResult<Option<NodeKey>> {
        let node_type = self.node(key)?.node_type;
        match self.registry().get(node_type).and_then(|class| class.insert_new_after) {
            Some(hook) => hook(self, key),
            None => Ok(None),
        }
    }

    /// Splits the current block at the caret, moving the content after it
    /// into a new sibling block. Blocks that cannot produce a sibling get a
    /// line break instead and `None` is returned.
    pub fn insert_paragraph(&mut self) -> EditorResult<Option<NodeKey>> {
        let Some(range) = self.range_selection().cloned() else {
            return Ok(None);
        };
        if range.anchor.key.is_root() {
            let paragraph = self.create_paragraph()?;
            match self.state().child_at(NodeKey::ROOT, range.anchor.offset) {
                Some(child) => self.insert_before(child, paragraph)?,
                None => self.append(NodeKey::ROOT, paragraph)?,
            }
            self.select_start(paragraph)?;
            return Ok(Some(paragraph));
        }

        let (block, index) = self.remove_text_and_split_block()?;
        let moving: Vec<NodeKey> = self.state().children(block).into_iter().skip(index).collect();
        match self.insert_new_after(block)? {
            Some(created) => {
                for child in moving {
                    self.append(created, child)?;
                }
                self.select_start(created)?;
                Ok(Some(created))
            }
            None => {
                self.insert_line_break(false)?;
                Ok(None)
            }
        }
    }

    /// Inserts a line break at the caret. With `select_start` the caret
    /// stays before the break.
    pub fn insert_line_break(&mut self, select_start: bool) -> EditorResult<()> {
        let line_break = self.create_line_break()?;
        self.insert_nodes(&[line_break])?;
        if select_start {
            let parent = self
                .state()
                .parent(line_break)
                .ok_or(TreeError::ParentNotFound(line_break))?;
            let index = self.state().index_within_parent(line_break).unwrap_or(0);
            self.select_element(parent, index, index)?;
        }
        Ok(())
    }
}
