//! Text node operations. Offsets are char offsets.

use crate::errors::{EditorResult, TreeError};
use crate::key::NodeKey;
use crate::node::{byte_offset, TextDetail, TextFormat, TextMode};
use crate::selection::PointKind;
use crate::transaction::Transaction;

impl<'a> Transaction<'a> {
    fn writable_text(&mut self, key: NodeKey) -> EditorResult<&mut crate::node::TextData> {
        let node = self.writable(key)?;
        node.as_text_mut().ok_or_else(|| TreeError::NotText(key).into())
    }

    pub fn text_size(&self, key: NodeKey) -> EditorResult<usize> {
        Ok(self.text(key)?.len())
    }

    pub fn set_text(&mut self, key: NodeKey, text: &str) -> EditorResult<()> {
        if self.text(key)?.text == text {
            return Ok(());
        }
        self.writable_text(key)?.text = text.to_string();
        Ok(())
    }

    /// Replaces `delete_count` chars at `offset` with `insert`. With
    /// `move_selection` the range selection collapses after the inserted
    /// text; otherwise points on this node past `offset` are shifted.
    pub fn splice_text(
        &mut self,
        key: NodeKey,
        offset: usize,
        delete_count: usize,
        insert: &str,
        move_selection: bool,
    ) -> EditorResult<NodeKey> {
        let current = self.text(key)?.text.clone();
        let size = current.chars().count();
        if offset > size {
            return Err(TreeError::OffsetOutOfRange { key, offset, size }.into());
        }
        let delete_count = delete_count.min(size - offset);
        let start = byte_offset(&current, offset);
        let end = byte_offset(&current, offset + delete_count);
        let mut updated = String::with_capacity(current.len() + insert.len());
        updated.push_str(&current[..start]);
        updated.push_str(insert);
        updated.push_str(&current[end..]);
        self.writable_text(key)?.text = updated;

        let inserted = insert.chars().count();
        if move_selection {
            if self.range_selection().is_some() {
                self.select_text(key, offset + inserted, offset + inserted)?;
            }
        } else if let Some(range) = self.range_selection_mut() {
            for point in [&mut range.anchor, &mut range.focus] {
                if point.key == key && point.kind == PointKind::Text && point.offset > offset {
                    let shifted = point.offset.saturating_sub(delete_count).max(offset) + inserted;
                    point.offset = shifted.min(size - delete_count + inserted);
                }
            }
        }
        Ok(key)
    }

    /// Splits a text node at the given offsets. The original key keeps the
    /// first part; returns the keys of all parts in order. Selection points
    /// and the composition key follow the text they sat in.
    pub fn split_text(&mut self, key: NodeKey, offsets: &[usize]) -> EditorResult<Vec<NodeKey>> {
        let data = self.text(key)?.clone();
        let chars: Vec<char> = data.text.chars().collect();
        let mut cuts: Vec<usize> = offsets
            .iter()
            .copied()
            .filter(|o| *o > 0 && *o < chars.len())
            .collect();
        cuts.sort_unstable();
        cuts.dedup();
        if chars.is_empty() {
            return Ok(Vec::new());
        }
        if cuts.is_empty() {
            return Ok(vec![key]);
        }

        let mut parts: Vec<String> = Vec::with_capacity(cuts.len() + 1);
        let mut last = 0;
        for cut in cuts.iter().copied().chain(std::iter::once(chars.len())) {
            parts.push(chars[last..cut].iter().collect());
            last = cut;
        }

        let parent = self.state().parent(key).ok_or(TreeError::ParentNotFound(key))?;
        let insertion_index = self.state().index_within_parent(key).unwrap_or(0);
        let segmented = data.mode == TextMode::Segmented;

        // Segmented runs are replaced outright; everything else keeps its key
        // for the first part.
        let first = if segmented {
            let fresh = self.create_node("text")?;
            let text = self.writable_text(fresh)?;
            text.text = parts[0].clone();
            text.format = data.format;
            text.style = data.style.clone();
            text.detail = data.detail;
            self.insert_before(key, fresh)?;
            fresh
        } else {
            self.writable_text(key)?.text = parts[0].clone();
            key
        };

        let mut split = vec![first];
        let mut text_size = parts[0].chars().count();
        let mut previous = first;
        for part in parts.iter().skip(1) {
            let part_size = part.chars().count();
            let sibling = self.create_node("text")?;
            {
                let text = self.writable_text(sibling)?;
                text.text = part.clone();
                text.format = data.format;
                text.style = data.style.clone();
                text.detail = data.detail;
            }
            let next_size = text_size + part_size;
            if let Some(range) = self.range_selection_mut() {
                for point in [&mut range.anchor, &mut range.focus] {
                    if point.key == key
                        && point.kind == PointKind::Text
                        && point.offset > text_size
                        && point.offset <= next_size
                    {
                        point.key = sibling;
                        point.offset -= text_size;
                    }
                }
            }
            if self.composition_key() == Some(key) {
                self.set_composition_key(Some(sibling));
            }
            self.link(parent, Some(previous), sibling)?;
            previous = sibling;
            text_size = next_size;
            split.push(sibling);
        }

        if segmented {
            if let Some(range) = self.range_selection_mut() {
                for point in [&mut range.anchor, &mut range.focus] {
                    if point.key == key && point.kind == PointKind::Text {
                        point.key = first;
                    }
                }
            }
            self.remove_node(key, true, true)?;
        }
        self.shift_element_points(parent, insertion_index, split.len() as isize - 1);
        Ok(split)
    }

    /// Merges `sibling` (the previous or next sibling) into `key`, removing
    /// the sibling.
    pub fn merge_with_sibling(&mut self, key: NodeKey, sibling: NodeKey) -> EditorResult<NodeKey> {
        let node = self.node(key)?;
        let is_before = node.prev == Some(sibling);
        if !is_before && node.next != Some(sibling) {
            return Err(TreeError::InvalidStructure(format!(
                "{} is not a sibling of {}",
                sibling, key
            ))
            .into());
        }
        let own = self.text(key)?.text.clone();
        let own_len = own.chars().count();
        let other = self.text(sibling)?.text.clone();
        let other_len = other.chars().count();

        if self.composition_key() == Some(sibling) {
            self.set_composition_key(Some(key));
        }
        if let Some(range) = self.range_selection_mut() {
            for point in [&mut range.anchor, &mut range.focus] {
                if point.kind != PointKind::Text {
                    continue;
                }
                if point.key == sibling {
                    point.key = key;
                    if !is_before {
                        point.offset += own_len;
                    }
                } else if point.key == key && is_before {
                    point.offset += other_len;
                }
            }
        }

        let merged = if is_before { other + &own } else { own + &other };
        self.writable_text(key)?.text = merged;
        self.remove_node(sibling, false, false)?;
        Ok(key)
    }

    pub fn set_format(&mut self, key: NodeKey, format: TextFormat) -> EditorResult<()> {
        if self.text(key)?.format == format {
            return Ok(());
        }
        self.writable_text(key)?.format = format;
        Ok(())
    }

    pub fn toggle_format(&mut self, key: NodeKey, flag: TextFormat) -> EditorResult<()> {
        let format = self.text(key)?.format.toggled(flag, None);
        self.set_format(key, format)
    }

    pub fn set_style(&mut self, key: NodeKey, style: &str) -> EditorResult<()> {
        if self.text(key)?.style == style {
            return Ok(());
        }
        self.writable_text(key)?.style = style.to_string();
        Ok(())
    }

    pub fn set_mode(&mut self, key: NodeKey, mode: TextMode) -> EditorResult<()> {
        if self.text(key)?.mode == mode {
            return Ok(());
        }
        self.set_mode_unchecked(key, mode)
    }

    pub fn set_detail(&mut self, key: NodeKey, detail: TextDetail) -> EditorResult<()> {
        if self.text(key)?.detail == detail {
            return Ok(());
        }
        self.writable_text(key)?.detail = detail;
        Ok(())
    }

    pub fn is_composing(&self, key: NodeKey) -> bool {
        self.composition_key() == Some(key)
    }
}
