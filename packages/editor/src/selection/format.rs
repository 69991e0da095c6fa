use super::{BaseSelection, PointKind};
use crate::errors::EditorResult;
use crate::key::NodeKey;
use crate::node::TextFormat;
use crate::transaction::Transaction;
use crate::tree::Endpoint;

impl<'a> Transaction<'a> {
    /// Toggles `flag` over the selected text. Boundary text nodes are split
    /// so only the selected part changes. Every node ends up agreeing with
    /// the first one. A collapsed selection only toggles the typing format.
    pub fn format_text(&mut self, flag: TextFormat) -> EditorResult<()> {
        let Some(range) = self.range_selection().cloned() else {
            return Ok(());
        };
        if range.is_collapsed() {
            if let Some(range) = self.range_selection_mut() {
                range.toggle_format(flag);
            }
            self.set_composition_key(None);
            return Ok(());
        }

        let texts: Vec<NodeKey> = range
            .nodes(self.state())
            .into_iter()
            .filter(|k| self.state().get(*k).is_some_and(|n| n.is_text()))
            .collect();
        if texts.is_empty() {
            if let Some(range) = self.range_selection_mut() {
                range.toggle_format(flag);
            }
            self.set_composition_key(None);
            return Ok(());
        }

        let backward = range.is_backward(self.state());
        let (start, end) = range.ordered(self.state());
        let (start_endpoint, end_endpoint) = if backward {
            (Endpoint::Focus, Endpoint::Anchor)
        } else {
            (Endpoint::Anchor, Endpoint::Focus)
        };

        let mut first_index = 0;
        let mut first = texts[0];
        let mut start_offset = if start.kind == PointKind::Element { 0 } else { start.offset };
        // A selection starting at the very end of a node begins in the next.
        if start.kind == PointKind::Text && start_offset == self.text_size(first)? {
            first_index = 1;
            match texts.get(1) {
                Some(next) => first = *next,
                None => return Ok(()),
            }
            start_offset = 0;
        }

        let first_format = self.text(first)?.format.toggled(flag, None);
        let last_index = texts.len() - 1;
        let mut last = texts[last_index];
        let end_offset = if end.kind == PointKind::Text {
            end.offset
        } else {
            self.text_size(last)?
        };

        if first == last {
            if start_offset == end_offset {
                return Ok(());
            }
            let data = self.text(first)?;
            let whole = start_offset == 0 && end_offset == data.len();
            if data.is_token_or_segmented() || whole {
                self.set_format(first, first_format)?;
            } else {
                let parts = self.split_text(first, &[start_offset, end_offset])?;
                let index = if start_offset == 0 { 0 } else { 1 };
                let replacement = parts.get(index).copied().unwrap_or(first);
                self.set_format(replacement, first_format)?;
                if start.kind == PointKind::Text {
                    self.set_endpoint(start_endpoint, super::Point::text(replacement, 0));
                }
                if end.kind == PointKind::Text {
                    self.set_endpoint(end_endpoint, super::Point::text(replacement, end_offset - start_offset));
                }
            }
            if let Some(range) = self.range_selection_mut() {
                range.format = first_format;
            }
            return Ok(());
        }

        if start_offset != 0 && !self.text(first)?.is_token_or_segmented() {
            let parts = self.split_text(first, &[start_offset])?;
            if let Some(right) = parts.get(1) {
                first = *right;
            }
            start_offset = 0;
        }
        self.set_format(first, first_format)?;

        let last_format = self.text(last)?.format.toggled(flag, Some(first_format));
        if end_offset > 0 {
            let data = self.text(last)?;
            if end_offset != data.len() && !data.is_token_or_segmented() {
                let parts = self.split_text(last, &[end_offset])?;
                last = parts.first().copied().unwrap_or(last);
            }
            self.set_format(last, last_format)?;
        }

        for &middle in texts.iter().take(last_index).skip(first_index + 1) {
            let format = self.text(middle)?.format.toggled(flag, Some(last_format));
            self.set_format(middle, format)?;
        }

        if start.kind == PointKind::Text {
            self.set_endpoint(start_endpoint, super::Point::text(first, start_offset));
        }
        if end.kind == PointKind::Text {
            self.set_endpoint(end_endpoint, super::Point::text(last, end_offset));
        }
        if let Some(range) = self.range_selection_mut() {
            range.format = first_format | last_format;
        }
        Ok(())
    }
}
