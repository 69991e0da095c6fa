//! # History
//!
//! Undo/redo over committed editor states.
//!
//! ## Design
//!
//! - `current` is the newest state the user can see
//! - A push moves `current` onto the undo stack; a merge just replaces it
//! - Consecutive typing or deleting of the same kind within the merge window
//!   merges into one entry
//! - Undo and redo swap states between the stacks and restore them through
//!   a full-reconcile `set_editor_state` tagged `historic`
//! - New entries clear the redo stack
//!
//! ## Example
//!
//! ```rust,ignore
//! let history = Rc::new(RefCell::new(History::new(100, Duration::from_millis(1000))));
//! History::attach(&mut editor, history.clone());
//!
//! editor.update(|tx| tx.insert_text("hello"))?;
//! editor.dispatch_command(UNDO, &())?;
//! ```

use crate::commands::{CommandPriority, REDO, UNDO};
use crate::editor::Editor;
use crate::key::NodeKey;
use crate::listeners::{ListenerId, UpdatePayload};
use crate::selection::{PointKind, Selection};
use crate::state::EditorState;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub const HISTORIC_TAG: &str = "historic";
pub const HISTORY_MERGE_TAG: &str = "history-merge";
pub const HISTORY_PUSH_TAG: &str = "history-push";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeType {
    Other,
    InsertCharacterAfterSelection,
    DeleteCharacterBeforeSelection,
    DeleteCharacterAfterSelection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeAction {
    Push,
    Merge,
    Discard,
}

/// Undo/redo stack of committed states
#[derive(Debug)]
pub struct History {
    /// Entries behind `current` (most recent last)
    undo_stack: Vec<Arc<EditorState>>,

    /// Undone entries (most recent last)
    redo_stack: Vec<Arc<EditorState>>,

    current: Option<Arc<EditorState>>,

    /// Maximum number of undo levels (0 = unlimited)
    max_levels: usize,

    merge_window: Duration,
    prev_change_type: ChangeType,
    prev_change_time: Option<Instant>,
}

impl History {
    pub fn new(max_levels: usize, merge_window: Duration) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            current: None,
            max_levels,
            merge_window,
            prev_change_type: ChangeType::Other,
            prev_change_time: None,
        }
    }

    /// Wires `history` into `editor`: an update listener records commits and
    /// editor-priority handlers serve `UNDO` and `REDO`.
    pub fn attach(editor: &mut Editor, history: Rc<RefCell<History>>) -> [ListenerId; 3] {
        let recorder = history.clone();
        let update = editor.register_update_listener(move |payload, _| {
            recorder.borrow_mut().record(payload);
        });

        let undo_history = history.clone();
        let undo = editor.register_command(UNDO, CommandPriority::Editor, move |_, tx| {
            let Some(state) = undo_history.borrow_mut().undo() else {
                return Ok(false);
            };
            tx.set_editor_state(&state)?;
            tx.add_tag(HISTORIC_TAG);
            Ok(true)
        });

        let redo = editor.register_command(REDO, CommandPriority::Editor, move |_, tx| {
            let Some(state) = history.borrow_mut().redo() else {
                return Ok(false);
            };
            tx.set_editor_state(&state)?;
            tx.add_tag(HISTORIC_TAG);
            Ok(true)
        });
        [update, undo, redo]
    }

    pub fn record(&mut self, payload: &UpdatePayload<'_>) {
        self.record_at(payload, Instant::now());
    }

    /// Records a commit observed at `now`.
    pub fn record_at(&mut self, payload: &UpdatePayload<'_>, now: Instant) {
        let next = payload.editor_state;
        if self.current.as_ref().is_some_and(|c| Arc::ptr_eq(c, next)) {
            return;
        }
        let action = self.merge_action(payload, now);
        match action {
            MergeAction::Discard => return,
            MergeAction::Push => {
                self.redo_stack.clear();
                if let Some(current) = self.current.take() {
                    self.undo_stack.push(current);
                    if self.max_levels > 0 && self.undo_stack.len() > self.max_levels {
                        self.undo_stack.remove(0);
                    }
                }
            }
            MergeAction::Merge => {}
        }
        debug!(?action, undo_levels = self.undo_stack.len(), "history recorded");
        self.current = Some(next.clone());
    }

    fn merge_action(&mut self, payload: &UpdatePayload<'_>, now: Instant) -> MergeAction {
        let change_type = change_type(payload);
        let prev_type = self.prev_change_type;
        let prev_time = self.prev_change_time;
        self.prev_change_type = change_type;
        self.prev_change_time = Some(now);

        if payload.has_tag(HISTORIC_TAG) {
            return MergeAction::Discard;
        }
        let push = payload.has_tag(HISTORY_PUSH_TAG);
        if !push && payload.has_tag(HISTORY_MERGE_TAG) {
            return MergeAction::Merge;
        }
        if self.current.is_none() {
            return MergeAction::Push;
        }
        if !payload.has_dirty_nodes() {
            return if payload.editor_state.selection().is_some() {
                MergeAction::Merge
            } else {
                MergeAction::Discard
            };
        }
        let within_window = prev_time.is_some_and(|t| now.duration_since(t) < self.merge_window);
        if !push && change_type != ChangeType::Other && change_type == prev_type && within_window {
            return MergeAction::Merge;
        }
        if payload.dirty_leaves.len() == 1 {
            if let Some(key) = payload.dirty_leaves.iter().next() {
                if text_unchanged(*key, payload.prev_editor_state, payload.editor_state) {
                    return MergeAction::Merge;
                }
            }
        }
        MergeAction::Push
    }

    /// Steps back one entry. Returns the state to restore.
    pub fn undo(&mut self) -> Option<Arc<EditorState>> {
        let entry = self.undo_stack.pop()?;
        if let Some(current) = self.current.take() {
            self.redo_stack.push(current);
        }
        self.current = Some(entry.clone());
        Some(entry)
    }

    pub fn redo(&mut self) -> Option<Arc<EditorState>> {
        let entry = self.redo_stack.pop()?;
        if let Some(current) = self.current.take() {
            self.undo_stack.push(current);
        }
        self.current = Some(entry.clone());
        Some(entry)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_levels(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_levels(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.current = None;
        self.prev_change_type = ChangeType::Other;
        self.prev_change_time = None;
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(100, Duration::from_millis(1000))
    }
}

fn text_unchanged(key: NodeKey, prev: &EditorState, next: &EditorState) -> bool {
    match (prev.get(key).and_then(|n| n.as_text()), next.get(key).and_then(|n| n.as_text())) {
        (Some(a), Some(b)) => a.text == b.text && a.format == b.format && a.style == b.style && a.mode == b.mode,
        _ => false,
    }
}

/// Classifies a commit as single-character typing or deletion at a
/// collapsed caret, or anything else.
fn change_type(payload: &UpdatePayload<'_>) -> ChangeType {
    if !payload.has_dirty_nodes() {
        return ChangeType::Other;
    }
    let prev = payload.prev_editor_state;
    let next = payload.editor_state;
    let (Some(Selection::Range(next_range)), Some(Selection::Range(prev_range))) = (next.selection(), prev.selection())
    else {
        return ChangeType::Other;
    };
    if next_range.anchor != next_range.focus || prev_range.anchor != prev_range.focus {
        return ChangeType::Other;
    }

    let mut dirty: Vec<NodeKey> = payload
        .dirty_leaves
        .iter()
        .copied()
        .filter(|k| next.is_attached(*k))
        .collect();
    dirty.extend(
        payload
            .dirty_elements
            .iter()
            .filter(|(k, intentional)| **intentional && !k.is_root() && next.is_attached(**k))
            .map(|(k, _)| *k),
    );

    let next_anchor = next_range.anchor;
    let prev_anchor = prev_range.anchor;
    if dirty.len() > 1 {
        // Typing into a node created by this very update.
        let created_text = next
            .get(next_anchor.key)
            .and_then(|n| n.as_text())
            .is_some_and(|t| t.len() == 1);
        if created_text && !prev.contains(next_anchor.key) && next_anchor.offset == 1 {
            return ChangeType::InsertCharacterAfterSelection;
        }
        return ChangeType::Other;
    }
    let Some(&key) = dirty.first() else {
        return ChangeType::Other;
    };
    let (Some(prev_text), Some(next_text)) = (
        prev.get(key).and_then(|n| n.as_text()),
        next.get(key).and_then(|n| n.as_text()),
    ) else {
        return ChangeType::Other;
    };
    if prev_text.mode != next_text.mode || prev_text.text == next_text.text {
        return ChangeType::Other;
    }
    if next_anchor.key != prev_anchor.key || next_anchor.kind != PointKind::Text {
        return ChangeType::Other;
    }
    let diff = next_text.len() as isize - prev_text.len() as isize;
    match diff {
        1 if prev_anchor.offset + 1 == next_anchor.offset => ChangeType::InsertCharacterAfterSelection,
        -1 if prev_anchor.offset == next_anchor.offset + 1 => ChangeType::DeleteCharacterBeforeSelection,
        -1 if prev_anchor.offset == next_anchor.offset => ChangeType::DeleteCharacterAfterSelection,
        _ => ChangeType::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listeners::MutatedNodes;
    use crate::node::{Node, NodeKind, TextData};
    use crate::selection::{Point, RangeSelection};
    use std::collections::{BTreeSet, HashMap, HashSet};

    fn text_state(text: &str, caret: usize) -> Arc<EditorState> {
        let key = NodeKey::from_raw(2);
        let mut state = EditorState::empty();
        let mut node = Node::new(key, "text", NodeKind::Text(TextData::new(text)));
        node.parent = Some(NodeKey::ROOT);
        state.nodes.insert(key, Arc::new(node));
        if let Some(root) = state.nodes.get_mut(&NodeKey::ROOT) {
            if let Some(data) = Arc::make_mut(root).as_element_mut() {
                data.first = Some(key);
                data.last = Some(key);
                data.size = 1;
            }
        }
        state.selection = Some(Selection::Range(RangeSelection::collapsed(Point::text(key, caret))));
        Arc::new(state)
    }

    fn record(history: &mut History, prev: &Arc<EditorState>, next: &Arc<EditorState>, tags: &[&str], now: Instant) {
        let tags: BTreeSet<String> = tags.iter().map(|t| t.to_string()).collect();
        let leaves: HashSet<NodeKey> = [NodeKey::from_raw(2)].into_iter().collect();
        let elements = HashMap::new();
        let mutated = MutatedNodes::new();
        let payload = UpdatePayload {
            editor_state: next,
            prev_editor_state: prev,
            tags: &tags,
            dirty_leaves: &leaves,
            dirty_elements: &elements,
            mutated_nodes: &mutated,
        };
        history.record_at(&payload, now);
    }

    #[test]
    fn test_history_creation() {
        let history = History::default();
        assert_eq!(history.undo_levels(), 0);
        assert_eq!(history.redo_levels(), 0);
        assert!(!history.can_undo());
        assert!(!history.can_redo());
    }

    #[test]
    fn test_typing_within_window_merges() {
        let mut history = History::default();
        let start = Instant::now();
        let s0 = text_state("", 0);
        let s1 = text_state("a", 1);
        let s2 = text_state("ab", 2);
        let s3 = text_state("abc", 3);

        record(&mut history, &s0, &s0, &[], start);
        record(&mut history, &s0, &s1, &[], start);
        record(&mut history, &s1, &s2, &[], start + Duration::from_millis(10));
        record(&mut history, &s2, &s3, &[], start + Duration::from_millis(20));
        assert_eq!(history.undo_levels(), 1);

        let restored = history.undo().unwrap();
        assert!(Arc::ptr_eq(&restored, &s0));
        assert!(history.can_redo());
    }

    #[test]
    fn test_push_tag_and_window_expiry() {
        let mut history = History::default();
        let start = Instant::now();
        let s0 = text_state("", 0);
        let s1 = text_state("a", 1);
        let s2 = text_state("ab", 2);
        let s3 = text_state("abc", 3);

        record(&mut history, &s0, &s0, &[], start);
        record(&mut history, &s0, &s1, &[], start);
        record(&mut history, &s1, &s2, &[], start + Duration::from_secs(5));
        record(&mut history, &s2, &s3, &[HISTORY_PUSH_TAG], start + Duration::from_secs(5));
        assert_eq!(history.undo_levels(), 3);
    }

    #[test]
    fn test_historic_tag_is_ignored_and_new_entry_clears_redo() {
        let mut history = History::default();
        let start = Instant::now();
        let s0 = text_state("", 0);
        let s1 = text_state("x", 1);
        let s2 = text_state("y", 1);

        record(&mut history, &s0, &s0, &[], start);
        record(&mut history, &s0, &s1, &[HISTORY_PUSH_TAG], start);
        history.undo().unwrap();
        record(&mut history, &s1, &s0, &[HISTORIC_TAG], start);
        assert_eq!(history.redo_levels(), 1);

        record(&mut history, &s0, &s2, &[HISTORY_PUSH_TAG], start);
        assert_eq!(history.redo_levels(), 0);
    }

    #[test]
    fn test_max_levels_enforced() {
        let mut history = History::new(2, Duration::from_millis(0));
        let start = Instant::now();
        let mut prev = text_state("", 0);
        record(&mut history, &prev, &prev, &[], start);
        for i in 0..4 {
            let next = text_state(&format!("text {}", i), 1);
            record(&mut history, &prev, &next, &[HISTORY_PUSH_TAG], start);
            prev = next;
        }
        assert_eq!(history.undo_levels(), 2);
    }
}
