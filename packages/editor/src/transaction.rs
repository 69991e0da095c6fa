//! # Transactions
//!
//! A [`Transaction`] is the explicit context every mutation goes through. It
//! borrows the pieces of the editor that an update may touch: the pending
//! state, the dirty sets, the registry and the key generator. Nothing is
//! reachable through globals.
//!
//! ```text
//! update() ──► callback(&mut Transaction) ──► transforms ──► commit
//!                    │                                         │
//!                    └── writable(key): clone on first write   ├─ reconcile
//!                        and mark node + ancestors dirty       ├─ gc
//!                                                              └─ listeners
//! ```

use crate::errors::{EditorResult, StateError, TreeError};
use crate::key::{KeyGenerator, NodeKey};
use crate::node::{ElementData, Node, NodeKind, TextData, TextMode};
use crate::registry::{NodeBehavior, NodeRegistry};
use crate::selection::{RangeSelection, Selection};
use crate::state::EditorState;
use crate::surface::{HandleMap, RenderSurface};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Nodes touched during the current transaction.
///
/// Elements map to `true` when written directly and `false` when only a
/// descendant changed.
#[derive(Debug, Clone, Default)]
pub struct DirtySets {
    pub leaves: HashSet<NodeKey>,
    pub elements: HashMap<NodeKey, bool>,
}

impl DirtySets {
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty() && self.elements.is_empty()
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.leaves.contains(&key) || self.elements.contains_key(&key)
    }

    pub fn clear(&mut self) {
        self.leaves.clear();
        self.elements.clear();
    }

    pub(crate) fn remove(&mut self, key: NodeKey) {
        self.leaves.remove(&key);
        self.elements.remove(&key);
    }

    /// Marks every ancestor starting at `start` as having a dirty
    /// descendant, stopping at the first one already recorded.
    fn mark_ancestors(&mut self, start: Option<NodeKey>, state: &EditorState) {
        let mut cursor = start;
        while let Some(key) = cursor {
            if self.elements.contains_key(&key) {
                return;
            }
            let Some(node) = state.get(key) else {
                return;
            };
            self.elements.insert(key, false);
            cursor = node.parent;
        }
    }
}

/// Options for a single update.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Commit immediately even when the editor batches updates.
    pub discrete: bool,
    pub skip_transforms: bool,
    pub tags: Vec<String>,
}

impl UpdateOptions {
    pub fn discrete() -> Self {
        Self {
            discrete: true,
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn without_transforms(mut self) -> Self {
        self.skip_transforms = true;
        self
    }
}

pub type DeferredUpdate = Box<dyn FnOnce(&mut Transaction<'_>) -> EditorResult<()>>;

/// Updates submitted while another one is in flight. Flushed in submission
/// order once the current transaction has committed.
#[derive(Default)]
pub struct UpdateQueue {
    items: VecDeque<(DeferredUpdate, UpdateOptions)>,
}

impl UpdateQueue {
    pub fn push<F>(&mut self, update: F, options: UpdateOptions)
    where
        F: FnOnce(&mut Transaction<'_>) -> EditorResult<()> + 'static,
    {
        self.items.push_back((Box::new(update), options));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn pop(&mut self) -> Option<(DeferredUpdate, UpdateOptions)> {
        self.items.pop_front()
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }
}

impl fmt::Debug for UpdateQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateQueue")
            .field("len", &self.items.len())
            .finish()
    }
}

/// The in-flight state of an open transaction.
#[derive(Debug)]
pub(crate) struct PendingUpdate {
    pub state: EditorState,
    pub dirty: DirtySets,
    /// Keys already cloned (or created) in this transaction.
    pub cloned: HashSet<NodeKey>,
    pub tags: BTreeSet<String>,
    /// Keys whose render nodes must be rebuilt from scratch.
    pub forced: HashSet<NodeKey>,
    pub full_reconcile: bool,
}

impl PendingUpdate {
    pub fn begin(committed: &EditorState, read_only: bool) -> Self {
        Self {
            state: EditorState {
                nodes: committed.nodes.clone(),
                selection: committed.selection.clone(),
                read_only,
            },
            dirty: DirtySets::default(),
            cloned: HashSet::new(),
            tags: BTreeSet::new(),
            forced: HashSet::new(),
            full_reconcile: false,
        }
    }
}

pub struct Transaction<'a> {
    pub(crate) pending: &'a mut PendingUpdate,
    pub(crate) committed: &'a EditorState,
    pub(crate) registry: &'a NodeRegistry,
    pub(crate) keys: &'a mut KeyGenerator,
    pub(crate) composition: &'a mut Option<NodeKey>,
    pub(crate) queue: &'a mut UpdateQueue,
    pub(crate) surface: Option<&'a dyn RenderSurface>,
    pub(crate) handles: &'a HandleMap,
}

impl<'a> Transaction<'a> {
    /// The pending state being built.
    pub fn state(&self) -> &EditorState {
        &self.pending.state
    }

    /// The last committed state.
    pub fn committed_state(&self) -> &EditorState {
        self.committed
    }

    pub fn registry(&self) -> &NodeRegistry {
        self.registry
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.pending.tags
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.pending.tags.insert(tag.into());
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.pending.tags.contains(tag)
    }

    pub fn dirty(&self) -> &DirtySets {
        &self.pending.dirty
    }

    pub fn node(&self, key: NodeKey) -> EditorResult<&Node> {
        Ok(self.pending.state.node(key)?)
    }

    pub fn text(&self, key: NodeKey) -> EditorResult<&TextData> {
        self.node(key)?
            .as_text()
            .ok_or_else(|| TreeError::NotText(key).into())
    }

    pub fn element(&self, key: NodeKey) -> EditorResult<&ElementData> {
        self.node(key)?
            .as_element()
            .ok_or_else(|| TreeError::NotAnElement(key).into())
    }

    pub fn behavior(&self, key: NodeKey) -> EditorResult<NodeBehavior> {
        let node = self.node(key)?;
        Ok(self.registry.behavior(node))
    }

    pub fn is_inline(&self, key: NodeKey) -> bool {
        self.behavior(key).map(|b| b.inline).unwrap_or(false)
    }

    /// Root, non-inline decorators, and non-inline elements whose children
    /// are inline content.
    pub fn is_block(&self, key: NodeKey) -> bool {
        let Ok(node) = self.node(key) else {
            return false;
        };
        if node.is_root() {
            return true;
        }
        let behavior = self.registry.behavior(node);
        if node.is_decorator() {
            return !behavior.inline;
        }
        if !node.is_element() || behavior.inline || !behavior.can_be_empty {
            return false;
        }
        match self.pending.state.first_child(key) {
            None => true,
            Some(first) => self.node(first).map(|child| !child.is_element() || self.is_inline(first)).unwrap_or(true),
        }
    }

    /// Nearest block at or above `key`.
    pub fn block_of(&self, key: NodeKey) -> Option<NodeKey> {
        std::iter::once(key)
            .chain(self.pending.state.ancestors(key))
            .find(|k| self.is_block(*k))
    }

    pub fn is_read_only(&self) -> bool {
        self.pending.state.read_only
    }

    fn ensure_writable(&self) -> EditorResult<()> {
        if self.pending.state.read_only {
            return Err(StateError::ReadOnly.into());
        }
        Ok(())
    }

    fn mark_dirty(&mut self, key: NodeKey) {
        let Some(node) = self.pending.state.get(key) else {
            return;
        };
        let parent = node.parent;
        if node.is_element() {
            self.pending.dirty.elements.insert(key, true);
        } else {
            self.pending.dirty.leaves.insert(key);
        }
        let pending = &mut *self.pending;
        pending.dirty.mark_ancestors(parent, &pending.state);
    }

    /// Returns a writable copy of `key`, cloning it into the pending state on
    /// first write and marking it and its ancestors dirty.
    pub fn writable(&mut self, key: NodeKey) -> EditorResult<&mut Node> {
        self.ensure_writable()?;
        if !self.pending.state.contains(key) {
            return Err(TreeError::NodeNotFound(key).into());
        }
        self.mark_dirty(key);
        let registry = self.registry;
        let first_write = self.pending.cloned.insert(key);
        let slot = self
            .pending
            .state
            .nodes
            .get_mut(&key)
            .ok_or(TreeError::NodeNotFound(key))?;
        if first_write {
            let mut fresh = match registry.get(slot.node_type) {
                Some(class) => (class.clone)(slot),
                None => Node::clone(slot),
            };
            fresh.key = key;
            *slot = Arc::new(fresh);
        }
        Ok(Arc::make_mut(slot))
    }

    /// Creates a detached node of a registered type.
    pub fn create_node(&mut self, node_type: &str) -> EditorResult<NodeKey> {
        self.ensure_writable()?;
        let registry = self.registry;
        let class = registry.class(node_type)?;
        if node_type == "root" {
            return Err(TreeError::RootOperation("create").into());
        }
        let key = self.keys.next_key();
        let node = Node::new(key, class.node_type, (class.create)());
        self.pending.state.nodes.insert(key, Arc::new(node));
        self.pending.cloned.insert(key);
        self.mark_dirty(key);
        Ok(key)
    }

    pub fn create_paragraph(&mut self) -> EditorResult<NodeKey> {
        self.create_node("paragraph")
    }

    pub fn create_text(&mut self, text: &str) -> EditorResult<NodeKey> {
        let key = self.create_node("text")?;
        if !text.is_empty() {
            self.set_text(key, text)?;
        }
        Ok(key)
    }

    pub fn create_line_break(&mut self) -> EditorResult<NodeKey> {
        self.create_node("linebreak")
    }

    pub fn create_tab(&mut self) -> EditorResult<NodeKey> {
        self.create_node("tab")
    }

    /// A detached copy of a text node's format, style and mode, with new text.
    pub(crate) fn create_text_like(&mut self, template: NodeKey, text: &str) -> EditorResult<NodeKey> {
        let data = self.text(template)?.clone();
        let node_type = self.node(template)?.node_type;
        let key = self.create_node(node_type)?;
        let node = self.writable(key)?;
        node.kind = NodeKind::Text(TextData {
            text: text.to_string(),
            ..data
        });
        Ok(key)
    }

    pub(crate) fn set_mode_unchecked(&mut self, key: NodeKey, mode: TextMode) -> EditorResult<()> {
        let node = self.writable(key)?;
        let data = node.as_text_mut().ok_or(TreeError::NotText(key))?;
        data.mode = mode;
        Ok(())
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.pending.state.selection.as_ref()
    }

    pub fn range_selection(&self) -> Option<&RangeSelection> {
        match self.pending.state.selection.as_ref() {
            Some(Selection::Range(range)) => Some(range),
            _ => None,
        }
    }

    pub(crate) fn range_selection_mut(&mut self) -> Option<&mut RangeSelection> {
        match self.pending.state.selection.as_mut() {
            Some(Selection::Range(range)) => Some(range),
            _ => None,
        }
    }

    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.pending.state.selection = selection;
    }

    pub fn composition_key(&self) -> Option<NodeKey> {
        *self.composition
    }

    pub fn set_composition_key(&mut self, key: Option<NodeKey>) {
        *self.composition = key;
    }

    /// Schedules an update to run after this transaction commits.
    pub fn queue_update<F>(&mut self, update: F, options: UpdateOptions)
    where
        F: FnOnce(&mut Transaction<'_>) -> EditorResult<()> + 'static,
    {
        self.queue.push(update, options);
    }

    /// Forces the render node for `key` to be rebuilt on reconcile. For the
    /// root, every child is rebuilt instead.
    pub fn force_rerender(&mut self, key: NodeKey) -> EditorResult<()> {
        self.writable(key)?;
        self.pending.forced.insert(key);
        Ok(())
    }

    /// Replaces the whole pending state, as used by history and
    /// deserialization. The next commit reconciles every node.
    pub fn set_editor_state(&mut self, state: &EditorState) -> EditorResult<()> {
        self.ensure_writable()?;
        state.check_integrity()?;
        self.pending.state.nodes = state.nodes.clone();
        self.pending.state.selection = state.selection.clone();
        self.pending.cloned.clear();
        self.pending.dirty.clear();
        self.pending.full_reconcile = true;
        for key in state.keys() {
            self.keys.observe(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_ancestors_stops_at_recorded_element() {
        let state = EditorState::empty();
        let mut dirty = DirtySets::default();
        dirty.mark_ancestors(Some(NodeKey::ROOT), &state);
        assert_eq!(dirty.elements.get(&NodeKey::ROOT), Some(&false));

        dirty.elements.insert(NodeKey::ROOT, true);
        dirty.mark_ancestors(Some(NodeKey::ROOT), &state);
        assert_eq!(dirty.elements.get(&NodeKey::ROOT), Some(&true));
    }

    #[test]
    fn test_update_options_builder() {
        let options = UpdateOptions::discrete().with_tag("historic").without_transforms();
        assert!(options.discrete);
        assert!(options.skip_transforms);
        assert_eq!(options.tags, vec!["historic".to_string()]);
    }
}
