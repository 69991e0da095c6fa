//! # Listeners
//!
//! Observers notified after a commit. Update listeners see the whole
//! transition; mutation listeners see the created/updated/destroyed keys of
//! one node type; text-content listeners fire when the root text changes.

use crate::key::NodeKey;
use crate::state::EditorState;
use crate::transaction::UpdateQueue;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Returned by every `register_*` call; pass it back to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeMutation {
    Created,
    Updated,
    Destroyed,
}

/// Mutations of one commit grouped by node type.
pub type MutatedNodes = HashMap<&'static str, BTreeMap<NodeKey, NodeMutation>>;

/// What an update listener receives.
#[derive(Debug)]
pub struct UpdatePayload<'a> {
    pub editor_state: &'a Arc<EditorState>,
    pub prev_editor_state: &'a Arc<EditorState>,
    pub tags: &'a BTreeSet<String>,
    pub dirty_leaves: &'a HashSet<NodeKey>,
    pub dirty_elements: &'a HashMap<NodeKey, bool>,
    pub mutated_nodes: &'a MutatedNodes,
}

impl UpdatePayload<'_> {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn has_dirty_nodes(&self) -> bool {
        !self.dirty_leaves.is_empty() || !self.dirty_elements.is_empty()
    }
}

pub type UpdateListener = Box<dyn FnMut(&UpdatePayload<'_>, &mut UpdateQueue)>;
pub type MutationListener = Box<dyn FnMut(&BTreeMap<NodeKey, NodeMutation>, &mut UpdateQueue)>;
pub type TextContentListener = Box<dyn FnMut(&str)>;
pub type EditableListener = Box<dyn FnMut(bool)>;

/// Every registered listener, in registration order per kind.
#[derive(Default)]
pub(crate) struct ListenerSet {
    pub update: Vec<(ListenerId, UpdateListener)>,
    pub mutation: Vec<(ListenerId, &'static str, MutationListener)>,
    pub text_content: Vec<(ListenerId, TextContentListener)>,
    pub editable: Vec<(ListenerId, EditableListener)>,
}

impl ListenerSet {
    /// Removes `id` wherever it is registered. Returns whether anything was
    /// removed.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.len();
        self.update.retain(|(i, _)| *i != id);
        self.mutation.retain(|(i, _, _)| *i != id);
        self.text_content.retain(|(i, _)| *i != id);
        self.editable.retain(|(i, _)| *i != id);
        self.len() != before
    }

    pub fn len(&self) -> usize {
        self.update.len() + self.mutation.len() + self.text_content.len() + self.editable.len()
    }

    pub fn notify_update(&mut self, payload: &UpdatePayload<'_>, queue: &mut UpdateQueue) {
        for (_, listener) in self.update.iter_mut() {
            listener(payload, queue);
        }
    }

    pub fn notify_mutations(&mut self, mutated: &MutatedNodes, queue: &mut UpdateQueue) {
        for (_, node_type, listener) in self.mutation.iter_mut() {
            if let Some(changes) = mutated.get(*node_type) {
                if !changes.is_empty() {
                    listener(changes, queue);
                }
            }
        }
    }

    pub fn notify_text_content(&mut self, text: &str) {
        for (_, listener) in self.text_content.iter_mut() {
            listener(text);
        }
    }

    pub fn notify_editable(&mut self, editable: bool) {
        for (_, listener) in self.editable.iter_mut() {
            listener(editable);
        }
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("update", &self.update.len())
            .field("mutation", &self.mutation.len())
            .field("text_content", &self.text_content.len())
            .field("editable", &self.editable.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_mutation_listener_filters_by_type() {
        let mut set = ListenerSet::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        set.mutation.push((
            ListenerId(1),
            "paragraph",
            Box::new(move |changes: &BTreeMap<NodeKey, NodeMutation>, _: &mut UpdateQueue| sink.borrow_mut().extend(changes.keys().copied())),
        ));

        let mut mutated = MutatedNodes::new();
        mutated
            .entry("text")
            .or_default()
            .insert(NodeKey::from_raw(3), NodeMutation::Created);
        let mut queue = UpdateQueue::default();
        set.notify_mutations(&mutated, &mut queue);
        assert!(seen.borrow().is_empty());

        mutated
            .entry("paragraph")
            .or_default()
            .insert(NodeKey::from_raw(2), NodeMutation::Updated);
        set.notify_mutations(&mutated, &mut queue);
        assert_eq!(*seen.borrow(), vec![NodeKey::from_raw(2)]);
    }

    #[test]
    fn test_remove_by_id() {
        let mut set = ListenerSet::default();
        set.text_content.push((ListenerId(1), Box::new(|_: &str| {})));
        set.editable.push((ListenerId(2), Box::new(|_: bool| {})));
        assert!(set.remove(ListenerId(1)));
        assert!(!set.remove(ListenerId(1)));
        assert_eq!(set.len(), 1);
    }
}
