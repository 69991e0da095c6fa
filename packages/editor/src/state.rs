//! # Editor State
//!
//! An immutable snapshot: the node map plus the selection. Node values are
//! shared between snapshots through `Arc`, so building the next state only
//! clones the nodes that are actually written.

use crate::errors::TreeError;
use crate::key::NodeKey;
use crate::node::Node;
use crate::registry::NodeRegistry;
use crate::selection::Selection;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub type NodeMap = HashMap<NodeKey, Arc<Node>>;

#[derive(Debug, Clone)]
pub struct EditorState {
    pub(crate) nodes: NodeMap,
    pub(crate) selection: Option<Selection>,
    pub(crate) read_only: bool,
}

impl EditorState {
    /// A state holding only the root node.
    pub fn empty() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(NodeKey::ROOT, Arc::new(Node::root()));
        Self {
            nodes,
            selection: None,
            read_only: false,
        }
    }

    /// True for a state holding only the root and no selection.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1 && self.selection.is_none()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(&key)
    }

    pub fn get(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(&key).map(|n| n.as_ref())
    }

    pub(crate) fn get_arc(&self, key: NodeKey) -> Option<&Arc<Node>> {
        self.nodes.get(&key)
    }

    pub fn node(&self, key: NodeKey) -> Result<&Node, TreeError> {
        self.get(key).ok_or(TreeError::NodeNotFound(key))
    }

    pub fn root(&self) -> Result<&Node, TreeError> {
        self.node(NodeKey::ROOT)
    }

    pub fn keys(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.nodes.keys().copied()
    }

    pub fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.get(key).and_then(|n| n.parent)
    }

    pub fn first_child(&self, key: NodeKey) -> Option<NodeKey> {
        self.get(key).and_then(|n| n.as_element()).and_then(|e| e.first)
    }

    pub fn last_child(&self, key: NodeKey) -> Option<NodeKey> {
        self.get(key).and_then(|n| n.as_element()).and_then(|e| e.last)
    }

    pub fn next_sibling(&self, key: NodeKey) -> Option<NodeKey> {
        self.get(key).and_then(|n| n.next)
    }

    pub fn prev_sibling(&self, key: NodeKey) -> Option<NodeKey> {
        self.get(key).and_then(|n| n.prev)
    }

    /// Child keys in order, following the sibling chain.
    pub fn children(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::with_capacity(self.get(key).map(|n| n.children_size()).unwrap_or(0));
        let mut cursor = self.first_child(key);
        while let Some(child) = cursor {
            out.push(child);
            cursor = self.next_sibling(child);
        }
        out
    }

    pub fn child_at(&self, key: NodeKey, index: usize) -> Option<NodeKey> {
        let mut cursor = self.first_child(key);
        let mut i = 0;
        while let Some(child) = cursor {
            if i == index {
                return Some(child);
            }
            i += 1;
            cursor = self.next_sibling(child);
        }
        None
    }

    pub fn index_within_parent(&self, key: NodeKey) -> Option<usize> {
        let parent = self.parent(key)?;
        let mut cursor = self.first_child(parent);
        let mut i = 0;
        while let Some(child) = cursor {
            if child == key {
                return Some(i);
            }
            i += 1;
            cursor = self.next_sibling(child);
        }
        None
    }

    /// Walks parent links; attached iff the walk reaches the root.
    pub fn is_attached(&self, key: NodeKey) -> bool {
        let mut cursor = Some(key);
        let mut steps = 0;
        while let Some(current) = cursor {
            if current.is_root() {
                return self.contains(current);
            }
            steps += 1;
            if steps > self.nodes.len() {
                return false;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// Strict ancestors, nearest first.
    pub fn ancestors(&self, key: NodeKey) -> impl Iterator<Item = NodeKey> + '_ {
        std::iter::successors(self.parent(key), move |k| self.parent(*k))
    }

    /// True when `ancestor` is a strict ancestor of `key`.
    pub fn is_parent_of(&self, ancestor: NodeKey, key: NodeKey) -> bool {
        ancestor != key && self.ancestors(key).any(|k| k == ancestor)
    }

    pub fn common_ancestor(&self, a: NodeKey, b: NodeKey) -> Option<NodeKey> {
        let chain_a: HashSet<NodeKey> = std::iter::once(a).chain(self.ancestors(a)).collect();
        std::iter::once(b)
            .chain(self.ancestors(b))
            .find(|k| chain_a.contains(k))
    }

    /// The ancestor directly below the root.
    pub fn top_level_element(&self, key: NodeKey) -> Option<NodeKey> {
        let mut cursor = key;
        loop {
            let parent = self.parent(cursor)?;
            if parent.is_root() {
                return Some(cursor);
            }
            cursor = parent;
        }
    }

    pub fn first_descendant(&self, key: NodeKey) -> Option<NodeKey> {
        let mut cursor = self.first_child(key)?;
        while let Some(child) = self.first_child(cursor) {
            cursor = child;
        }
        Some(cursor)
    }

    pub fn last_descendant(&self, key: NodeKey) -> Option<NodeKey> {
        let mut cursor = self.last_child(key)?;
        while let Some(child) = self.last_child(cursor) {
            cursor = child;
        }
        Some(cursor)
    }

    /// Deepest node at child position `index`; past the end resolves to the
    /// last descendant.
    pub fn descendant_by_index(&self, key: NodeKey, index: usize) -> Option<NodeKey> {
        let size = self.get(key)?.children_size();
        if size == 0 {
            return None;
        }
        if index >= size {
            let last = self.last_child(key)?;
            return Some(self.last_descendant(last).unwrap_or(last));
        }
        let child = self.child_at(key, index)?;
        Some(self.first_descendant(child).unwrap_or(child))
    }

    /// Child indices from the root down to `key`.
    pub(crate) fn path(&self, key: NodeKey) -> Vec<usize> {
        let mut path = Vec::new();
        let mut cursor = key;
        while let Some(index) = self.index_within_parent(cursor) {
            path.push(index);
            match self.parent(cursor) {
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        path.reverse();
        path
    }

    /// Pre-order document position comparison. An ancestor sorts before
    /// its descendants.
    pub fn compare_order(&self, a: NodeKey, b: NodeKey) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        self.path(a).cmp(&self.path(b))
    }

    pub fn is_before(&self, a: NodeKey, b: NodeKey) -> bool {
        self.compare_order(a, b) == Ordering::Less
    }

    /// Every node visited walking document order from `from` to `to`,
    /// inclusive, including partially covered ancestors.
    pub fn nodes_between(&self, from: NodeKey, to: NodeKey) -> Vec<NodeKey> {
        let forward = from == to || self.is_before(from, to);
        let mut nodes = Vec::new();
        let mut visited = HashSet::new();
        let mut cursor = Some(from);

        while let Some(key) = cursor {
            if visited.insert(key) {
                nodes.push(key);
            }
            if key == to {
                break;
            }
            let child = if forward {
                self.first_child(key)
            } else {
                self.last_child(key)
            };
            if let Some(child) = child {
                cursor = Some(child);
                continue;
            }
            let sibling = if forward {
                self.next_sibling(key)
            } else {
                self.prev_sibling(key)
            };
            if sibling.is_some() {
                cursor = sibling;
                continue;
            }
            let Some(parent) = self.parent(key) else {
                break;
            };
            if visited.insert(parent) {
                nodes.push(parent);
            }
            if parent == to {
                break;
            }
            let mut ancestor = Some(parent);
            let mut next = None;
            while let Some(current) = ancestor {
                next = if forward {
                    self.next_sibling(current)
                } else {
                    self.prev_sibling(current)
                };
                if next.is_some() {
                    break;
                }
                ancestor = self.parent(current);
                if let Some(up) = ancestor {
                    if visited.insert(up) {
                        nodes.push(up);
                    }
                }
            }
            cursor = next;
        }

        if !forward {
            nodes.reverse();
        }
        nodes
    }

    /// Flattened text. Block children are separated by a blank line.
    pub fn text_content(&self, key: NodeKey, registry: &NodeRegistry) -> String {
        let mut out = String::new();
        self.write_text_content(key, registry, &mut out);
        out
    }

    fn write_text_content(&self, key: NodeKey, registry: &NodeRegistry, out: &mut String) {
        let Some(node) = self.get(key) else {
            return;
        };
        if !node.is_element() {
            out.push_str(node.leaf_text());
            return;
        }
        let children = self.children(key);
        let count = children.len();
        for (i, child) in children.into_iter().enumerate() {
            self.write_text_content(child, registry, out);
            if let Some(child_node) = self.get(child) {
                if child_node.is_element() && i + 1 != count && !registry.behavior(child_node).inline {
                    out.push_str("\n\n");
                }
            }
        }
    }

    pub fn text_content_size(&self, key: NodeKey, registry: &NodeRegistry) -> usize {
        self.text_content(key, registry).chars().count()
    }

    /// Checks parent/child/sibling linkage of every attached node.
    pub fn check_integrity(&self) -> Result<(), TreeError> {
        let root = self.root()?;
        if root.parent.is_some() {
            return Err(TreeError::InvalidStructure("root has a parent".into()));
        }
        let mut seen = HashSet::new();
        let mut stack = vec![NodeKey::ROOT];
        while let Some(key) = stack.pop() {
            if !seen.insert(key) {
                return Err(TreeError::CycleDetected);
            }
            let node = self.node(key)?;
            let Some(element) = node.as_element() else {
                continue;
            };
            let mut count = 0;
            let mut prev: Option<NodeKey> = None;
            let mut cursor = element.first;
            while let Some(child) = cursor {
                let child_node = self.node(child)?;
                if child_node.parent != Some(key) {
                    return Err(TreeError::InvalidStructure(format!(
                        "child {} of {} points at parent {:?}",
                        child, key, child_node.parent
                    )));
                }
                if child_node.prev != prev {
                    return Err(TreeError::InvalidStructure(format!(
                        "child {} has prev {:?}, expected {:?}",
                        child, child_node.prev, prev
                    )));
                }
                count += 1;
                if count > self.nodes.len() {
                    return Err(TreeError::CycleDetected);
                }
                stack.push(child);
                prev = Some(child);
                cursor = child_node.next;
            }
            if element.last != prev {
                return Err(TreeError::InvalidStructure(format!(
                    "element {} has last {:?}, expected {:?}",
                    key, element.last, prev
                )));
            }
            if element.size != count {
                return Err(TreeError::InvalidStructure(format!(
                    "element {} has size {}, counted {}",
                    key, element.size, count
                )));
            }
        }
        Ok(())
    }
}

impl Default for EditorState {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_state_has_only_root() {
        let state = EditorState::empty();
        assert_eq!(state.len(), 1);
        assert!(state.is_empty());
        assert!(state.is_attached(NodeKey::ROOT));
        assert!(state.children(NodeKey::ROOT).is_empty());
        state.check_integrity().unwrap();
    }

    #[test]
    fn test_unknown_key_is_not_attached() {
        let state = EditorState::empty();
        assert!(!state.is_attached(NodeKey::from_raw(7)));
        assert!(state.node(NodeKey::from_raw(7)).is_err());
    }
}
