//! Sweeps nodes that were touched in a transaction but are no longer
//! reachable from the root.

use crate::key::NodeKey;
use crate::state::EditorState;
use crate::transaction::DirtySets;
use tracing::{debug, instrument};

/// Deletes every unattached dirty node from `state` and drops it from
/// `dirty`. Detached elements take their whole subtree with them, deepest
/// first. Returns the collected keys in deletion order.
#[instrument(skip_all, fields(leaves = dirty.leaves.len(), elements = dirty.elements.len()))]
pub(crate) fn collect_garbage(state: &mut EditorState, dirty: &mut DirtySets) -> Vec<NodeKey> {
    let mut collected = Vec::new();

    let mut elements: Vec<NodeKey> = dirty.elements.keys().copied().collect();
    elements.sort();
    for key in elements {
        if !state.contains(key) || state.is_attached(key) {
            continue;
        }
        collect_subtree(state, key, &mut collected);
    }

    let mut leaves: Vec<NodeKey> = dirty.leaves.iter().copied().collect();
    leaves.sort();
    for key in leaves {
        if state.contains(key) && !state.is_attached(key) {
            state.nodes.remove(&key);
            collected.push(key);
        }
    }

    for key in &collected {
        dirty.remove(*key);
    }
    if !collected.is_empty() {
        debug!(count = collected.len(), "collected detached nodes");
    }
    collected
}

fn collect_subtree(state: &mut EditorState, key: NodeKey, out: &mut Vec<NodeKey>) {
    for child in state.children(key) {
        collect_subtree(state, child, out);
    }
    if state.nodes.remove(&key).is_some() {
        out.push(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ElementData, Node, NodeKind, TextData};
    use std::sync::Arc;

    #[test]
    fn test_detached_element_takes_subtree() {
        let mut state = EditorState::empty();
        let paragraph = NodeKey::from_raw(1);
        let text = NodeKey::from_raw(2);
        let mut element = ElementData::default();
        element.first = Some(text);
        element.last = Some(text);
        element.size = 1;
        state
            .nodes
            .insert(paragraph, Arc::new(Node::new(paragraph, "paragraph", NodeKind::Element(element))));
        let mut leaf = Node::new(text, "text", NodeKind::Text(TextData::new("orphan")));
        leaf.parent = Some(paragraph);
        state.nodes.insert(text, Arc::new(leaf));

        let mut dirty = DirtySets::default();
        dirty.elements.insert(paragraph, true);
        dirty.elements.insert(NodeKey::ROOT, false);

        let collected = collect_garbage(&mut state, &mut dirty);
        assert_eq!(collected, vec![text, paragraph]);
        assert_eq!(state.len(), 1);
        assert!(!dirty.contains(paragraph));
        assert!(dirty.contains(NodeKey::ROOT));
    }

    #[test]
    fn test_attached_nodes_survive() {
        let mut state = EditorState::empty();
        let mut dirty = DirtySets::default();
        dirty.elements.insert(NodeKey::ROOT, true);
        assert!(collect_garbage(&mut state, &mut dirty).is_empty());
        assert!(state.contains(NodeKey::ROOT));
    }
}
