//! # Transform Pipeline
//!
//! Node transforms run after the update callback and before reconciliation.
//! Each pass visits the nodes dirtied by the previous pass only; the loop
//! ends when a pass dirties nothing new.
//!
//! Dirty leaves are processed first. Simple text is normalized (empty runs
//! dropped, compatible neighbours merged) before its transforms run. Elements
//! are only visited once the leaves have settled, and only when written
//! directly rather than through a descendant.

use crate::errors::{EditorError, EditorResult};
use crate::key::NodeKey;
use crate::listeners::ListenerId;
use crate::transaction::{DirtySets, Transaction};
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

pub type TransformFn = Box<dyn FnMut(NodeKey, &mut Transaction<'_>) -> EditorResult<()>>;

/// Registered transforms by node type, in registration order.
#[derive(Default)]
pub(crate) struct TransformTable {
    entries: HashMap<&'static str, Vec<(ListenerId, TransformFn)>>,
}

impl TransformTable {
    pub fn register(&mut self, node_type: &'static str, id: ListenerId, transform: TransformFn) {
        self.entries.entry(node_type).or_default().push((id, transform));
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let mut removed = false;
        self.entries.retain(|_, list| {
            let before = list.len();
            list.retain(|(i, _)| *i != id);
            removed |= list.len() != before;
            !list.is_empty()
        });
        removed
    }

    fn run(&mut self, key: NodeKey, tx: &mut Transaction<'_>) -> EditorResult<()> {
        let Ok(node) = tx.node(key) else {
            return Ok(());
        };
        let Some(list) = self.entries.get_mut(node.node_type) else {
            return Ok(());
        };
        for (_, transform) in list.iter_mut() {
            // An earlier transform may have removed or detached the node.
            if !tx.state().is_attached(key) {
                break;
            }
            transform(key, tx)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for TransformTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&&str> = self.entries.keys().collect();
        types.sort();
        f.debug_struct("TransformTable").field("types", &types).finish()
    }
}

fn is_valid_for_transform(tx: &Transaction<'_>, key: NodeKey) -> bool {
    tx.state().contains(key) && !tx.is_composing(key) && tx.state().is_attached(key)
}

fn is_simple_text(tx: &Transaction<'_>, key: NodeKey) -> bool {
    tx.node(key)
        .is_ok_and(|n| n.node_type == "text" && n.as_text().is_some_and(|t| t.is_simple()))
}

/// Two simple runs merge when nothing visible distinguishes them.
fn can_merge(tx: &Transaction<'_>, a: NodeKey, b: NodeKey) -> bool {
    match (tx.text(a), tx.text(b)) {
        (Ok(x), Ok(y)) => x.mode == y.mode && x.format == y.format && x.style == y.style,
        _ => false,
    }
}

impl<'a> Transaction<'a> {
    /// Drops `key` when it is empty, otherwise merges it with compatible
    /// neighbours. Empty neighbours met on the way are dropped too.
    pub fn normalize_text_node(&mut self, key: NodeKey) -> EditorResult<()> {
        if !is_simple_text(self, key) {
            return Ok(());
        }
        if self.text(key)?.is_empty() {
            if !self.is_composing(key) {
                self.remove(key)?;
            }
            return Ok(());
        }

        let mut node = key;
        while let Some(prev) = self.state().prev_sibling(node) {
            if !is_simple_text(self, prev) {
                break;
            }
            if self.text(prev)?.is_empty() {
                self.remove(prev)?;
            } else if can_merge(self, prev, node) {
                node = self.merge_with_sibling(prev, node)?;
                break;
            } else {
                break;
            }
        }

        while let Some(next) = self.state().next_sibling(node) {
            if !is_simple_text(self, next) {
                break;
            }
            if self.text(next)?.is_empty() {
                self.remove(next)?;
            } else if can_merge(self, node, next) {
                self.merge_with_sibling(node, next)?;
                break;
            } else {
                break;
            }
        }
        Ok(())
    }
}

fn sorted<I: IntoIterator<Item = NodeKey>>(keys: I) -> Vec<NodeKey> {
    let mut keys: Vec<NodeKey> = keys.into_iter().collect();
    keys.sort();
    keys
}

/// Runs normalization and transforms to a fixpoint. The dirty sets left on
/// the transaction afterwards hold every node touched along the way.
#[instrument(skip_all, fields(max = max_iterations))]
pub(crate) fn apply_transforms(
    tx: &mut Transaction<'_>,
    table: &mut TransformTable,
    max_iterations: usize,
) -> EditorResult<()> {
    let mut accumulated = std::mem::take(&mut tx.pending.dirty);
    let mut leaves = sorted(accumulated.leaves.iter().copied());
    let mut elements: Vec<(NodeKey, bool)> = sorted(accumulated.elements.keys().copied())
        .into_iter()
        .map(|k| (k, accumulated.elements[&k]))
        .collect();
    let mut iterations = 0;

    let result = loop {
        if leaves.is_empty() && elements.is_empty() {
            break Ok(());
        }
        if iterations >= max_iterations {
            warn!(iterations, "transforms did not settle");
            break Err(EditorError::InfiniteTransform { iterations });
        }

        if !leaves.is_empty() {
            if let Err(err) = run_leaves(tx, table, &leaves) {
                break Err(err);
            }
            let fresh = std::mem::take(&mut tx.pending.dirty);
            accumulated.leaves.extend(leaves.drain(..));
            leaves = sorted(fresh.leaves.iter().copied());
            merge_elements(&mut accumulated, &fresh);
            for (key, intentional) in fresh.elements {
                upsert(&mut elements, key, intentional);
            }
            if !leaves.is_empty() {
                iterations += 1;
                continue;
            }
        }

        let pass: Vec<(NodeKey, bool)> = std::mem::take(&mut elements);
        if let Err(err) = run_elements(tx, table, &pass) {
            break Err(err);
        }
        let fresh = std::mem::take(&mut tx.pending.dirty);
        merge_elements(&mut accumulated, &fresh);
        leaves = sorted(fresh.leaves.iter().copied());
        elements = sorted(fresh.elements.keys().copied())
            .into_iter()
            .map(|k| (k, fresh.elements[&k]))
            .collect();
        iterations += 1;
    };

    accumulated.leaves.extend(leaves);
    for (key, intentional) in elements {
        *accumulated.elements.entry(key).or_insert(false) |= intentional;
    }
    let fresh = std::mem::take(&mut tx.pending.dirty);
    accumulated.leaves.extend(fresh.leaves.iter().copied());
    merge_elements(&mut accumulated, &fresh);
    tx.pending.dirty = accumulated;
    debug!(iterations, "transforms settled");
    result
}

fn upsert(elements: &mut Vec<(NodeKey, bool)>, key: NodeKey, intentional: bool) {
    match elements.iter_mut().find(|(k, _)| *k == key) {
        Some(entry) => entry.1 |= intentional,
        None => elements.push((key, intentional)),
    }
}

fn merge_elements(into: &mut DirtySets, from: &DirtySets) {
    for (key, intentional) in &from.elements {
        *into.elements.entry(*key).or_insert(false) |= *intentional;
    }
}

fn run_leaves(tx: &mut Transaction<'_>, table: &mut TransformTable, leaves: &[NodeKey]) -> EditorResult<()> {
    for &key in leaves {
        if is_simple_text(tx, key) && tx.state().is_attached(key) {
            tx.normalize_text_node(key)?;
        }
        if is_valid_for_transform(tx, key) {
            table.run(key, tx)?;
        }
    }
    Ok(())
}

fn run_elements(tx: &mut Transaction<'_>, table: &mut TransformTable, elements: &[(NodeKey, bool)]) -> EditorResult<()> {
    for &(key, intentional) in elements {
        if !key.is_root() && !intentional {
            continue;
        }
        if is_valid_for_transform(tx, key) {
            table.run(key, tx)?;
        }
    }
    Ok(())
}
