//! # Reconciler
//!
//! Brings the render surface in line with a new [`EditorState`] by walking
//! the previous and next trees side by side.
//!
//! ```text
//! reconcile_node(key)
//!   ├─ untouched (same Arc, not dirty) ──► reuse handle + cached aggregate
//!   ├─ forced or surface refuses update ─► recreate subtree in place
//!   └─ element ──► keyed child diff
//!                    ├─ key only in prev ──► destroy
//!                    ├─ key only in next ──► create, insert before cursor
//!                    └─ key in both ───────► move before cursor, recurse
//! ```
//!
//! Text content and block direction are aggregated bottom-up and cached per
//! key so untouched subtrees are never walked twice.

use crate::errors::{EditorResult, TreeError};
use crate::key::NodeKey;
use crate::listeners::{MutatedNodes, NodeMutation};
use crate::node::{Direction, Node, TextDetail};
use crate::registry::NodeRegistry;
use crate::state::EditorState;
use crate::surface::{HandleMap, RenderHandle, RenderSurface};
use crate::transaction::DirtySets;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Text content and strong direction of a rendered subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Aggregate {
    pub text: String,
    pub direction: Option<Direction>,
}

pub(crate) type AggregateCache = HashMap<NodeKey, Aggregate>;

/// What a reconciliation pass produced besides the surface calls.
#[derive(Debug, Default)]
pub struct ReconcileOutput {
    pub mutations: MutatedNodes,
    /// Blocks whose detected direction differs from the stored one.
    pub directions: Vec<(NodeKey, Option<Direction>)>,
    pub text_content: String,
}

pub(crate) struct Reconciler<'r> {
    pub prev: &'r EditorState,
    pub next: &'r EditorState,
    pub registry: &'r NodeRegistry,
    pub dirty: &'r DirtySets,
    pub forced: &'r HashSet<NodeKey>,
    pub full: bool,
    pub surface: &'r mut dyn RenderSurface,
    pub handles: &'r mut HandleMap,
    pub cache: &'r mut AggregateCache,
}

/// Surface order of an element's children while its diff is running.
#[derive(Debug, Default)]
struct RenderedList {
    head: Option<NodeKey>,
    tail: Option<NodeKey>,
    next: HashMap<NodeKey, Option<NodeKey>>,
    prev: HashMap<NodeKey, Option<NodeKey>>,
}

impl RenderedList {
    fn from_keys(keys: &[NodeKey]) -> Self {
        let mut list = Self {
            head: keys.first().copied(),
            tail: keys.last().copied(),
            next: HashMap::with_capacity(keys.len()),
            prev: HashMap::with_capacity(keys.len()),
        };
        for (i, key) in keys.iter().enumerate() {
            let prev = i.checked_sub(1).map(|p| keys[p]);
            list.prev.insert(*key, prev);
            list.next.insert(*key, keys.get(i + 1).copied());
        }
        list
    }

    fn next_of(&self, key: NodeKey) -> Option<NodeKey> {
        self.next.get(&key).copied().flatten()
    }

    fn remove(&mut self, key: NodeKey) {
        let (Some(prev), Some(next)) = (self.prev.remove(&key), self.next.remove(&key)) else {
            return;
        };
        match prev {
            Some(p) => {
                self.next.insert(p, next);
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                self.prev.insert(n, prev);
            }
            None => self.tail = prev,
        }
    }

    fn insert_before(&mut self, key: NodeKey, before: Option<NodeKey>) {
        let prev = match before {
            Some(b) => self.prev.get(&b).copied().flatten(),
            None => self.tail,
        };
        self.prev.insert(key, prev);
        self.next.insert(key, before);
        match prev {
            Some(p) => {
                self.next.insert(p, Some(key));
            }
            None => self.head = Some(key),
        }
        match before {
            Some(b) => {
                self.prev.insert(b, Some(key));
            }
            None => self.tail = Some(key),
        }
    }

    fn keys(&self) -> Vec<NodeKey> {
        let mut out = Vec::with_capacity(self.next.len());
        let mut cursor = self.head;
        while let Some(key) = cursor {
            out.push(key);
            cursor = self.next_of(key);
        }
        out
    }
}

impl<'r> Reconciler<'r> {
    #[instrument(skip_all, fields(full = self.full, dirty_leaves = self.dirty.leaves.len(), dirty_elements = self.dirty.elements.len()))]
    pub fn run(mut self) -> EditorResult<ReconcileOutput> {
        let mut output = ReconcileOutput::default();
        let unchanged = match (self.prev.get_arc(NodeKey::ROOT), self.next.get_arc(NodeKey::ROOT)) {
            (Some(prev), Some(next)) => Arc::ptr_eq(prev, next),
            _ => false,
        };
        let root = self.surface.root();
        self.handles.insert(NodeKey::ROOT, root);

        if unchanged && !self.full && self.dirty.is_empty() && self.forced.is_empty() {
            output.text_content = self.aggregate_of(NodeKey::ROOT)?.text;
            return Ok(output);
        }

        let prev_handles = self.handles.clone();
        let mut pass = Pass {
            rc: &mut self,
            prev_handles,
            mutations: MutatedNodes::new(),
            directions: Vec::new(),
        };
        if pass.rc.forced.contains(&NodeKey::ROOT) {
            pass.rebuild_root(root)?;
        } else {
            pass.reconcile_node(NodeKey::ROOT, None)?;
        }
        let mutations = pass.mutations;
        let directions = pass.directions;

        output.text_content = self.aggregate_of(NodeKey::ROOT)?.text;
        debug!(
            mutated_types = mutations.len(),
            directions = directions.len(),
            "reconciled"
        );
        output.mutations = mutations;
        output.directions = directions;
        Ok(output)
    }

    /// Cached aggregate for `key`, computed from the next state on a miss.
    fn aggregate_of(&mut self, key: NodeKey) -> EditorResult<Aggregate> {
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }
        let aggregate = compute_aggregate(self.next, self.registry, key, self.cache)?;
        Ok(aggregate)
    }
}

/// State that lives for one pass only.
struct Pass<'p, 'r> {
    rc: &'p mut Reconciler<'r>,
    /// Handles as they were before the pass; destruction goes through these
    /// so a node re-created elsewhere keeps its new mapping.
    prev_handles: HandleMap,
    mutations: MutatedNodes,
    directions: Vec<(NodeKey, Option<Direction>)>,
}

impl Pass<'_, '_> {
    fn record(&mut self, node: &Node, mutation: NodeMutation) {
        self.mutations
            .entry(node.node_type)
            .or_default()
            .entry(node.key)
            .or_insert(mutation);
    }

    fn note_created(&mut self, key: NodeKey) -> EditorResult<()> {
        let next = self.rc.next;
        let node = next.node(key)?;
        if !self.rc.prev.is_attached(key) {
            self.record(node, NodeMutation::Created);
        } else if self.rc.dirty.contains(key) || self.rc.full {
            self.record(node, NodeMutation::Updated);
        }
        Ok(())
    }

    fn handle_of(&self, key: NodeKey) -> EditorResult<RenderHandle> {
        self.rc
            .handles
            .handle_of(key)
            .ok_or_else(|| TreeError::InvalidStructure(format!("node {} has no render node", key)).into())
    }

    fn reconcile_node(&mut self, key: NodeKey, parent: Option<RenderHandle>) -> EditorResult<()> {
        let next_arc = self
            .rc
            .next
            .get_arc(key)
            .cloned()
            .ok_or(TreeError::NodeNotFound(key))?;
        let prev_arc = self.rc.prev.get_arc(key).cloned();
        let same = prev_arc.as_ref().is_some_and(|p| Arc::ptr_eq(p, &next_arc));
        let dirty = self.rc.dirty.contains(key);
        let handle = self.handle_of(key)?;

        if same && !dirty && !self.rc.full && self.rc.cache.contains_key(&key) {
            return Ok(());
        }

        if let Some(parent) = parent {
            if self.rc.forced.contains(&key) {
                return self.recreate(key, parent);
            }
            let prev_node = prev_arc.as_deref().unwrap_or(&*next_arc);
            if self.rc.surface.update_render_node(prev_node, &next_arc, handle) {
                return self.recreate(key, parent);
            }
        }
        if !same {
            self.record(&next_arc, NodeMutation::Updated);
        }

        if next_arc.is_element() {
            let diff = self.rc.full || self.rc.dirty.elements.contains_key(&key) || !same;
            if diff {
                self.reconcile_children(key, handle)?;
            }
        }
        self.settle(key, handle, false)
    }

    /// Recomputes the aggregate of `key` and pushes a changed block
    /// direction to the surface.
    fn settle(&mut self, key: NodeKey, handle: RenderHandle, created: bool) -> EditorResult<()> {
        self.rc.cache.remove(&key);
        let (next, registry) = (self.rc.next, self.rc.registry);
        let aggregate = compute_aggregate(next, registry, key, self.rc.cache)?;
        let node = next.node(key)?;
        let Some(element) = node.as_element() else {
            return Ok(());
        };
        if registry.behavior(node).inline {
            return Ok(());
        }
        let stored = element.direction;
        match aggregate.direction {
            Some(detected) if Some(detected) != stored => {
                self.directions.push((key, Some(detected)));
                self.rc.surface.set_direction(handle, Some(detected));
            }
            _ if created && stored.is_some() => {
                self.rc.surface.set_direction(handle, stored);
            }
            _ => {}
        }
        Ok(())
    }

    fn create_subtree(&mut self, key: NodeKey) -> EditorResult<RenderHandle> {
        let node = self.rc.next.get_arc(key).cloned().ok_or(TreeError::NodeNotFound(key))?;
        let handle = self.rc.surface.create_render_node(&node);
        self.rc.handles.insert(key, handle);
        self.note_created(key)?;
        for child in self.rc.next.children(key) {
            let child_handle = self.create_subtree(child)?;
            self.rc.surface.insert_child(handle, child_handle, None);
        }
        self.settle(key, handle, true)?;
        Ok(handle)
    }

    fn create_and_insert(&mut self, key: NodeKey, parent: RenderHandle, before: Option<NodeKey>) -> EditorResult<()> {
        let handle = self.create_subtree(key)?;
        let before = before.and_then(|b| self.rc.handles.handle_of(b));
        self.rc.surface.insert_child(parent, handle, before);
        Ok(())
    }

    /// Destroys the render subtree of a node as it existed in the previous
    /// state, deepest first.
    fn destroy(&mut self, key: NodeKey, parent: Option<RenderHandle>) {
        let Some(handle) = self.prev_handles.handle_of(key) else {
            return;
        };
        if let Some(parent) = parent {
            self.rc.surface.remove_child(parent, handle);
        }
        for child in self.rc.prev.children(key) {
            self.destroy(child, None);
        }
        self.rc.surface.destroy_render_node(handle);
        self.rc.handles.forget(key, handle);
        if self.rc.handles.handle_of(key).is_none() {
            self.rc.cache.remove(&key);
        }
        if !self.rc.next.is_attached(key) {
            if let Some(node) = self.rc.prev.get_arc(key).cloned() {
                self.record(&node, NodeMutation::Destroyed);
            }
        }
    }

    /// Replaces the render subtree of `key` with a fresh one at the same
    /// position.
    fn recreate(&mut self, key: NodeKey, parent: RenderHandle) -> EditorResult<()> {
        let old = self.handle_of(key)?;
        let mut stale = Vec::new();
        collect_subtree(self.rc.prev, &self.prev_handles, key, &mut stale);

        let fresh = self.create_subtree(key)?;
        self.rc.surface.insert_child(parent, fresh, Some(old));
        self.rc.surface.remove_child(parent, old);
        for (stale_key, stale_handle) in stale {
            self.rc.surface.destroy_render_node(stale_handle);
            self.rc.handles.forget(stale_key, stale_handle);
            if !self.rc.next.is_attached(stale_key) {
                if let Some(node) = self.rc.prev.get_arc(stale_key).cloned() {
                    self.record(&node, NodeMutation::Destroyed);
                }
            }
        }
        if let Some(node) = self.rc.next.get_arc(key).cloned() {
            self.record(&node, NodeMutation::Updated);
        }
        debug!(%key, "recreated render node");
        Ok(())
    }

    fn rebuild_root(&mut self, root: RenderHandle) -> EditorResult<()> {
        for child in self.rc.prev.children(NodeKey::ROOT) {
            self.destroy(child, Some(root));
        }
        for child in self.rc.next.children(NodeKey::ROOT) {
            self.create_and_insert(child, root, None)?;
        }
        if let Some(node) = self.rc.next.get_arc(NodeKey::ROOT).cloned() {
            self.record(&node, NodeMutation::Updated);
        }
        self.settle(NodeKey::ROOT, root, false)
    }

    fn reconcile_children(&mut self, key: NodeKey, handle: RenderHandle) -> EditorResult<()> {
        let prev_children = if self.rc.prev.contains(key) {
            self.rc.prev.children(key)
        } else {
            Vec::new()
        };
        let next_children = self.rc.next.children(key);

        if prev_children.is_empty() {
            for child in next_children {
                self.create_and_insert(child, handle, None)?;
            }
            return Ok(());
        }
        if next_children.is_empty() {
            for child in prev_children {
                self.destroy(child, Some(handle));
            }
            return Ok(());
        }
        self.diff_children(handle, &prev_children, &next_children)
    }

    /// Two cursors walk both child lists. Everything before `cursor` in the
    /// rendered list already matches `next[..next_index]`.
    fn diff_children(&mut self, parent: RenderHandle, prev: &[NodeKey], next: &[NodeKey]) -> EditorResult<()> {
        let mut rendered = RenderedList::from_keys(prev);
        let mut cursor = rendered.head;
        let mut prev_index = 0;
        let mut next_index = 0;
        let mut sets: Option<(HashSet<NodeKey>, HashSet<NodeKey>)> = None;

        while prev_index < prev.len() && next_index < next.len() {
            let prev_key = prev[prev_index];
            let next_key = next[next_index];
            if prev_key == next_key {
                self.place(parent, next_key, &mut rendered, &mut cursor)?;
                prev_index += 1;
                next_index += 1;
                continue;
            }
            let (prev_set, next_set) =
                sets.get_or_insert_with(|| (prev.iter().copied().collect(), next.iter().copied().collect()));
            let next_has_prev = next_set.contains(&prev_key);
            let prev_has_next = prev_set.contains(&next_key);

            if !next_has_prev {
                if cursor == Some(prev_key) {
                    cursor = rendered.next_of(prev_key);
                }
                rendered.remove(prev_key);
                self.destroy(prev_key, Some(parent));
                prev_index += 1;
            } else if !prev_has_next {
                self.create_and_insert(next_key, parent, cursor)?;
                rendered.insert_before(next_key, cursor);
                next_index += 1;
            } else {
                self.place(parent, next_key, &mut rendered, &mut cursor)?;
                prev_index += 1;
                next_index += 1;
            }
        }

        if next_index < next.len() {
            let prev_set: HashSet<NodeKey> = prev.iter().copied().collect();
            for &next_key in &next[next_index..] {
                if prev_set.contains(&next_key) {
                    self.place(parent, next_key, &mut rendered, &mut cursor)?;
                } else {
                    self.create_and_insert(next_key, parent, cursor)?;
                    rendered.insert_before(next_key, cursor);
                }
            }
        }
        // Whatever is left from the cursor on is absent from `next`.
        while let Some(stale) = cursor {
            cursor = rendered.next_of(stale);
            rendered.remove(stale);
            self.destroy(stale, Some(parent));
        }

        if rendered.keys() != next {
            warn!(?parent, "child order diverged after diff, re-appending");
            for &child in next {
                let child_handle = self.handle_of(child)?;
                self.rc.surface.move_child(parent, child_handle, None);
            }
        }
        Ok(())
    }

    /// Ensures `key` sits at the cursor, moving it there if needed, then
    /// reconciles it.
    fn place(
        &mut self,
        parent: RenderHandle,
        key: NodeKey,
        rendered: &mut RenderedList,
        cursor: &mut Option<NodeKey>,
    ) -> EditorResult<()> {
        if *cursor == Some(key) {
            *cursor = rendered.next_of(key);
        } else {
            let handle = self.handle_of(key)?;
            let before = cursor.and_then(|c| self.rc.handles.handle_of(c));
            self.rc.surface.move_child(parent, handle, before);
            rendered.remove(key);
            rendered.insert_before(key, *cursor);
        }
        self.reconcile_node(key, Some(parent))
    }
}

fn collect_subtree(state: &EditorState, handles: &HandleMap, key: NodeKey, out: &mut Vec<(NodeKey, RenderHandle)>) {
    for child in state.children(key) {
        collect_subtree(state, handles, child, out);
    }
    if let Some(handle) = handles.handle_of(key) {
        out.push((key, handle));
    }
}

fn leaf_direction(node: &Node) -> Option<Direction> {
    match node.as_text() {
        Some(data) if data.detail.contains(TextDetail::DIRECTIONLESS) => None,
        Some(data) => Direction::detect(&data.text),
        None => None,
    }
}

/// Aggregate of `key` from the next state, reusing cached children.
pub(crate) fn compute_aggregate(
    state: &EditorState,
    registry: &NodeRegistry,
    key: NodeKey,
    cache: &mut AggregateCache,
) -> EditorResult<Aggregate> {
    if let Some(cached) = cache.get(&key) {
        return Ok(cached.clone());
    }
    let node = state.node(key)?;
    let aggregate = if node.is_element() {
        let children = state.children(key);
        let count = children.len();
        let mut text = String::new();
        let mut direction = None;
        for (i, child) in children.into_iter().enumerate() {
            let child_aggregate = compute_aggregate(state, registry, child, cache)?;
            text.push_str(&child_aggregate.text);
            if direction.is_none() {
                direction = child_aggregate.direction;
            }
            let child_node = state.node(child)?;
            if child_node.is_element() && i + 1 != count && !registry.behavior(child_node).inline {
                text.push_str("\n\n");
            }
        }
        Aggregate { text, direction }
    } else {
        Aggregate {
            text: node.leaf_text().to_string(),
            direction: leaf_direction(node),
        }
    };
    cache.insert(key, aggregate.clone());
    Ok(aggregate)
}

/// Block directions for a commit without a surface: every dirty block whose
/// detected direction differs from the stored one.
pub(crate) fn block_directions(
    state: &EditorState,
    registry: &NodeRegistry,
    dirty: &DirtySets,
) -> Vec<(NodeKey, Option<Direction>)> {
    let mut out = Vec::new();
    let mut cache = AggregateCache::new();
    let mut keys: Vec<NodeKey> = dirty.elements.keys().copied().collect();
    keys.sort();
    for key in keys {
        let Some(node) = state.get(key) else {
            continue;
        };
        let Some(element) = node.as_element() else {
            continue;
        };
        if registry.behavior(node).inline || !state.is_attached(key) {
            continue;
        }
        let Ok(aggregate) = compute_aggregate(state, registry, key, &mut cache) else {
            continue;
        };
        if let Some(detected) = aggregate.direction {
            if Some(detected) != element.direction {
                out.push((key, Some(detected)));
            }
        }
    }
    out
}

/// Mutations of a commit without a surface, derived from attachment before
/// and after. A full commit compares every key of both states.
pub(crate) fn headless_mutations(prev: &EditorState, next: &EditorState, dirty: &DirtySets, full: bool) -> MutatedNodes {
    let mut keys: Vec<NodeKey> = if full {
        prev.keys().chain(next.keys()).collect()
    } else {
        dirty
            .leaves
            .iter()
            .copied()
            .chain(dirty.elements.iter().filter(|(_, direct)| **direct).map(|(k, _)| *k))
            .collect()
    };
    keys.sort();
    keys.dedup();

    let mut out = MutatedNodes::new();
    for key in keys {
        if key.is_root() {
            continue;
        }
        let (node, mutation) = match (prev.is_attached(key), next.is_attached(key)) {
            (false, true) => (next.get(key), NodeMutation::Created),
            (true, false) => (prev.get(key), NodeMutation::Destroyed),
            (true, true) => {
                let changed = match (prev.get_arc(key), next.get_arc(key)) {
                    (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
                    _ => true,
                };
                if !changed {
                    continue;
                }
                (next.get(key), NodeMutation::Updated)
            }
            (false, false) => continue,
        };
        if let Some(node) = node {
            out.entry(node.node_type).or_default().insert(key, mutation);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_surface::{MemorySurface, SurfaceOp};
    use crate::node::{ElementData, NodeKind, TextData};

    fn key(raw: u64) -> NodeKey {
        NodeKey::from_raw(raw)
    }

    /// Root with one paragraph (1) holding the given text children.
    fn state_with(texts: &[(u64, &str)]) -> EditorState {
        let mut state = EditorState::empty();
        let paragraph_key = key(1);
        let mut paragraph = Node::new(paragraph_key, "paragraph", NodeKind::Element(ElementData::default()));
        paragraph.parent = Some(NodeKey::ROOT);
        let mut prev: Option<NodeKey> = None;
        for (raw, text) in texts {
            let mut node = Node::new(key(*raw), "text", NodeKind::Text(TextData::new(*text)));
            node.parent = Some(paragraph_key);
            node.prev = prev;
            if let Some(p) = prev {
                if let Some(prev_node) = state.nodes.get_mut(&p) {
                    Arc::make_mut(prev_node).next = Some(key(*raw));
                }
            }
            state.nodes.insert(key(*raw), Arc::new(node));
            prev = Some(key(*raw));
        }
        if let Some(data) = paragraph.as_element_mut() {
            data.first = texts.first().map(|(k, _)| key(*k));
            data.last = prev;
            data.size = texts.len();
        }
        state.nodes.insert(paragraph_key, Arc::new(paragraph));
        if let Some(root) = state.nodes.get_mut(&NodeKey::ROOT) {
            if let Some(data) = Arc::make_mut(root).as_element_mut() {
                data.first = Some(paragraph_key);
                data.last = Some(paragraph_key);
                data.size = 1;
            }
        }
        state
    }

    fn run(
        prev: &EditorState,
        next: &EditorState,
        dirty: &DirtySets,
        surface: &mut MemorySurface,
        handles: &mut HandleMap,
        cache: &mut AggregateCache,
    ) -> ReconcileOutput {
        let registry = NodeRegistry::with_builtins();
        let forced = HashSet::new();
        Reconciler {
            prev,
            next,
            registry: &registry,
            dirty,
            forced: &forced,
            full: false,
            surface,
            handles,
            cache,
        }
        .run()
        .unwrap()
    }

    fn mount(state: &EditorState) -> (MemorySurface, HandleMap, AggregateCache) {
        let mut surface = MemorySurface::new();
        let mut handles = HandleMap::default();
        let mut cache = AggregateCache::new();
        let mut dirty = DirtySets::default();
        for k in state.keys() {
            if state.node(k).unwrap().is_element() {
                dirty.elements.insert(k, true);
            } else {
                dirty.leaves.insert(k);
            }
        }
        run(&EditorState::empty(), state, &dirty, &mut surface, &mut handles, &mut cache);
        surface.clear_ops();
        (surface, handles, cache)
    }

    #[test]
    fn test_initial_mount_renders_text() {
        let state = state_with(&[(2, "hello"), (3, " world")]);
        let (surface, handles, _) = mount(&state);
        assert_eq!(surface.render_text(surface.root()), "hello world");
        assert_eq!(handles.len(), 4);
    }

    #[test]
    fn test_unchanged_state_emits_nothing() {
        let state = state_with(&[(2, "a")]);
        let (mut surface, mut handles, mut cache) = mount(&state);
        let output = run(&state, &state, &DirtySets::default(), &mut surface, &mut handles, &mut cache);
        assert!(surface.ops().is_empty());
        assert!(output.mutations.is_empty());
        assert_eq!(output.text_content, "a");
    }

    #[test]
    fn test_rotation_is_a_single_move() {
        let prev = state_with(&[(2, "A"), (3, "B"), (4, "C")]);
        let (mut surface, mut handles, mut cache) = mount(&prev);
        let next = state_with(&[(4, "C"), (2, "A"), (3, "B")]);
        let mut dirty = DirtySets::default();
        dirty.elements.insert(key(1), true);
        dirty.elements.insert(NodeKey::ROOT, false);

        let output = run(&prev, &next, &dirty, &mut surface, &mut handles, &mut cache);
        let moves = surface
            .ops()
            .iter()
            .filter(|op| matches!(op, SurfaceOp::Move { .. }))
            .count();
        assert_eq!(moves, 1);
        assert!(!surface
            .ops()
            .iter()
            .any(|op| matches!(op, SurfaceOp::Create { .. } | SurfaceOp::Destroy { .. })));
        assert_eq!(surface.render_text(surface.root()), "CAB");
        assert_eq!(output.text_content, "CAB");
    }

    #[test]
    fn test_removed_and_inserted_children() {
        let prev = state_with(&[(2, "A"), (3, "B"), (4, "C")]);
        let (mut surface, mut handles, mut cache) = mount(&prev);
        let next = state_with(&[(2, "A"), (5, "D"), (4, "C")]);
        let mut dirty = DirtySets::default();
        dirty.elements.insert(key(1), true);
        dirty.elements.insert(NodeKey::ROOT, false);
        dirty.leaves.insert(key(5));

        let output = run(&prev, &next, &dirty, &mut surface, &mut handles, &mut cache);
        assert_eq!(surface.render_text(surface.root()), "ADC");
        assert!(handles.handle_of(key(3)).is_none());
        let texts = &output.mutations["text"];
        assert_eq!(texts[&key(5)], NodeMutation::Created);
        assert_eq!(texts[&key(3)], NodeMutation::Destroyed);
    }

    #[test]
    fn test_rtl_text_sets_block_direction() {
        let prev = state_with(&[(2, "x")]);
        let (mut surface, mut handles, mut cache) = mount(&prev);
        let next = state_with(&[(2, "\u{05D0}\u{05D1}")]);
        let mut dirty = DirtySets::default();
        dirty.leaves.insert(key(2));
        dirty.elements.insert(key(1), false);
        dirty.elements.insert(NodeKey::ROOT, false);

        let output = run(&prev, &next, &dirty, &mut surface, &mut handles, &mut cache);
        assert!(output.directions.contains(&(key(1), Some(Direction::Rtl))));
        let handle = handles.handle_of(key(1)).unwrap();
        assert_eq!(surface.direction(handle), Some(Direction::Rtl));
    }

    #[test]
    fn test_rendered_list_insert_before() {
        let mut list = RenderedList::from_keys(&[key(1), key(2)]);
        list.insert_before(key(3), Some(key(1)));
        assert_eq!(list.keys(), vec![key(3), key(1), key(2)]);
        list.remove(key(1));
        list.insert_before(key(1), None);
        assert_eq!(list.keys(), vec![key(3), key(2), key(1)]);
    }

    #[test]
    fn test_rendered_list_tracks_tail() {
        let keys: Vec<NodeKey> = (1..=5000).map(key).collect();
        let mut list = RenderedList::from_keys(&keys);
        assert_eq!(list.tail, Some(key(5000)));

        list.remove(key(5000));
        assert_eq!(list.tail, Some(key(4999)));
        list.insert_before(key(9000), None);
        assert_eq!(list.tail, Some(key(9000)));
        assert_eq!(list.next_of(key(4999)), Some(key(9000)));

        let mut single = RenderedList::from_keys(&[key(1)]);
        single.remove(key(1));
        assert_eq!((single.head, single.tail), (None, None));
        single.insert_before(key(2), None);
        assert_eq!(single.keys(), vec![key(2)]);
        assert_eq!(single.tail, Some(key(2)));
    }

    #[test]
    fn test_long_child_list_rotation() {
        let texts: Vec<(u64, String)> = (2..2002).map(|raw| (raw, format!("t{}", raw))).collect();
        let borrowed: Vec<(u64, &str)> = texts.iter().map(|(k, t)| (*k, t.as_str())).collect();
        let prev = state_with(&borrowed);
        let (mut surface, mut handles, mut cache) = mount(&prev);

        let mut rotated = borrowed.clone();
        let last = rotated.pop().unwrap();
        rotated.insert(0, last);
        let next = state_with(&rotated);
        let mut dirty = DirtySets::default();
        dirty.elements.insert(key(1), true);
        dirty.elements.insert(NodeKey::ROOT, false);
        for (raw, _) in &rotated {
            dirty.leaves.insert(key(*raw));
        }

        run(&prev, &next, &dirty, &mut surface, &mut handles, &mut cache);
        let moves = surface
            .ops()
            .iter()
            .filter(|op| matches!(op, SurfaceOp::Move { .. }))
            .count();
        assert_eq!(moves, 1);
        assert!(!surface
            .ops()
            .iter()
            .any(|op| matches!(op, SurfaceOp::Create { .. } | SurfaceOp::Destroy { .. })));
        let paragraph = handles.handle_of(key(1)).unwrap();
        assert_eq!(surface.children(paragraph)[0], handles.handle_of(key(2001)).unwrap());
    }
}
