//! # Editor
//!
//! Owns the committed state and everything an update needs: the registry,
//! the key generator, listener and command tables, the transform table and
//! the optional render surface.
//!
//! ## Update lifecycle
//!
//! ```text
//! update(f)
//!   ├─ open: pending = committed (shared nodes) or the batched pending
//!   ├─ f(&mut Transaction)
//!   ├─ transforms to a fixpoint (unless skipped)
//!   └─ commit (discrete, or batching disabled)
//!        ├─ normalize selection
//!        ├─ reconcile against the surface, or compute text/directions
//!        ├─ collect garbage
//!        ├─ swap committed state
//!        ├─ mutation listeners → update listeners → text-content listeners
//!        └─ flush queued updates in submission order
//! ```
//!
//! Any error aborts: the pending state is dropped, the error handler runs and
//! the committed state is left as it was.

use crate::commands::{
    Command, CommandPriority, CommandTable, DELETE_CHARACTER, DELETE_LINE, DELETE_WORD, FORMAT_TEXT,
    INSERT_LINE_BREAK, INSERT_PARAGRAPH, INSERT_TEXT,
};
use crate::config::EditorConfig;
use crate::errors::{EditorError, EditorResult};
use crate::gc::collect_garbage;
use crate::key::{KeyGenerator, NodeKey};
use crate::listeners::{ListenerId, ListenerSet, MutatedNodes, NodeMutation, UpdatePayload};
use crate::reconciler::{block_directions, headless_mutations, AggregateCache, ReconcileOutput, Reconciler};
use crate::registry::{NodeClass, NodeRegistry};
use crate::selection::{normalize_selection, resolve_point, Point, Selection};
use crate::serialize::parse_state;
use crate::state::EditorState;
use crate::surface::{HandleMap, RenderHandle, RenderSurface, SurfaceMutation, SurfacePoint, SurfaceSelection};
use crate::transaction::{DirtySets, PendingUpdate, Transaction, UpdateOptions, UpdateQueue};
use crate::transform::{apply_transforms, TransformTable};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Tag for corrective transactions built from surface mutations.
pub const SURFACE_CORRECTION_TAG: &str = "surface-correction";
/// Commits carrying this tag leave the surface selection alone.
pub const SKIP_SURFACE_SELECTION_TAG: &str = "skip-surface-selection";

pub type ErrorHandler = Box<dyn FnMut(&EditorError)>;

pub struct Editor {
    config: EditorConfig,
    registry: NodeRegistry,
    committed: Arc<EditorState>,
    pending: Option<PendingUpdate>,
    /// Composition key as it was when the pending state was opened.
    composition_at_open: Option<NodeKey>,
    keys: KeyGenerator,
    composition: Option<NodeKey>,
    queue: UpdateQueue,
    surface: Option<Box<dyn RenderSurface>>,
    handles: HandleMap,
    cache: AggregateCache,
    last_surface_selection: Option<SurfaceSelection>,
    listeners: ListenerSet,
    commands: CommandTable,
    transforms: TransformTable,
    on_error: ErrorHandler,
    next_id: u64,
    editable: bool,
    text_content: String,
}

impl Editor {
    pub fn new() -> Self {
        Self::with_config(EditorConfig::default())
    }

    pub fn with_config(config: EditorConfig) -> Self {
        let mut committed = EditorState::empty();
        committed.read_only = true;
        let mut editor = Self {
            editable: config.editable,
            config,
            registry: NodeRegistry::with_builtins(),
            committed: Arc::new(committed),
            pending: None,
            composition_at_open: None,
            keys: KeyGenerator::new(),
            composition: None,
            queue: UpdateQueue::default(),
            surface: None,
            handles: HandleMap::default(),
            cache: AggregateCache::new(),
            last_surface_selection: None,
            listeners: ListenerSet::default(),
            commands: CommandTable::default(),
            transforms: TransformTable::default(),
            on_error: Box::new(|err| error!(error = %err, "editor update failed")),
            next_id: 1,
            text_content: String::new(),
        };
        editor.register_default_commands();
        editor
    }

    /// Replaces the node registry. Call before any content is created.
    pub fn with_registry(mut self, registry: NodeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn register_node(&mut self, class: NodeClass) -> EditorResult<()> {
        Ok(self.registry.register(class)?)
    }

    /// The last committed state.
    pub fn editor_state(&self) -> &Arc<EditorState> {
        &self.committed
    }

    /// Text content of the committed document.
    pub fn text_content(&self) -> &str {
        &self.text_content
    }

    pub fn handles(&self) -> &HandleMap {
        &self.handles
    }

    pub fn composition_key(&self) -> Option<NodeKey> {
        self.composition
    }

    pub fn has_pending_update(&self) -> bool {
        self.pending.is_some()
    }

    fn next_listener_id(&mut self) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn set_error_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&EditorError) + 'static,
    {
        self.on_error = Box::new(handler);
    }

    // ------------------------------------------------------------------
    // Updates
    // ------------------------------------------------------------------

    pub fn update<F>(&mut self, update: F) -> EditorResult<()>
    where
        F: FnOnce(&mut Transaction<'_>) -> EditorResult<()>,
    {
        self.update_with_options(update, UpdateOptions::default())
    }

    /// Runs `update` in a transaction. The error of a failed update is
    /// returned after the error handler has seen it; queued follow-up
    /// updates report their own failures to the handler only.
    pub fn update_with_options<F>(&mut self, update: F, options: UpdateOptions) -> EditorResult<()>
    where
        F: FnOnce(&mut Transaction<'_>) -> EditorResult<()>,
    {
        let committed = self.run_update(update, &options)?;
        if committed {
            self.flush_queue();
        }
        Ok(())
    }

    /// Commits a batched pending state, if any.
    pub fn flush(&mut self) -> EditorResult<()> {
        if self.pending.is_none() {
            return Ok(());
        }
        if let Err(err) = self.commit() {
            return Err(self.abort(err));
        }
        self.flush_queue();
        Ok(())
    }

    /// Opens (or joins) the pending state, runs `update` and the transform
    /// pipeline, and commits when required. Returns whether it committed.
    fn run_update<F>(&mut self, update: F, options: &UpdateOptions) -> EditorResult<bool>
    where
        F: FnOnce(&mut Transaction<'_>) -> EditorResult<()>,
    {
        if self.pending.is_none() {
            self.composition_at_open = self.composition;
        }
        let committed = &self.committed;
        let pending = self
            .pending
            .get_or_insert_with(|| PendingUpdate::begin(committed, false));
        pending.tags.extend(options.tags.iter().cloned());

        let mut tx = Transaction {
            pending,
            committed: &self.committed,
            registry: &self.registry,
            keys: &mut self.keys,
            composition: &mut self.composition,
            queue: &mut self.queue,
            surface: self.surface.as_deref().map(|s| s as &dyn RenderSurface),
            handles: &self.handles,
        };
        let mut result = update(&mut tx);
        if result.is_ok() && !options.skip_transforms {
            result = apply_transforms(&mut tx, &mut self.transforms, self.config.max_transform_iterations);
        }
        if let Err(err) = result {
            return Err(self.abort(err));
        }

        if options.discrete || !self.config.batch_updates {
            if let Err(err) = self.commit() {
                return Err(self.abort(err));
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Drops every pending change and reports `err`.
    fn abort(&mut self, err: EditorError) -> EditorError {
        warn!(error = %err, "update aborted");
        self.pending = None;
        self.composition = self.composition_at_open;
        self.queue.clear();
        (self.on_error)(&err);
        err
    }

    /// Runs queued updates as discrete updates, oldest first. Updates queued
    /// while flushing run after the ones already waiting.
    fn flush_queue(&mut self) {
        while !self.queue.is_empty() {
            let mut batch = std::mem::take(&mut self.queue);
            while let Some((update, mut options)) = batch.pop() {
                options.discrete = true;
                // Failures have already gone through the error handler.
                let _ = self.run_update(update, &options);
            }
        }
    }

    #[instrument(skip_all, fields(namespace = %self.config.namespace))]
    fn commit(&mut self) -> EditorResult<()> {
        let Some(mut pending) = self.pending.take() else {
            return Ok(());
        };
        let prev = Arc::clone(&self.committed);
        normalize_selection(&mut pending.state);

        let output = self.reconcile(&prev, &pending)?;

        let collected = collect_garbage(&mut pending.state, &mut pending.dirty);
        if let Some(key) = self.composition {
            if collected.contains(&key) || !pending.state.contains(key) {
                self.composition = None;
            }
        }
        for (key, direction) in &output.directions {
            if let Some(slot) = pending.state.nodes.get_mut(key) {
                if let Some(element) = Arc::make_mut(slot).as_element_mut() {
                    element.direction = *direction;
                }
            }
        }

        let PendingUpdate {
            mut state, dirty, tags, ..
        } = pending;
        state.read_only = true;
        let next = Arc::new(state);
        self.committed = Arc::clone(&next);
        debug!(
            nodes = next.len(),
            dirty_leaves = dirty.leaves.len(),
            dirty_elements = dirty.elements.len(),
            collected = collected.len(),
            "committed"
        );

        let ReconcileOutput {
            mutations, text_content, ..
        } = output;
        self.listeners.notify_mutations(&mutations, &mut self.queue);
        let payload = UpdatePayload {
            editor_state: &next,
            prev_editor_state: &prev,
            tags: &tags,
            dirty_leaves: &dirty.leaves,
            dirty_elements: &dirty.elements,
            mutated_nodes: &mutations,
        };
        self.listeners.notify_update(&payload, &mut self.queue);
        if text_content != self.text_content {
            self.text_content = text_content;
            self.listeners.notify_text_content(&self.text_content);
        }

        if !tags.contains(SKIP_SURFACE_SELECTION_TAG) {
            self.sync_surface_selection();
        }
        Ok(())
    }

    /// Reconciles `pending` against the surface. A failed pass is reported
    /// to the error handler, then the surface is reset and the pending state
    /// remounted from scratch.
    fn reconcile(&mut self, prev: &EditorState, pending: &PendingUpdate) -> EditorResult<ReconcileOutput> {
        let Some(surface) = self.surface.as_deref_mut() else {
            return Ok(ReconcileOutput {
                mutations: headless_mutations(prev, &pending.state, &pending.dirty, pending.full_reconcile),
                directions: block_directions(&pending.state, &self.registry, &pending.dirty),
                text_content: pending.state.text_content(NodeKey::ROOT, &self.registry),
            });
        };
        let result = Reconciler {
            prev,
            next: &pending.state,
            registry: &self.registry,
            dirty: &pending.dirty,
            forced: &pending.forced,
            full: pending.full_reconcile,
            surface: &mut *surface,
            handles: &mut self.handles,
            cache: &mut self.cache,
        }
        .run();
        match result {
            Ok(output) => Ok(output),
            Err(err) => {
                warn!(error = %err, "reconciliation failed, remounting");
                (self.on_error)(&err);
                surface.reset();
                self.handles.clear();
                self.cache.clear();
                Reconciler {
                    prev: &EditorState::empty(),
                    next: &pending.state,
                    registry: &self.registry,
                    dirty: &DirtySets::default(),
                    forced: &HashSet::new(),
                    full: true,
                    surface,
                    handles: &mut self.handles,
                    cache: &mut self.cache,
                }
                .run()
            }
        }
    }

    fn sync_surface_selection(&mut self) {
        let Some(surface) = self.surface.as_deref_mut() else {
            return;
        };
        let selection = surface_selection(&self.committed, &self.handles);
        if selection != self.last_surface_selection {
            surface.set_selection(selection);
            self.last_surface_selection = selection;
        }
    }

    /// Runs `read` against the committed state. Any write inside fails with
    /// `StateError::ReadOnly`.
    pub fn read<R, F>(&mut self, read: F) -> R
    where
        F: FnOnce(&mut Transaction<'_>) -> R,
    {
        let mut pending = PendingUpdate::begin(&self.committed, true);
        let mut composition = self.composition;
        let mut queue = UpdateQueue::default();
        let mut tx = Transaction {
            pending: &mut pending,
            committed: &self.committed,
            registry: &self.registry,
            keys: &mut self.keys,
            composition: &mut composition,
            queue: &mut queue,
            surface: self.surface.as_deref().map(|s| s as &dyn RenderSurface),
            handles: &self.handles,
        };
        read(&mut tx)
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    /// Parses a serialized state. Nodes get fresh keys from this editor.
    pub fn parse_editor_state(&mut self, json: &str) -> EditorResult<EditorState> {
        parse_state(json, &self.registry, &mut self.keys)
    }

    /// Replaces the document with `state` and reconciles it in full. A
    /// batched pending state is committed first.
    pub fn set_editor_state(&mut self, state: &EditorState) -> EditorResult<()> {
        self.flush()?;
        self.composition = None;
        self.update_with_options(
            |tx| tx.set_editor_state(state),
            UpdateOptions::discrete().without_transforms(),
        )
    }

    pub fn to_json(&self) -> EditorResult<String> {
        self.committed.to_json(&self.registry)
    }

    // ------------------------------------------------------------------
    // Editable
    // ------------------------------------------------------------------

    pub fn is_editable(&self) -> bool {
        self.editable
    }

    pub fn set_editable(&mut self, editable: bool) {
        if self.editable == editable {
            return;
        }
        self.editable = editable;
        info!(editable, "editable changed");
        self.listeners.notify_editable(editable);
    }

    // ------------------------------------------------------------------
    // Commands, transforms and listeners
    // ------------------------------------------------------------------

    pub fn register_command<P, F>(&mut self, command: Command<P>, priority: CommandPriority, handler: F) -> ListenerId
    where
        P: 'static,
        F: FnMut(&P, &mut Transaction<'_>) -> EditorResult<bool> + 'static,
    {
        let id = self.next_listener_id();
        self.commands.register(command, priority, id, handler);
        id
    }

    pub fn has_command(&self, command: &str) -> bool {
        self.commands.contains(command)
    }

    /// Dispatches `command` inside an update. Returns whether a handler
    /// claimed it. Handlers cannot dispatch further commands themselves.
    pub fn dispatch_command<P: 'static>(&mut self, command: Command<P>, payload: &P) -> EditorResult<bool> {
        if !self.commands.contains(command.name()) {
            debug!(command = command.name(), "no handlers registered");
            return Ok(false);
        }
        let mut commands = std::mem::take(&mut self.commands);
        let mut handled = false;
        let result = self.update(|tx| {
            handled = commands.dispatch(command, payload, tx)?;
            Ok(())
        });
        self.commands = commands;
        result.map(|_| handled)
    }

    /// Registers a transform for every node of `node_type`. Nodes of that
    /// type already in the document are marked dirty so the transform sees
    /// them on the next commit.
    pub fn register_transform<F>(&mut self, node_type: &str, transform: F) -> EditorResult<ListenerId>
    where
        F: FnMut(NodeKey, &mut Transaction<'_>) -> EditorResult<()> + 'static,
    {
        let node_type = self.registry.class(node_type)?.node_type;
        let id = self.next_listener_id();
        self.transforms.register(node_type, id, Box::new(transform));

        let existing: Vec<NodeKey> = self
            .committed
            .keys()
            .filter(|k| !k.is_root())
            .filter(|k| self.committed.get(*k).is_some_and(|n| n.node_type == node_type))
            .collect();
        if !existing.is_empty() {
            self.update(|tx| {
                for key in existing {
                    tx.writable(key)?;
                }
                Ok(())
            })?;
        }
        Ok(id)
    }

    pub fn register_update_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&UpdatePayload<'_>, &mut UpdateQueue) + 'static,
    {
        let id = self.next_listener_id();
        self.listeners.update.push((id, Box::new(listener)));
        id
    }

    pub fn register_mutation_listener<F>(&mut self, node_type: &str, listener: F) -> EditorResult<ListenerId>
    where
        F: FnMut(&BTreeMap<NodeKey, NodeMutation>, &mut UpdateQueue) + 'static,
    {
        let node_type = self.registry.class(node_type)?.node_type;
        let id = self.next_listener_id();
        self.listeners.mutation.push((id, node_type, Box::new(listener)));
        Ok(id)
    }

    pub fn register_text_content_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&str) + 'static,
    {
        let id = self.next_listener_id();
        self.listeners.text_content.push((id, Box::new(listener)));
        id
    }

    pub fn register_editable_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(bool) + 'static,
    {
        let id = self.next_listener_id();
        self.listeners.editable.push((id, Box::new(listener)));
        id
    }

    /// Removes a listener, command handler or transform.
    pub fn unregister(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id) || self.commands.remove(id) || self.transforms.remove(id)
    }

    fn register_default_commands(&mut self) {
        self.register_command(INSERT_TEXT, CommandPriority::Editor, |text, tx| {
            if tx.range_selection().is_none() {
                return Ok(false);
            }
            tx.insert_text(text)?;
            Ok(true)
        });
        self.register_command(DELETE_CHARACTER, CommandPriority::Editor, |backward, tx| {
            if tx.selection().is_none() {
                return Ok(false);
            }
            tx.delete_character(*backward)?;
            Ok(true)
        });
        self.register_command(DELETE_WORD, CommandPriority::Editor, |backward, tx| {
            if tx.range_selection().is_none() {
                return Ok(false);
            }
            tx.delete_word(*backward)?;
            Ok(true)
        });
        self.register_command(DELETE_LINE, CommandPriority::Editor, |backward, tx| {
            if tx.range_selection().is_none() {
                return Ok(false);
            }
            tx.delete_line(*backward)?;
            Ok(true)
        });
        self.register_command(FORMAT_TEXT, CommandPriority::Editor, |format, tx| {
            if tx.range_selection().is_none() {
                return Ok(false);
            }
            tx.format_text(*format)?;
            Ok(true)
        });
        self.register_command(INSERT_PARAGRAPH, CommandPriority::Editor, |_, tx| {
            if tx.range_selection().is_none() {
                return Ok(false);
            }
            tx.insert_paragraph()?;
            Ok(true)
        });
        self.register_command(INSERT_LINE_BREAK, CommandPriority::Editor, |select_start, tx| {
            if tx.range_selection().is_none() {
                return Ok(false);
            }
            tx.insert_line_break(*select_start)?;
            Ok(true)
        });
    }

    // ------------------------------------------------------------------
    // Surface
    // ------------------------------------------------------------------

    /// Attaches a render surface and mounts the committed document on it.
    /// A previously attached surface is returned.
    pub fn set_surface(&mut self, surface: Box<dyn RenderSurface>) -> EditorResult<Option<Box<dyn RenderSurface>>> {
        self.flush()?;
        let previous = self.take_surface();
        let mut surface = surface;
        surface.set_theme(&self.config.theme);
        surface.reset();
        self.surface = Some(surface);
        self.mount()?;
        Ok(previous)
    }

    pub fn take_surface(&mut self) -> Option<Box<dyn RenderSurface>> {
        self.handles.clear();
        self.cache.clear();
        self.last_surface_selection = None;
        self.surface.take()
    }

    pub fn surface(&self) -> Option<&dyn RenderSurface> {
        self.surface.as_deref()
    }

    /// Renders the committed state onto a freshly reset surface.
    fn mount(&mut self) -> EditorResult<()> {
        let Some(surface) = self.surface.as_deref_mut() else {
            return Ok(());
        };
        let output = Reconciler {
            prev: &EditorState::empty(),
            next: &self.committed,
            registry: &self.registry,
            dirty: &DirtySets::default(),
            forced: &HashSet::new(),
            full: true,
            surface,
            handles: &mut self.handles,
            cache: &mut self.cache,
        }
        .run()?;
        info!(nodes = self.committed.len(), "mounted surface");

        if !output.directions.is_empty() {
            let mut state = EditorState::clone(&self.committed);
            for (key, direction) in &output.directions {
                if let Some(slot) = state.nodes.get_mut(key) {
                    if let Some(element) = Arc::make_mut(slot).as_element_mut() {
                        element.direction = *direction;
                    }
                }
            }
            self.committed = Arc::new(state);
        }
        self.listeners.notify_mutations(&output.mutations, &mut self.queue);
        self.text_content = output.text_content;
        self.sync_surface_selection();
        self.flush_queue();
        Ok(())
    }

    /// Resolves a surface position against the committed state.
    pub fn resolve_point(&self, handle: RenderHandle, offset: usize) -> Option<Point> {
        resolve_point(&self.committed, &self.registry, &self.handles, handle, offset)
    }

    /// Turns edits made directly on the surface into a corrective update.
    ///
    /// Character data typed into the composing text node becomes its text.
    /// Every other edit is reverted: foreign render nodes are removed, and
    /// managed nodes whose render nodes were touched are rebuilt.
    #[instrument(skip_all, fields(count = mutations.len()))]
    pub fn handle_surface_mutations(&mut self, mutations: &[SurfaceMutation]) -> EditorResult<()> {
        let Some(surface) = self.surface.as_deref_mut() else {
            return Ok(());
        };
        let mut accepted: Vec<(NodeKey, String)> = Vec::new();
        let mut rebuild: Vec<NodeKey> = Vec::new();

        for mutation in mutations {
            match mutation {
                SurfaceMutation::CharacterData { handle, text } => {
                    let Some(key) = self.handles.key_of(*handle) else {
                        continue;
                    };
                    let composing = self.composition == Some(key);
                    let is_text = self.committed.get(key).is_some_and(|n| n.is_text());
                    if self.editable && composing && is_text {
                        accepted.push((key, text.clone()));
                    } else {
                        rebuild.push(key);
                    }
                }
                SurfaceMutation::ChildList { parent, added, removed } => {
                    for handle in added {
                        if !self.handles.contains_handle(*handle) {
                            debug!(handle = handle.0, "removing foreign render node");
                            surface.remove_child(*parent, *handle);
                            surface.destroy_render_node(*handle);
                        }
                    }
                    if removed.iter().any(|h| self.handles.contains_handle(*h)) {
                        if let Some(key) = self.handles.key_of(*parent) {
                            rebuild.push(key);
                        }
                    }
                }
            }
        }

        if accepted.is_empty() && rebuild.is_empty() {
            return Ok(());
        }
        let options = UpdateOptions::discrete()
            .with_tag(SURFACE_CORRECTION_TAG)
            .with_tag(SKIP_SURFACE_SELECTION_TAG);
        self.update_with_options(
            move |tx| {
                for (key, text) in accepted {
                    if tx.text(key)?.text != text {
                        tx.set_text(key, &text)?;
                    }
                }
                for key in rebuild {
                    if tx.state().is_attached(key) {
                        tx.force_rerender(key)?;
                    }
                }
                Ok(())
            },
            options,
        )
    }
}

impl Default for Editor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Editor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Editor")
            .field("namespace", &self.config.namespace)
            .field("nodes", &self.committed.len())
            .field("pending", &self.pending.is_some())
            .field("editable", &self.editable)
            .field("listeners", &self.listeners)
            .field("commands", &self.commands)
            .field("transforms", &self.transforms)
            .finish()
    }
}

fn surface_point(point: &Point, handles: &HandleMap) -> Option<SurfacePoint> {
    Some(SurfacePoint {
        handle: handles.handle_of(point.key)?,
        offset: point.offset,
    })
}

fn surface_selection(state: &EditorState, handles: &HandleMap) -> Option<SurfaceSelection> {
    match state.selection()? {
        Selection::Range(range) => Some(SurfaceSelection {
            anchor: surface_point(&range.anchor, handles)?,
            focus: surface_point(&range.focus, handles)?,
        }),
        Selection::Node(_) => None,
    }
}

/// Mutated keys of one type, for tests and listeners that only care about
/// one kind of change.
pub fn keys_with(mutated: &MutatedNodes, node_type: &str, mutation: NodeMutation) -> Vec<NodeKey> {
    mutated
        .get(node_type)
        .map(|changes| {
            changes
                .iter()
                .filter(|(_, m)| **m == mutation)
                .map(|(k, _)| *k)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StateError;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn editor_with_text(text: &str) -> (Editor, NodeKey) {
        let mut editor = Editor::new();
        let mut text_key = NodeKey::ROOT;
        editor
            .update(|tx| {
                let paragraph = tx.create_paragraph()?;
                text_key = tx.create_text(text)?;
                tx.append(paragraph, text_key)?;
                tx.append(NodeKey::ROOT, paragraph)?;
                tx.select_text(text_key, text.chars().count(), text.chars().count())
            })
            .unwrap();
        (editor, text_key)
    }

    #[test]
    fn test_commit_updates_text_content() {
        let (editor, _) = editor_with_text("hello");
        assert_eq!(editor.text_content(), "hello");
        assert!(editor.editor_state().is_read_only());
        assert!(!editor.has_pending_update());
    }

    #[test]
    fn test_batched_updates_wait_for_flush() {
        let config = EditorConfig {
            batch_updates: true,
            ..EditorConfig::default()
        };
        let mut editor = Editor::with_config(config);
        editor
            .update(|tx| {
                let paragraph = tx.create_paragraph()?;
                tx.append(NodeKey::ROOT, paragraph)
            })
            .unwrap();
        assert!(editor.has_pending_update());
        assert_eq!(editor.editor_state().len(), 1);

        editor.flush().unwrap();
        assert!(!editor.has_pending_update());
        assert_eq!(editor.editor_state().len(), 2);
    }

    #[test]
    fn test_read_rejects_writes() {
        let (mut editor, key) = editor_with_text("hi");
        let err = editor.read(|tx| tx.set_text(key, "nope")).unwrap_err();
        assert!(matches!(err, EditorError::State(StateError::ReadOnly)));
        let text = editor.read(|tx| tx.text(key).map(|t| t.text.clone())).unwrap();
        assert_eq!(text, "hi");
    }

    #[test]
    fn test_error_handler_sees_abort() {
        let (mut editor, _) = editor_with_text("x");
        let seen = Rc::new(RefCell::new(0));
        let sink = seen.clone();
        editor.set_error_handler(move |_| *sink.borrow_mut() += 1);
        let result = editor.update(|_| Err(EditorError::Update("boom".into())));
        assert!(result.is_err());
        assert_eq!(*seen.borrow(), 1);
    }

    #[test]
    fn test_failed_reconcile_is_reported_and_remounted() {
        let (mut editor, key) = editor_with_text("before");
        let surface = Rc::new(RefCell::new(crate::memory_surface::MemorySurface::new()));
        editor.set_surface(Box::new(surface.clone())).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        editor.set_error_handler(move |err| sink.borrow_mut().push(err.to_string()));

        // Losing the handle map makes the next incremental pass fail.
        editor.handles.clear();
        editor.update(|tx| tx.set_text(key, "after")).unwrap();

        assert_eq!(seen.borrow().len(), 1);
        assert!(seen.borrow()[0].contains("render node"));
        assert_eq!(editor.text_content(), "after");
        let surface = surface.borrow();
        assert_eq!(surface.render_text(surface.root()), "after");
        assert_eq!(surface.len(), editor.editor_state().len());
    }

    #[test]
    fn test_queued_update_runs_after_commit() {
        let (mut editor, key) = editor_with_text("a");
        editor
            .update(|tx| {
                tx.queue_update(move |tx| tx.set_text(key, "queued"), UpdateOptions::default());
                tx.set_text(key, "first")
            })
            .unwrap();
        assert_eq!(editor.text_content(), "queued");
    }

    #[test]
    fn test_editable_listener() {
        let mut editor = Editor::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        editor.register_editable_listener(move |editable| sink.borrow_mut().push(editable));
        editor.set_editable(false);
        editor.set_editable(false);
        editor.set_editable(true);
        assert_eq!(*seen.borrow(), vec![false, true]);
    }

    #[test]
    fn test_resolve_point_without_surface() {
        let (editor, _) = editor_with_text("x");
        assert_eq!(editor.resolve_point(RenderHandle(42), 0), None::<Point>);
    }
}
