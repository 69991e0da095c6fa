//! # Render Surface
//!
//! The contract between the reconciler and whatever displays the document.
//! The surface owns its render nodes and hands back opaque [`RenderHandle`]s;
//! the editor keeps the key↔handle mapping in a [`HandleMap`].
//!
//! Edits made to the surface from outside (typing straight into a text
//! node, a foreign node inserted by an extension) are reported back as
//! [`SurfaceMutation`]s and turned into a corrective transaction.

use crate::key::NodeKey;
use crate::node::{Direction, Node};
use crate::selection::{Granularity, Point};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RenderHandle(pub u64);

/// A position in surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfacePoint {
    pub handle: RenderHandle,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceSelection {
    pub anchor: SurfacePoint,
    pub focus: SurfacePoint,
}

/// An edit observed on the surface that did not come from the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceMutation {
    CharacterData {
        handle: RenderHandle,
        text: String,
    },
    ChildList {
        parent: RenderHandle,
        added: Vec<RenderHandle>,
        removed: Vec<RenderHandle>,
    },
}

pub trait RenderSurface {
    /// Handle of the container the root's children are placed in.
    fn root(&self) -> RenderHandle;

    fn create_render_node(&mut self, node: &Node) -> RenderHandle;

    /// Brings `handle` in line with `next`. Returns `true` when the render
    /// node cannot be updated in place and has to be recreated.
    fn update_render_node(&mut self, prev: &Node, next: &Node, handle: RenderHandle) -> bool;

    fn destroy_render_node(&mut self, handle: RenderHandle);

    /// Places `child` under `parent` before `before`, or last.
    fn insert_child(&mut self, parent: RenderHandle, child: RenderHandle, before: Option<RenderHandle>);

    /// Repositions an already placed child.
    fn move_child(&mut self, parent: RenderHandle, child: RenderHandle, before: Option<RenderHandle>) {
        self.insert_child(parent, child, before);
    }

    /// Removes `child` from `parent`. Must tolerate a child that is no
    /// longer there.
    fn remove_child(&mut self, parent: RenderHandle, child: RenderHandle);

    fn set_direction(&mut self, _handle: RenderHandle, _direction: Option<Direction>) {}

    fn set_selection(&mut self, _selection: Option<SurfaceSelection>) {}

    fn set_theme(&mut self, _theme: &BTreeMap<String, String>) {}

    /// Drops every render node except the root container.
    fn reset(&mut self);

    /// Layout-aware caret movement. `None` leaves it to the editor's model.
    fn extend_point(&self, _focus: Point, _backward: bool, _granularity: Granularity) -> Option<Point> {
        None
    }
}

/// Lets the caller keep a handle on a surface it gave to the editor.
impl<S: RenderSurface> RenderSurface for Rc<RefCell<S>> {
    fn root(&self) -> RenderHandle {
        self.borrow().root()
    }

    fn create_render_node(&mut self, node: &Node) -> RenderHandle {
        self.borrow_mut().create_render_node(node)
    }

    fn update_render_node(&mut self, prev: &Node, next: &Node, handle: RenderHandle) -> bool {
        self.borrow_mut().update_render_node(prev, next, handle)
    }

    fn destroy_render_node(&mut self, handle: RenderHandle) {
        self.borrow_mut().destroy_render_node(handle)
    }

    fn insert_child(&mut self, parent: RenderHandle, child: RenderHandle, before: Option<RenderHandle>) {
        self.borrow_mut().insert_child(parent, child, before)
    }

    fn move_child(&mut self, parent: RenderHandle, child: RenderHandle, before: Option<RenderHandle>) {
        self.borrow_mut().move_child(parent, child, before)
    }

    fn remove_child(&mut self, parent: RenderHandle, child: RenderHandle) {
        self.borrow_mut().remove_child(parent, child)
    }

    fn set_direction(&mut self, handle: RenderHandle, direction: Option<Direction>) {
        self.borrow_mut().set_direction(handle, direction)
    }

    fn set_selection(&mut self, selection: Option<SurfaceSelection>) {
        self.borrow_mut().set_selection(selection)
    }

    fn set_theme(&mut self, theme: &BTreeMap<String, String>) {
        self.borrow_mut().set_theme(theme)
    }

    fn reset(&mut self) {
        self.borrow_mut().reset()
    }

    fn extend_point(&self, focus: Point, backward: bool, granularity: Granularity) -> Option<Point> {
        self.borrow().extend_point(focus, backward, granularity)
    }
}

/// Bidirectional node key ↔ render handle map.
#[derive(Debug, Clone, Default)]
pub struct HandleMap {
    by_key: HashMap<NodeKey, RenderHandle>,
    by_handle: HashMap<RenderHandle, NodeKey>,
}

impl HandleMap {
    pub fn insert(&mut self, key: NodeKey, handle: RenderHandle) {
        if let Some(old) = self.by_key.insert(key, handle) {
            if old != handle {
                self.by_handle.remove(&old);
            }
        }
        self.by_handle.insert(handle, key);
    }

    pub fn handle_of(&self, key: NodeKey) -> Option<RenderHandle> {
        self.by_key.get(&key).copied()
    }

    pub fn key_of(&self, handle: RenderHandle) -> Option<NodeKey> {
        self.by_handle.get(&handle).copied()
    }

    pub fn contains_handle(&self, handle: RenderHandle) -> bool {
        self.by_handle.contains_key(&handle)
    }

    /// Removes the mapping for `key` only while it still points at `handle`.
    pub(crate) fn forget(&mut self, key: NodeKey, handle: RenderHandle) {
        if self.by_key.get(&key) == Some(&handle) {
            self.by_key.remove(&key);
        }
        if self.by_handle.get(&handle) == Some(&key) {
            self.by_handle.remove(&handle);
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_key.clear();
        self.by_handle.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeKey, RenderHandle)> + '_ {
        self.by_key.iter().map(|(k, h)| (*k, *h))
    }
}
