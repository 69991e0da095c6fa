//! In-memory render surface.
//!
//! Keeps a plain tree of render nodes and records every call made on it,
//! which makes it the surface of choice for tests and headless tooling.

use crate::node::{Direction, Node, NodeKind, TextMode};
use crate::registry::{family_of_kind, NodeFamily};
use crate::surface::{RenderHandle, RenderSurface, SurfaceMutation, SurfaceSelection};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceOp {
    Create { handle: RenderHandle, node_type: String },
    Update { handle: RenderHandle },
    Destroy { handle: RenderHandle },
    Insert { parent: RenderHandle, child: RenderHandle, before: Option<RenderHandle> },
    Move { parent: RenderHandle, child: RenderHandle, before: Option<RenderHandle> },
    Remove { parent: RenderHandle, child: RenderHandle },
    Direction { handle: RenderHandle, direction: Option<Direction> },
    Selection(Option<SurfaceSelection>),
}

#[derive(Debug, Clone)]
struct RenderNode {
    node_type: String,
    family: NodeFamily,
    mode: Option<TextMode>,
    text: String,
    parent: Option<RenderHandle>,
    children: Vec<RenderHandle>,
    direction: Option<Direction>,
}

impl RenderNode {
    fn container() -> Self {
        Self {
            node_type: "root".to_string(),
            family: NodeFamily::Root,
            mode: None,
            text: String::new(),
            parent: None,
            children: Vec::new(),
            direction: None,
        }
    }

    fn from_node(node: &Node) -> Self {
        let (text, mode) = match &node.kind {
            NodeKind::Text(data) => (data.text.clone(), Some(data.mode)),
            _ => (node.leaf_text().to_string(), None),
        };
        Self {
            node_type: node.node_type.to_string(),
            family: family_of_kind(node),
            mode,
            text,
            parent: None,
            children: Vec::new(),
            direction: None,
        }
    }
}

#[derive(Debug)]
pub struct MemorySurface {
    root: RenderHandle,
    nodes: HashMap<RenderHandle, RenderNode>,
    next_handle: u64,
    ops: Vec<SurfaceOp>,
    selection: Option<SurfaceSelection>,
    theme: BTreeMap<String, String>,
}

impl MemorySurface {
    pub fn new() -> Self {
        let root = RenderHandle(0);
        let mut nodes = HashMap::new();
        nodes.insert(root, RenderNode::container());
        Self {
            root,
            nodes,
            next_handle: 1,
            ops: Vec::new(),
            selection: None,
            theme: BTreeMap::new(),
        }
    }

    fn allocate(&mut self) -> RenderHandle {
        let handle = RenderHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    /// Every call recorded since creation or the last [`clear_ops`](Self::clear_ops).
    pub fn ops(&self) -> &[SurfaceOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Live render nodes, the root container included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn is_live(&self, handle: RenderHandle) -> bool {
        self.nodes.contains_key(&handle)
    }

    pub fn node_type(&self, handle: RenderHandle) -> Option<&str> {
        self.nodes.get(&handle).map(|n| n.node_type.as_str())
    }

    pub fn text_of(&self, handle: RenderHandle) -> Option<&str> {
        self.nodes.get(&handle).map(|n| n.text.as_str())
    }

    pub fn children(&self, handle: RenderHandle) -> &[RenderHandle] {
        self.nodes
            .get(&handle)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn direction(&self, handle: RenderHandle) -> Option<Direction> {
        self.nodes.get(&handle).and_then(|n| n.direction)
    }

    pub fn selection(&self) -> Option<SurfaceSelection> {
        self.selection
    }

    pub fn theme(&self) -> &BTreeMap<String, String> {
        &self.theme
    }

    /// Concatenated leaf text below `handle`; element children are separated
    /// by a blank line.
    pub fn render_text(&self, handle: RenderHandle) -> String {
        let Some(node) = self.nodes.get(&handle) else {
            return String::new();
        };
        if node.family != NodeFamily::Element && node.family != NodeFamily::Root {
            return node.text.clone();
        }
        let mut out = String::new();
        let count = node.children.len();
        for (i, child) in node.children.iter().enumerate() {
            out.push_str(&self.render_text(*child));
            let is_element = self
                .nodes
                .get(child)
                .is_some_and(|c| c.family == NodeFamily::Element);
            if is_element && node.family == NodeFamily::Root && i + 1 != count {
                out.push_str("\n\n");
            }
        }
        out
    }

    /// Edits a text render node directly, the way a user typing into the
    /// surface would.
    pub fn edit_text(&mut self, handle: RenderHandle, text: &str) -> SurfaceMutation {
        if let Some(node) = self.nodes.get_mut(&handle) {
            node.text = text.to_string();
        }
        SurfaceMutation::CharacterData {
            handle,
            text: text.to_string(),
        }
    }

    /// Inserts a render node the editor does not know about.
    pub fn insert_foreign(&mut self, parent: RenderHandle, node_type: &str) -> (RenderHandle, SurfaceMutation) {
        let handle = self.allocate();
        let mut node = RenderNode::container();
        node.node_type = node_type.to_string();
        node.family = NodeFamily::Element;
        node.parent = Some(parent);
        self.nodes.insert(handle, node);
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.push(handle);
        }
        let mutation = SurfaceMutation::ChildList {
            parent,
            added: vec![handle],
            removed: Vec::new(),
        };
        (handle, mutation)
    }

    /// Unlinks a child behind the editor's back.
    pub fn detach(&mut self, parent: RenderHandle, child: RenderHandle) -> SurfaceMutation {
        self.unlink(parent, child);
        SurfaceMutation::ChildList {
            parent,
            added: Vec::new(),
            removed: vec![child],
        }
    }

    fn unlink(&mut self, parent: RenderHandle, child: RenderHandle) {
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.retain(|c| *c != child);
        }
        if let Some(child_node) = self.nodes.get_mut(&child) {
            if child_node.parent == Some(parent) {
                child_node.parent = None;
            }
        }
    }

    fn place(&mut self, parent: RenderHandle, child: RenderHandle, before: Option<RenderHandle>) {
        if let Some(old_parent) = self.nodes.get(&child).and_then(|n| n.parent) {
            self.unlink(old_parent, child);
        }
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            let index = before
                .and_then(|b| parent_node.children.iter().position(|c| *c == b))
                .unwrap_or(parent_node.children.len());
            parent_node.children.insert(index, child);
        }
        if let Some(child_node) = self.nodes.get_mut(&child) {
            child_node.parent = Some(parent);
        }
    }
}

impl Default for MemorySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSurface for MemorySurface {
    fn root(&self) -> RenderHandle {
        self.root
    }

    fn create_render_node(&mut self, node: &Node) -> RenderHandle {
        let handle = self.allocate();
        self.nodes.insert(handle, RenderNode::from_node(node));
        self.ops.push(SurfaceOp::Create {
            handle,
            node_type: node.node_type.to_string(),
        });
        handle
    }

    fn update_render_node(&mut self, _prev: &Node, next: &Node, handle: RenderHandle) -> bool {
        let fresh = RenderNode::from_node(next);
        let Some(current) = self.nodes.get_mut(&handle) else {
            return true;
        };
        if current.node_type != fresh.node_type || current.family != fresh.family || current.mode != fresh.mode {
            return true;
        }
        current.text = fresh.text;
        self.ops.push(SurfaceOp::Update { handle });
        false
    }

    fn destroy_render_node(&mut self, handle: RenderHandle) {
        if let Some(parent) = self.nodes.get(&handle).and_then(|n| n.parent) {
            self.unlink(parent, handle);
        }
        self.nodes.remove(&handle);
        self.ops.push(SurfaceOp::Destroy { handle });
    }

    fn insert_child(&mut self, parent: RenderHandle, child: RenderHandle, before: Option<RenderHandle>) {
        self.place(parent, child, before);
        self.ops.push(SurfaceOp::Insert { parent, child, before });
    }

    fn move_child(&mut self, parent: RenderHandle, child: RenderHandle, before: Option<RenderHandle>) {
        self.place(parent, child, before);
        self.ops.push(SurfaceOp::Move { parent, child, before });
    }

    fn remove_child(&mut self, parent: RenderHandle, child: RenderHandle) {
        self.unlink(parent, child);
        self.ops.push(SurfaceOp::Remove { parent, child });
    }

    fn set_direction(&mut self, handle: RenderHandle, direction: Option<Direction>) {
        if let Some(node) = self.nodes.get_mut(&handle) {
            node.direction = direction;
        }
        self.ops.push(SurfaceOp::Direction { handle, direction });
    }

    fn set_selection(&mut self, selection: Option<SurfaceSelection>) {
        self.selection = selection;
        self.ops.push(SurfaceOp::Selection(selection));
    }

    fn set_theme(&mut self, theme: &BTreeMap<String, String>) {
        self.theme = theme.clone();
    }

    fn reset(&mut self) {
        self.nodes.clear();
        self.nodes.insert(self.root, RenderNode::container());
        self.selection = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::NodeKey;
    use crate::node::{ElementData, TextData};

    #[test]
    fn test_insert_before_and_move() {
        let mut surface = MemorySurface::new();
        let paragraph = Node::new(NodeKey::from_raw(1), "paragraph", NodeKind::Element(ElementData::default()));
        let text = Node::new(NodeKey::from_raw(2), "text", NodeKind::Text(TextData::new("hi")));

        let p = surface.create_render_node(&paragraph);
        let a = surface.create_render_node(&text);
        let b = surface.create_render_node(&text);
        surface.insert_child(surface.root(), p, None);
        surface.insert_child(p, a, None);
        surface.insert_child(p, b, Some(a));
        assert_eq!(surface.children(p), &[b, a]);

        surface.move_child(p, b, None);
        assert_eq!(surface.children(p), &[a, b]);
        assert_eq!(surface.render_text(surface.root()), "hihi");
    }

    #[test]
    fn test_mode_change_requires_recreate() {
        let mut surface = MemorySurface::new();
        let prev = Node::new(NodeKey::from_raw(2), "text", NodeKind::Text(TextData::new("a")));
        let handle = surface.create_render_node(&prev);

        let mut next = prev.clone();
        if let Some(data) = next.as_text_mut() {
            data.text = "b".into();
        }
        assert!(!surface.update_render_node(&prev, &next, handle));
        assert_eq!(surface.text_of(handle), Some("b"));

        if let Some(data) = next.as_text_mut() {
            data.mode = TextMode::Token;
        }
        assert!(surface.update_render_node(&prev, &next, handle));
    }

    #[test]
    fn test_reset_keeps_root_container() {
        let mut surface = MemorySurface::new();
        let paragraph = Node::new(NodeKey::from_raw(1), "paragraph", NodeKind::Element(ElementData::default()));
        let p = surface.create_render_node(&paragraph);
        surface.insert_child(surface.root(), p, None);
        surface.reset();
        assert!(surface.is_empty());
        assert!(surface.is_live(surface.root()));
        assert!(surface.children(surface.root()).is_empty());
    }
}
