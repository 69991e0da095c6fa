//! # Node Registry
//!
//! Per-type table of plain functions and behavior flags. The core never
//! branches on concrete type names; it asks the registry instead.

use crate::errors::{EditorResult, TreeError};
use crate::node::{ElementData, Node, NodeKind, TextData, TextDetail};
use crate::transaction::Transaction;
use crate::key::NodeKey;
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeFamily {
    Root,
    Element,
    Text,
    LineBreak,
    Decorator,
}

/// Capabilities consulted by the selection engine and the transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeBehavior {
    pub inline: bool,
    pub can_be_empty: bool,
    pub can_insert_text_before: bool,
    pub can_insert_text_after: bool,
    pub can_indent: bool,
    /// Content is literal text (code blocks); pasted structure is flattened.
    pub literal_text: bool,
    pub isolated: bool,
    pub keyboard_selectable: bool,
}

impl NodeBehavior {
    pub const fn for_family(family: NodeFamily) -> Self {
        match family {
            NodeFamily::Root => Self {
                inline: false,
                can_be_empty: false,
                can_insert_text_before: true,
                can_insert_text_after: true,
                can_indent: false,
                literal_text: false,
                isolated: false,
                keyboard_selectable: false,
            },
            NodeFamily::Element => Self {
                inline: false,
                can_be_empty: true,
                can_insert_text_before: true,
                can_insert_text_after: true,
                can_indent: true,
                literal_text: false,
                isolated: false,
                keyboard_selectable: false,
            },
            NodeFamily::Text | NodeFamily::LineBreak => Self {
                inline: true,
                can_be_empty: true,
                can_insert_text_before: true,
                can_insert_text_after: true,
                can_indent: false,
                literal_text: false,
                isolated: false,
                keyboard_selectable: false,
            },
            NodeFamily::Decorator => Self {
                inline: true,
                can_be_empty: true,
                can_insert_text_before: true,
                can_insert_text_after: true,
                can_indent: false,
                literal_text: false,
                isolated: false,
                keyboard_selectable: true,
            },
        }
    }
}

pub type CreateFn = fn() -> NodeKind;
pub type CloneFn = fn(&Node) -> Node;
pub type ExportFn = fn(&Node, &mut Map<String, Value>);
pub type ImportFn = fn(&Map<String, Value>, &mut Node) -> Result<(), TreeError>;
/// Creates the block that follows `key` when a paragraph break is inserted.
/// `None` means the type has no sibling block; a line break is used instead.
pub type InsertNewAfterFn = fn(&mut Transaction<'_>, NodeKey) -> EditorResult<Option<NodeKey>>;
/// Backward deletion at the very start of the element. Returns true when handled.
pub type CollapseAtStartFn = fn(&mut Transaction<'_>, NodeKey) -> EditorResult<bool>;

#[derive(Clone)]
pub struct NodeClass {
    pub node_type: &'static str,
    pub family: NodeFamily,
    pub version: u32,
    pub behavior: NodeBehavior,
    pub create: CreateFn,
    pub clone: CloneFn,
    pub export: Option<ExportFn>,
    pub import: Option<ImportFn>,
    pub insert_new_after: Option<InsertNewAfterFn>,
    pub collapse_at_start: Option<CollapseAtStartFn>,
}

impl std::fmt::Debug for NodeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeClass")
            .field("node_type", &self.node_type)
            .field("family", &self.family)
            .field("version", &self.version)
            .field("behavior", &self.behavior)
            .finish()
    }
}

fn create_element() -> NodeKind {
    NodeKind::Element(ElementData::default())
}

fn create_text() -> NodeKind {
    NodeKind::Text(TextData::default())
}

fn create_line_break() -> NodeKind {
    NodeKind::LineBreak
}

fn create_decorator() -> NodeKind {
    NodeKind::Decorator
}

fn create_tab() -> NodeKind {
    let mut data = TextData::new("\t");
    data.detail = TextDetail::UNMERGEABLE;
    NodeKind::Text(data)
}

fn clone_node(node: &Node) -> Node {
    node.clone()
}

fn paragraph_after(tx: &mut Transaction<'_>, key: NodeKey) -> EditorResult<Option<NodeKey>> {
    let direction = tx.node(key)?.as_element().and_then(|e| e.direction);
    let paragraph = tx.create_paragraph()?;
    tx.set_direction(paragraph, direction)?;
    tx.insert_after(key, paragraph)?;
    Ok(Some(paragraph))
}

impl NodeClass {
    pub fn new(node_type: &'static str, family: NodeFamily) -> Self {
        let create: CreateFn = match family {
            NodeFamily::Root | NodeFamily::Element => create_element,
            NodeFamily::Text => create_text,
            NodeFamily::LineBreak => create_line_break,
            NodeFamily::Decorator => create_decorator,
        };
        Self {
            node_type,
            family,
            version: 1,
            behavior: NodeBehavior::for_family(family),
            create,
            clone: clone_node,
            export: None,
            import: None,
            insert_new_after: None,
            collapse_at_start: None,
        }
    }

    pub fn element(node_type: &'static str) -> Self {
        Self::new(node_type, NodeFamily::Element)
    }

    pub fn text(node_type: &'static str) -> Self {
        Self::new(node_type, NodeFamily::Text)
    }

    pub fn decorator(node_type: &'static str) -> Self {
        Self::new(node_type, NodeFamily::Decorator)
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_behavior(mut self, behavior: NodeBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn inline(mut self, inline: bool) -> Self {
        self.behavior.inline = inline;
        self
    }

    pub fn with_create(mut self, create: CreateFn) -> Self {
        self.create = create;
        self
    }

    pub fn with_clone(mut self, clone: CloneFn) -> Self {
        self.clone = clone;
        self
    }

    pub fn with_export(mut self, export: ExportFn) -> Self {
        self.export = Some(export);
        self
    }

    pub fn with_import(mut self, import: ImportFn) -> Self {
        self.import = Some(import);
        self
    }

    pub fn with_insert_new_after(mut self, f: InsertNewAfterFn) -> Self {
        self.insert_new_after = Some(f);
        self
    }

    pub fn with_collapse_at_start(mut self, f: CollapseAtStartFn) -> Self {
        self.collapse_at_start = Some(f);
        self
    }
}

#[derive(Debug, Clone)]
pub struct NodeRegistry {
    classes: HashMap<&'static str, NodeClass>,
}

impl NodeRegistry {
    /// An empty registry holding only the root type.
    pub fn new() -> Self {
        let mut classes = HashMap::new();
        classes.insert("root", NodeClass::new("root", NodeFamily::Root));
        Self { classes }
    }

    /// Root, paragraph, text, line break and tab.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins = [
            NodeClass::element("paragraph").with_insert_new_after(paragraph_after),
            NodeClass::text("text"),
            NodeClass::new("linebreak", NodeFamily::LineBreak),
            NodeClass::text("tab")
                .with_create(create_tab)
                .with_behavior(NodeBehavior {
                    can_insert_text_before: false,
                    can_insert_text_after: false,
                    ..NodeBehavior::for_family(NodeFamily::Text)
                }),
        ];
        for class in builtins {
            registry.classes.insert(class.node_type, class);
        }
        registry
    }

    /// Registers a type. Re-registering a name replaces the previous class.
    pub fn register(&mut self, class: NodeClass) -> Result<(), TreeError> {
        if class.node_type == "root" {
            return Err(TreeError::RootOperation("register"));
        }
        if class.family == NodeFamily::Root {
            return Err(TreeError::InvalidStructure(format!(
                "type {} cannot use the root family",
                class.node_type
            )));
        }
        self.classes.insert(class.node_type, class);
        Ok(())
    }

    pub fn get(&self, node_type: &str) -> Option<&NodeClass> {
        self.classes.get(node_type)
    }

    pub fn class(&self, node_type: &str) -> Result<&NodeClass, TreeError> {
        self.get(node_type)
            .ok_or_else(|| TreeError::UnknownNodeType(node_type.to_string()))
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.classes.contains_key(node_type)
    }

    /// Behavior for a type, falling back to the family defaults implied by
    /// the node kind when the type is unknown.
    pub fn behavior(&self, node: &Node) -> NodeBehavior {
        match self.get(node.node_type) {
            Some(class) => class.behavior,
            None => NodeBehavior::for_family(family_of_kind(node)),
        }
    }

    pub fn types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.classes.keys().copied()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

pub(crate) fn family_of_kind(node: &Node) -> NodeFamily {
    match node.kind {
        NodeKind::Element(_) if node.is_root() => NodeFamily::Root,
        NodeKind::Element(_) => NodeFamily::Element,
        NodeKind::Text(_) => NodeFamily::Text,
        NodeKind::LineBreak => NodeFamily::LineBreak,
        NodeKind::Decorator => NodeFamily::Decorator,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = NodeRegistry::with_builtins();
        for name in ["root", "paragraph", "text", "linebreak", "tab"] {
            assert!(registry.contains(name), "missing {}", name);
        }
        assert!(registry.class("heading").is_err());
    }

    #[test]
    fn test_tab_forbids_adjacent_insertion() {
        let registry = NodeRegistry::with_builtins();
        let tab = registry.class("tab").unwrap();
        assert!(!tab.behavior.can_insert_text_before);
        assert!(!tab.behavior.can_insert_text_after);
        match (tab.create)() {
            NodeKind::Text(data) => {
                assert_eq!(data.text, "\t");
                assert!(!data.is_simple());
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_register_rejects_root() {
        let mut registry = NodeRegistry::new();
        let result = registry.register(NodeClass::element("root"));
        assert_eq!(result, Err(TreeError::RootOperation("register")));

        registry.register(NodeClass::element("quote")).unwrap();
        assert!(!registry.class("quote").unwrap().behavior.inline);
    }
}
