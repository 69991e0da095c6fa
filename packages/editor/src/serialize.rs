//! # State Serialization
//!
//! JSON form of a document: `{ "root": { "type", "version", ...fields,
//! "children": [...] } }`. Built-in fields come from the node kind, custom
//! props are flattened next to them, and registered export/import hooks get
//! the last word. Keys are never serialized; parsing assigns fresh ones.

use crate::errors::{EditorResult, TreeError};
use crate::key::{KeyGenerator, NodeKey};
use crate::node::{Direction, ElementFormat, Node, NodeKind, TextDetail, TextFormat, TextMode};
use crate::registry::NodeRegistry;
use crate::state::EditorState;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNode {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<SerializedNode>>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEditorState {
    pub root: SerializedNode,
}

const ELEMENT_FIELDS: [&str; 3] = ["direction", "format", "indent"];
const TEXT_FIELDS: [&str; 5] = ["text", "format", "style", "mode", "detail"];

fn export_node(state: &EditorState, registry: &NodeRegistry, key: NodeKey) -> Result<SerializedNode, TreeError> {
    let node = state.node(key)?;
    let class = registry.get(node.node_type);
    let mut fields = Map::new();
    for (name, value) in &node.props {
        fields.insert(name.clone(), value.clone());
    }
    match &node.kind {
        NodeKind::Element(element) => {
            fields.insert("direction".into(), json!(element.direction));
            fields.insert("format".into(), json!(element.format));
            fields.insert("indent".into(), json!(element.indent));
        }
        NodeKind::Text(text) => {
            fields.insert("text".into(), json!(text.text));
            fields.insert("format".into(), json!(text.format.bits()));
            fields.insert("style".into(), json!(text.style));
            fields.insert("mode".into(), json!(text.mode));
            fields.insert("detail".into(), json!(text.detail.bits()));
        }
        NodeKind::LineBreak | NodeKind::Decorator => {}
    }
    if let Some(export) = class.and_then(|c| c.export) {
        export(node, &mut fields);
    }
    let children = if node.is_element() {
        let mut out = Vec::with_capacity(node.children_size());
        for child in state.children(key) {
            out.push(export_node(state, registry, child)?);
        }
        Some(out)
    } else {
        None
    };
    Ok(SerializedNode {
        node_type: node.node_type.to_string(),
        version: class.map(|c| c.version).unwrap_or(1),
        fields,
        children,
    })
}

fn field<T: for<'de> Deserialize<'de>>(fields: &Map<String, Value>, name: &str) -> Result<Option<T>, TreeError> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| TreeError::InvalidStructure(format!("field {}: {}", name, e))),
    }
}

/// Applies the built-in fields of `serialized` onto `node` and stores the
/// rest as props.
fn apply_fields(serialized: &SerializedNode, node: &mut Node) -> Result<(), TreeError> {
    let fields = &serialized.fields;
    let known: &[&str] = match &mut node.kind {
        NodeKind::Element(element) => {
            element.direction = field::<Direction>(fields, "direction")?;
            element.format = field::<ElementFormat>(fields, "format")?.unwrap_or_default();
            element.indent = field::<u32>(fields, "indent")?.unwrap_or(0);
            &ELEMENT_FIELDS
        }
        NodeKind::Text(text) => {
            if let Some(value) = field::<String>(fields, "text")? {
                text.text = value;
            }
            if let Some(bits) = field::<u32>(fields, "format")? {
                text.format = TextFormat::from_bits_truncate(bits);
            }
            if let Some(style) = field::<String>(fields, "style")? {
                text.style = style;
            }
            if let Some(mode) = field::<TextMode>(fields, "mode")? {
                text.mode = mode;
            }
            if let Some(bits) = field::<u8>(fields, "detail")? {
                text.detail = TextDetail::from_bits_truncate(bits);
            }
            &TEXT_FIELDS
        }
        NodeKind::LineBreak | NodeKind::Decorator => &[],
    };
    for (name, value) in fields {
        if !known.contains(&name.as_str()) {
            node.props.insert(name.clone(), value.clone());
        }
    }
    Ok(())
}

fn import_node(
    state: &mut EditorState,
    registry: &NodeRegistry,
    keys: &mut KeyGenerator,
    serialized: &SerializedNode,
    parent: NodeKey,
) -> Result<NodeKey, TreeError> {
    let class = registry.class(&serialized.node_type)?;
    if class.node_type == "root" {
        return Err(TreeError::RootOperation("import"));
    }
    let key = keys.next_key();
    let mut node = Node::new(key, class.node_type, (class.create)());
    apply_fields(serialized, &mut node)?;
    if let Some(import) = class.import {
        import(&serialized.fields, &mut node)?;
    }
    node.parent = Some(parent);
    let is_element = node.is_element();
    state.nodes.insert(key, Arc::new(node));

    match (&serialized.children, is_element) {
        (Some(children), true) => import_children(state, registry, keys, children, key)?,
        (Some(children), false) if !children.is_empty() => {
            return Err(TreeError::InvalidStructure(format!(
                "{} node cannot have children",
                serialized.node_type
            )));
        }
        _ => {}
    }
    Ok(key)
}

fn import_children(
    state: &mut EditorState,
    registry: &NodeRegistry,
    keys: &mut KeyGenerator,
    children: &[SerializedNode],
    parent: NodeKey,
) -> Result<(), TreeError> {
    let mut imported = Vec::with_capacity(children.len());
    for child in children {
        imported.push(import_node(state, registry, keys, child, parent)?);
    }
    for (i, key) in imported.iter().enumerate() {
        let prev = i.checked_sub(1).map(|p| imported[p]);
        let next = imported.get(i + 1).copied();
        if let Some(slot) = state.nodes.get_mut(key) {
            let node = Arc::make_mut(slot);
            node.prev = prev;
            node.next = next;
        }
    }
    let slot = state.nodes.get_mut(&parent).ok_or(TreeError::NodeNotFound(parent))?;
    let element = Arc::make_mut(slot)
        .as_element_mut()
        .ok_or(TreeError::NotAnElement(parent))?;
    element.first = imported.first().copied();
    element.last = imported.last().copied();
    element.size = imported.len();
    Ok(())
}

impl EditorState {
    pub fn to_serialized(&self, registry: &NodeRegistry) -> Result<SerializedEditorState, TreeError> {
        Ok(SerializedEditorState {
            root: export_node(self, registry, NodeKey::ROOT)?,
        })
    }

    pub fn to_json(&self, registry: &NodeRegistry) -> EditorResult<String> {
        Ok(serde_json::to_string(&self.to_serialized(registry)?)?)
    }

    pub fn to_json_pretty(&self, registry: &NodeRegistry) -> EditorResult<String> {
        Ok(serde_json::to_string_pretty(&self.to_serialized(registry)?)?)
    }
}

/// Builds a detached state from its serialized form. Every node but the root
/// gets a fresh key from `keys`.
pub(crate) fn build_state(
    serialized: &SerializedEditorState,
    registry: &NodeRegistry,
    keys: &mut KeyGenerator,
) -> EditorResult<EditorState> {
    let root = &serialized.root;
    if root.node_type != "root" {
        return Err(TreeError::InvalidStructure(format!("top-level node has type {}", root.node_type)).into());
    }
    let mut state = EditorState::empty();
    if let Some(slot) = state.nodes.get_mut(&NodeKey::ROOT) {
        apply_fields(root, Arc::make_mut(slot))?;
    }
    if let Some(children) = &root.children {
        import_children(&mut state, registry, keys, children, NodeKey::ROOT)?;
    }
    state.check_integrity()?;
    Ok(state)
}

pub(crate) fn parse_state(json: &str, registry: &NodeRegistry, keys: &mut KeyGenerator) -> EditorResult<EditorState> {
    let serialized: SerializedEditorState = serde_json::from_str(json)?;
    build_state(&serialized, registry, keys)
}
