//! # Node Model
//!
//! Nodes live in a flat map keyed by [`NodeKey`]. Every relationship (parent,
//! siblings, first/last child) is a key reference, so replacing the value
//! stored for one key never invalidates another.
//!
//! A node is one of four kinds:
//!
//! - **Element**: has children, alignment, indent and a computed direction
//! - **Text**: a run of characters sharing format flags, inline style and mode
//! - **LineBreak**: a hard break inside a block
//! - **Decorator**: an opaque leaf rendered entirely by the surface
//!
//! The root is an element with the fixed key [`NodeKey::ROOT`].

use crate::key::NodeKey;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

bitflags! {
    /// Inline formatting applied to a text run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextFormat: u32 {
        const BOLD = 1;
        const ITALIC = 1 << 1;
        const STRIKETHROUGH = 1 << 2;
        const UNDERLINE = 1 << 3;
        const CODE = 1 << 4;
        const SUBSCRIPT = 1 << 5;
        const SUPERSCRIPT = 1 << 6;
        const HIGHLIGHT = 1 << 7;
    }
}

impl TextFormat {
    /// Toggles `flag` on `self`. When `align_with` is given and already agrees
    /// with `self` on `flag`, the format is returned unchanged so that a
    /// multi-node toggle lands every node in the same state.
    pub fn toggled(self, flag: TextFormat, align_with: Option<TextFormat>) -> TextFormat {
        if let Some(align) = align_with {
            if self.intersection(flag) == align.intersection(flag) {
                return self;
            }
        }
        let mut next = self ^ flag;
        if flag.contains(TextFormat::SUBSCRIPT) {
            next.remove(TextFormat::SUPERSCRIPT);
        } else if flag.contains(TextFormat::SUPERSCRIPT) {
            next.remove(TextFormat::SUBSCRIPT);
        }
        next
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextDetail: u8 {
        /// Excluded from direction detection.
        const DIRECTIONLESS = 1;
        /// Never merged with adjacent text during normalization.
        const UNMERGEABLE = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextMode {
    #[default]
    Normal,
    /// Edited only as a whole.
    Token,
    /// Deleted by whitespace-delimited segment.
    Segmented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ltr,
    Rtl,
}

impl Direction {
    /// Direction of the first strongly-directional character in `text`.
    pub fn detect(text: &str) -> Option<Direction> {
        text.chars().find_map(strong_direction)
    }
}

fn strong_direction(c: char) -> Option<Direction> {
    let cp = c as u32;
    match cp {
        0x0591..=0x07FF | 0xFB1D..=0xFDFD | 0xFE70..=0xFEFC => Some(Direction::Rtl),
        0x41..=0x5A
        | 0x61..=0x7A
        | 0xC0..=0xD6
        | 0xD8..=0xF6
        | 0xF8..=0x02B8
        | 0x0300..=0x0590
        | 0x0800..=0x1FFF
        | 0x200E
        | 0x2C00..=0xFB1C
        | 0xFE00..=0xFE6F
        | 0xFEFD..=0xFFFF => Some(Direction::Ltr),
        _ => None,
    }
}

/// Block alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementFormat {
    #[default]
    #[serde(rename = "")]
    Unset,
    Left,
    Center,
    Right,
    Justify,
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ElementData {
    pub first: Option<NodeKey>,
    pub last: Option<NodeKey>,
    pub size: usize,
    pub format: ElementFormat,
    pub indent: u32,
    pub direction: Option<Direction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextData {
    pub text: String,
    pub format: TextFormat,
    pub style: String,
    pub mode: TextMode,
    pub detail: TextDetail,
}

impl TextData {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Length in chars. All offsets into text are char offsets.
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Token and segmented runs are never edited character by character.
    pub fn is_token_or_segmented(&self) -> bool {
        self.mode != TextMode::Normal
    }

    /// Normal-mode, mergeable text.
    pub fn is_simple(&self) -> bool {
        self.mode == TextMode::Normal && !self.detail.contains(TextDetail::UNMERGEABLE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element(ElementData),
    Text(TextData),
    LineBreak,
    Decorator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub key: NodeKey,
    pub node_type: &'static str,
    pub parent: Option<NodeKey>,
    pub prev: Option<NodeKey>,
    pub next: Option<NodeKey>,
    pub kind: NodeKind,
    /// Type-specific fields that the core does not interpret.
    pub props: BTreeMap<String, Value>,
}

impl Node {
    pub fn new(key: NodeKey, node_type: &'static str, kind: NodeKind) -> Self {
        Self {
            key,
            node_type,
            parent: None,
            prev: None,
            next: None,
            kind,
            props: BTreeMap::new(),
        }
    }

    pub(crate) fn root() -> Self {
        Node::new(NodeKey::ROOT, "root", NodeKind::Element(ElementData::default()))
    }

    pub fn is_root(&self) -> bool {
        self.key.is_root()
    }

    pub fn is_element(&self) -> bool {
        matches!(self.kind, NodeKind::Element(_))
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind, NodeKind::Text(_))
    }

    pub fn is_line_break(&self) -> bool {
        matches!(self.kind, NodeKind::LineBreak)
    }

    pub fn is_decorator(&self) -> bool {
        matches!(self.kind, NodeKind::Decorator)
    }

    pub fn as_element(&self) -> Option<&ElementData> {
        match &self.kind {
            NodeKind::Element(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut ElementData> {
        match &mut self.kind {
            NodeKind::Element(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&TextData> {
        match &self.kind {
            NodeKind::Text(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_text_mut(&mut self) -> Option<&mut TextData> {
        match &mut self.kind {
            NodeKind::Text(data) => Some(data),
            _ => None,
        }
    }

    pub fn children_size(&self) -> usize {
        self.as_element().map(|e| e.size).unwrap_or(0)
    }

    /// Own text of a leaf. Elements report their content through the state,
    /// which can walk children.
    pub fn leaf_text(&self) -> &str {
        match &self.kind {
            NodeKind::Text(data) => &data.text,
            NodeKind::LineBreak => "\n",
            _ => "",
        }
    }

    /// Size used for text-point offsets and caret movement.
    pub fn leaf_size(&self) -> usize {
        match &self.kind {
            NodeKind::Text(data) => data.len(),
            NodeKind::LineBreak => 1,
            _ => 0,
        }
    }
}

/// Byte index of the `char_offset`-th char in `text`, clamped to the end.
pub fn byte_offset(text: &str, char_offset: usize) -> usize {
    text.char_indices()
        .nth(char_offset)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}
