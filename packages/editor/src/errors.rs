//! Error types for the editor

use crate::key::NodeKey;
use thiserror::Error;

/// Raised when a write is attempted against a snapshot that cannot be written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Editor state is read-only")]
    ReadOnly,
}

/// Structural failures inside the node tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeKey),

    #[error("Node {0} has no parent")]
    ParentNotFound(NodeKey),

    #[error("Node {0} is not an element")]
    NotAnElement(NodeKey),

    #[error("Node {0} is not a text node")]
    NotText(NodeKey),

    #[error("Invalid structure: {0}")]
    InvalidStructure(String),

    #[error("Cannot insert a node into its own subtree")]
    CycleDetected,

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Offset {offset} out of range for node {key} (size {size})")]
    OffsetOutOfRange {
        key: NodeKey,
        offset: usize,
        size: usize,
    },

    #[error("Operation not permitted on the root node: {0}")]
    RootOperation(&'static str),
}

#[derive(Error, Debug)]
pub enum EditorError {
    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("Transforms did not settle after {iterations} iterations")]
    InfiniteTransform { iterations: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Update aborted: {0}")]
    Update(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<String> for EditorError {
    fn from(s: String) -> Self {
        EditorError::Update(s)
    }
}

impl From<&str> for EditorError {
    fn from(s: &str) -> Self {
        EditorError::Update(s.to_string())
    }
}

pub type EditorResult<T> = Result<T, EditorError>;
