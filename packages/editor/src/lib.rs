//! # Quire Editor
//!
//! Rich-text document tree and reconciliation engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ editor: transactions over a keyed node arena│
//! │  - copy-on-write pending state              │
//! │  - transforms run to a fixpoint             │
//! │  - selection-driven editing commands        │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ reconciler: prev state × next state         │
//! │  - keyed child diff, minimal moves          │
//! │  - aggregates cached per key                │
//! │  - garbage collection of detached nodes     │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ render surface: create / update / place     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Committed state is the source of truth**: the surface is a derived
//!    view and edits made on it are corrected by a transaction
//! 2. **Structural sharing**: a transaction clones a node on first write only
//! 3. **Explicit context**: every mutation goes through a [`Transaction`]
//! 4. **All or nothing**: an update either commits fully or leaves the
//!    committed state untouched
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quire_editor::{Editor, NodeKey, INSERT_TEXT};
//!
//! let mut editor = Editor::new();
//! editor.update(|tx| {
//!     let paragraph = tx.create_paragraph()?;
//!     let text = tx.create_text("hello")?;
//!     tx.append(paragraph, text)?;
//!     tx.append(NodeKey::ROOT, paragraph)?;
//!     tx.select_end(text)
//! })?;
//!
//! editor.dispatch_command(INSERT_TEXT, &" world".to_string())?;
//! assert_eq!(editor.text_content(), "hello world");
//! ```

mod commands;
mod config;
mod editor;
mod errors;
mod gc;
mod history;
mod key;
mod listeners;
mod memory_surface;
mod node;
mod reconciler;
mod registry;
pub mod selection;
mod serialize;
mod state;
mod surface;
mod text;
mod transaction;
mod transform;
mod tree;

pub use commands::{
    Command, CommandPriority, DELETE_CHARACTER, DELETE_LINE, DELETE_WORD, FORMAT_TEXT, INSERT_LINE_BREAK,
    INSERT_PARAGRAPH, INSERT_TEXT, REDO, SELECTION_CHANGE, UNDO,
};
pub use config::{EditorConfig, DEFAULT_CONFIG_NAME};
pub use editor::{keys_with, Editor, ErrorHandler, SKIP_SURFACE_SELECTION_TAG, SURFACE_CORRECTION_TAG};
pub use errors::{EditorError, EditorResult, StateError, TreeError};
pub use history::{History, HISTORIC_TAG, HISTORY_MERGE_TAG, HISTORY_PUSH_TAG};
pub use key::NodeKey;
pub use listeners::{
    EditableListener, ListenerId, MutatedNodes, MutationListener, NodeMutation, TextContentListener,
    UpdateListener, UpdatePayload,
};
pub use memory_surface::{MemorySurface, SurfaceOp};
pub use node::{Direction, ElementData, ElementFormat, Node, NodeKind, TextData, TextDetail, TextFormat, TextMode};
pub use registry::{NodeBehavior, NodeClass, NodeFamily, NodeRegistry};
pub use selection::{BaseSelection, Granularity, NodeSelection, Point, PointKind, RangeSelection, Selection};
pub use serialize::{SerializedEditorState, SerializedNode};
pub use state::EditorState;
pub use surface::{HandleMap, RenderHandle, RenderSurface, SurfaceMutation, SurfacePoint, SurfaceSelection};
pub use transaction::{DeferredUpdate, DirtySets, Transaction, UpdateOptions, UpdateQueue};
pub use transform::TransformFn;
