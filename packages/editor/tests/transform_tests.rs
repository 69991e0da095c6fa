//! Transforms, text normalization and garbage collection

use quire_editor::{Editor, EditorConfig, EditorError, NodeKey, TextFormat};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

fn paragraph_with(editor: &mut Editor, content: &str) -> (NodeKey, NodeKey) {
    let mut keys = (NodeKey::ROOT, NodeKey::ROOT);
    editor
        .update(|tx| {
            let paragraph = tx.create_paragraph()?;
            let text = tx.create_text(content)?;
            tx.append(paragraph, text)?;
            tx.append(NodeKey::ROOT, paragraph)?;
            keys = (paragraph, text);
            Ok(())
        })
        .unwrap();
    keys
}

fn uppercase(editor: &mut Editor) {
    editor
        .register_transform("text", |key, tx| {
            let upper = tx.text(key)?.text.to_uppercase();
            if tx.text(key)?.text != upper {
                tx.set_text(key, &upper)?;
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_transform_rewrites_new_text() {
    let mut editor = Editor::new();
    uppercase(&mut editor);
    paragraph_with(&mut editor, "shout");
    assert_eq!(editor.text_content(), "SHOUT");
}

#[test]
fn test_registering_transform_visits_existing_nodes() {
    let mut editor = Editor::new();
    paragraph_with(&mut editor, "quiet");
    assert_eq!(editor.text_content(), "quiet");

    uppercase(&mut editor);
    assert_eq!(editor.text_content(), "QUIET");
}

#[test]
fn test_unregistered_transform_stops_running() {
    let mut editor = Editor::new();
    let runs = Rc::new(Cell::new(0));
    let counter = runs.clone();
    let id = editor
        .register_transform("text", move |_, _| {
            counter.set(counter.get() + 1);
            Ok(())
        })
        .unwrap();
    let (_, text) = paragraph_with(&mut editor, "a");
    let after_build = runs.get();
    assert!(after_build > 0);

    assert!(editor.unregister(id));
    editor.update(|tx| tx.set_text(text, "b")).unwrap();
    assert_eq!(runs.get(), after_build);
}

#[test]
fn test_transform_loop_is_bounded() {
    let config = EditorConfig {
        max_transform_iterations: 5,
        ..EditorConfig::default()
    };
    let mut editor = Editor::with_config(config);
    editor
        .register_transform("text", |key, tx| {
            let grown = format!("{}x", tx.text(key)?.text);
            tx.set_text(key, &grown)
        })
        .unwrap();
    let before = Arc::clone(editor.editor_state());

    let result = editor.update(|tx| {
        let paragraph = tx.create_paragraph()?;
        let text = tx.create_text("seed")?;
        tx.append(paragraph, text)?;
        tx.append(NodeKey::ROOT, paragraph)
    });

    assert!(matches!(result, Err(EditorError::InfiniteTransform { iterations: 5 })));
    assert!(Arc::ptr_eq(&before, editor.editor_state()));
    assert_eq!(editor.text_content(), "");
}

#[test]
fn test_element_transform_needs_direct_write() {
    let mut editor = Editor::new();
    let runs = Rc::new(Cell::new(0));
    let counter = runs.clone();
    editor
        .register_transform("paragraph", move |_, _| {
            counter.set(counter.get() + 1);
            Ok(())
        })
        .unwrap();

    let (paragraph, text) = paragraph_with(&mut editor, "body");
    assert_eq!(runs.get(), 1);

    editor.update(|tx| tx.set_text(text, "edited")).unwrap();
    assert_eq!(runs.get(), 1);

    editor.update(|tx| tx.set_indent(paragraph, 1)).unwrap();
    assert_eq!(runs.get(), 2);
}

#[test]
fn test_adjacent_text_merges() {
    let mut editor = Editor::new();
    let mut keys = (NodeKey::ROOT, NodeKey::ROOT);
    editor
        .update(|tx| {
            let paragraph = tx.create_paragraph()?;
            let left = tx.create_text("ab")?;
            let right = tx.create_text("cd")?;
            tx.append_all(paragraph, &[left, right])?;
            tx.append(NodeKey::ROOT, paragraph)?;
            keys = (paragraph, left);
            Ok(())
        })
        .unwrap();

    let (paragraph, left) = keys;
    let state = editor.editor_state();
    assert_eq!(state.children(paragraph), vec![left]);
    assert_eq!(state.get(left).and_then(|n| n.as_text()).map(|t| t.text.as_str()), Some("abcd"));
}

#[test]
fn test_differently_formatted_text_stays_split() {
    let mut editor = Editor::new();
    let mut paragraph = NodeKey::ROOT;
    editor
        .update(|tx| {
            paragraph = tx.create_paragraph()?;
            let plain = tx.create_text("plain")?;
            let bold = tx.create_text("bold")?;
            tx.set_format(bold, TextFormat::BOLD)?;
            tx.append_all(paragraph, &[plain, bold])?;
            tx.append(NodeKey::ROOT, paragraph)
        })
        .unwrap();

    assert_eq!(editor.editor_state().children(paragraph).len(), 2);
    assert_eq!(editor.text_content(), "plainbold");
}

#[test]
fn test_empty_text_is_dropped() {
    let mut editor = Editor::new();
    let mut keys = (NodeKey::ROOT, NodeKey::ROOT);
    editor
        .update(|tx| {
            let paragraph = tx.create_paragraph()?;
            let empty = tx.create_text("")?;
            let bold = tx.create_text("kept")?;
            tx.set_format(bold, TextFormat::BOLD)?;
            tx.append_all(paragraph, &[empty, bold])?;
            tx.append(NodeKey::ROOT, paragraph)?;
            keys = (paragraph, empty);
            Ok(())
        })
        .unwrap();

    let (paragraph, empty) = keys;
    let state = editor.editor_state();
    assert!(!state.contains(empty));
    assert_eq!(state.children(paragraph).len(), 1);
}

#[test]
fn test_removed_subtree_is_collected() {
    let mut editor = Editor::new();
    let (paragraph, text) = paragraph_with(&mut editor, "doomed");
    paragraph_with(&mut editor, "survivor");

    editor.update(|tx| tx.remove(paragraph)).unwrap();

    let state = editor.editor_state();
    assert!(!state.contains(paragraph));
    assert!(!state.contains(text));
    assert_eq!(state.len(), 3);
    state.check_integrity().unwrap();
}

#[test]
fn test_unattached_node_is_collected() {
    let mut editor = Editor::new();
    let mut orphan = NodeKey::ROOT;
    editor
        .update(|tx| {
            orphan = tx.create_paragraph()?;
            Ok(())
        })
        .unwrap();

    assert!(!editor.editor_state().contains(orphan));
    assert_eq!(editor.editor_state().len(), 1);
}

#[test]
fn test_node_moved_within_update_survives() {
    let mut editor = Editor::new();
    let (first, text) = paragraph_with(&mut editor, "mover");
    let (second, other) = paragraph_with(&mut editor, "other");

    editor
        .update(|tx| {
            tx.remove_with(text, true)?;
            // Keeps the moved run from merging into its new neighbour.
            tx.set_format(text, TextFormat::BOLD)?;
            tx.append(second, text)
        })
        .unwrap();

    let state = editor.editor_state();
    assert!(state.contains(text));
    assert_eq!(state.children(second), vec![other, text]);
    assert!(state.contains(first));
    assert!(state.children(first).is_empty());
}
