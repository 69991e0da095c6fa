//! Reconciliation against an in-memory surface

use quire_editor::{
    Direction, Editor, MemorySurface, NodeKey, NodeMutation, RenderHandle, RenderSurface, SurfaceOp,
    SurfacePoint,
};
use std::cell::RefCell;
use std::rc::Rc;

type Shared = Rc<RefCell<MemorySurface>>;

fn attached() -> (Editor, Shared) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut editor = Editor::new();
    let surface = Rc::new(RefCell::new(MemorySurface::new()));
    editor.set_surface(Box::new(surface.clone())).unwrap();
    (editor, surface)
}

/// Appends one paragraph per entry and returns `(paragraph, text)` pairs.
fn paragraphs(editor: &mut Editor, contents: &[&str]) -> Vec<(NodeKey, NodeKey)> {
    let mut keys = Vec::new();
    editor
        .update(|tx| {
            for content in contents {
                let paragraph = tx.create_paragraph()?;
                let text = tx.create_text(content)?;
                tx.append(paragraph, text)?;
                tx.append(NodeKey::ROOT, paragraph)?;
                keys.push((paragraph, text));
            }
            Ok(())
        })
        .unwrap();
    keys
}

fn handle(editor: &Editor, key: NodeKey) -> RenderHandle {
    editor.handles().handle_of(key).expect("rendered")
}

fn rendered(surface: &Shared) -> String {
    let surface = surface.borrow();
    surface.render_text(surface.root())
}

#[test]
fn test_initial_render_matches_text_content() {
    let (mut editor, surface) = attached();
    paragraphs(&mut editor, &["one", "two"]);

    assert_eq!(rendered(&surface), editor.text_content());
    assert_eq!(rendered(&surface), "one\n\ntwo");
    assert_eq!(surface.borrow().len(), editor.editor_state().len());
}

#[test]
fn test_mount_existing_document() {
    let mut editor = Editor::new();
    let keys = paragraphs(&mut editor, &["before", "surface"]);

    let surface = Rc::new(RefCell::new(MemorySurface::new()));
    let previous = editor.set_surface(Box::new(surface.clone())).unwrap();
    assert!(previous.is_none());

    assert_eq!(rendered(&surface), "before\n\nsurface");
    let root = surface.borrow().root();
    assert_eq!(
        surface.borrow().children(root),
        &[handle(&editor, keys[0].0), handle(&editor, keys[1].0)]
    );
}

#[test]
fn test_empty_update_emits_nothing() {
    let (mut editor, surface) = attached();
    paragraphs(&mut editor, &["steady"]);
    surface.borrow_mut().clear_ops();

    editor.update(|_| Ok(())).unwrap();
    assert!(surface.borrow().ops().is_empty());
}

#[test]
fn test_text_edit_updates_in_place() {
    let (mut editor, surface) = attached();
    let keys = paragraphs(&mut editor, &["draft"]);
    let (paragraph, text) = keys[0];
    let before = handle(&editor, text);
    surface.borrow_mut().clear_ops();

    editor.update(|tx| tx.set_text(text, "final")).unwrap();

    assert_eq!(handle(&editor, text), before);
    assert_eq!(surface.borrow().text_of(before), Some("final"));
    let ops = surface.borrow().ops().to_vec();
    assert!(ops.contains(&SurfaceOp::Update { handle: before }));
    assert!(!ops.iter().any(|op| matches!(op, SurfaceOp::Create { .. } | SurfaceOp::Destroy { .. })));
    assert!(editor.handles().handle_of(paragraph).is_some());
}

#[test]
fn test_rotation_is_a_single_move() {
    let (mut editor, surface) = attached();
    let keys = paragraphs(&mut editor, &["a", "b", "c"]);
    surface.borrow_mut().clear_ops();

    editor.update(|tx| tx.insert_before(keys[0].0, keys[2].0)).unwrap();

    assert_eq!(rendered(&surface), "c\n\na\n\nb");
    let ops = surface.borrow().ops().to_vec();
    let moves = ops.iter().filter(|op| matches!(op, SurfaceOp::Move { .. })).count();
    assert_eq!(moves, 1);
    assert!(!ops.iter().any(|op| matches!(
        op,
        SurfaceOp::Create { .. } | SurfaceOp::Destroy { .. } | SurfaceOp::Insert { .. } | SurfaceOp::Remove { .. }
    )));
}

#[test]
fn test_removed_block_is_destroyed() {
    let (mut editor, surface) = attached();
    let keys = paragraphs(&mut editor, &["keep", "drop"]);
    let (paragraph, text) = keys[1];
    let paragraph_handle = handle(&editor, paragraph);
    let text_handle = handle(&editor, text);

    editor.update(|tx| tx.remove(paragraph)).unwrap();

    let surface = surface.borrow();
    assert!(!surface.is_live(paragraph_handle));
    assert!(!surface.is_live(text_handle));
    assert!(editor.handles().handle_of(paragraph).is_none());
    assert_eq!(surface.render_text(surface.root()), "keep");
}

#[test]
fn test_rtl_text_sets_direction() {
    let (mut editor, surface) = attached();
    let keys = paragraphs(&mut editor, &["שלום"]);
    let paragraph = keys[0].0;

    assert_eq!(surface.borrow().direction(handle(&editor, paragraph)), Some(Direction::Rtl));
    let state = editor.editor_state();
    let element = state.get(paragraph).and_then(|n| n.as_element()).unwrap();
    assert_eq!(element.direction, Some(Direction::Rtl));
}

#[test]
fn test_selection_pushed_to_surface() {
    let (mut editor, surface) = attached();
    let keys = paragraphs(&mut editor, &["caret"]);
    let text = keys[0].1;
    editor.update(|tx| tx.select_end(text)).unwrap();

    let expected = SurfacePoint {
        handle: handle(&editor, text),
        offset: 5,
    };
    let selection = surface.borrow().selection().expect("selection");
    assert_eq!(selection.anchor, expected);
    assert_eq!(selection.focus, expected);

    surface.borrow_mut().clear_ops();
    editor.update(|_| Ok(())).unwrap();
    assert!(surface.borrow().ops().is_empty());
}

#[test]
fn test_foreign_node_is_removed() {
    let (mut editor, surface) = attached();
    paragraphs(&mut editor, &["owned"]);
    let root = surface.borrow().root();
    let (foreign, mutation) = surface.borrow_mut().insert_foreign(root, "banner");
    assert_eq!(surface.borrow().children(root).len(), 2);

    editor.handle_surface_mutations(&[mutation]).unwrap();

    assert!(!surface.borrow().is_live(foreign));
    assert_eq!(surface.borrow().children(root).len(), 1);
    assert_eq!(rendered(&surface), "owned");
}

#[test]
fn test_stray_character_data_is_reverted() {
    let (mut editor, surface) = attached();
    let keys = paragraphs(&mut editor, &["truth"]);
    let text = keys[0].1;
    let old = handle(&editor, text);
    let mutation = surface.borrow_mut().edit_text(old, "tampered");

    editor.handle_surface_mutations(&[mutation]).unwrap();

    assert_eq!(editor.text_content(), "truth");
    assert_eq!(rendered(&surface), "truth");
    assert!(!surface.borrow().is_live(old));
    assert_ne!(handle(&editor, text), old);
}

#[test]
fn test_composing_character_data_is_accepted() {
    let (mut editor, surface) = attached();
    let keys = paragraphs(&mut editor, &["typ"]);
    let text = keys[0].1;
    editor
        .update(|tx| {
            tx.set_composition_key(Some(text));
            Ok(())
        })
        .unwrap();
    let text_handle = handle(&editor, text);
    let mutation = surface.borrow_mut().edit_text(text_handle, "typed");

    editor.handle_surface_mutations(&[mutation]).unwrap();

    assert_eq!(editor.text_content(), "typed");
    assert_eq!(rendered(&surface), "typed");
    assert_eq!(handle(&editor, text), text_handle);
}

#[test]
fn test_composing_edit_reverted_when_read_only() {
    let (mut editor, surface) = attached();
    let keys = paragraphs(&mut editor, &["locked"]);
    let text = keys[0].1;
    editor
        .update(|tx| {
            tx.set_composition_key(Some(text));
            Ok(())
        })
        .unwrap();
    editor.set_editable(false);
    let mutation = surface.borrow_mut().edit_text(handle(&editor, text), "unlocked");

    editor.handle_surface_mutations(&[mutation]).unwrap();
    assert_eq!(editor.text_content(), "locked");
    assert_eq!(rendered(&surface), "locked");
}

#[test]
fn test_detached_block_rebuilds_root() {
    let (mut editor, surface) = attached();
    let keys = paragraphs(&mut editor, &["first", "second"]);
    let root = surface.borrow().root();
    let mutation = surface.borrow_mut().detach(root, handle(&editor, keys[0].0));
    assert_eq!(rendered(&surface), "second");

    editor.handle_surface_mutations(&[mutation]).unwrap();

    assert_eq!(rendered(&surface), "first\n\nsecond");
    assert_eq!(surface.borrow().children(root).len(), 2);
    assert_eq!(surface.borrow().len(), editor.editor_state().len());
}

#[test]
fn test_mutation_listener_sees_created_blocks() {
    let (mut editor, _surface) = attached();
    let created = Rc::new(RefCell::new(Vec::new()));
    let sink = created.clone();
    editor
        .register_mutation_listener("paragraph", move |changes, _| {
            sink.borrow_mut().extend(
                changes
                    .iter()
                    .filter(|(_, m)| **m == NodeMutation::Created)
                    .map(|(k, _)| *k),
            );
        })
        .unwrap();

    let keys = paragraphs(&mut editor, &["x", "y"]);
    let mut seen = created.borrow().clone();
    seen.sort();
    let mut expected = vec![keys[0].0, keys[1].0];
    expected.sort();
    assert_eq!(seen, expected);
}

#[test]
fn test_take_surface_detaches() {
    let (mut editor, surface) = attached();
    paragraphs(&mut editor, &["gone"]);
    assert!(editor.take_surface().is_some());
    assert!(editor.handles().is_empty());

    surface.borrow_mut().clear_ops();
    paragraphs(&mut editor, &["headless"]);
    assert!(surface.borrow().ops().is_empty());
    assert_eq!(editor.text_content(), "gone\n\nheadless");
}
