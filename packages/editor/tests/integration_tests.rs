//! Integration tests for the editor lifecycle

use quire_editor::{
    keys_with, Command, CommandPriority, Editor, EditorConfig, EditorError, History, NodeKey, NodeMutation,
    TextDetail, UpdateOptions, DEFAULT_CONFIG_NAME, INSERT_TEXT, REDO, UNDO,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// One paragraph per entry, caret at the end of the last one. Returns the
/// text node keys.
fn build(editor: &mut Editor, paragraphs: &[&str]) -> Vec<NodeKey> {
    let mut texts = Vec::new();
    editor
        .update(|tx| {
            for content in paragraphs {
                let paragraph = tx.create_paragraph()?;
                let text = tx.create_text(content)?;
                tx.append(paragraph, text)?;
                tx.append(NodeKey::ROOT, paragraph)?;
                texts.push(text);
            }
            match texts.last() {
                Some(last) => tx.select_end(*last),
                None => Ok(()),
            }
        })
        .unwrap();
    texts
}

#[test]
fn test_empty_document() {
    let editor = Editor::new();
    let state = editor.editor_state();
    assert!(state.is_empty());
    assert_eq!(state.len(), 1);
    assert!(state.root().is_ok());
    assert_eq!(editor.text_content(), "");
}

#[test]
fn test_document_lifecycle() -> anyhow::Result<()> {
    let mut editor = Editor::new();
    let texts = build(&mut editor, &["first", "second"]);
    assert_eq!(editor.text_content(), "first\n\nsecond");

    let state = editor.editor_state();
    state.check_integrity()?;
    assert!(texts.iter().all(|k| state.is_attached(*k)));
    assert_eq!(state.children(NodeKey::ROOT).len(), 2);
    Ok(())
}

#[test]
fn test_failed_update_leaves_committed_state() {
    let mut editor = Editor::new();
    let texts = build(&mut editor, &["stable"]);
    let before = Arc::clone(editor.editor_state());

    let result = editor.update(|tx| {
        tx.set_text(texts[0], "changed")?;
        let orphan = tx.create_paragraph()?;
        tx.append(NodeKey::ROOT, orphan)?;
        Err(EditorError::Update("rejected".into()))
    });

    assert!(result.is_err());
    assert!(Arc::ptr_eq(&before, editor.editor_state()));
    assert_eq!(editor.text_content(), "stable");
    assert!(!editor.has_pending_update());
}

#[test]
fn test_tree_error_aborts_update() {
    let mut editor = Editor::new();
    build(&mut editor, &["x"]);
    let before = Arc::clone(editor.editor_state());

    let result = editor.update(|tx| tx.remove(NodeKey::ROOT));
    assert!(matches!(result, Err(EditorError::Tree(_))));
    assert!(Arc::ptr_eq(&before, editor.editor_state()));
}

#[test]
fn test_serialization_round_trip() -> anyhow::Result<()> {
    let mut editor = Editor::new();
    build(&mut editor, &["alpha", "beta"]);
    let json = editor.to_json()?;

    let mut other = Editor::new();
    let state = other.parse_editor_state(&json)?;
    other.set_editor_state(&state)?;
    assert_eq!(other.text_content(), "alpha\n\nbeta");
    assert_eq!(other.to_json()?, json);
    Ok(())
}

#[test]
fn test_tab_survives_round_trip() -> anyhow::Result<()> {
    let mut editor = Editor::new();
    editor.update(|tx| {
        let paragraph = tx.create_paragraph()?;
        let before = tx.create_text("a")?;
        let tab = tx.create_tab()?;
        let after = tx.create_text("b")?;
        tx.append_all(paragraph, &[before, tab, after])?;
        tx.append(NodeKey::ROOT, paragraph)
    })?;
    let json = editor.to_json()?;
    assert!(json.contains("\"tab\""));

    let mut other = Editor::new();
    let state = other.parse_editor_state(&json)?;
    other.set_editor_state(&state)?;
    assert_eq!(other.text_content(), "a\tb");

    let restored = other.editor_state();
    let paragraph = restored.first_child(NodeKey::ROOT).expect("paragraph");
    let children = restored.children(paragraph);
    assert_eq!(children.len(), 3);
    let tab = restored.get(children[1]).expect("tab");
    assert_eq!(tab.node_type, "tab");
    let data = tab.as_text().expect("text data");
    assert_eq!(data.text, "\t");
    assert!(data.detail.contains(TextDetail::UNMERGEABLE));
    assert_eq!(other.to_json()?, json);
    Ok(())
}

#[test]
fn test_parse_rejects_malformed_json() {
    let mut editor = Editor::new();
    let err = editor.parse_editor_state("{ \"root\": 3 }").unwrap_err();
    assert!(matches!(err, EditorError::Serialization(_)));
}

#[test]
fn test_command_priority_and_propagation() -> anyhow::Result<()> {
    let mut editor = Editor::new();
    let texts = build(&mut editor, &["hi"]);
    let calls = Rc::new(RefCell::new(Vec::new()));

    let log = calls.clone();
    let high = editor.register_command(INSERT_TEXT, CommandPriority::High, move |_, _| {
        log.borrow_mut().push("high");
        Ok(true)
    });
    let log = calls.clone();
    editor.register_command(INSERT_TEXT, CommandPriority::Critical, move |_, _| {
        log.borrow_mut().push("critical");
        Ok(false)
    });

    assert!(editor.dispatch_command(INSERT_TEXT, &"!".to_string())?);
    assert_eq!(*calls.borrow(), vec!["critical", "high"]);
    assert_eq!(editor.text_content(), "hi");

    assert!(editor.unregister(high));
    assert!(editor.dispatch_command(INSERT_TEXT, &"!".to_string())?);
    assert_eq!(editor.text_content(), "hi!");
    assert!(editor.editor_state().is_attached(texts[0]));
    Ok(())
}

#[test]
fn test_custom_command_entry_dropped_with_last_handler() -> anyhow::Result<()> {
    const PING: Command<u32> = Command::new("ping");
    let mut editor = Editor::new();
    let seen = Rc::new(RefCell::new(0));
    let sink = seen.clone();
    let id = editor.register_command(PING, CommandPriority::Normal, move |value, _| {
        *sink.borrow_mut() += *value;
        Ok(true)
    });

    assert!(editor.dispatch_command(PING, &7)?);
    assert_eq!(*seen.borrow(), 7);

    editor.unregister(id);
    assert!(!editor.has_command("ping"));
    assert!(!editor.dispatch_command(PING, &1)?);
    Ok(())
}

#[test]
fn test_listeners_observe_commits() {
    let mut editor = Editor::new();
    let tags = Rc::new(RefCell::new(Vec::new()));
    let texts = Rc::new(RefCell::new(Vec::new()));
    let created = Rc::new(RefCell::new(Vec::new()));

    let sink = tags.clone();
    editor.register_update_listener(move |payload, _| {
        sink.borrow_mut().push(payload.has_tag("paste"));
    });
    let sink = texts.clone();
    editor.register_text_content_listener(move |text| sink.borrow_mut().push(text.to_string()));
    let sink = created.clone();
    editor
        .register_mutation_listener("paragraph", move |changes, _| {
            sink.borrow_mut()
                .extend(changes.iter().filter(|(_, m)| **m == NodeMutation::Created).map(|(k, _)| *k));
        })
        .unwrap();

    editor
        .update_with_options(
            |tx| {
                let paragraph = tx.create_paragraph()?;
                let text = tx.create_text("pasted")?;
                tx.append(paragraph, text)?;
                tx.append(NodeKey::ROOT, paragraph)
            },
            UpdateOptions::default().with_tag("paste"),
        )
        .unwrap();
    editor.update(|_| Ok(())).unwrap();

    assert_eq!(*tags.borrow(), vec![true, false]);
    assert_eq!(*texts.borrow(), vec!["pasted".to_string()]);
    assert_eq!(created.borrow().len(), 1);
}

#[test]
fn test_mutation_listener_needs_registered_type() {
    let mut editor = Editor::new();
    let result = editor.register_mutation_listener("table", |_, _| {});
    assert!(matches!(result, Err(EditorError::Tree(_))));
}

#[test]
fn test_listener_queues_follow_up_update() {
    let mut editor = Editor::new();
    let texts = build(&mut editor, &["draft"]);
    let key = texts[0];
    let fired = Rc::new(RefCell::new(false));
    let once = fired.clone();
    editor.register_update_listener(move |payload, queue| {
        if payload.has_tag("publish") && !*once.borrow() {
            *once.borrow_mut() = true;
            queue.push(move |tx| tx.set_text(key, "published"), UpdateOptions::default());
        }
    });

    editor
        .update_with_options(|_| Ok(()), UpdateOptions::default().with_tag("publish"))
        .unwrap();
    assert_eq!(editor.text_content(), "published");
}

#[test]
fn test_mutated_nodes_by_type() {
    let mut editor = Editor::new();
    let destroyed = Rc::new(RefCell::new(Vec::new()));
    let sink = destroyed.clone();
    editor.register_update_listener(move |payload, _| {
        sink.borrow_mut()
            .extend(keys_with(payload.mutated_nodes, "text", NodeMutation::Destroyed));
    });

    let texts = build(&mut editor, &["gone"]);
    editor.update(|tx| tx.remove(texts[0])).unwrap();
    assert_eq!(*destroyed.borrow(), texts);
}

#[test]
fn test_history_undo_redo() -> anyhow::Result<()> {
    let mut editor = Editor::new();
    let history = Rc::new(RefCell::new(History::new(10, Duration::from_secs(60))));
    History::attach(&mut editor, history.clone());

    build(&mut editor, &["hello"]);
    editor.dispatch_command(INSERT_TEXT, &"!".to_string())?;
    editor.dispatch_command(INSERT_TEXT, &"?".to_string())?;
    assert_eq!(editor.text_content(), "hello!?");
    // Consecutive single-character typing merges into one entry.
    assert_eq!(history.borrow().undo_levels(), 1);

    assert!(editor.dispatch_command(UNDO, &())?);
    assert_eq!(editor.text_content(), "hello");
    assert!(history.borrow().can_redo());
    assert!(!editor.dispatch_command(UNDO, &())?);

    assert!(editor.dispatch_command(REDO, &())?);
    assert_eq!(editor.text_content(), "hello!?");
    assert!(!history.borrow().can_redo());
    Ok(())
}

#[test]
fn test_batched_updates_commit_together() {
    let config = EditorConfig {
        batch_updates: true,
        ..EditorConfig::default()
    };
    let mut editor = Editor::with_config(config);
    let commits = Rc::new(RefCell::new(0));
    let sink = commits.clone();
    editor.register_update_listener(move |_, _| *sink.borrow_mut() += 1);

    let mut paragraph = NodeKey::ROOT;
    editor
        .update(|tx| {
            paragraph = tx.create_paragraph()?;
            tx.append(NodeKey::ROOT, paragraph)
        })
        .unwrap();
    editor
        .update(move |tx| {
            let text = tx.create_text("later")?;
            tx.append(paragraph, text)
        })
        .unwrap();
    assert_eq!(*commits.borrow(), 0);

    editor.update_with_options(|_| Ok(()), UpdateOptions::discrete()).unwrap();
    assert_eq!(*commits.borrow(), 1);
    assert_eq!(editor.text_content(), "later");
}

#[test]
fn test_config_file_loading() -> anyhow::Result<()> {
    let dir = std::env::temp_dir().join(format!("quire-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(DEFAULT_CONFIG_NAME);
    std::fs::write(
        &path,
        r#"{ "namespace": "notes", "editable": false, "theme": { "paragraph": "p" } }"#,
    )?;

    let config = EditorConfig::load(&path)?;
    std::fs::remove_dir_all(&dir)?;
    assert_eq!(config.namespace, "notes");

    let editor = Editor::with_config(config);
    assert!(!editor.is_editable());
    assert_eq!(editor.config().max_transform_iterations, 100);
    Ok(())
}
