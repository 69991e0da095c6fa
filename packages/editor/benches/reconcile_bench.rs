use criterion::{black_box, criterion_group, criterion_main, Criterion};
use quire_editor::{Editor, MemorySurface, NodeKey, INSERT_TEXT};

fn document(blocks: usize) -> (Editor, Vec<NodeKey>) {
    let mut editor = Editor::new();
    editor.set_surface(Box::new(MemorySurface::new())).unwrap();
    let mut paragraphs = Vec::new();
    editor
        .update(|tx| {
            for i in 0..blocks {
                let paragraph = tx.create_paragraph()?;
                let text = tx.create_text(&format!("Paragraph number {}", i))?;
                tx.append(paragraph, text)?;
                tx.append(NodeKey::ROOT, paragraph)?;
                paragraphs.push(paragraph);
            }
            Ok(())
        })
        .unwrap();
    (editor, paragraphs)
}

fn mount_document(c: &mut Criterion) {
    c.bench_function("mount_500_paragraphs", |b| {
        b.iter(|| {
            let (editor, _) = document(black_box(500));
            editor
        })
    });
}

fn type_into_large_document(c: &mut Criterion) {
    let (mut editor, paragraphs) = document(1000);
    let last = paragraphs[paragraphs.len() - 1];
    editor.update(|tx| tx.select_end(last)).unwrap();
    let input = "a".to_string();

    c.bench_function("type_char_1000_paragraphs", |b| {
        b.iter(|| editor.dispatch_command(INSERT_TEXT, black_box(&input)).unwrap())
    });
}

fn rotate_children(c: &mut Criterion) {
    let (mut editor, paragraphs) = document(200);
    let first = paragraphs[0];

    c.bench_function("move_last_to_front_200", |b| {
        b.iter(|| {
            editor
                .update(|tx| {
                    let last = tx
                        .state()
                        .last_child(NodeKey::ROOT)
                        .unwrap_or(first);
                    let head = tx.state().first_child(NodeKey::ROOT).unwrap_or(first);
                    if last != head {
                        tx.insert_before(head, last)?;
                    }
                    Ok(())
                })
                .unwrap()
        })
    });
}

fn serialize_document(c: &mut Criterion) {
    let (editor, _) = document(500);

    c.bench_function("serialize_500_paragraphs", |b| {
        b.iter(|| black_box(editor.to_json()).unwrap())
    });
}

criterion_group!(
    benches,
    mount_document,
    type_into_large_document,
    rotate_children,
    serialize_document
);
criterion_main!(benches);
