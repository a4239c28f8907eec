use criterion::{black_box, criterion_group, criterion_main, Criterion};
use trellis_outline::{Gnx, NodeId, Outline};
use trellis_sentinel::{CodecOptions, LanguageSpec, ReadContext, Reader, Writer};

/// A root with `width` classes of `width` methods each
fn generate(width: usize) -> (Outline, NodeId) {
    let mut outline = Outline::new();
    let root = outline
        .add_root(
            Gnx::new("bench.root").unwrap(),
            "@file bench.py",
            vec!["import os".to_string(), "@others".to_string()],
        )
        .unwrap();

    for i in 0..width {
        let class = outline
            .new_node(
                Gnx::new(format!("bench.c{}", i)).unwrap(),
                format!("class C{}", i),
                vec![format!("class C{}:", i), "    @others".to_string()],
            )
            .unwrap();
        outline.append_child(root, class).unwrap();

        for j in 0..width {
            let method = outline
                .new_node(
                    Gnx::new(format!("bench.c{}.m{}", i, j)).unwrap(),
                    format!("m{}", j),
                    vec![
                        format!("def m{}(self):", j),
                        format!("    return {}", j),
                        String::new(),
                    ],
                )
                .unwrap();
            outline.append_child(class, method).unwrap();
        }
    }
    (outline, root)
}

fn write_outline(c: &mut Criterion) {
    let (outline, root) = generate(30);
    let options = CodecOptions::default();
    let python = LanguageSpec::named("python").unwrap();

    c.bench_function("write_900_nodes", |b| {
        b.iter(|| {
            Writer::new(black_box(&outline), &options)
                .write(root, &python)
                .unwrap()
        })
    });
}

fn parse_derived_file(c: &mut Criterion) {
    let (outline, root) = generate(30);
    let options = CodecOptions::default();
    let python = LanguageSpec::named("python").unwrap();
    let text = Writer::new(&outline, &options).write(root, &python).unwrap().text;

    c.bench_function("parse_900_nodes", |b| {
        b.iter(|| Reader::new(&options).parse(black_box(text.as_bytes()), None).unwrap())
    });
}

fn read_and_reconcile(c: &mut Criterion) {
    let (outline, root) = generate(30);
    let options = CodecOptions::default();
    let python = LanguageSpec::named("python").unwrap();
    let text = Writer::new(&outline, &options).write(root, &python).unwrap().text;

    c.bench_function("read_900_nodes", |b| {
        b.iter_batched(
            || outline.clone(),
            |mut outline| {
                Reader::new(&options)
                    .read(
                        black_box(text.as_bytes()),
                        &mut outline,
                        root,
                        None,
                        &ReadContext::default(),
                    )
                    .unwrap()
            },
            criterion::BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, write_outline, parse_derived_file, read_and_reconcile);
criterion_main!(benches);
