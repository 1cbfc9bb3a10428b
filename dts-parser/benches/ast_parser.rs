use criterion::{black_box, criterion_group, criterion_main, Criterion};

pub fn ast(c: &mut Criterion) {
    let source = include_str!("board.dts");

    c.bench_function("parser::from_str board.dts", |b| {
        b.iter(|| dts_parser::from_str(black_box(source)))
    });
}

criterion_group!(benches, ast);
criterion_main!(benches);
