use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Bencher, Criterion, Throughput};

use libfindgpu::glob::{glob_match, MatchOptions};

criterion_group!(benches, glob_bench);
criterion_main!(benches);

fn synthetic_paths(n: usize) -> Vec<Vec<u8>> {
	(0..n).map(|i| format!("/usr/local/lib/pkg{i}/src/module_{i}.rs").into_bytes()).collect()
}

fn glob_bench(c: &mut Criterion) {
	let mut group = c.benchmark_group("glob_match");
	group.sample_size(20);

	let paths = synthetic_paths(10_000);
	let total_bytes: u64 = paths.iter().map(|p| p.len() as u64).sum();
	group.throughput(Throughput::Bytes(total_bytes));

	group.bench_function("literal_suffix", |b: &mut Bencher| scalar_match(b, &paths, b"*.rs", MatchOptions::MATCH_PATH));
	group.bench_function("wildcard_segment", |b: &mut Bencher| scalar_match(b, &paths, b"*/src/*", MatchOptions::MATCH_PATH));
	group.bench_function("char_class", |b: &mut Bencher| scalar_match(b, &paths, b"module_[0-9]*.rs", MatchOptions::empty()));

	group.finish();
}

fn scalar_match(b: &mut Bencher, paths: &[Vec<u8>], pattern: &[u8], options: MatchOptions) {
	b.iter_batched(
		|| paths.to_vec(),
		|paths| {
			for path in &paths {
				black_box(glob_match(pattern, path, options));
			}
		},
		BatchSize::LargeInput,
	);
}
