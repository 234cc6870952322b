use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use landslide_monitor::retention::{enforce_retention, list_images};
use std::fs::File;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

fn archive(count: usize) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let base = SystemTime::now() - Duration::from_secs(86_400);
    for i in 0..count {
        let file = File::create(dir.path().join(format!("landslide_{:05}.jpg", i))).unwrap();
        file.set_modified(base + Duration::from_secs(i as u64)).unwrap();
    }
    dir
}

fn benchmark_retention(c: &mut Criterion) {
    let extensions = vec!["jpg".to_string(), "jpeg".to_string()];
    let mut group = c.benchmark_group("retention");
    group.sample_size(20);

    group.bench_function("prune_1010_to_1000", |b| {
        b.iter_batched(
            || archive(1010),
            |dir| {
                enforce_retention(black_box(dir.path()), 1000, &extensions).unwrap();
                dir
            },
            BatchSize::PerIteration,
        );
    });

    group.bench_function("noop_pass_1000", |b| {
        let dir = archive(1000);
        b.iter(|| enforce_retention(black_box(dir.path()), 1000, &extensions).unwrap());
    });

    group.bench_function("list_newest_50_of_1000", |b| {
        let dir = archive(1000);
        b.iter(|| list_images(black_box(dir.path()), &extensions, 50).unwrap());
    });

    group.finish();
}

criterion_group!(benches, benchmark_retention);
criterion_main!(benches);
