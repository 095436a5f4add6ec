use cloudtile::io::{BufferPool, NullProgress};
use cloudtile::tiling::{DensityEstimate, GridLayout, TileOrder, TilingEngine};
use cloudtile::{CompressionMethod, Point3D, PointFile, PointSource, TilingBuilder, TilingConfig};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use tempfile::TempDir;

fn scattered(n: usize) -> Vec<Point3D> {
    (0..n)
        .map(|i| {
            let t = i as f64 * 0.754_877_666_25;
            Point3D::new(
                (t.fract()) * 1000.0,
                ((t * 1.324_717_957).fract()) * 1000.0,
                (i % 97) as f64,
            )
        })
        .collect()
}

fn config() -> TilingConfig {
    TilingConfig::default()
        .with_desired_points_per_tile(5_000)
        .with_buffer_size(256 * 1024)
        .with_reuse_cache(false)
}

fn benchmark_estimation(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimation");
    let dir = TempDir::new().unwrap();
    let cfg = config();
    let pool = BufferPool::new(cfg.buffer_size);

    for size in [50_000usize, 200_000] {
        let source = PointFile::create(dir.path().join(format!("e{}.bin", size)), &scattered(size), None).unwrap();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("estimate", size), &source, |b, source| {
            b.iter(|| DensityEstimate::estimate(black_box(source), &cfg, &pool, &NullProgress).unwrap())
        });
    }

    group.finish();
}

fn benchmark_bucket_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("bucket_sort");
    let dir = TempDir::new().unwrap();
    let cfg = config();
    let pool = BufferPool::new(cfg.buffer_size);
    let source = PointFile::create(dir.path().join("s.bin"), &scattered(200_000), None).unwrap();
    group.throughput(Throughput::Elements(source.count()));

    for order in [TileOrder::RowMajor, TileOrder::Tree] {
        let layout = GridLayout::new(8, 8, *source.extent(), source.quantization());
        let engine = TilingEngine::new(layout, order, &cfg, &pool);
        group.bench_function(format!("{:?}", order), |b| {
            b.iter(|| engine.tile_segment(black_box(&source), &NullProgress).unwrap())
        });
    }

    group.finish();
}

fn benchmark_full_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);
    let dir = TempDir::new().unwrap();
    let points = scattered(200_000);
    let source: Arc<dyn PointSource> = Arc::new(PointFile::create(dir.path().join("p.bin"), &points, None).unwrap());
    let pool = BufferPool::new(256 * 1024);

    let variants = [
        ("direct", config()),
        ("segmented", config().with_max_segment_bytes(600_000)),
        (
            "segmented_parallel",
            config().with_max_segment_bytes(600_000).with_parallel_segments(true),
        ),
        ("compressed", config().with_compression(CompressionMethod::Basic)),
    ];

    for (name, cfg) in variants {
        let set = TilingBuilder::new()
            .source(source.clone())
            .output(dir.path().join(format!("{}.tiles", name)))
            .config(cfg)
            .pool(pool.clone())
            .build()
            .unwrap();
        group.bench_function(name, |b| b.iter(|| set.process(&NullProgress).unwrap()));
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_estimation,
    benchmark_bucket_sort,
    benchmark_full_pipeline
);
criterion_main!(benches);
