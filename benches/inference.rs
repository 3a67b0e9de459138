use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::Array2;
use oncoscope::config::TrainingConfig;
use oncoscope::data::TrainingTable;
use oncoscope::guidelines::GuidelineTable;
use oncoscope::report::{predict_batch, predict_comprehensive};
use oncoscope::{FEATURE_COUNT, FeatureVector, ModelRegistry};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Rows in the synthetic training cohort.
const TRAINING_ROWS: usize = 400;
const BATCH_SIZES: [usize; 3] = [16, 128, 1024];

fn profile(rng: &mut StdRng, malignant: bool) -> [f64; FEATURE_COUNT] {
    let shift = if malignant { 1.5 } else { 1.0 };
    std::array::from_fn(|j| (10.0 + j as f64) * shift * rng.gen_range(0.9..1.1))
}

fn trained_registry() -> ModelRegistry {
    let mut rng = StdRng::seed_from_u64(42);
    let malignant: Vec<bool> = (0..TRAINING_ROWS).map(|i| i % 3 == 0).collect();
    let rows: Vec<f64> = malignant.iter().flat_map(|&m| profile(&mut rng, m)).collect();
    let features = Array2::from_shape_vec((TRAINING_ROWS, FEATURE_COUNT), rows)
        .expect("row-major training matrix");
    let table = TrainingTable::new(features, malignant).expect("table matches the schema");

    let registry = ModelRegistry::new();
    registry
        .train(&table, &TrainingConfig::default())
        .expect("training succeeds");
    registry
}

fn bench_inference(c: &mut Criterion) {
    let registry = trained_registry();
    let snapshot = registry.snapshot();
    let guidelines = GuidelineTable::new();
    let mut rng = StdRng::seed_from_u64(7);

    let single = FeatureVector::new(profile(&mut rng, true));
    c.bench_function("comprehensive_single", |b| {
        b.iter(|| predict_comprehensive(&snapshot, &guidelines, black_box(&single)))
    });

    let mut group = c.benchmark_group("comprehensive_batch");
    for size in BATCH_SIZES {
        let vectors: Vec<FeatureVector> = (0..size)
            .map(|i| FeatureVector::new(profile(&mut rng, i % 2 == 0)))
            .collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &vectors, |b, vectors| {
            b.iter(|| predict_batch(&snapshot, &guidelines, black_box(vectors)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_inference);
criterion_main!(benches);
