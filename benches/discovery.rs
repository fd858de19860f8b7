//! Benchmarks for rule screening, evaluation and candidate generation.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use rule_atlas::{
    compute::{
        EvaluationSettings, Evaluator, HardFilter, LifeEvaluator, LifeGrid,
        discovery::{CandidateGenerator, MetaScorer},
    },
    schema::{HardFilterConfig, MetaModelConfig, RuleNotation, SearchConfig, Strategy},
};

fn bench_grid_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid_step");
    let life = RuleNotation::life();

    for size in [32, 64, 128, 256] {
        let mut grid = LifeGrid::seeded(size, 0.3, 42);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", size, size)),
            &size,
            |b, _| {
                b.iter(|| {
                    grid.step(black_box(&life));
                });
            },
        );
    }

    group.finish();
}

fn bench_hard_filter(c: &mut Criterion) {
    let filter = HardFilter::new(HardFilterConfig::default());
    let rules: Vec<RuleNotation> = ["B3/S23", "B36/S23", "B2/S", "B5678/S45678"]
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    c.bench_function("hard_filter_screen", |b| {
        b.iter(|| {
            for rule in &rules {
                black_box(filter.screen(rule));
            }
        });
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");
    let evaluator = LifeEvaluator::new();
    let life = RuleNotation::life();

    for grid_size in [16, 32, 64] {
        let settings = EvaluationSettings {
            grid_size,
            steps: 120,
            seed: 42,
            noise: 0.05,
            runs: 4,
        };
        group.bench_with_input(
            BenchmarkId::from_parameter(grid_size),
            &grid_size,
            |b, _| {
                b.iter(|| evaluator.evaluate(black_box(&life), &settings));
            },
        );
    }

    group.finish();
}

fn bench_generate(c: &mut Criterion) {
    let scorer = MetaScorer::new(MetaModelConfig::default(), 42);
    let mut group = c.benchmark_group("generate");

    for strategy in [Strategy::Exploitation, Strategy::Diversity, Strategy::StableBias] {
        group.bench_with_input(
            BenchmarkId::from_parameter(strategy),
            &strategy,
            |b, &strategy| {
                b.iter(|| {
                    let mut generator = CandidateGenerator::new(SearchConfig::default(), 42);
                    black_box(generator.generate(strategy, &[], &scorer))
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_grid_step,
    bench_hard_filter,
    bench_evaluate,
    bench_generate
);
criterion_main!(benches);
