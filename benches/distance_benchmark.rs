// ========================================================================================
//
//                 PAIRWISE DISTANCE AND CLUSTERING BENCHMARK
//
// ========================================================================================
//
// Measures the quadratic distance stage for each metric and one full cluster/validate
// pass on synthetic populations of growing size.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use lineage::cluster::progress::NoopClusterProgress;
use lineage::{ClusterFilterLoop, DistanceCache, DistanceCalculator, FrequencyTable, LineageConfig, Metric};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Number of timepoints per simulated trajectory.
const NUM_TIMEPOINTS: usize = 12;
/// Population sizes; the number of pairs grows quadratically.
const TRAJECTORY_COUNTS: [usize; 3] = [50, 150, 400];

/// Logistic sweeps with random onset, speed and plateau, plus measurement noise.
fn simulate(count: usize, seed: u64) -> FrequencyTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let timepoints: Vec<f64> = (0..NUM_TIMEPOINTS).map(|t| t as f64).collect();
    let rows = (0..count)
        .map(|idx| {
            let onset = rng.gen_range(1.0..(NUM_TIMEPOINTS as f64 - 2.0));
            let speed = rng.gen_range(0.5..2.5);
            let plateau = rng.gen_range(0.1..1.0);
            let values = timepoints
                .iter()
                .map(|&t| {
                    if t == 0.0 {
                        return 0.0;
                    }
                    let logistic = plateau / (1.0 + (-(t - onset) * speed).exp());
                    (logistic + rng.gen_range(-0.02..0.02)).clamp(0.0, 1.0)
                })
                .collect();
            (format!("trajectory-{idx}"), values)
        })
        .collect();
    FrequencyTable::new(timepoints, rows).expect("simulated table is valid")
}

fn bench_pairwise(c: &mut Criterion) {
    let mut group = c.benchmark_group("pairwise_distances");
    group.sample_size(10);
    for &count in &TRAJECTORY_COUNTS {
        let table = simulate(count, 7);
        group.throughput(Throughput::Elements((count * (count - 1) / 2) as u64));
        for metric in [Metric::Binomial, Metric::Pearson { adjusted: true }, Metric::Jaccard] {
            let calculator = DistanceCalculator::new(0.03, 0.97, metric);
            group.bench_with_input(
                BenchmarkId::new(metric.to_string(), count),
                &table,
                |b, table| b.iter(|| black_box(calculator.run(table).expect("distances"))),
            );
        }
    }
    group.finish();
}

fn bench_cluster_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("cluster_filter_loop");
    group.sample_size(10);
    let config = LineageConfig::default();
    for &count in &TRAJECTORY_COUNTS {
        let table = simulate(count, 11);
        group.bench_with_input(BenchmarkId::from_parameter(count), &table, |b, table| {
            b.iter(|| {
                let mut cache = DistanceCache::new();
                let outcome = ClusterFilterLoop::new(&config)
                    .run(table, &mut cache, &mut NoopClusterProgress)
                    .expect("cluster loop");
                black_box(outcome.genotypes.len())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_pairwise, bench_cluster_loop);
criterion_main!(benches);
