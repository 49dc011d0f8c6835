use approx::assert_abs_diff_eq;
use lineage::calculate::{DistanceCalculator, fixed_overlap};
use lineage::cluster::filter::FilterReason;
use lineage::cluster::progress::{ClusterProgressObserver, ClusterProgressStage};
use lineage::lineage::ROOT_GENOTYPE;
use lineage::{DistanceCache, FrequencyTable, LineageConfig, Metric, WorkflowError, run_workflow};
use std::collections::BTreeSet;

const DETECTION: f64 = 0.03;
const FIXED: f64 = 0.97;

fn table(rows: &[(&str, &[f64])]) -> FrequencyTable {
    let width = rows[0].1.len();
    FrequencyTable::new(
        (0..width).map(|t| t as f64).collect(),
        rows.iter()
            .map(|(name, values)| (name.to_string(), values.to_vec()))
            .collect(),
    )
    .expect("valid table")
}

fn config() -> LineageConfig {
    LineageConfig {
        worker_count: 2,
        ..LineageConfig::default()
    }
}

fn abc() -> FrequencyTable {
    table(&[
        ("A", &[0.0, 0.0, 0.0, 0.1, 0.5, 0.5]),
        ("B", &[0.0, 0.1, 0.15, 0.03, 0.0, 0.0]),
        ("C", &[0.0, 0.0, 0.0, 0.3, 0.7, 1.0]),
    ])
}

/// A population with a clear sweep, a nested sub-lineage and an unrelated early lineage.
fn population() -> FrequencyTable {
    table(&[
        ("sweep-a", &[0.0, 0.1, 0.4, 0.8, 1.0, 1.0, 1.0]),
        ("sweep-b", &[0.0, 0.12, 0.42, 0.78, 1.0, 1.0, 1.0]),
        ("nested-a", &[0.0, 0.0, 0.0, 0.1, 0.3, 0.6, 0.8]),
        ("nested-b", &[0.0, 0.0, 0.0, 0.12, 0.32, 0.62, 0.78]),
        ("early", &[0.0, 0.3, 0.2, 0.05, 0.0, 0.0, 0.0]),
        ("noise", &[0.0, 0.0, 0.02, 0.0, 0.01, 0.0, 0.0]),
        ("blip", &[0.0, 0.0, 0.0, 0.2, 0.0, 0.0, 0.0]),
    ])
}

#[derive(Default)]
struct StageLog {
    started: Vec<ClusterProgressStage>,
}

impl ClusterProgressObserver for StageLog {
    fn on_stage_start(&mut self, stage: ClusterProgressStage, _total: usize) {
        self.started.push(stage);
    }
}

#[test]
fn correlated_rise_forms_one_genotype() {
    let mut log = StageLog::default();
    let result = run_workflow(&abc(), &config(), &mut log).expect("workflow");
    let members: Vec<Vec<String>> = result.genotypes.iter().map(|g| g.members.clone()).collect();
    assert_eq!(
        members,
        vec![vec!["A".to_string(), "C".to_string()], vec!["B".to_string()]]
    );
    assert!(result.filtered.is_empty());
    assert_eq!(
        log.started,
        vec![
            ClusterProgressStage::PairwiseDistances,
            ClusterProgressStage::Linkage,
            ClusterProgressStage::Validation
        ]
    );
}

#[test]
fn every_trajectory_is_clustered_or_filtered_once() {
    let input = population();
    let result = run_workflow(&input, &config(), &mut lineage::cluster::progress::NoopClusterProgress)
        .expect("workflow");

    let mut seen: Vec<String> = result.genotypes.iter().flat_map(|g| g.members.clone()).collect();
    seen.extend(result.filtered.iter().map(|f| f.name.clone()));
    let unique: BTreeSet<&String> = seen.iter().collect();
    assert_eq!(unique.len(), seen.len(), "no trajectory appears twice");
    let expected: BTreeSet<&String> = input.names().iter().collect();
    assert_eq!(unique, expected);

    let reasons: Vec<(&str, FilterReason)> = result
        .filtered
        .iter()
        .map(|f| (f.name.as_str(), f.reason))
        .collect();
    assert!(reasons.contains(&("noise", FilterReason::Undetected)));
    assert!(reasons.contains(&("blip", FilterReason::SingleTimepoint)));
}

#[test]
fn ancestry_is_acyclic_and_complete() {
    let result = run_workflow(&population(), &config(), &mut lineage::cluster::progress::NoopClusterProgress)
        .expect("workflow");
    assert_eq!(result.ancestry.len(), result.genotypes.len());
    for genotype in &result.genotypes {
        let chain = result
            .ancestry
            .lineage_of(&genotype.name)
            .expect("parent chain reaches the root");
        assert!(chain.len() <= result.ancestry.len());
        assert_eq!(chain.last().copied(), Some(ROOT_GENOTYPE));
    }
}

#[test]
fn nested_lineage_sits_inside_the_sweep() {
    let config = LineageConfig {
        distance_cutoff: Some(0.3),
        ..config()
    };
    let result = run_workflow(&population(), &config, &mut lineage::cluster::progress::NoopClusterProgress)
        .expect("workflow");
    let genotype_of = |member: &str| {
        result
            .genotypes
            .iter()
            .find(|g| g.members.iter().any(|m| m == member))
            .map(|g| g.name.clone())
            .expect("member is clustered")
    };
    let sweep = genotype_of("sweep-a");
    let nested = genotype_of("nested-a");
    assert_eq!(genotype_of("sweep-b"), sweep);
    assert_eq!(genotype_of("nested-b"), nested);
    assert_ne!(sweep, nested);
    assert_eq!(result.ancestry.parent_of(&sweep), Some(ROOT_GENOTYPE));
    assert_eq!(result.ancestry.parent_of(&nested), Some(sweep.as_str()));
}

#[test]
fn distances_are_symmetric_for_every_metric() {
    let input = population();
    let metrics = [
        Metric::Binomial,
        Metric::Pearson { adjusted: true },
        Metric::Pearson { adjusted: false },
        Metric::Minkowski { p: 2.0 },
        Metric::Jaccard,
        Metric::Combined,
    ];
    for metric in metrics {
        let calculator = DistanceCalculator::new(DETECTION, FIXED, metric).with_workers(2);
        let cache = calculator.run(&input).expect("distances");
        for a in input.names() {
            for b in input.names() {
                assert_eq!(cache.raw(a, b), cache.raw(b, a), "{metric}: {a}/{b}");
            }
        }
    }
}

#[test]
fn fixed_overlap_is_symmetric() {
    let input = population();
    for (_, left) in input.rows() {
        for (_, right) in input.rows() {
            let (l, r) = (left.to_vec(), right.to_vec());
            assert_eq!(fixed_overlap(&l, &r, FIXED), fixed_overlap(&r, &l, FIXED));
        }
    }
}

#[test]
fn reduce_is_idempotent_on_computed_cache() {
    let input = population();
    let cache = DistanceCalculator::new(DETECTION, FIXED, Metric::Binomial)
        .run(&input)
        .expect("distances");
    let keep = ["sweep-a", "nested-b", "early"];
    let once = cache.reduce(keep);
    assert_eq!(once.reduce(keep), once);
    assert_eq!(once.len(), 3);
}

#[test]
fn square_matrix_round_trip_preserves_distances() {
    let input = abc();
    let cache = DistanceCalculator::new(DETECTION, FIXED, Metric::Binomial)
        .run(&input)
        .expect("distances");
    let names = input.names().to_vec();
    let matrix = cache.to_square_matrix(&names).expect("matrix");
    let rebuilt = DistanceCache::from_square_matrix(&names, matrix.view()).expect("rebuild");
    for a in &names {
        for b in &names {
            assert_abs_diff_eq!(
                rebuilt.get(a, b).unwrap(),
                cache.get(a, b).unwrap(),
                epsilon = 1e-12
            );
        }
    }
}

#[test]
fn invalid_configuration_fails_before_clustering() {
    let config = LineageConfig {
        detection_cutoff: 0.99,
        ..config()
    };
    let mut log = StageLog::default();
    let err = run_workflow(&abc(), &config, &mut log).unwrap_err();
    assert!(matches!(err, WorkflowError::Config(_)));
    assert!(log.started.is_empty());
}

#[test]
fn silent_table_has_nothing_to_cluster() {
    let input = table(&[("quiet", &[0.0, 0.01, 0.0]), ("still", &[0.0, 0.0, 0.02])]);
    let err = run_workflow(&input, &config(), &mut lineage::cluster::progress::NoopClusterProgress)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NothingToCluster));
}
