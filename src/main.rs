// ========================================================================================
//
//                      LINEAGE: GENOTYPES AND ANCESTRY FROM TRAJECTORIES
//
// ========================================================================================
//
// Reads a table of mutation frequencies over time, groups the mutations into genotypes,
// infers which genotype arose in the background of which, and writes the results as
// tab-separated files next to each other in one output directory.

use clap::Parser;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use lineage::cluster::progress::{ClusterProgressObserver, ClusterProgressStage};
use lineage::shared::io::{read_trajectory_table, write_outputs};
use lineage::{LineageConfig, Metric, run_workflow};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

// ========================================================================================
//                         COMMAND-LINE INTERFACE DEFINITION
// ========================================================================================

#[derive(Parser, Debug)]
#[clap(
    name = "lineage",
    version,
    about = "Cluster mutation trajectories into genotypes and infer their ancestry."
)]
struct Args {
    /// Tab-separated table: trajectory names, then one column per timepoint.
    input: PathBuf,

    /// TOML configuration file. Flags below override its values.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Directory for genotypes.tsv, ancestry.tsv, scores.tsv and filtered.tsv.
    #[clap(long, default_value = "lineage_output")]
    output: PathBuf,

    /// Frequencies at or below this are undetected.
    #[clap(long)]
    detection: Option<f64>,

    /// Frequencies above this are fixed.
    #[clap(long)]
    fixed: Option<f64>,

    /// Distance metric (binomial, pearson, pearson:raw, minkowski[:p], jaccard, combined).
    #[clap(long)]
    metric: Option<Metric>,

    /// Cut the linkage tree at this distance instead of inferring the cut.
    #[clap(long)]
    distance_cutoff: Option<f64>,

    /// Worker threads for pairwise distances (0 uses every CPU).
    #[clap(long)]
    threads: Option<usize>,

    /// Flag genotypes detected at a background's fixation point at all.
    #[clap(long)]
    strict: bool,

    /// Upper bound on cluster/validate rounds.
    #[clap(long)]
    max_iterations: Option<usize>,
}

/// Spinner per workflow stage, drawn only when stderr is a terminal.
struct SpinnerProgress {
    bar: Option<ProgressBar>,
}

impl SpinnerProgress {
    fn new() -> Self {
        Self { bar: None }
    }
}

impl ClusterProgressObserver for SpinnerProgress {
    fn on_stage_start(&mut self, stage: ClusterProgressStage, total: usize) {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(total as u64), draw_target);
        if let Ok(style) = ProgressStyle::with_template("> [{elapsed_precise}] {spinner} {msg} ({pos}/{len} {prefix})") {
            bar.set_style(style);
        }
        bar.set_message(stage.describe());
        bar.set_prefix(stage.unit());
        bar.enable_steady_tick(Duration::from_millis(100));
        self.bar = Some(bar);
    }

    fn on_stage_advance(&mut self, _stage: ClusterProgressStage, processed: usize) {
        if let Some(bar) = &self.bar {
            bar.set_position(processed as u64);
        }
    }

    fn on_stage_finish(&mut self, _stage: ClusterProgressStage) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

fn load_config(args: &Args) -> Result<LineageConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => LineageConfig::load(path)?,
        None => LineageConfig::default(),
    };
    if let Some(detection) = args.detection {
        config.detection_cutoff = detection;
    }
    if let Some(fixed) = args.fixed {
        config.fixed_cutoff = fixed;
    }
    if let Some(metric) = args.metric {
        config.metric = metric;
    }
    if args.distance_cutoff.is_some() {
        config.distance_cutoff = args.distance_cutoff;
    }
    if let Some(threads) = args.threads {
        config.worker_count = threads;
    }
    if args.strict {
        config.strict_filter = true;
    }
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(args)?;
    let table = read_trajectory_table(&args.input)?;
    eprintln!(
        "> Loaded {} trajectories over {} timepoints from {}",
        table.len(),
        table.timepoints().len(),
        args.input.display()
    );

    let mut progress = SpinnerProgress::new();
    let result = run_workflow(&table, &config, &mut progress)?;
    if !result.converged {
        log::warn!(
            "Clustering did not settle within {} iterations; results use the last clustering.",
            config.max_iterations
        );
    }

    let written = write_outputs(&args.output, &result)?;
    eprintln!(
        "> {} genotypes, {} filtered trajectories, {} iterations",
        result.genotypes.len(),
        result.filtered.len(),
        result.iterations
    );
    for path in written {
        eprintln!("> Wrote {}", path.display());
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
