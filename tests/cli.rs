use std::fs;
use std::process::Command;

use tempfile::tempdir;

const TRAJECTORIES: &str = "trajectory\t0\t1\t2\t3\t4\t5\n\
A\t0\t0\t0\t10\t50\t50\n\
B\t0\t10\t15\t3\t0\t0\n\
C\t0\t0\t0\t30\t70\t100\n\
D\t0\t0\t0\t2\t0\t0\n";

#[test]
fn cli_writes_all_outputs() {
    let tmp = tempdir().expect("temporary directory");
    let input = tmp.path().join("trajectories.tsv");
    fs::write(&input, TRAJECTORIES).expect("write trajectories");
    let output = tmp.path().join("out");

    let exe = env!("CARGO_BIN_EXE_lineage");
    let status = Command::new(exe)
        .current_dir(tmp.path())
        .args([
            input.to_str().expect("path str"),
            "--output",
            output.to_str().expect("path str"),
            "--threads",
            "1",
        ])
        .status()
        .expect("run lineage cli");
    assert!(status.success(), "CLI exited with status {status:?}");

    for file in ["genotypes.tsv", "ancestry.tsv", "scores.tsv", "filtered.tsv"] {
        assert!(output.join(file).exists(), "{file} missing");
    }
    let genotypes = fs::read_to_string(output.join("genotypes.tsv")).expect("read genotypes");
    assert!(genotypes.contains("genotype-1\tA|C"), "unexpected genotypes:\n{genotypes}");
    let filtered = fs::read_to_string(output.join("filtered.tsv")).expect("read filtered");
    assert!(filtered.contains("D\tundetected"), "unexpected filtered:\n{filtered}");
}

#[test]
fn cli_reads_config_file() {
    let tmp = tempdir().expect("temporary directory");
    let input = tmp.path().join("trajectories.tsv");
    fs::write(&input, TRAJECTORIES).expect("write trajectories");
    let config = tmp.path().join("lineage.toml");
    fs::write(&config, "distance_cutoff = 10.0\nworker_count = 1\n").expect("write config");
    let output = tmp.path().join("out");

    let status = Command::new(env!("CARGO_BIN_EXE_lineage"))
        .args([
            input.to_str().expect("path str"),
            "--config",
            config.to_str().expect("path str"),
            "--output",
            output.to_str().expect("path str"),
        ])
        .status()
        .expect("run lineage cli");
    assert!(status.success());
    let genotypes = fs::read_to_string(output.join("genotypes.tsv")).expect("read genotypes");
    assert!(genotypes.contains("genotype-1\tA|B|C"), "unexpected genotypes:\n{genotypes}");
}

#[test]
fn cli_reports_bad_input() {
    let tmp = tempdir().expect("temporary directory");
    let input = tmp.path().join("broken.tsv");
    fs::write(&input, "trajectory\t1\t2\nA\t0.1\t0.2\n").expect("write trajectories");

    let result = Command::new(env!("CARGO_BIN_EXE_lineage"))
        .args([input.to_str().expect("path str"), "--output"])
        .arg(tmp.path().join("out"))
        .output()
        .expect("run lineage cli");
    assert!(!result.status.success());
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("Error: The timepoint axis must include timepoint 0."), "{stderr}");

    let result = Command::new(env!("CARGO_BIN_EXE_lineage"))
        .args([input.to_str().expect("path str"), "--metric", "cosine"])
        .output()
        .expect("run lineage cli");
    assert!(!result.status.success());
}
