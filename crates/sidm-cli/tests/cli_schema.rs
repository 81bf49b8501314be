use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use sidm_ntuple::{BranchSet, write_branches};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sidm"))
}

fn tmp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    std::env::temp_dir().join(format!("sidm_cli_{}_{}_{}", std::process::id(), nanos, name))
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

#[test]
fn schema_prints_record_structure() {
    let path = tmp_path("schema.parquet");
    let set = BranchSet::new()
        .scalar("event", vec![1.0, 2.0])
        .unwrap()
        .scalar("muon_n", vec![1.0, 0.0])
        .unwrap()
        .jagged("muon_charge", &[vec![1.0], vec![]])
        .unwrap()
        .jagged("muon_d0", &[vec![0.01], vec![]])
        .unwrap();
    write_branches(&path, &set).unwrap();

    let out = run(&["schema", "--input", path.to_str().unwrap()]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("events: 2"), "stdout={stdout}");
    assert!(stdout.contains("muon"), "stdout={stdout}");

    std::fs::remove_file(&path).ok();
}

#[test]
fn schema_missing_file_fails() {
    let out = run(&["schema", "--input", tmp_path("missing.parquet").to_str().unwrap()]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("failed to read"));
}

#[test]
fn version_prints_crate_version() {
    let out = run(&["version"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains(&format!("sidm {}", env!("CARGO_PKG_VERSION"))));
}
