use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use sidm_ntuple::{BranchSet, write_branches};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sidm"))
}

fn tmp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("sidm_cli_{}_{}_{}", std::process::id(), nanos, name));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

/// Three events with ntuple lepton jets; only the first has two of them.
fn write_ntuple(path: &Path) {
    let p4 = |c: &str| format!("pfjet_p4/pfjet_p4.fCoordinates.f{c}");
    let set = BranchSet::new()
        .scalar("weightProduct", vec![1.0, 2.0, 4.0])
        .unwrap()
        .scalar("pv_n", vec![1.0, 1.0, 1.0])
        .unwrap()
        .jagged("pv_ndof", &[vec![10.0], vec![10.0], vec![10.0]])
        .unwrap()
        .scalar("pfjet_n", vec![2.0, 1.0, 0.0])
        .unwrap()
        .jagged(p4("X"), &[vec![40.0, -35.0], vec![50.0], vec![]])
        .unwrap()
        .jagged(p4("Y"), &[vec![0.0, 0.0], vec![0.0], vec![]])
        .unwrap()
        .jagged(p4("Z"), &[vec![0.0, 0.0], vec![0.0], vec![]])
        .unwrap()
        .jagged(p4("T"), &[vec![40.0, 35.0], vec![50.0], vec![]])
        .unwrap()
        .jagged("pfjet_muon_n", &[vec![2.0, 2.0], vec![2.0], vec![]])
        .unwrap();
    write_branches(path, &set).unwrap();
}

/// Locations, selections and histogram collections for one sample.
fn write_configs(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
    write_ntuple(&dir.join("ntuple_0.parquet"));
    write_ntuple(&dir.join("ntuple_1.parquet"));
    let locations = dir.join("locations.yaml");
    std::fs::write(
        &locations,
        format!(
            "ffntuple_v4:\n  path: {}/\n  samples:\n    sig:\n      path: ''\n      files: [ntuple_0.parquet, ntuple_1.parquet]\n",
            dir.display()
        ),
    )
    .unwrap();
    let selections = dir.join("selections.yaml");
    std::fs::write(
        &selections,
        "base:\n  obj_cuts:\n    pvs: [ndof > 4]\n  evt_cuts: [PV filter, \">=2 LJs\"]\n  lj_cuts: [pT > 30 GeV]\n",
    )
    .unwrap();
    let hists = dir.join("hists.yaml");
    std::fs::write(&hists, "ljs: [lj_n, lj_pt]\n").unwrap();
    (locations, selections, hists)
}

#[test]
fn run_writes_cutflows_and_histograms() {
    let dir = tmp_dir("run");
    let (locations, selections, hists) = write_configs(&dir);
    let out_path = dir.join("out.json");

    let out = run(&[
        "run",
        "--locations",
        locations.to_str().unwrap(),
        "--sample",
        "sig",
        "--channel",
        "base",
        "--hists",
        "ljs",
        "--selections",
        selections.to_str().unwrap(),
        "--hist-collections",
        hists.to_str().unwrap(),
        "--chunk-size",
        "2",
        "--threads",
        "2",
        "--output",
        out_path.to_str().unwrap(),
    ]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));

    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Total cuts: sig"), "stderr={stderr}");
    assert!(stderr.contains(">=2 LJs"), "stderr={stderr}");

    let v: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&out_path).unwrap()).unwrap();
    let flow = v["sig"]["cutflow"]["base"]["flow"].as_array().unwrap();
    let n_all: Vec<f64> = flow.iter().map(|r| r["n_all"].as_f64().unwrap()).collect();
    assert_eq!(n_all, vec![14.0, 14.0, 2.0]);
    assert_eq!(v["sig"]["counters"]["0"]["base"]["Selected events"], 2);
    assert!(v["sig"]["hists"]["lj_pt"].is_object());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn sample_without_files_is_reported() {
    let dir = tmp_dir("no_files");
    let (_, selections, hists) = write_configs(&dir);
    let locations = dir.join("locations_empty.yaml");
    std::fs::write(
        &locations,
        format!(
            "ffntuple_v4:\n  path: {}/\n  samples:\n    sig:\n      path: ''\n      files: [ntuple_0.parquet]\n    bkg:\n      path: ''\n      files: []\n",
            dir.display()
        ),
    )
    .unwrap();

    let out = run(&[
        "run",
        "--locations",
        locations.to_str().unwrap(),
        "--sample",
        "sig",
        "bkg",
        "--hists",
        "ljs",
        "--selections",
        selections.to_str().unwrap(),
        "--hist-collections",
        hists.to_str().unwrap(),
    ]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("no files processed"), "stderr={stderr}");
    assert!(stderr.contains("Total cuts: sig"), "stderr={stderr}");
    assert!(!stderr.contains("Total cuts: bkg"), "stderr={stderr}");

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert!(v["sig"].is_object());
    assert!(v.get("bkg").is_none());
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn run_rejects_unsupported_ntuple_version() {
    let dir = tmp_dir("bad_version");
    let (locations, _, _) = write_configs(&dir);
    let out = run(&[
        "run",
        "--locations",
        locations.to_str().unwrap(),
        "--ntuple-version",
        "ffntuple_v1",
        "--sample",
        "sig",
    ]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("ffntuple_v1"));
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn run_rejects_unknown_channel() {
    let dir = tmp_dir("bad_channel");
    let (locations, selections, hists) = write_configs(&dir);
    let out = run(&[
        "run",
        "--locations",
        locations.to_str().unwrap(),
        "--sample",
        "sig",
        "--channel",
        "nope",
        "--hists",
        "ljs",
        "--selections",
        selections.to_str().unwrap(),
        "--hist-collections",
        hists.to_str().unwrap(),
    ]);
    assert!(!out.status.success());
    std::fs::remove_dir_all(&dir).ok();
}
