use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use approx::assert_relative_eq;
use sidm_analysis::config::{NtupleLocations, from_yaml_str};
use sidm_analysis::{AnalysisOutput, CutflowOutput, HistMenu, ProcessorConfig, SelectionMenu, SidmProcessor, run_fileset};
use sidm_ntuple::{BranchSet, Schema, write_branches};

const SELECTIONS: &str = r#"
base: &base
  obj_cuts:
    pvs: [ndof > 4, "|z| < 24 cm"]
    muons: [pT > 10 GeV, "|eta| < 2.4"]
  evt_cuts: [PV filter, ">=2 LJs"]
  lj_cuts: [pT > 30 GeV]
4mu:
  <<: *base
  evt_cuts: [PV filter, ">=2 LJs", 4mu]
"#;

fn tmp_dir() -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let dir = std::env::temp_dir().join(format!("sidm_pipeline_{}_{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Massless vector branches for `obj` from per-event `(pt, phi)` pairs.
fn p4_branches(mut set: BranchSet, obj: &str, events: &[Vec<(f64, f64)>]) -> BranchSet {
    let component = |f: fn(f64, f64) -> f64| -> Vec<Vec<f64>> {
        events.iter().map(|ev| ev.iter().map(|&(pt, phi)| f(pt, phi)).collect()).collect()
    };
    let columns: [(&str, fn(f64, f64) -> f64); 4] = [
        ("X", |pt, phi| pt * phi.cos()),
        ("Y", |pt, phi| pt * phi.sin()),
        ("Z", |_, _| 0.0),
        ("T", |pt, _| pt),
    ];
    for (c, f) in columns {
        set = set.jagged(format!("{obj}_p4/{obj}_p4.fCoordinates.f{c}"), &component(f)).unwrap();
    }
    set.scalar(format!("{obj}_n"), events.iter().map(|e| e.len() as f64).collect()).unwrap()
}

/// Two events: two well separated muon pairs, then a single soft muon.
fn ntuple() -> BranchSet {
    let set = BranchSet::new()
        .scalar("weightProduct", vec![2.0, 3.0])
        .unwrap()
        .scalar("pv_n", vec![1.0, 1.0])
        .unwrap()
        .jagged("pv_ndof", &[vec![10.0], vec![10.0]])
        .unwrap()
        .jagged("pv_z", &[vec![0.0], vec![1.0]])
        .unwrap()
        .jagged("pv_rho", &[vec![0.0], vec![0.0]])
        .unwrap()
        .jagged("muon_charge", &[vec![1.0, -1.0, 1.0, -1.0], vec![1.0]])
        .unwrap()
        .jagged("dsamuon_charge", &[Vec::<f64>::new(), vec![]])
        .unwrap()
        .jagged("electron_charge", &[Vec::<f64>::new(), vec![]])
        .unwrap()
        .jagged("pfjet_muon_n", &[vec![2.0, 2.0], vec![]])
        .unwrap();
    let set = p4_branches(
        set,
        "muon",
        &[vec![(30.0, 0.0), (20.0, 0.05), (25.0, 2.5), (15.0, 2.55)], vec![(12.0, 0.0)]],
    );
    let set = p4_branches(set, "dsamuon", &[vec![], vec![]]);
    let set = p4_branches(set, "electron", &[vec![], vec![]]);
    let set = p4_branches(set, "pfphoton", &[vec![], vec![]]);
    p4_branches(set, "pfjet", &[vec![(50.0, 0.0), (40.0, 2.5)], vec![]])
}

fn processor() -> SidmProcessor {
    let selection_menu: SelectionMenu = from_yaml_str(SELECTIONS).unwrap();
    let hist_menu: HistMenu = from_yaml_str("ljs: [lj_n, lj_pt]").unwrap();
    SidmProcessor::new(ProcessorConfig {
        channel_names: vec!["base".into(), "4mu".into()],
        hist_collection_names: vec!["ljs".into()],
        lj_reco_choices: vec!["0".into(), "0.4".into()],
        unweighted_hist: false,
        selection_menu,
        hist_menu,
    })
    .unwrap()
}

#[test]
fn parquet_ntuple_through_processor() {
    let dir = tmp_dir();
    write_branches(&dir.join("ntuple_0.parquet"), &ntuple()).unwrap();
    let locations: NtupleLocations = from_yaml_str(&format!(
        "ffntuple_v4:\n  path: {}/\n  samples:\n    4Mu_500GeV:\n      path: ''\n      files: [ntuple_0.parquet]\n",
        dir.display()
    ))
    .unwrap();
    let fileset = locations.make_fileset(&["4Mu_500GeV".to_string()], "ffntuple_v4", -1).unwrap();

    let out = run_fileset(&processor(), &fileset, &Schema::default(), 1).unwrap();
    let sample = &out.0["4Mu_500GeV"];
    assert!(matches!(sample.cutflow, CutflowOutput::ByLjReco(_)));

    for lj_reco in ["0", "0.4"] {
        let base = sample.cutflow.get(Some(lj_reco), "base").unwrap();
        assert_eq!(base.cut_breakdown(false, false), vec![5.0, 5.0, 2.0]);
        let four_mu = sample.cutflow.get(Some(lj_reco), "4mu").unwrap();
        assert_eq!(four_mu.cut_breakdown(false, true), vec![2.0, 2.0, 1.0, 1.0]);
        assert_relative_eq!(four_mu.efficiency(), 0.4);
        assert_eq!(sample.counters[lj_reco]["4mu"]["Selected events"], 1);
        assert_eq!(sample.counters[lj_reco]["4mu"]["Lepton jets"], 2);
    }

    let lj_n = &sample.hists["lj_n"];
    assert_eq!(lj_n.axes[0].name(), "lj_reco");
    let clustered = lj_n.category_slice("lj_reco", "0.4").unwrap();
    let base = clustered.category_slice("channel", "base").unwrap();
    assert_relative_eq!(base.sum(), 2.0);

    let table = sample.cutflow.get(Some("0.4"), "4mu").unwrap().render_table(false, false);
    assert!(table.contains(">=2 LJs"));

    let json = serde_json::to_string(&out).unwrap();
    let back: AnalysisOutput = serde_json::from_str(&json).unwrap();
    assert_eq!(back.0["4Mu_500GeV"].cutflow, sample.cutflow);
    assert_eq!(back.0["4Mu_500GeV"].counters, sample.counters);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn unsupported_ntuple_version() {
    let locations = NtupleLocations::default();
    let err = locations.make_fileset(&["x".to_string()], "ffntuple_v1", -1).unwrap_err();
    assert!(matches!(err, sidm_core::Error::NotImplemented(_)));
}
