use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use sidm_ntuple::{BranchSet, Schema, VectorKind, read_branches, read_event_record, write_branches};

fn tmp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    std::env::temp_dir().join(format!("sidm_ntuple_{name}_{}_{}.parquet", std::process::id(), nanos))
}

/// Three events in the FireFighter branch layout.
fn ffntuple_branches() -> BranchSet {
    let p4 = |c: &str| format!("muon_p4/muon_p4.fCoordinates.f{c}");
    BranchSet::new()
        .scalar("event", vec![1.0, 2.0, 3.0])
        .unwrap()
        .scalar("weightProduct", vec![0.5, 1.0, 2.0])
        .unwrap()
        .scalar("HLT_DoubleL2Mu23NoVtx_2Cha", vec![1.0, 1.0, 0.0])
        .unwrap()
        .scalar("pv_n", vec![1.0, 2.0, 1.0])
        .unwrap()
        .jagged("pv_ndof", &[vec![10.0], vec![3.0, 12.0], vec![7.0]])
        .unwrap()
        .jagged("pv_z", &[vec![1.0], vec![30.0, 2.0], vec![-3.0]])
        .unwrap()
        .scalar("muon_n", vec![2.0, 0.0, 1.0])
        .unwrap()
        .jagged(p4("X"), &[vec![10.0, 0.0], vec![], vec![3.0]])
        .unwrap()
        .jagged(p4("Y"), &[vec![0.0, 20.0], vec![], vec![4.0]])
        .unwrap()
        .jagged(p4("Z"), &[vec![0.0, 0.0], vec![], vec![0.0]])
        .unwrap()
        .jagged(p4("T"), &[vec![10.0, 20.0], vec![], vec![5.0]])
        .unwrap()
        .jagged("muon_charge", &[vec![1.0, -1.0], vec![], vec![1.0]])
        .unwrap()
        .scalar("pfjet_n", vec![1.0, 0.0, 0.0])
        .unwrap()
        .jagged("pfjet_pfcands_n", &[vec![2.0], vec![], vec![]])
        .unwrap()
        .jagged("pfjet_pfcand_type", &[vec![3.0, 3.0], vec![], vec![]])
        .unwrap()
        .jagged("pfjet_pfcand_charge", &[vec![1.0, -1.0], vec![], vec![]])
        .unwrap()
}

#[test]
fn parquet_file_to_event_record() {
    let path = tmp_path("record");
    let input = ffntuple_branches();
    let n_branches = input.len();
    write_branches(&path, &input).unwrap();

    let back = read_branches(&path).unwrap();
    assert_eq!(back, input);

    let record = read_event_record(&path, &Schema::default(), "2Mu2E_100GeV").unwrap();
    assert_eq!(record.n_events, 3);
    assert_eq!(record.metadata.dataset, "2Mu2E_100GeV");
    assert!(record.metadata.source.is_some());

    let muon = record.collection("muon").unwrap();
    assert_eq!(muon.kind, VectorKind::LorentzVector);
    assert_eq!(muon.counts(), vec![2, 0, 1]);

    let jets = record.collection("pfjet").unwrap();
    let cands = jets.child("pfjet_pfcand").unwrap();
    assert_eq!(cands.n_elements(), 2);

    let (record, report) = Schema::default().build_with_report(back).unwrap();
    assert_eq!(record.n_leaves() + report.consumed_counts.len(), n_branches);

    let text = record.describe();
    assert!(text.starts_with("events: 3"));
    assert!(text.contains("  pfjet_pfcand"));

    std::fs::remove_file(&path).ok();
}

#[test]
fn chunked_records_cover_all_events() {
    let record = Schema::default().build(ffntuple_branches()).unwrap();
    let chunks = record.chunks(2).unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[1].metadata.entry_start, 2);
    let muons: usize =
        chunks.iter().map(|c| c.collection("muon").unwrap().n_elements()).sum();
    assert_eq!(muons, 3);
}
