//! Chunked parallel execution of a [`SidmProcessor`] over a fileset.

use std::collections::BTreeMap;
use std::path::Path;

use rayon::prelude::*;
use sidm_core::{Accumulator, Error, Result};
use sidm_ntuple::{EventRecord, Schema, read_event_record};

use crate::processor::{AnalysisOutput, SidmProcessor};

/// Default number of events per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Process `records` in chunks of `chunk_size` events and merge the outputs.
///
/// Chunks are processed in parallel on the current rayon pool. The first
/// failing chunk aborts the run.
pub fn run_records(
    processor: &SidmProcessor,
    records: &[EventRecord],
    chunk_size: usize,
) -> Result<AnalysisOutput> {
    if chunk_size == 0 {
        return Err(Error::Validation("chunk size must be positive".into()));
    }
    let chunks = records
        .iter()
        .map(|r| r.chunks(chunk_size))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();
    tracing::info!(n_records = records.len(), n_chunks = chunks.len(), chunk_size, "running processor");

    chunks
        .par_iter()
        .map(|chunk| processor.process(chunk))
        .reduce(
            || Ok(AnalysisOutput::default()),
            |a, b| {
                let mut a = a?;
                a.add(&b?)?;
                Ok(a)
            },
        )
}

/// Read every file of `fileset` (`dataset -> paths`), build its record with
/// `schema` and run the processor over all of them.
pub fn run_fileset(
    processor: &SidmProcessor,
    fileset: &BTreeMap<String, Vec<String>>,
    schema: &Schema,
    chunk_size: usize,
) -> Result<AnalysisOutput> {
    let jobs: Vec<(&str, &str)> = fileset
        .iter()
        .flat_map(|(dataset, files)| files.iter().map(move |f| (dataset.as_str(), f.as_str())))
        .collect();
    let records = jobs
        .par_iter()
        .map(|(dataset, file)| {
            tracing::debug!(dataset, file, "reading ntuple");
            read_event_record(Path::new(file), schema, dataset).map_err(Error::from)
        })
        .collect::<Result<Vec<_>>>()?;
    run_records(processor, &records, chunk_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HistMenu, SelectionMenu, from_yaml_str};
    use crate::processor::ProcessorConfig;
    use sidm_ntuple::{BranchSet, build_event_record, write_branches};

    fn branches(weights: Vec<f64>) -> BranchSet {
        let n = weights.len();
        let p4 = |c: &str| format!("pfjet_p4/pfjet_p4.fCoordinates.f{c}");
        BranchSet::new()
            .scalar("weightProduct", weights)
            .unwrap()
            .scalar("pv_n", vec![1.0; n])
            .unwrap()
            .jagged("pv_ndof", &vec![vec![10.0]; n])
            .unwrap()
            .scalar("pfjet_n", vec![2.0; n])
            .unwrap()
            .jagged(&p4("X"), &vec![vec![40.0, -35.0]; n])
            .unwrap()
            .jagged(&p4("Y"), &vec![vec![0.0, 0.0]; n])
            .unwrap()
            .jagged(&p4("Z"), &vec![vec![0.0, 0.0]; n])
            .unwrap()
            .jagged(&p4("T"), &vec![vec![40.0, 35.0]; n])
            .unwrap()
    }

    fn processor() -> SidmProcessor {
        let selection_menu: SelectionMenu =
            from_yaml_str("base:\n  obj_cuts:\n    pvs: [ndof > 4]\n  evt_cuts: [\">=2 LJs\"]\n").unwrap();
        let hist_menu: HistMenu = from_yaml_str("ljs: [lj_pt]").unwrap();
        SidmProcessor::new(ProcessorConfig {
            channel_names: vec!["base".into()],
            hist_collection_names: vec!["ljs".into()],
            lj_reco_choices: vec!["0".into()],
            unweighted_hist: false,
            selection_menu,
            hist_menu,
        })
        .unwrap()
    }

    fn record(dataset: &str, weights: Vec<f64>) -> EventRecord {
        let mut r = build_event_record(branches(weights)).unwrap();
        r.metadata.dataset = dataset.into();
        r
    }

    #[test]
    fn chunking_does_not_change_the_result() {
        let p = processor();
        let records = vec![record("a", vec![1.0, 2.0, 3.0, 4.0, 5.0]), record("b", vec![1.0; 3])];
        let whole = run_records(&p, &records, 100).unwrap();
        let chunked = run_records(&p, &records, 2).unwrap();
        for dataset in ["a", "b"] {
            let (x, y) = (&whole.0[dataset], &chunked.0[dataset]);
            assert_eq!(x.cutflow, y.cutflow);
            assert_eq!(x.counters, y.counters);
            assert_eq!(x.hists["lj_pt"].sumw, y.hists["lj_pt"].sumw);
        }
        let a = whole.0["a"].cutflow.get(None, "base").unwrap();
        assert_eq!(a.cut_breakdown(false, false), vec![15.0, 15.0]);
        assert!(run_records(&p, &records, 0).is_err());
    }

    #[test]
    fn no_records_gives_empty_output() {
        let out = run_records(&processor(), &[], 10).unwrap();
        assert!(out.0.is_empty());
    }

    #[test]
    fn empty_record_keeps_its_dataset() {
        let p = processor();
        let out = run_records(&p, &[record("empty", vec![]), record("full", vec![1.0, 2.0])], 10).unwrap();
        let empty = &out.0["empty"];
        let cutflow = empty.cutflow.get(None, "base").unwrap();
        assert_eq!(cutflow.cut_breakdown(false, true), vec![0.0, 0.0]);
        assert_eq!(cutflow.efficiency(), 0.0);
        assert_eq!(empty.counters["0"]["base"]["Selected events"], 0);
        assert_eq!(empty.hists["lj_pt"].sum(), 0.0);
        assert_eq!(out.0["full"].cutflow.get(None, "base").unwrap().cut_breakdown(false, false), vec![3.0, 3.0]);
    }

    #[test]
    fn fileset_from_parquet_files() {
        let dir = std::env::temp_dir().join(format!(
            "sidm_runner_{}",
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let files: Vec<String> = (0..2)
            .map(|i| {
                let path = dir.join(format!("ntuple_{i}.parquet"));
                write_branches(&path, &branches(vec![1.0, 0.5])).unwrap();
                path.display().to_string()
            })
            .collect();
        let fileset = BTreeMap::from([("sig".to_string(), files)]);
        let out = run_fileset(&processor(), &fileset, &Schema::default(), 1).unwrap();
        let cutflow = out.0["sig"].cutflow.get(None, "base").unwrap();
        assert_eq!(cutflow.cut_breakdown(false, true), vec![4.0, 4.0]);
        assert_eq!(out.0["sig"].counters["0"]["base"]["Selected events"], 4);

        let missing = BTreeMap::from([("sig".to_string(), vec![dir.join("nope.parquet").display().to_string()])]);
        assert!(run_fileset(&processor(), &missing, &Schema::default(), 1).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
