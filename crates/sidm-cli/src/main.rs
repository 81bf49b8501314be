//! SIDM CLI

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use sidm_analysis::config::load_yaml;
use sidm_analysis::{
    AnalysisOutput, DEFAULT_CHUNK_SIZE, HistMenu, NtupleLocations, ProcessorConfig,
    SelectionMenu, SidmProcessor, load_schema_config, run_fileset,
};
use sidm_ntuple::{Schema, SchemaConfig};

#[derive(Parser)]
#[command(name = "sidm")]
#[command(about = "SIDM - lepton-jet analysis of FireFighter ntuples")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the processor over samples and print cutflows
    Run {
        /// Ntuple locations (YAML: version -> path, samples -> path, files)
        #[arg(long)]
        locations: PathBuf,

        /// Ntuple version, e.g. ffntuple_v4
        #[arg(long, default_value = "ffntuple_v4")]
        ntuple_version: String,

        /// Samples to process
        #[arg(long = "sample", required = true, num_args = 1..)]
        samples: Vec<String>,

        /// Selection channels
        #[arg(long = "channel", default_values = ["base"], num_args = 1..)]
        channels: Vec<String>,

        /// Histogram collections
        #[arg(long, default_values = ["base"], num_args = 1..)]
        hists: Vec<String>,

        /// Lepton-jet reconstruction choices (0 = ntuple LJs, R > 0 = anti-kt radius)
        #[arg(long = "lj-reco", default_values = ["0"], num_args = 1..)]
        lj_reco: Vec<String>,

        /// Selection menu (YAML). Defaults to the built-in menu.
        #[arg(long)]
        selections: Option<PathBuf>,

        /// Histogram collections (YAML). Defaults to the built-in collections.
        #[arg(long = "hist-collections")]
        hist_collections_file: Option<PathBuf>,

        /// Schema naming conventions (YAML)
        #[arg(long)]
        schema_config: Option<PathBuf>,

        /// Maximum files per sample (negative = all)
        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        max_files: i64,

        /// Events per chunk
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// Threads (0 = auto)
        #[arg(long, default_value = "0")]
        threads: usize,

        /// Fill histograms with unit weights
        #[arg(long)]
        unweighted: bool,

        /// Print cutflows as percentages
        #[arg(long)]
        fraction: bool,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the record structure inferred from a Parquet ntuple
    Schema {
        /// Input ntuple (Parquet)
        #[arg(short, long)]
        input: PathBuf,

        /// Schema naming conventions (YAML)
        #[arg(long)]
        schema_config: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            locations,
            ntuple_version,
            samples,
            channels,
            hists,
            lj_reco,
            selections,
            hist_collections_file,
            schema_config,
            max_files,
            chunk_size,
            threads,
            unweighted,
            fraction,
            output,
        } => {
            let menus = Menus {
                selections: selections.as_deref(),
                hist_collections: hist_collections_file.as_deref(),
                schema_config: schema_config.as_deref(),
            };
            let config = ProcessorConfig {
                channel_names: channels,
                hist_collection_names: hists,
                lj_reco_choices: lj_reco,
                unweighted_hist: unweighted,
                selection_menu: menus.selection_menu()?,
                hist_menu: menus.hist_menu()?,
            };
            let schema = Schema::new(menus.schema_config()?);
            cmd_run(
                &locations,
                &ntuple_version,
                &samples,
                config,
                &schema,
                RunOptions { max_files, chunk_size, threads, fraction },
                output.as_ref(),
            )
        }
        Commands::Schema { input, schema_config } => {
            let menus = Menus { selections: None, hist_collections: None, schema_config: schema_config.as_deref() };
            cmd_schema(&input, &Schema::new(menus.schema_config()?))
        }
        Commands::Version => {
            println!("sidm {}", sidm_core::VERSION);
            Ok(())
        }
    }
}

/// Optional YAML overrides of the built-in menus.
struct Menus<'a> {
    selections: Option<&'a Path>,
    hist_collections: Option<&'a Path>,
    schema_config: Option<&'a Path>,
}

impl Menus<'_> {
    fn selection_menu(&self) -> Result<SelectionMenu> {
        match self.selections {
            Some(path) => load_yaml(path).with_context(|| format!("failed to load selections {}", path.display())),
            None => Ok(SelectionMenu::builtin()?),
        }
    }

    fn hist_menu(&self) -> Result<HistMenu> {
        match self.hist_collections {
            Some(path) => {
                load_yaml(path).with_context(|| format!("failed to load histogram collections {}", path.display()))
            }
            None => Ok(HistMenu::builtin()?),
        }
    }

    fn schema_config(&self) -> Result<SchemaConfig> {
        match self.schema_config {
            Some(path) => {
                load_schema_config(path).with_context(|| format!("failed to load schema config {}", path.display()))
            }
            None => Ok(SchemaConfig::default()),
        }
    }
}

struct RunOptions {
    max_files: i64,
    chunk_size: usize,
    threads: usize,
    fraction: bool,
}

fn cmd_run(
    locations: &Path,
    ntuple_version: &str,
    samples: &[String],
    config: ProcessorConfig,
    schema: &Schema,
    opts: RunOptions,
    output: Option<&PathBuf>,
) -> Result<()> {
    if opts.threads > 0
        && let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(opts.threads).build_global()
    {
        tracing::warn!(threads = opts.threads, error = %e, "cannot configure the global thread pool");
    }

    let locations: NtupleLocations = load_yaml(locations)
        .with_context(|| format!("failed to load ntuple locations {}", locations.display()))?;
    let fileset = locations.make_fileset(samples, ntuple_version, opts.max_files)?;
    tracing::info!(
        samples = samples.len(),
        files = fileset.values().map(Vec::len).sum::<usize>(),
        "fileset ready"
    );

    let processor = SidmProcessor::new(config)?;
    let start = std::time::Instant::now();
    let out = run_fileset(&processor, &fileset, schema, opts.chunk_size)?;
    tracing::info!(wall_time_s = start.elapsed().as_secs_f64(), "run finished");

    eprint!("{}", cutflow_tables(&out, samples, processor.config(), opts.fraction)?);
    write_json(output, serde_json::to_value(&out)?)
}

/// One table per (lj_reco, channel), samples side by side.
fn cutflow_tables(out: &AnalysisOutput, samples: &[String], config: &ProcessorConfig, fraction: bool) -> Result<String> {
    let lj_recos: Vec<Option<&str>> = if config.lj_reco_choices.len() > 1 {
        config.lj_reco_choices.iter().map(|r| Some(r.as_str())).collect()
    } else {
        vec![None]
    };
    let (present, missing): (Vec<&str>, Vec<&str>) =
        samples.iter().map(String::as_str).partition(|s| out.0.contains_key(*s));
    for sample in missing {
        tracing::warn!(sample, "no files processed for sample, no cutflow to print");
    }
    let mut text = String::new();
    for lj_reco in lj_recos {
        for channel in &config.channel_names {
            let cutflows = present
                .iter()
                .map(|s| out.0[*s].cutflow.get(lj_reco, channel))
                .collect::<Option<Vec<_>>>();
            let Some(cutflows) = cutflows else {
                bail!("cutflow for channel '{channel}' is missing from the output");
            };
            let Some((first, others)) = cutflows.split_first() else {
                continue;
            };
            let title = match lj_reco {
                Some(r) => format!("{channel} (lj_reco = {r})"),
                None => channel.clone(),
            };
            text.push_str(&first.render_multi_table(others, &present, fraction, false, &title));
            text.push('\n');
        }
    }
    Ok(text)
}

fn cmd_schema(input: &Path, schema: &Schema) -> Result<()> {
    let branches = sidm_ntuple::read_branches(input).with_context(|| format!("failed to read {}", input.display()))?;
    let (record, report) = schema.build_with_report(branches)?;
    tracing::info!(
        branches = report.n_input_branches,
        consumed_counts = report.consumed_counts.len(),
        "schema built"
    );
    println!("{}", record.describe());
    Ok(())
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
