use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use kraken_tsv_report::error::{ReportError, Result};
use kraken_tsv_report::kraken_tsv::read_kraken_records;
use kraken_tsv_report::report::TsvReportSink;
use kraken_tsv_report::taxdb::{CachedResolver, LineageResolver, TaxDbResolver, TaxonkitResolver};
use kraken_tsv_report::{build_report, ReportOptions};

/// Parse the TSV output from Kraken2 and generate its taxonomy report
#[derive(Parser, Debug)]
#[command(name = "kraken-tsv-report", version)]
struct Cli {
    /// Kraken2 per-read output file(s), optionally gzipped
    #[arg(value_name = "TSV", required = true)]
    inputs: Vec<PathBuf>,

    /// Output report file; a directory when several inputs are given [default: stdout]
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Minimum confidence for a classified read to be counted
    #[arg(short = 'm', long = "min-confidence", default_value_t = 0.0)]
    min_confidence: f64,

    /// Minimum number of clade reads for a taxon to be reported
    #[arg(long = "min-support", default_value_t = 0)]
    min_support: u64,

    /// Stop after this many reads (0 = all)
    #[arg(short = 'x', long = "max-reads", default_value_t = 0)]
    max_reads: usize,

    /// krakenuniq-style taxDB file (taxid, parent, name, rank); used instead of taxonkit
    #[arg(long = "taxdb")]
    taxdb: Option<PathBuf>,

    /// taxonkit executable used for lineage lookups
    #[arg(long = "taxonkit", default_value = "taxonkit")]
    taxonkit: PathBuf,

    /// Seconds to wait for taxonkit before giving up
    #[arg(long = "resolver-timeout", default_value_t = 600)]
    resolver_timeout: u64,

    /// Worker threads (0 = one per core)
    #[arg(short = 't', long = "threads", default_value_t = 0)]
    threads: usize,
}

fn spinner(color: &str, msg: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let template = format!("{{spinner:.{color}}} {{msg}}");
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
        .template(&template)
    {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(msg.to_string());
    spinner
}

/// Where the report for `input` goes; `None` is stdout.
fn report_destination(input: &Path, output: Option<&Path>, several: bool) -> Option<PathBuf> {
    let file_name = input.file_name().map(|n| n.to_string_lossy().into_owned());
    match (output, several) {
        (None, false) => None,
        (Some(out), false) => Some(out.to_path_buf()),
        (Some(dir), true) => Some(dir.join(format!("{}.report", file_name.unwrap_or_default()))),
        (None, true) => {
            let mut path = input.as_os_str().to_owned();
            path.push(".report");
            Some(PathBuf::from(path))
        }
    }
}

fn run_one<R: LineageResolver>(
    input: &Path,
    destination: Option<PathBuf>,
    resolver: &R,
    options: &ReportOptions,
) -> Result<()> {
    if !input.exists() {
        return Err(ReportError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("TSV file {} does not exist", input.display()),
        )));
    }

    let sp = spinner("blue", &format!("Reading {}...", input.display()));
    let records = read_kraken_records(input, options.max_reads)?;
    sp.finish_with_message(format!("Read {} records from {}.", records.len(), input.display()));

    let sp = spinner("green", "Resolving lineages and aggregating...");
    let results = build_report(&records, resolver, options);
    sp.finish_and_clear();
    let results = results?;

    let sp = spinner("yellow", "Writing report...");
    match destination {
        Some(path) => {
            let writer = BufWriter::new(File::create(&path)?);
            results.write_to(&mut TsvReportSink::new(writer))?;
            sp.finish_with_message(format!("Report written to {}.", path.display()));
        }
        None => {
            sp.finish_and_clear();
            let stdout = io::stdout();
            let mut sink = TsvReportSink::new(stdout.lock());
            results.write_to(&mut sink)?;
            sink.into_inner().flush()?;
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .map_err(|e| ReportError::Config(e.to_string()))?;
    }

    let options = ReportOptions {
        min_confidence: cli.min_confidence,
        min_support: cli.min_support,
        max_reads: cli.max_reads,
    };
    options.validate()?;

    let several = cli.inputs.len() > 1;
    if several {
        if let Some(dir) = &cli.output {
            fs::create_dir_all(dir)?;
        }
    }

    let resolver: Box<dyn LineageResolver> = match &cli.taxdb {
        Some(path) => {
            let sp = spinner("cyan", "Loading taxDB...");
            let db = TaxDbResolver::open(path)?;
            sp.finish_with_message(format!("Loaded taxDB {}.", path.display()));
            Box::new(db)
        }
        None => Box::new(TaxonkitResolver::new(
            cli.taxonkit.clone(),
            Duration::from_secs(cli.resolver_timeout),
        )),
    };
    let resolver = CachedResolver::new(resolver);

    for input in &cli.inputs {
        let destination = report_destination(input, cli.output.as_deref(), several);
        run_one(input, destination, &resolver, &options)?;
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
