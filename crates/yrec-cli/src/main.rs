//! YREC batch tooling CLI
//!
//! ## Commands
//!
//! - `run`: execute every `.nml1`/`.nml2` pair in the given directories in parallel
//! - `fix-namelists`: point namelist file entries at a local YREC tree
//! - `tracks`: load `.track` files and build subgiant, EEP and isochrone groupings

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use yrec_batch::{
    locate_runs, BatchReport, BatchRunner, FailureSignal, JobResult, ModelCommand, WorkerPolicy,
};
use yrec_core::{
    load_catalog, NamelistResolver, TrackCatalog, TrackGroups, TrackLoadPlan, VersionMarkerReader,
};

#[derive(Parser)]
#[command(name = "yrec")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Batch runner and track classifier for YREC", long_about = None)]
struct Cli {
    /// Enable verbose output (full model output, debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every namelist pair found in the given directories
    Run(RunArgs),

    /// Rewrite file paths inside .nml1/.nml2 files
    FixNamelists {
        /// Directory containing the namelists (searched recursively)
        dir: PathBuf,

        /// YREC root directory; must contain an `input` directory
        #[arg(long, env = "YREC_ROOT")]
        root: PathBuf,

        /// Directory that output files (.track, .last, ...) should point to
        #[arg(long)]
        outpath: Option<PathBuf>,
    },

    /// Load .track files and group them
    Tracks(TracksArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Directories holding .nml1/.nml2 pairs
    #[arg(required = true)]
    run_dirs: Vec<PathBuf>,

    /// YREC executable
    #[arg(long, env = "YREC_BINARY", default_value = "./model5.1c")]
    binary: PathBuf,

    /// Directory the executable runs in
    #[arg(long, env = "YREC_WORK_DIR", default_value = ".")]
    work_dir: PathBuf,

    /// Number of parallel runs (default: CPUs minus --reserve)
    #[arg(long, allow_negative_numbers = true)]
    workers: Option<i64>,

    /// CPUs to leave free when --workers is not given
    #[arg(long, default_value_t = 3)]
    reserve: usize,

    /// Kill a run after this many seconds (default: wait forever)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// What marks a run as failed
    #[arg(long, value_enum, default_value_t = SignalArg::StderrText)]
    failure_signal: SignalArg,

    /// Write the full batch report as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Fix namelist paths before running
    #[arg(long, requires = "root")]
    fix_namelists: bool,

    /// YREC root directory for --fix-namelists
    #[arg(long, env = "YREC_ROOT")]
    root: Option<PathBuf>,

    /// Output directory for --fix-namelists
    #[arg(long)]
    outpath: Option<PathBuf>,
}

#[derive(clap::Args)]
struct TracksArgs {
    /// Directories to search for .track files
    #[arg(required = true)]
    track_dirs: Vec<PathBuf>,

    /// Only look at files directly inside each directory
    #[arg(long)]
    no_recursive: bool,

    /// Do not build subgiant bundles
    #[arg(long)]
    skip_subgiants: bool,

    /// Do not build EEP (mass) groups
    #[arg(long)]
    skip_eeps: bool,

    /// Do not build isochrone (age) groups
    #[arg(long)]
    skip_isochrones: bool,

    /// Decimal places for age rounding (minimum 1)
    #[arg(long, default_value_t = 2, allow_negative_numbers = true)]
    iso_round: i64,

    /// Write the catalog as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SignalArg {
    /// Any text on stderr
    StderrText,
    /// Non-zero exit status
    ExitStatus,
    /// Either of the above
    Either,
}

impl From<SignalArg> for FailureSignal {
    fn from(arg: SignalArg) -> Self {
        match arg {
            SignalArg::StderrText => FailureSignal::StderrText,
            SignalArg::ExitStatus => FailureSignal::ExitStatus,
            SignalArg::Either => FailureSignal::Either,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    yrec_core::init_tracing(cli.json, yrec_core::level_for(cli.verbose));

    match cli.command {
        Commands::Run(args) => cmd_run(args, cli.verbose).await,
        Commands::FixNamelists { dir, root, outpath } => {
            cmd_fix_namelists(&dir, &root, outpath.as_deref())
        }
        Commands::Tracks(args) => cmd_tracks(args),
    }
}

/// Execute all namelist pairs in parallel
async fn cmd_run(args: RunArgs, verbose: bool) -> Result<()> {
    if args.fix_namelists {
        let root = args
            .root
            .as_deref()
            .context("--fix-namelists needs --root")?;
        for dir in &args.run_dirs {
            cmd_fix_namelists(dir, root, args.outpath.as_deref())?;
        }
    }

    let located = locate_runs(&args.run_dirs).context("No runs to execute")?;
    for nml1 in &located.unmatched {
        println!("⚠ No matching .nml2 for {}", nml1.display());
    }

    let mut command = ModelCommand::new(&args.binary, &args.work_dir)
        .with_failure_signal(args.failure_signal.into());
    if let Some(secs) = args.timeout_secs {
        command = command.with_timeout(Duration::from_secs(secs));
    }

    let policy = WorkerPolicy {
        reserve: args.reserve,
        workers: args.workers,
    };
    let runner = BatchRunner::new(Arc::new(command), policy);

    println!(
        "Running {} YREC runs from {} director{}",
        located.runs.len(),
        args.run_dirs.len(),
        if args.run_dirs.len() == 1 { "y" } else { "ies" }
    );

    let report = runner
        .run_with_progress(located.runs, |result, done, total| {
            print_result(result, done, total, verbose)
        })
        .await;

    print_summary(&report);

    if let Some(path) = &args.report {
        write_json(path, &report)?;
        info!(path = %path.display(), "Wrote batch report");
    }

    if !report.all_passed() {
        anyhow::bail!(
            "{} of {} runs failed",
            report.failed_count(),
            report.len()
        );
    }
    Ok(())
}

fn print_result(result: &JobResult, done: usize, total: usize, verbose: bool) {
    if verbose {
        println!("\n[{done}/{total}] Finished: {}", result.command_line());
        if result.succeeded() {
            println!("Output:\n{}", result.stdout);
        } else {
            println!("Error:\n{}", result.stderr);
        }
    }

    if result.succeeded() {
        println!("[{done}/{total}] ✓ Finished {}", result.run_id);
    } else {
        println!(
            "[{done}/{total}] ✗ Error while running {} (see logs)",
            result.run_id
        );
    }
}

fn print_summary(report: &BatchReport) {
    println!();
    println!("Batch: {}", report.batch_id);
    println!("Workers: {}", report.worker_count);
    println!("Duration: {}ms", report.duration_ms);
    println!(
        "Status: {}",
        if report.all_passed() {
            "✓ PASSED"
        } else {
            "✗ FAILED"
        }
    );
    println!(
        "  {} succeeded, {} failed",
        report.passed_count(),
        report.failed_count()
    );
    for failed in report.failed() {
        let first_line = failed.stderr.lines().next().unwrap_or("").trim();
        println!("  ✗ {}: {}", failed.run_id, first_line);
    }
}

/// Rewrite namelist paths under one directory
fn cmd_fix_namelists(dir: &Path, root: &Path, outpath: Option<&Path>) -> Result<()> {
    let mut resolver = NamelistResolver::new(root);
    if let Some(out) = outpath {
        resolver = resolver.with_outpath(out);
    }

    let report = resolver.fix_directory(dir);
    println!(
        "Namelists in {}: {} updated, {} unchanged, {} failed",
        dir.display(),
        report.updated.len(),
        report.unchanged.len(),
        report.failed.len()
    );
    for (path, err) in &report.failed {
        println!("  ✗ {}: {}", path.display(), err);
    }
    Ok(())
}

impl TracksArgs {
    fn plan(&self) -> TrackLoadPlan {
        TrackLoadPlan {
            recursive: !self.no_recursive,
            load_all_tracks: true,
            load_subgiants: !self.skip_subgiants,
            load_eeps: !self.skip_eeps,
            load_isochrones: !self.skip_isochrones,
            iso_round: self.iso_round,
        }
    }
}

/// Load and classify tracks
fn cmd_tracks(args: TracksArgs) -> Result<()> {
    let catalog = load_catalog(&args.track_dirs, &args.plan(), VersionMarkerReader)
        .context("Track classification failed")?;

    print_catalog(&catalog);

    if let Some(path) = &args.output {
        write_json(path, &catalog)?;
        println!("\nCatalog written to {}", path.display());
    }
    Ok(())
}

fn print_catalog(catalog: &TrackCatalog) {
    if let Some(stars) = &catalog.star_lists {
        println!("Track bundles: {}", stars.len());
        for (name, tracks) in stars {
            println!("  {name}: {} tracks", tracks.len());
        }
    }
    if !catalog.skipped.is_empty() {
        println!("Skipped files: {}", catalog.skipped.len());
        for s in &catalog.skipped {
            println!("  ✗ {}: {}", s.path.display(), s.reason);
        }
    }
    print_groups("Subgiant bundles", catalog.subgiant_star_lists.as_ref());
    print_groups("EEP groups", catalog.eep_lists.as_ref());
    print_groups("Isochrones", catalog.isochrone_lists.as_ref());
}

fn print_groups(title: &str, groups: Option<&TrackGroups>) {
    let Some(groups) = groups else {
        return;
    };
    println!("{title}: {}", groups.len());
    for (label, tracks) in groups {
        let rows: usize = tracks.iter().map(|t| t.len()).sum();
        println!("  {label}: {} tracks, {rows} rows", tracks.len());
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
