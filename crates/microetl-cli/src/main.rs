//! microetl CLI - run ETL jobs from YAML files

mod logging;

use anyhow::{Context, Result, bail};
use clap::Parser;
use microetl::{BatchReport, ExecutionContext, Paths, RunReport};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "microetl")]
#[command(version, about = "Configuration-driven ETL pipelines", long_about = None)]
struct Cli {
    /// Jobs directory, or a single job file [default: <base>/jobs]
    #[arg(short, long = "jobs", value_name = "PATH")]
    jobs: Option<PathBuf>,

    /// Base directory [default: current directory]
    #[arg(short, long, value_name = "DIR")]
    base: Option<PathBuf>,

    /// Input data directory [default: <base>/inp_data]
    #[arg(short, long, value_name = "DIR")]
    inp: Option<PathBuf>,

    /// Output data directory [default: <base>/out_data]
    #[arg(short, long, value_name = "DIR")]
    out: Option<PathBuf>,

    /// More log output (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn paths(&self) -> Result<Paths> {
        let base = match &self.base {
            Some(base) => base.clone(),
            None => std::env::current_dir().context("Failed to read current directory")?,
        };
        let mut paths = Paths::under(base);
        if let Some(jobs) = &self.jobs {
            let dir = if jobs.is_file() {
                jobs.parent().map(Path::to_path_buf).unwrap_or_default()
            } else {
                jobs.clone()
            };
            paths = paths.with_cfg(dir);
        }
        if let Some(inp) = &self.inp {
            paths = paths.with_inp(inp);
        }
        if let Some(out) = &self.out {
            paths = paths.with_out(out);
        }
        Ok(paths)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(logging::level(cli.verbose, cli.quiet));

    let paths = cli.paths()?;
    let exec = ExecutionContext::new().with_formats(microetl_formats::registry());

    match &cli.jobs {
        Some(file) if file.is_file() => cmd_job(file, &paths, &exec),
        _ => cmd_jobs(&paths, &exec),
    }
}

fn cmd_job(file: &Path, paths: &Paths, exec: &ExecutionContext) -> Result<()> {
    let report = microetl::run_job(file, paths, exec)
        .with_context(|| format!("Job {} failed", file.display()))?;
    print_report(&report);
    Ok(())
}

fn cmd_jobs(paths: &Paths, exec: &ExecutionContext) -> Result<()> {
    let dir = &paths.cfg_path;
    let batch = microetl::run_jobs(dir, paths, exec)
        .with_context(|| format!("Failed to run jobs in {}", dir.display()))?;

    for report in &batch.completed {
        print_report(report);
    }
    summarize(&batch)
}

fn print_report(report: &RunReport) {
    println!(
        "{}: {} read, {} written, {} actions in {:.2?}",
        report.job, report.rows_read, report.rows_written, report.actions_executed, report.duration
    );
}

fn summarize(batch: &BatchReport) -> Result<()> {
    for (job, error) in &batch.failed {
        eprintln!("{}: FAILED ({}): {}", job, error.class(), error);
    }
    let total = batch.completed.len() + batch.failed.len();
    if batch.aborted {
        let last = batch.failed.last().map(|(job, _)| job.as_str()).unwrap_or_default();
        bail!("Run stopped at job {}", last);
    }
    if !batch.is_success() {
        bail!("{} of {} jobs failed", batch.failed.len(), total);
    }
    println!("Total: {} jobs", total);
    Ok(())
}
