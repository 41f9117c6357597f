//! Pipeline executor.
//!
//! A job moves through `Init → ReadSource → Transform(i) → WriteDestination
//! → Done`. Any error moves it to `Failed`; nothing is retried. Connections
//! are opened per stage and closed before the next one starts.

use crate::action;
use crate::config::{ActionKind, JobConfig, Paths, Role, TRANSFORM_SECTION};
use crate::context::{ExecutionContext, RunContext};
use crate::dataset::Dataset;
use crate::datasource;
use crate::error::PipelineError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Where a job is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    ReadSource,
    Transform(usize),
    WriteDestination,
    Done,
    Failed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Init => f.write_str("init"),
            State::ReadSource => f.write_str("read_source"),
            State::Transform(i) => write!(f, "transform[{}]", i),
            State::WriteDestination => f.write_str("write_destination"),
            State::Done => f.write_str("done"),
            State::Failed => f.write_str("failed"),
        }
    }
}

/// Outcome of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Job name.
    pub job: String,
    /// Records read from the source.
    pub rows_read: usize,
    /// Records written to the destination.
    pub rows_written: usize,
    /// Transform actions executed.
    pub actions_executed: usize,
    /// Wall-clock time.
    pub duration: Duration,
    /// Final state.
    pub state: State,
}

/// Run one loaded job.
pub fn run(ctx: &RunContext) -> Result<RunReport, PipelineError> {
    let start = Instant::now();
    let mut report = RunReport {
        job: ctx.job().to_string(),
        rows_read: 0,
        rows_written: 0,
        actions_executed: 0,
        duration: Duration::ZERO,
        state: State::Init,
    };

    match execute(ctx, &mut report) {
        Ok(()) => {
            report.state = State::Done;
            report.duration = start.elapsed();
            tracing::info!(
                job = %report.job,
                rows_read = report.rows_read,
                rows_written = report.rows_written,
                actions = report.actions_executed,
                elapsed_ms = report.duration.as_millis() as u64,
                "job finished"
            );
            Ok(report)
        }
        Err(e) => {
            tracing::error!(
                job = %report.job,
                state = %report.state,
                class = %e.class(),
                error = %e,
                "job failed"
            );
            Err(e)
        }
    }
}

fn execute(ctx: &RunContext, report: &mut RunReport) -> Result<(), PipelineError> {
    // Init
    let source = ctx.datasource(Role::Source)?;
    let source_kind = source.resolve_kind(Role::Source)?;
    let destination = ctx.config().datasource(Role::Destination);
    if let Some(spec) = destination {
        spec.resolve_kind(Role::Destination)?;
    }
    let actions = ctx.config().section(TRANSFORM_SECTION);
    for (index, action) in actions.iter().enumerate() {
        if let ActionKind::Unknown(tag) = &action.kind {
            tracing::warn!(index, action = %tag, "unknown action type will pass the dataset through");
        }
    }
    tracing::info!(job = %ctx.job(), source = %source_kind, actions = actions.len(), "job started");

    report.state = State::ReadSource;
    let mut dataset = datasource::read_datasource(ctx, source, Role::Source).map_err(|source| {
        PipelineError::Read {
            role: Role::Source,
            source,
        }
    })?;
    report.rows_read = dataset.record_count();
    tracing::info!(job = %ctx.job(), records = report.rows_read, "source read");

    for (index, action) in actions.iter().enumerate() {
        report.state = State::Transform(index);
        dataset = transform(ctx, index, action, dataset)?;
        report.actions_executed += 1;
    }

    report.state = State::WriteDestination;
    if let Some(spec) = destination {
        report.rows_written =
            datasource::write_datasource(ctx, spec, Role::Destination, &dataset).map_err(|source| {
                PipelineError::Write {
                    role: Role::Destination,
                    source,
                }
            })?;
        tracing::info!(job = %ctx.job(), records = report.rows_written, "destination written");
    }
    Ok(())
}

fn transform(
    ctx: &RunContext,
    index: usize,
    action: &crate::config::Action,
    dataset: Dataset,
) -> Result<Dataset, PipelineError> {
    tracing::info!(
        job = %ctx.job(),
        section = TRANSFORM_SECTION,
        index,
        action = %action.label(),
        "running action"
    );
    match action::process(ctx, action, dataset) {
        Ok(Some(next)) if !next.is_null() => Ok(next),
        Ok(_) => Err(PipelineError::NullDataset {
            section: TRANSFORM_SECTION.to_string(),
            index,
            kind: action.kind.to_string(),
        }),
        Err(source) => Err(PipelineError::Action {
            section: TRANSFORM_SECTION.to_string(),
            index,
            kind: action.kind.to_string(),
            source,
        }),
    }
}

/// Job name for a job file: its stem.
pub fn job_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "job".to_string())
}

/// Load and run one job file.
pub fn run_job(path: &Path, paths: &Paths, exec: &ExecutionContext) -> Result<RunReport, PipelineError> {
    let job = job_name(path);
    let config = JobConfig::load(path, paths).inspect_err(|e| {
        tracing::error!(job = %job, error = %e, "failed to load job");
    })?;
    run(&RunContext::new(job, config, exec.clone()))
}

/// Outcome of a multi-job run.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Jobs that finished.
    pub completed: Vec<RunReport>,
    /// Jobs that failed, by name.
    pub failed: Vec<(String, PipelineError)>,
    /// Whether a fatal failure stopped the run early.
    pub aborted: bool,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Job files (`*.yml`, `*.yaml`) of a directory, sorted by file name.
pub fn discover_jobs(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let io_error = |source| PipelineError::Io {
        path: dir.display().to_string(),
        source,
    };
    let mut jobs = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yml") || e.eq_ignore_ascii_case("yaml"));
        if path.is_file() && is_yaml {
            jobs.push(path);
        }
    }
    jobs.sort();
    Ok(jobs)
}

/// Run every job in a directory.
///
/// A job failing in a transform does not stop later jobs; configuration,
/// connection and query failures stop the run.
pub fn run_jobs(dir: &Path, paths: &Paths, exec: &ExecutionContext) -> Result<BatchReport, PipelineError> {
    let jobs = discover_jobs(dir)?;
    tracing::info!(dir = %dir.display(), jobs = jobs.len(), "discovered jobs");

    let mut batch = BatchReport::default();
    for path in &jobs {
        match run_job(path, paths, exec) {
            Ok(report) => batch.completed.push(report),
            Err(e) => {
                let fatal = e.is_fatal_for_run();
                batch.failed.push((job_name(path), e));
                if fatal {
                    tracing::error!(job = %job_name(path), "stopping run");
                    batch.aborted = true;
                    break;
                }
            }
        }
    }
    Ok(batch)
}
