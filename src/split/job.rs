use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::naming::NamingTemplate;
use super::output::{CollisionPolicy, PartWriter};
use super::plan::{Plan, partition};
use crate::archive::{self, ArchiveFormat, ComicArchive, Entry, OpenOptions, Source};
use crate::error::SplitError;
use crate::zip::CompressionMethod;

/// Part count used when the caller does not choose one.
pub const DEFAULT_PARTS: usize = 2;

/// One split of one source archive.
#[derive(Debug, Clone)]
pub struct SplitJob {
    pub source: Source,
    pub output_dir: PathBuf,
    pub template: NamingTemplate,
    pub parts: usize,
    pub collision: CollisionPolicy,
    pub compression: CompressionMethod,
    /// Store entries under their base name only.
    pub flatten: bool,
}

impl SplitJob {
    /// A job with default settings: two parts named `<stem>-part<n>.cbz`,
    /// stored (uncompressed) members, failing on existing files.
    pub fn new(source: Source, output_dir: impl Into<PathBuf>) -> Self {
        let stem = source.stem().unwrap_or_else(|| "comic".to_string());
        Self {
            template: NamingTemplate::for_stem(&stem),
            source,
            output_dir: output_dir.into(),
            parts: DEFAULT_PARTS,
            collision: CollisionPolicy::Fail,
            compression: CompressionMethod::Stored,
            flatten: false,
        }
    }

    pub fn with_parts(mut self, parts: usize) -> Self {
        self.parts = parts;
        self
    }

    pub fn with_template(mut self, template: NamingTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_collision(mut self, collision: CollisionPolicy) -> Self {
        self.collision = collision;
        self
    }

    pub fn with_compression(mut self, compression: CompressionMethod) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_flatten(mut self, flatten: bool) -> Self {
        self.flatten = flatten;
        self
    }

    /// Output file names for `plan`, in part order.
    pub fn part_names(&self, plan: &Plan) -> Result<Vec<String>, SplitError> {
        let stem = self.source.stem().unwrap_or_default();
        let total = plan.effective();
        (1..=total)
            .map(|i| self.template.render(i, total, &stem))
            .collect()
    }
}

/// A successful split.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub format: ArchiveFormat,
    pub plan: Plan,
    /// Written parts, in part order.
    pub output_paths: Vec<PathBuf>,
}

/// A failed split, with the parts that were completed before the failure.
///
/// Completed parts are left on disk; the part being written when the error
/// occurred is removed.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct JobFailure {
    pub error: SplitError,
    /// Stage the job was in when it failed.
    pub state: JobState,
    pub completed: Vec<PathBuf>,
}

/// Cooperative cancellation, checked between parts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Stages of a split, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Reading,
    Partitioning,
    /// Writing part `n` (1-based).
    Writing(usize),
    Done,
    Failed,
}

struct Progress<F: FnMut(f64)> {
    callback: F,
    done: usize,
    total: usize,
    last: f64,
}

impl<F: FnMut(f64)> Progress<F> {
    fn entry_written(&mut self) {
        self.done += 1;
        self.emit(self.done as f64 / self.total as f64);
    }

    fn emit(&mut self, fraction: f64) {
        let fraction = fraction.clamp(self.last, 1.0);
        self.last = fraction;
        (self.callback)(fraction);
    }
}

/// Split `job.source` into parts.
///
/// `on_progress` receives a non-decreasing fraction after every entry and
/// every finished part, ending at `1.0`. `cancel` is checked before each part.
pub async fn run_split<F>(
    job: &SplitJob,
    options: &OpenOptions,
    on_progress: F,
    cancel: &CancelToken,
) -> Result<JobResult, JobFailure>
where
    F: FnMut(f64) + Send,
{
    let mut state = JobState::Idle;
    let mut completed = Vec::new();

    let result = run(job, options, on_progress, cancel, &mut state, &mut completed).await;
    match result {
        Ok((format, plan)) => {
            transition(&mut state, JobState::Done);
            info!(source = %job.source, parts = completed.len(), "split finished");
            Ok(JobResult {
                format,
                plan,
                output_paths: completed,
            })
        }
        Err(error) => {
            let failed_in = state;
            transition(&mut state, JobState::Failed);
            warn!(source = %job.source, state = ?failed_in, completed = completed.len(), %error, "split failed");
            Err(JobFailure {
                error,
                state: failed_in,
                completed,
            })
        }
    }
}

async fn run<F>(
    job: &SplitJob,
    options: &OpenOptions,
    on_progress: F,
    cancel: &CancelToken,
    state: &mut JobState,
    completed: &mut Vec<PathBuf>,
) -> Result<(ArchiveFormat, Plan), SplitError>
where
    F: FnMut(f64) + Send,
{
    transition(state, JobState::Reading);
    let archive = archive::open(&job.source, options).await?;
    let entries = archive.entries();

    transition(state, JobState::Partitioning);
    let plan = partition(entries.len(), job.parts)?;
    if plan.is_clamped() {
        warn!(
            requested = plan.requested,
            effective = plan.effective(),
            "archive has fewer pages than requested parts; writing one page per part"
        );
    }
    let names = job.part_names(&plan)?;

    tokio::fs::create_dir_all(&job.output_dir)
        .await
        .map_err(|e| SplitError::io(&job.output_dir, e))?;

    let mut progress = Progress {
        callback: on_progress,
        done: 0,
        total: entries.len(),
        last: 0.0,
    };
    progress.emit(0.0);

    for (i, (part, name)) in plan.partitions.iter().zip(&names).enumerate() {
        if cancel.is_cancelled() {
            return Err(SplitError::Cancelled);
        }
        transition(state, JobState::Writing(i + 1));

        let target = job.output_dir.join(name);
        let path = write_part(
            job,
            archive.as_ref(),
            &entries[part.range()],
            &target,
            &mut progress,
        )
        .await?;

        info!(
            part = i + 1,
            of = plan.effective(),
            pages = part.len(),
            path = %path.display(),
            "wrote part"
        );
        completed.push(path);
        progress.emit(completed.len() as f64 / plan.effective() as f64);
    }

    Ok((archive.format(), plan))
}

async fn write_part<F: FnMut(f64)>(
    job: &SplitJob,
    archive: &dyn ComicArchive,
    entries: &[Entry],
    target: &Path,
    progress: &mut Progress<F>,
) -> Result<PathBuf, SplitError> {
    let mut writer = PartWriter::create(target, job.collision, job.compression).await?;
    let mut seen = HashSet::new();

    for entry in entries {
        let data = archive.read(entry).await?;
        let stored = entry.stored_name();
        let name = if job.flatten {
            stored.rsplit(|&b| b == b'/').next().unwrap_or(stored)
        } else {
            stored
        };
        if !seen.insert(name) {
            warn!(name = %String::from_utf8_lossy(name), part = %target.display(), "duplicate entry name in part");
        }

        debug!(index = entry.index, name = %entry.name, bytes = data.len(), "copying entry");
        writer.add(name, &data, entry.modified).await?;
        progress.entry_written();
    }

    writer.commit().await
}

fn transition(state: &mut JobState, next: JobState) {
    debug!(from = ?*state, to = ?next, "split state");
    *state = next;
}
