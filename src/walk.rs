use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use opentelemetry::{Context as OtelContext, KeyValue};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::archive::{Summary, ZipOptimizer, is_archive, is_class};
use crate::remover::ClassOptimizer;
use crate::telemetry::{Telemetry, with_child_span};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum FileKind {
    Class,
    Archive,
}

impl FileKind {
    fn of(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if is_class(name) {
            Some(FileKind::Class)
        } else if is_archive(name) {
            Some(FileKind::Archive)
        } else {
            None
        }
    }
}

/// One input file and where its result goes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Job {
    pub(crate) source: PathBuf,
    pub(crate) destination: PathBuf,
    pub(crate) kind: FileKind,
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct WriteMode {
    /// Rewrite destinations even when they are newer than their source.
    pub(crate) overwrite: bool,
    /// Transform and report, but write nothing.
    pub(crate) dry_run: bool,
}

/// Expand input paths into jobs.
///
/// Directories are walked recursively in sorted order. With a target
/// directory, loose files land directly under it and directory inputs keep
/// their relative layout; without one, every file is rewritten in place.
pub(crate) fn plan_jobs(inputs: &[PathBuf], target_dir: Option<&Path>) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();
    for input in inputs {
        if !input.exists() {
            bail!("input not found: {}", input.display());
        }
        if input.is_dir() {
            let mut files = Vec::new();
            collect_dir(input, target_dir, &mut files)?;
            for source in files {
                let Some(kind) = FileKind::of(&source) else {
                    continue;
                };
                let destination = match target_dir {
                    Some(target) => target.join(source.strip_prefix(input).with_context(|| {
                        format!("{} is outside {}", source.display(), input.display())
                    })?),
                    None => source.clone(),
                };
                jobs.push(Job {
                    source,
                    destination,
                    kind,
                });
            }
        } else {
            let Some(kind) = FileKind::of(input) else {
                warn!("skipping unsupported input {}", input.display());
                continue;
            };
            let destination = match target_dir {
                Some(target) => target.join(
                    input
                        .file_name()
                        .with_context(|| format!("no file name in {}", input.display()))?,
                ),
                None => input.clone(),
            };
            jobs.push(Job {
                source: input.clone(),
                destination,
                kind,
            });
        }
    }

    let mut destinations: HashMap<&Path, &Path> = HashMap::new();
    for job in &jobs {
        if let Some(previous) = destinations.insert(&job.destination, &job.source) {
            bail!(
                "{} and {} would both be written to {}",
                previous.display(),
                job.source.display(),
                job.destination.display()
            );
        }
    }
    Ok(jobs)
}

fn collect_dir(path: &Path, target_dir: Option<&Path>, files: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }
    entries.sort();

    for entry in entries {
        if target_dir.is_some_and(|target| entry == target) {
            continue;
        }
        if entry.is_dir() {
            collect_dir(&entry, target_dir, files)?;
        } else {
            files.push(entry);
        }
    }
    Ok(())
}

/// Run every job, in parallel, and add up their summaries.
///
/// Each file is written only after its own transform succeeded; the first
/// failure aborts the run.
pub(crate) fn process_jobs<O: ClassOptimizer>(
    jobs: &[Job],
    optimizer: &ZipOptimizer<'_, O>,
    mode: WriteMode,
    telemetry: Option<&Telemetry>,
) -> Result<Summary> {
    let parent_cx = OtelContext::current();
    let summaries = jobs
        .par_iter()
        .map(|job| {
            let attributes = [KeyValue::new(
                "purgeannorefs.file",
                job.source.display().to_string(),
            )];
            with_child_span(telemetry, "file.purge", &attributes, &parent_cx, || {
                process_job(job, optimizer, mode)
            })
        })
        .collect::<Result<Vec<Summary>>>()?;

    let mut total = Summary::default();
    for summary in summaries {
        total.merge(summary);
    }
    Ok(total)
}

fn process_job<O: ClassOptimizer>(
    job: &Job,
    optimizer: &ZipOptimizer<'_, O>,
    mode: WriteMode,
) -> Result<Summary> {
    let mut summary = Summary::default();
    let in_place = job.source == job.destination;
    if !in_place
        && !mode.overwrite
        && !mode.dry_run
        && is_up_to_date(&job.source, &job.destination)?
    {
        warn!("{} is up to date", job.destination.display());
        summary.skipped += 1;
        return Ok(summary);
    }

    info!("processing {}", job.source.display());
    let data = fs::read(&job.source)
        .with_context(|| format!("failed to read {}", job.source.display()))?;
    let origin = job.source.display().to_string();
    let output = match job.kind {
        FileKind::Class => optimizer.optimize_class(&origin, &data, &mut summary)?,
        FileKind::Archive => optimizer.optimize_archive(&origin, &data, &mut summary)?,
    };
    if mode.dry_run {
        return Ok(summary);
    }
    match output {
        Some(bytes) => write_output(&job.destination, &bytes)?,
        None if !in_place => write_output(&job.destination, &data)?,
        None => {}
    }
    Ok(summary)
}

/// True when `destination` exists and was modified after `source`.
fn is_up_to_date(source: &Path, destination: &Path) -> Result<bool> {
    let Ok(destination_metadata) = fs::metadata(destination) else {
        return Ok(false);
    };
    let source_modified = fs::metadata(source)
        .and_then(|metadata| metadata.modified())
        .with_context(|| format!("failed to read modification time of {}", source.display()))?;
    let destination_modified = destination_metadata.modified().with_context(|| {
        format!(
            "failed to read modification time of {}",
            destination.display()
        )
    })?;
    Ok(destination_modified > source_modified)
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}
