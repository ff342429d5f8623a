use std::collections::HashSet;
use std::io::{Cursor, Read, Seek, Write};

use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use tracing::{debug, info};
use zip::read::ZipFile;
use zip::write::FullFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::{PurgeError, PurgeResult};
use crate::remover::ClassOptimizer;
use crate::telemetry::{Telemetry, with_span};
use crate::traversal::Rewrite;

const ARCHIVE_SUFFIXES: [&str; 4] = [".jar", ".war", ".ear", ".zip"];
const CLASS_SUFFIX: &str = ".class";

fn has_suffix(name: &str, suffix: &str) -> bool {
    name.len() >= suffix.len()
        && name.is_char_boundary(name.len() - suffix.len())
        && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

pub(crate) fn is_class(name: &str) -> bool {
    has_suffix(name, CLASS_SUFFIX)
}

pub(crate) fn is_archive(name: &str) -> bool {
    ARCHIVE_SUFFIXES
        .iter()
        .any(|suffix| has_suffix(name, suffix))
}

/// Counters and removal listing accumulated over a run.
#[derive(Debug, Default)]
pub(crate) struct Summary {
    pub(crate) classes: usize,
    pub(crate) changed_classes: usize,
    pub(crate) archives: usize,
    /// Files left alone because their destination was up to date.
    pub(crate) skipped: usize,
    /// `origin: removal` lines in traversal order.
    pub(crate) removals: Vec<String>,
}

impl Summary {
    fn record_class(&mut self, origin: &str, rewrite: &Rewrite) {
        self.classes += 1;
        if rewrite.bytes.is_some() {
            self.changed_classes += 1;
        }
        self.removals.extend(
            rewrite
                .removed
                .iter()
                .map(|removal| format!("{origin}: {removal}")),
        );
    }

    pub(crate) fn merge(&mut self, other: Summary) {
        self.classes += other.classes;
        self.changed_classes += other.changed_classes;
        self.archives += other.archives;
        self.skipped += other.skipped;
        self.removals.extend(other.removals);
    }

    pub(crate) fn removed(&self) -> usize {
        self.removals.len()
    }
}

/// Entry names already emitted into one archive; the first occurrence wins.
#[derive(Default)]
struct EntryNames {
    seen: HashSet<Vec<u8>>,
}

impl EntryNames {
    fn first(&mut self, name: &[u8]) -> bool {
        self.seen.insert(name.to_vec())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum EntryKind {
    Class,
    Archive,
    Resource,
}

impl EntryKind {
    fn of(name: &str, is_dir: bool) -> Self {
        if is_dir {
            EntryKind::Resource
        } else if is_class(name) {
            EntryKind::Class
        } else if is_archive(name) {
            EntryKind::Archive
        } else {
            EntryKind::Resource
        }
    }
}

const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const CENTRAL_HEADER_LEN: usize = 46;
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;
// Extra fields the writer derives from the entry it writes.
const WRITER_EXTRA_FIELDS: [u16; 3] = [0x0001, 0x9901, 0xa11e];

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

/// Copy of `data` whose central directory lists only the first entry of each
/// name, plus the number of entries dropped. `None` when no name repeats.
///
/// `ZipArchive` indexes entries by name and lets a later entry replace an
/// earlier one, so repeats must go before the archive is opened.
fn first_entries_only(
    data: &[u8],
    directory_start: u64,
    archive_offset: u64,
) -> PurgeResult<Option<(Vec<u8>, usize)>> {
    let start = usize::try_from(directory_start)
        .ok()
        .filter(|start| *start <= data.len())
        .ok_or_else(|| PurgeError::malformed("central directory starts past the end of the data"))?;
    let mut names = EntryNames::default();
    let mut directory = Vec::new();
    let mut kept = 0usize;
    let mut repeated = 0usize;
    let mut position = start;
    while let Some(header) = data.get(position..position + CENTRAL_HEADER_LEN) {
        let signature = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if signature != CENTRAL_HEADER_SIGNATURE {
            break;
        }
        let name_len = usize::from(le_u16(header, 28));
        let end = position
            + CENTRAL_HEADER_LEN
            + name_len
            + usize::from(le_u16(header, 30))
            + usize::from(le_u16(header, 32));
        let record = data
            .get(position..end)
            .ok_or_else(|| PurgeError::malformed("truncated central directory record"))?;
        if names.first(&record[CENTRAL_HEADER_LEN..CENTRAL_HEADER_LEN + name_len]) {
            directory.extend_from_slice(record);
            kept += 1;
        } else {
            repeated += 1;
        }
        position = end;
    }
    if repeated == 0 {
        return Ok(None);
    }

    let too_large = || PurgeError::malformed("too large to re-index without repeated entries");
    let entry_count = u16::try_from(kept)
        .ok()
        .filter(|count| *count < u16::MAX)
        .ok_or_else(too_large)?;
    let directory_len = u32::try_from(directory.len())
        .ok()
        .filter(|len| *len < u32::MAX)
        .ok_or_else(too_large)?;
    let directory_offset = directory_start
        .checked_sub(archive_offset)
        .and_then(|offset| u32::try_from(offset).ok())
        .filter(|offset| *offset < u32::MAX)
        .ok_or_else(too_large)?;

    let mut patched = Vec::with_capacity(start + directory.len() + 22);
    patched.extend_from_slice(&data[..start]);
    patched.extend_from_slice(&directory);
    patched.extend_from_slice(&END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
    // disk numbers
    patched.extend_from_slice(&[0, 0, 0, 0]);
    patched.extend_from_slice(&entry_count.to_le_bytes());
    patched.extend_from_slice(&entry_count.to_le_bytes());
    patched.extend_from_slice(&directory_len.to_le_bytes());
    patched.extend_from_slice(&directory_offset.to_le_bytes());
    patched.extend_from_slice(&0u16.to_le_bytes());
    Ok(Some((patched, repeated)))
}

/// Write options mirroring the source entry: compression, timestamp,
/// permissions, comment and extra fields.
fn entry_options<R: Read>(origin: &str, entry: &ZipFile<'_, R>) -> FullFileOptions<'static> {
    let mut options = entry.options().into_full_options();
    if !entry.comment().is_empty() {
        options = options.with_file_comment(entry.comment());
    }
    let mut rest = entry.extra_data().unwrap_or_default();
    while rest.len() >= 4 {
        let header_id = le_u16(rest, 0);
        let len = usize::from(le_u16(rest, 2));
        let Some(field) = rest.get(4..4 + len) else {
            debug!("{origin}: ignoring truncated extra field {header_id:#06x}");
            break;
        };
        rest = &rest[4 + len..];
        if WRITER_EXTRA_FIELDS.contains(&header_id) {
            continue;
        }
        let mut candidate = options.clone();
        match candidate.add_extra_data(header_id, field, false) {
            Ok(()) => options = candidate,
            Err(err) => debug!("{origin}: dropping extra field {header_id:#06x}: {err}"),
        }
    }
    options
}

/// Applies a [`ClassOptimizer`] to loose classes and, recursively, to every
/// class inside an archive.
pub(crate) struct ZipOptimizer<'a, O> {
    classes: &'a O,
    telemetry: Option<&'a Telemetry>,
}

impl<'a, O: ClassOptimizer> ZipOptimizer<'a, O> {
    pub(crate) fn new(classes: &'a O, telemetry: Option<&'a Telemetry>) -> Self {
        Self { classes, telemetry }
    }

    /// Transform one class; `None` means the input stands unchanged.
    pub(crate) fn optimize_class(
        &self,
        origin: &str,
        data: &[u8],
        summary: &mut Summary,
    ) -> Result<Option<Vec<u8>>> {
        let attributes = [KeyValue::new("purgeannorefs.class", origin.to_string())];
        let rewrite = with_span(self.telemetry, "class.purge", &attributes, || {
            self.classes.optimize(data)
        })
        .with_context(|| format!("failed to process {origin}"))?;
        summary.record_class(origin, &rewrite);
        if !rewrite.removed.is_empty() {
            debug!(
                "{origin}: removed {} annotation reference(s) from {}",
                rewrite.removed.len(),
                rewrite.class_name
            );
        }
        Ok(rewrite.bytes)
    }

    /// Transform every class inside the archive `data`; `None` means no entry
    /// changed and the archive can be kept byte for byte.
    pub(crate) fn optimize_archive(
        &self,
        origin: &str,
        data: &[u8],
        summary: &mut Summary,
    ) -> Result<Option<Vec<u8>>> {
        let attributes = [KeyValue::new("purgeannorefs.archive", origin.to_string())];
        with_span(
            self.telemetry,
            "archive.purge",
            &attributes,
            || -> Result<Option<Vec<u8>>> {
                let mut archive = open_archive(origin, data)?;
                summary.archives += 1;
                let repeated = first_entries_only(
                    data,
                    archive.central_directory_start(),
                    archive.offset(),
                )
                .with_context(|| format!("failed to read {origin}"))?;
                let comment = archive.comment().to_vec();
                match repeated {
                    None => self.rewrite_entries(origin, &mut archive, &comment, summary, false),
                    Some((patched, repeated)) => {
                        debug!("{origin}: skipping {repeated} duplicate entries");
                        let mut archive = open_archive(origin, &patched)?;
                        self.rewrite_entries(origin, &mut archive, &comment, summary, true)
                    }
                }
            },
        )
    }

    fn rewrite_entries<R: Read + Seek>(
        &self,
        origin: &str,
        archive: &mut ZipArchive<R>,
        comment: &[u8],
        summary: &mut Summary,
        mut changed: bool,
    ) -> Result<Option<Vec<u8>>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

        for index in 0..archive.len() {
            let (name, pending) = {
                let mut entry = archive
                    .by_index(index)
                    .map_err(PurgeError::from)
                    .with_context(|| format!("failed to read {origin} entry #{index}"))?;
                let name = entry.name().to_string();
                let kind = EntryKind::of(&name, entry.is_dir());
                if kind == EntryKind::Resource {
                    (name, None)
                } else {
                    let mut data = Vec::new();
                    entry
                        .read_to_end(&mut data)
                        .map_err(PurgeError::from)
                        .with_context(|| format!("failed to read {origin}:{name}"))?;
                    let options = entry_options(&format!("{origin}:{name}"), &entry);
                    (name, Some((kind, data, options)))
                }
            };

            let replacement = match pending {
                Some((kind, data, options)) => {
                    let entry_origin = format!("{origin}:{name}");
                    let bytes = match kind {
                        EntryKind::Class => self.optimize_class(&entry_origin, &data, summary)?,
                        _ => self.optimize_archive(&entry_origin, &data, summary)?,
                    };
                    bytes.map(|bytes| (bytes, options))
                }
                None => None,
            };

            match replacement {
                Some((bytes, options)) => {
                    let options = options.large_file(bytes.len() as u64 >= u64::from(u32::MAX));
                    writer
                        .start_file(name.as_str(), options)
                        .map_err(PurgeError::from)
                        .with_context(|| format!("failed to write {origin}:{name}"))?;
                    writer
                        .write_all(&bytes)
                        .with_context(|| format!("failed to write {origin}:{name}"))?;
                    changed = true;
                }
                None => {
                    let entry = archive
                        .by_index_raw(index)
                        .map_err(PurgeError::from)
                        .with_context(|| format!("failed to read {origin}:{name}"))?;
                    writer
                        .raw_copy_file(entry)
                        .map_err(PurgeError::from)
                        .with_context(|| format!("failed to copy {origin}:{name}"))?;
                }
            }
        }

        if !changed {
            return Ok(None);
        }
        info!("{origin}: rewrote archive of {} entries", archive.len());
        writer
            .set_raw_comment(comment.into())
            .map_err(PurgeError::from)
            .with_context(|| format!("failed to write {origin} comment"))?;
        let bytes = writer
            .finish()
            .map_err(PurgeError::from)
            .with_context(|| format!("failed to finish {origin}"))?
            .into_inner();
        Ok(Some(bytes))
    }
}

fn open_archive<'d>(origin: &str, data: &'d [u8]) -> Result<ZipArchive<Cursor<&'d [u8]>>> {
    ZipArchive::new(Cursor::new(data))
        .map_err(PurgeError::from)
        .with_context(|| format!("failed to read {origin}"))
}
