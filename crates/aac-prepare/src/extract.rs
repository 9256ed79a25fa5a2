//! Extraction of archives split across ordered part files.
//!
//! [`MultiPartReader`] presents the parts as one `Read + Seek` stream with a
//! single part file open at a time, so a multi-gigabyte archive is never
//! loaded or concatenated on disk. Zip-native spanned sets (`.z01 … .zip`)
//! cannot be read that way; [`merge_spanned`] first rebuilds them into a
//! single archive with the external `zip` tool.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::errors::ExtractError;
use crate::process::{ProcessOptions, ProcessRunner};

// ─────────────────────────────────────────────────────────────────────────────
// Multi-part stream
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered part files read as one contiguous stream.
#[derive(Debug)]
pub struct MultiPartReader {
    parts: Vec<PathBuf>,
    /// Absolute offset where each part starts.
    offsets: Vec<u64>,
    total: u64,
    pos: u64,
    current: Option<OpenPart>,
}

#[derive(Debug)]
struct OpenPart {
    index: usize,
    file: File,
    /// Absolute stream position of the file cursor.
    cursor: u64,
}

impl MultiPartReader {
    /// Open a stream over `parts`, in order.
    pub fn open(parts: &[PathBuf]) -> io::Result<Self> {
        let mut offsets = Vec::with_capacity(parts.len());
        let mut total = 0u64;
        for part in parts {
            offsets.push(total);
            total += std::fs::metadata(part)?.len();
        }
        Ok(Self {
            parts: parts.to_vec(),
            offsets,
            total,
            pos: 0,
            current: None,
        })
    }

    /// Total length of all parts.
    pub fn len(&self) -> u64 {
        self.total
    }

    /// Whether all parts are empty.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn part_at(&self, pos: u64) -> usize {
        self.offsets
            .partition_point(|&start| start <= pos)
            .saturating_sub(1)
    }

    fn part_end(&self, index: usize) -> u64 {
        self.offsets.get(index + 1).copied().unwrap_or(self.total)
    }
}

impl Read for MultiPartReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.total {
            return Ok(0);
        }
        let index = self.part_at(self.pos);
        let start = self.offsets[index];

        let stale = self.current.as_ref().is_none_or(|c| c.index != index);
        if stale {
            let file = File::open(&self.parts[index])?;
            self.current = Some(OpenPart {
                index,
                file,
                cursor: start,
            });
        }
        let pos = self.pos;
        let end = self.part_end(index);
        let Some(current) = self.current.as_mut() else {
            return Ok(0);
        };
        if current.cursor != pos {
            let _ = current.file.seek(SeekFrom::Start(pos - start))?;
            current.cursor = pos;
        }

        let want = usize::try_from(end - pos).unwrap_or(usize::MAX).min(buf.len());
        let n = current.file.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("part {} shorter than expected", self.parts[index].display()),
            ));
        }
        current.cursor += n as u64;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for MultiPartReader {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let (base, delta) = match target {
            SeekFrom::Start(n) => {
                self.pos = n;
                return Ok(n);
            }
            SeekFrom::End(d) => (self.total, d),
            SeekFrom::Current(d) => (self.pos, d),
        };
        let next = base.checked_add_signed(delta).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of multi-part stream",
            )
        })?;
        self.pos = next;
        Ok(next)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extraction
// ─────────────────────────────────────────────────────────────────────────────

/// Which entries to extract and where.
#[derive(Clone, Debug, Default)]
pub struct ExtractOptions {
    /// Output names (after flattening) to extract; `None` extracts all.
    pub only: Option<HashSet<String>>,
    /// Drop entry directories and write every file directly under `dest`.
    pub flatten: bool,
    /// Only extract entries whose name ends with this suffix.
    pub suffix: Option<String>,
}

/// Result of one extraction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Output paths written, relative to `dest`, in archive order.
    pub written: Vec<String>,
    /// File entries skipped by the filters.
    pub skipped: usize,
}

/// Names of all file entries (directories excluded), in archive order.
pub fn list_entries(parts: &[PathBuf]) -> Result<Vec<String>, ExtractError> {
    let mut archive = open_archive(parts)?;
    let archive_path = parts[0].clone();
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| zip_error(&archive_path, e))?;
        if !entry.is_dir() {
            names.push(entry.name().to_string());
        }
    }
    Ok(names)
}

/// Extract the archive made of `parts` into `dest`.
///
/// Always overwrites existing outputs. Every entry is written to a temp
/// file and renamed, so an interrupted extraction never leaves a truncated
/// file at an output path.
pub fn extract(
    parts: &[PathBuf],
    dest: &Path,
    opts: &ExtractOptions,
) -> Result<ExtractSummary, ExtractError> {
    let mut archive = open_archive(parts)?;
    let archive_path = parts[0].clone();
    std::fs::create_dir_all(dest).map_err(|e| ExtractError::io(dest, e))?;

    info!(
        archive = %archive_path.display(),
        parts = parts.len(),
        entries = archive.len(),
        dest = %dest.display(),
        "extracting"
    );

    let mut summary = ExtractSummary::default();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| zip_error(&archive_path, e))?;
        if entry.is_dir() {
            continue;
        }
        let enclosed = entry
            .enclosed_name()
            .ok_or_else(|| ExtractError::UnsafePath(entry.name().to_string()))?;

        if let Some(suffix) = &opts.suffix {
            if !entry.name().ends_with(suffix.as_str()) {
                summary.skipped += 1;
                continue;
            }
        }
        let relative = if opts.flatten {
            match enclosed.file_name() {
                Some(name) => PathBuf::from(name),
                None => return Err(ExtractError::UnsafePath(entry.name().to_string())),
            }
        } else {
            enclosed
        };
        let relative_name = relative.to_string_lossy().replace('\\', "/");
        if let Some(only) = &opts.only {
            if !only.contains(&relative_name) {
                summary.skipped += 1;
                continue;
            }
        }

        let out = dest.join(&relative);
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ExtractError::io(parent, e))?;
        }
        let mut tmp_name = out.file_name().map(ToOwned::to_owned).unwrap_or_default();
        tmp_name.push(".part");
        let tmp = out.with_file_name(tmp_name);

        let mut writer = File::create(&tmp).map_err(|e| ExtractError::io(&tmp, e))?;
        if let Err(e) = io::copy(&mut entry, &mut writer) {
            drop(writer);
            let _ = std::fs::remove_file(&tmp);
            return Err(match e.kind() {
                io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => ExtractError::Corrupt {
                    archive: archive_path,
                    reason: format!("entry {}: {e}", entry.name()),
                },
                _ => ExtractError::io(&out, e),
            });
        }
        drop(writer);
        std::fs::rename(&tmp, &out).map_err(|e| ExtractError::io(&out, e))?;

        debug!(entry = %relative_name, "extracted");
        summary.written.push(relative_name);
    }

    info!(
        written = summary.written.len(),
        skipped = summary.skipped,
        "extraction finished"
    );
    Ok(summary)
}

fn open_archive(
    parts: &[PathBuf],
) -> Result<ZipArchive<BufReader<MultiPartReader>>, ExtractError> {
    let first = parts.first().ok_or(ExtractError::NoParts)?;
    let reader = MultiPartReader::open(parts).map_err(|e| ExtractError::io(first, e))?;
    ZipArchive::new(BufReader::new(reader)).map_err(|e| zip_error(first, e))
}

fn zip_error(archive: &Path, e: ZipError) -> ExtractError {
    match e {
        ZipError::Io(io_err) if io_err.kind() != io::ErrorKind::UnexpectedEof => {
            ExtractError::io(archive, io_err)
        }
        other => ExtractError::Corrupt {
            archive: archive.to_path_buf(),
            reason: other.to_string(),
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Spanned archives
// ─────────────────────────────────────────────────────────────────────────────

/// Rebuild a zip-native spanned set into one archive with `zip -FF`.
///
/// `main_zip` is the final `.zip` volume; the `.zNN` volumes must sit next
/// to it. The merged archive is written under a temp name and renamed to
/// `out` on success.
pub async fn merge_spanned(
    runner: &dyn ProcessRunner,
    zip_program: &str,
    main_zip: &Path,
    out: &Path,
    opts: &ProcessOptions,
) -> Result<(), ExtractError> {
    let stem = out
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = out.with_file_name(format!("{stem}.tmp.zip"));
    let _ = tokio::fs::remove_file(&tmp).await;

    let args = vec![
        "-FF".to_string(),
        main_zip.to_string_lossy().into_owned(),
        "--out".to_string(),
        tmp.to_string_lossy().into_owned(),
    ];
    info!(archive = %main_zip.display(), out = %out.display(), "merging spanned archive");
    let output = runner
        .run(zip_program, &args, opts)
        .await
        .map_err(|e| ExtractError::Tool {
            tool: zip_program.to_string(),
            archive: main_zip.to_path_buf(),
            reason: format!("cannot start: {e}"),
        })?;

    if !output.success() {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(ExtractError::Tool {
            tool: zip_program.to_string(),
            archive: main_zip.to_path_buf(),
            reason: output.failure_summary(),
        });
    }
    tokio::fs::rename(&tmp, out)
        .await
        .map_err(|e| ExtractError::io(out, e))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
