//! Append-only NDJSON spool (one replayable request per line).
//!
//! This is the durability safety net behind the primary HTTP path: every
//! client mutation lands here regardless of transport outcome, and the sync
//! worker drains entries back into the ingestion service once connectivity
//! returns. Files rotate daily by name (`events_YYYYMMDD.ndjson`); each
//! append is `open -> seek-end -> write -> fsync -> close` under an advisory
//! lock so concurrent writers on one host serialize. Compaction rewrites a
//! file without the replayed lines and swaps it in with an atomic rename;
//! a crash mid-compaction is safe because the server dedupes on `event_id`.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// What a buffered line replays as. `Event` lines are forensic-only — the
/// store never persists run events, so the sync worker skips them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    RunCreate,
    RunUpdate,
    CommitAssociate,
    Event,
}

/// One spool line: the tag, the replay target (for update/associate), and
/// the exact request body to replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferRecord {
    pub record_type: RecordType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub payload: Value,
}

impl BufferRecord {
    pub fn run_create(payload: Value) -> Self {
        Self {
            record_type: RecordType::RunCreate,
            event_id: None,
            payload,
        }
    }

    pub fn run_update(event_id: impl Into<String>, payload: Value) -> Self {
        Self {
            record_type: RecordType::RunUpdate,
            event_id: Some(event_id.into()),
            payload,
        }
    }

    pub fn commit_associate(event_id: impl Into<String>, payload: Value) -> Self {
        Self {
            record_type: RecordType::CommitAssociate,
            event_id: Some(event_id.into()),
            payload,
        }
    }

    pub fn event(payload: Value) -> Self {
        Self {
            record_type: RecordType::Event,
            event_id: None,
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Appends records to the current daily file under `dir`.
#[derive(Debug, Clone)]
pub struct BufferWriter {
    dir: PathBuf,
}

impl BufferWriter {
    /// Create the writer, ensuring the spool directory exists.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("create spool dir {:?}", dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Today's spool file path.
    pub fn current_file(&self) -> PathBuf {
        self.dir
            .join(format!("events_{}.ndjson", Utc::now().format("%Y%m%d")))
    }

    /// Append one record; returns the file it was written to.
    ///
    /// The append is durable when this returns: the line (with trailing
    /// newline) has been fsync'd before the file closes.
    pub fn append(&self, record: &BufferRecord) -> Result<PathBuf> {
        let path = self.current_file();
        let line = serde_json::to_string(record).context("serialize buffer record")?;

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open spool file {:?}", path))?;

        f.lock_exclusive()
            .with_context(|| format!("lock spool file {:?}", path))?;

        let res = (|| -> Result<()> {
            f.write_all(line.as_bytes()).context("write spool line")?;
            f.write_all(b"\n").context("write newline")?;
            f.sync_all().context("fsync spool file")?;
            Ok(())
        })();

        let _ = f.unlock();
        res?;
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Reading / replay
// ---------------------------------------------------------------------------

/// A parsed line, addressed by file and zero-based line number so the sync
/// worker can compact exactly what it replayed.
#[derive(Debug, Clone)]
pub struct BufferEntry {
    pub line_no: usize,
    pub record: BufferRecord,
}

/// Outcome of scanning one spool file.
#[derive(Debug, Default)]
pub struct ParsedFile {
    pub entries: Vec<BufferEntry>,
    /// Lines that failed to parse: (line_no, raw text).
    pub rejects: Vec<(usize, String)>,
}

/// Spool files in `dir`, oldest first (names embed the date, so the
/// lexicographic sort is chronological).
pub fn list_spool_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let rd = match fs::read_dir(dir) {
        Ok(rd) => rd,
        // Nothing buffered yet.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e).with_context(|| format!("read spool dir {:?}", dir)),
    };

    for entry in rd {
        let entry = entry.context("read spool dir entry")?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("events_") && name.ends_with(".ndjson") {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Parse a spool file, splitting parseable entries from rejects.
pub fn read_spool_file(path: &Path) -> Result<ParsedFile> {
    let f = File::open(path).with_context(|| format!("open spool file {:?}", path))?;
    let reader = BufReader::new(f);

    let mut out = ParsedFile::default();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read line {line_no} of {:?}", path))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<BufferRecord>(trimmed) {
            Ok(record) => out.entries.push(BufferEntry { line_no, record }),
            Err(_) => out.rejects.push((line_no, line)),
        }
    }
    Ok(out)
}

/// Append a raw line to the file's sibling `.rejected` quarantine.
pub fn quarantine_line(path: &Path, raw: &str) -> Result<()> {
    let mut q = path.as_os_str().to_owned();
    q.push(".rejected");
    let qpath = PathBuf::from(q);

    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&qpath)
        .with_context(|| format!("open quarantine {:?}", qpath))?;
    f.write_all(raw.as_bytes()).context("write quarantine line")?;
    f.write_all(b"\n").context("write quarantine newline")?;
    f.sync_all().context("fsync quarantine")?;
    Ok(())
}

/// Rewrite `path` without the given line numbers; atomic via rename.
///
/// Returns the number of lines kept. A file left empty is deleted. Replayed
/// entries that survive a crash here are harmless: re-replay is idempotent
/// on the server.
pub fn compact(path: &Path, drop_lines: &HashSet<usize>) -> Result<usize> {
    let f = File::open(path).with_context(|| format!("open spool file {:?}", path))?;
    f.lock_exclusive()
        .with_context(|| format!("lock spool file {:?}", path))?;

    let result = compact_locked(path, drop_lines);
    let _ = f.unlock();
    result
}

fn compact_locked(path: &Path, drop_lines: &HashSet<usize>) -> Result<usize> {
    let content =
        fs::read_to_string(path).with_context(|| format!("read spool file {:?}", path))?;

    let kept: Vec<&str> = content
        .lines()
        .enumerate()
        .filter(|(i, line)| !drop_lines.contains(i) && !line.trim().is_empty())
        .map(|(_, line)| line)
        .collect();

    if kept.is_empty() {
        fs::remove_file(path).with_context(|| format!("remove drained spool {:?}", path))?;
        return Ok(0);
    }

    let tmp = path.with_extension("ndjson.tmp");
    {
        let mut out = File::create(&tmp).with_context(|| format!("create {:?}", tmp))?;
        for line in &kept {
            out.write_all(line.as_bytes()).context("write compacted line")?;
            out.write_all(b"\n").context("write compacted newline")?;
        }
        out.sync_all().context("fsync compacted spool")?;
    }
    fs::rename(&tmp, path).with_context(|| format!("swap compacted spool into {:?}", path))?;

    Ok(kept.len())
}

/// Count parseable entries across all spool files (diagnostics and tests).
pub fn pending_entries(dir: &Path) -> Result<usize> {
    let mut total = 0;
    for file in list_spool_files(dir)? {
        total += read_spool_file(&file)?.entries.len();
    }
    Ok(total)
}
