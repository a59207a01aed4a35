use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, TimeDelta};
use tracing::{debug, info, warn};

use crate::TIME_FORMAT;
use crate::types::{Candidate, SeenRecord};

/// Line closing every record group in the store.
pub const SEPARATOR: &str = "---";

/// Delimiter between metadata fields on a record's second line.
const FIELD_DELIMITER: &str = " | ";

/// Append-only store of already-notified keys with time-based expiry.
///
/// Each record is three lines: key, `field | field | YYYY-MM-DD HH:MM:SS`, `---`.
/// Expiry happens only in [`SeenStore::load`], which compacts the file.
#[derive(Debug, Clone)]
pub struct SeenStore {
    path: PathBuf,
}

/// Result of sweeping the raw store contents.
#[derive(Debug, Default, PartialEq)]
struct Compacted {
    active: HashSet<String>,
    /// Retained lines, each group closed by [`SEPARATOR`].
    lines: Vec<String>,
    kept: usize,
    purged: usize,
    unparsable: usize,
}

impl SeenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load active keys, dropping records older than `now - max_age`.
    ///
    /// Records with an unparsable timestamp stay in the file but are not
    /// reported as seen. The file is rewritten with the retained records.
    /// A missing file is an empty store.
    pub fn load(&self, max_age: TimeDelta, now: NaiveDateTime) -> Result<HashSet<String>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} not found, starting with an empty seen set", self.path.display());
                return Ok(HashSet::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", self.path.display()));
            }
        };

        let compacted = compact(&contents, now - max_age);
        if compacted.unparsable > 0 {
            warn!(
                "{} record(s) in {} have an unreadable timestamp; kept but not treated as seen",
                compacted.unparsable,
                self.path.display()
            );
        }

        let mut rewritten = compacted.lines.join("\n");
        if !rewritten.is_empty() {
            rewritten.push('\n');
        }
        write_atomic(&self.path, rewritten.as_bytes())?;

        info!(
            "Loaded {} seen key(s), kept {} record(s), purged {} from {}",
            compacted.active.len(),
            compacted.kept,
            compacted.purged,
            self.path.display()
        );
        Ok(compacted.active)
    }

    /// Append records to the store under an exclusive advisory lock.
    ///
    /// Never rewrites existing content.
    pub fn commit(&self, records: &[SeenRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buf = String::new();
        for record in records {
            buf.push_str(&encode_record(record));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.lock()
            .with_context(|| format!("failed to lock {}", self.path.display()))?;
        let written = file
            .write_all(buf.as_bytes())
            .and_then(|_| file.flush())
            .with_context(|| format!("failed to append to {}", self.path.display()));
        file.unlock()
            .with_context(|| format!("failed to unlock {}", self.path.display()))?;
        written?;

        debug!("Appended {} record(s) to {}", records.len(), self.path.display());
        Ok(())
    }
}

/// Candidates whose key is not in `seen`, in input order.
pub fn filter_new<C: Candidate + Clone>(candidates: &[C], seen: &HashSet<String>) -> Vec<C> {
    candidates
        .iter()
        .filter(|c| !seen.contains(c.key()))
        .cloned()
        .collect()
}

/// Encode one record as its three-line group.
pub fn encode_record(record: &SeenRecord) -> String {
    let mut fields: Vec<String> = record.metadata.iter().map(|f| sanitize(f)).collect();
    fields.push(record.observed_at.format(TIME_FORMAT).to_string());
    format!(
        "{}\n{}\n{SEPARATOR}\n",
        sanitize(&record.key),
        fields.join(FIELD_DELIMITER)
    )
}

/// Keep each field on one line so the group layout survives.
fn sanitize(field: &str) -> String {
    field.replace(['\n', '\r'], " ").trim().to_string()
}

/// Timestamp is the last non-empty `|`-separated field (tolerates `||` too).
fn parse_timestamp(meta: &str) -> Option<NaiveDateTime> {
    let ts = meta
        .split('|')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .next_back()?;
    NaiveDateTime::parse_from_str(ts, TIME_FORMAT).ok()
}

fn compact(contents: &str, cutoff: NaiveDateTime) -> Compacted {
    let mut out = Compacted::default();
    let mut group: Vec<&str> = Vec::new();
    let mut lines = contents.lines().peekable();

    while let Some(line) = lines.next() {
        let closes_group = line.trim() == SEPARATOR;
        if !closes_group {
            group.push(line);
            if lines.peek().is_some() {
                continue;
            }
        }
        // A trailing group with only a key line is an interrupted append.
        if group.len() >= 2 {
            let key = group[0].trim();
            match parse_timestamp(group[1]) {
                None => {
                    out.unparsable += 1;
                    out.kept += 1;
                    out.lines.extend(group.iter().map(|l| l.to_string()));
                    out.lines.push(SEPARATOR.to_string());
                }
                Some(ts) if ts < cutoff => out.purged += 1,
                Some(_) => {
                    out.kept += 1;
                    out.lines.extend(group.iter().map(|l| l.to_string()));
                    out.lines.push(SEPARATOR.to_string());
                    out.active.insert(key.to_string());
                }
            }
        }
        group.clear();
    }
    out
}

/// Replace `path` with `bytes` via a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut file =
            File::create(&tmp).with_context(|| format!("failed to create {}", tmp.display()))?;
        file.write_all(bytes)
            .and_then(|_| file.sync_all())
            .with_context(|| format!("failed to write {}", tmp.display()))?;
    }
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
