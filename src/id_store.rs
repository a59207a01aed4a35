use std::collections::{BTreeSet, HashSet};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info, warn};

static ASIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9]{10}$").expect("static regex"));

/// Line-per-ID seen store without expiry.
///
/// Appends re-read the file under an exclusive lock and only write IDs that
/// are not already present, so a second process appending to the same file
/// does not produce duplicates.
#[derive(Debug, Clone)]
pub struct IdStore {
    path: PathBuf,
    validator: Option<fn(&str) -> bool>,
}

impl IdStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            validator: None,
        }
    }

    /// Lines failing `validator` are skipped on load.
    pub fn with_validator(mut self, validator: fn(&str) -> bool) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<HashSet<String>> {
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

        let mut ids = HashSet::new();
        let mut rejected = 0usize;
        for id in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if self.validator.is_some_and(|valid| !valid(id)) {
                rejected += 1;
                continue;
            }
            ids.insert(id.to_string());
        }
        if rejected > 0 {
            warn!("Skipped {rejected} malformed id(s) in {}", self.path.display());
        }
        info!("Loaded {} id(s) from {}", ids.len(), self.path.display());
        Ok(ids)
    }

    /// Append the IDs not yet in the file, sorted. Returns how many were written.
    pub fn append_new<'a, I>(&self, ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.lock()
            .with_context(|| format!("failed to lock {}", self.path.display()))?;

        let result = (|| -> Result<usize> {
            let mut existing = String::new();
            file.seek(SeekFrom::Start(0))?;
            file.read_to_string(&mut existing)?;
            let present: HashSet<&str> = existing.lines().map(str::trim).collect();

            let fresh: BTreeSet<&str> = ids
                .into_iter()
                .map(str::trim)
                .filter(|id| !id.is_empty() && !present.contains(id))
                .collect();
            if fresh.is_empty() {
                return Ok(0);
            }

            let mut buf = String::new();
            if !existing.is_empty() && !existing.ends_with('\n') {
                buf.push('\n');
            }
            for id in &fresh {
                buf.push_str(id);
                buf.push('\n');
            }
            file.write_all(buf.as_bytes())?;
            file.flush()?;
            Ok(fresh.len())
        })()
        .with_context(|| format!("failed to append to {}", self.path.display()));

        file.unlock()
            .with_context(|| format!("failed to unlock {}", self.path.display()))?;
        let written = result?;
        if written > 0 {
            info!("Appended {written} id(s) to {}", self.path.display());
        }
        Ok(written)
    }
}

/// Amazon ASIN shape: ten uppercase alphanumerics.
pub fn is_asin(id: &str) -> bool {
    ASIN.is_match(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, IdStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = IdStore::new(dir.path().join("ids.txt"));
        (dir, store)
    }

    #[test]
    fn load_missing_is_empty() {
        let (_dir, store) = temp_store();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn append_skips_present_and_sorts() {
        let (_dir, store) = temp_store();
        std::fs::write(store.path(), "beta\n").unwrap();
        let written = store.append_new(["gamma", "beta", "alpha", "gamma"]).unwrap();
        assert_eq!(written, 2);
        assert_eq!(
            std::fs::read_to_string(store.path()).unwrap(),
            "beta\nalpha\ngamma\n"
        );
    }

    #[test]
    fn append_repairs_missing_newline() {
        let (_dir, store) = temp_store();
        std::fs::write(store.path(), "one").unwrap();
        store.append_new(["two"]).unwrap();
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn append_nothing_new() {
        let (_dir, store) = temp_store();
        store.append_new(["a"]).unwrap();
        assert_eq!(store.append_new(["a"]).unwrap(), 0);
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "a\n");
    }

    #[test]
    fn validator_filters_on_load() {
        let (_dir, store) = temp_store();
        let store = store.with_validator(is_asin);
        std::fs::write(store.path(), "B0ABCDEF12\nnot-an-asin\n\nB0ZZZZZZ99\n").unwrap();
        let ids = store.load().unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("B0ABCDEF12"));
    }

    #[test]
    fn asin_shape() {
        assert!(is_asin("B07XJ8C8F5"));
        assert!(!is_asin("b07xj8c8f5"));
        assert!(!is_asin("B07XJ8C8F"));
        assert!(!is_asin("B07XJ8C8F5\n"));
        assert!(!is_asin("B07XJ-C8F5"));
    }
}
