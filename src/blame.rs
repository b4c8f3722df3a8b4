//! Blame (annotate) providers.
//!
//! An annotate sequence lists, for every line of a file at some revision,
//! the changeset that introduced the line and the line number it had there.
//! That pair is stable across later commits that merely shift lines around,
//! which is what lets coverage measured at one revision be mapped back to
//! an earlier one.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::sync::Mutex;

use log::debug;
use serde::Deserialize;

use crate::error::{CommitcovError, Result};
use crate::model::AnnotateLine;

/// Source of annotate data.
///
/// `Ok(None)` means the file does not exist at `revision`. Implementations
/// are queried concurrently from the attribution worker pool.
pub trait BlameProvider: Sync {
    fn annotate(&self, revision: &str, path: &str) -> Result<Option<Vec<AnnotateLine>>>;
}

impl<P: BlameProvider + ?Sized> BlameProvider for &P {
    fn annotate(&self, revision: &str, path: &str) -> Result<Option<Vec<AnnotateLine>>> {
        (**self).annotate(revision, path)
    }
}

// ---------------------------------------------------------------------------
// Mercurial
// ---------------------------------------------------------------------------

/// Runs `hg annotate` in a local clone, one subprocess per query.
pub struct HgBlame {
    pub repo_dir: PathBuf,
    /// Mercurial executable, `hg` from `PATH` by default.
    pub hg: PathBuf,
}

impl HgBlame {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            hg: PathBuf::from("hg"),
        }
    }

    pub fn with_hg(mut self, hg: impl Into<PathBuf>) -> Self {
        self.hg = hg.into();
        self
    }
}

impl BlameProvider for HgBlame {
    fn annotate(&self, revision: &str, path: &str) -> Result<Option<Vec<AnnotateLine>>> {
        debug!("hg annotate -r {revision} {path}");
        // HGPLAIN keeps user aliases, defaults and translations out of the
        // output format and error messages.
        let output = Command::new(&self.hg)
            .env("HGPLAIN", "1")
            .arg("annotate")
            .arg("-r")
            .arg(revision)
            .arg("--line")
            .arg("--changeset")
            .arg(self.repo_dir.join(path))
            .current_dir(&self.repo_dir)
            .output()
            .map_err(|e| blame_error(revision, path, format!("failed to run hg: {e}")))?;

        interpret_output(&output, revision, path)
    }
}

/// Turn a finished `hg annotate` run into an annotate sequence. A file that
/// does not exist at `revision` is `Ok(None)`.
pub fn interpret_output(
    output: &Output,
    revision: &str,
    path: &str,
) -> Result<Option<Vec<AnnotateLine>>> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("no such file in rev") {
            return Ok(None);
        }
        return Err(blame_error(revision, path, stderr.trim().to_string()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_hg_annotate(&stdout)
        .map(Some)
        .map_err(|e| blame_error(revision, path, e.to_string()))
}

fn blame_error(revision: &str, path: &str, message: String) -> CommitcovError {
    CommitcovError::Blame {
        revision: revision.to_string(),
        path: path.to_string(),
        message,
    }
}

/// Parse `hg annotate --changeset --line` output: `<changeset>:<line>: <text>`.
///
/// The changeset column must be a bare hex id.
pub fn parse_hg_annotate(output: &str) -> Result<Vec<AnnotateLine>> {
    output
        .lines()
        .map(|line| {
            let mut parts = line.splitn(3, ':');
            let origin = parts.next().unwrap_or("").trim();
            let number = parts.next().map(str::trim);
            match number.and_then(|n| n.parse::<u32>().ok()) {
                Some(number) if is_changeset_id(origin) => Ok(AnnotateLine::new(origin, number)),
                _ => Err(CommitcovError::Parse(format!("Malformed annotate line: '{line}'"))),
            }
        })
        .collect()
}

fn is_changeset_id(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

// ---------------------------------------------------------------------------
// Caching
// ---------------------------------------------------------------------------

type AnnotateKey = (String, String);

/// Memoizes another provider for the lifetime of one orchestration run.
///
/// Only successful answers (including "file absent") are cached, so a
/// transient failure is retried on the next query.
pub struct CachedBlame<P> {
    inner: P,
    cache: Mutex<HashMap<AnnotateKey, Option<Vec<AnnotateLine>>>>,
}

impl<P: BlameProvider> CachedBlame<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Number of cached `(revision, path)` entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_inner(self) -> P {
        self.inner
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<AnnotateKey, Option<Vec<AnnotateLine>>>> {
        // A panic in another worker must not take the whole cache down.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<P: BlameProvider> BlameProvider for CachedBlame<P> {
    fn annotate(&self, revision: &str, path: &str) -> Result<Option<Vec<AnnotateLine>>> {
        let key = (revision.to_string(), path.to_string());
        if let Some(hit) = self.lock().get(&key) {
            return Ok(hit.clone());
        }
        // The lock is not held across the query so workers do not serialize
        // on slow subprocesses.
        let value = self.inner.annotate(revision, path)?;
        self.lock().insert(key, value.clone());
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Entry {
    Lines(Option<Vec<AnnotateLine>>),
    Failure(String),
}

/// Annotate data held in memory, keyed by `(revision, path)`.
///
/// Unknown pairs are reported as absent files.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlame {
    entries: HashMap<AnnotateKey, Entry>,
}

impl MemoryBlame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, revision: &str, path: &str, lines: Vec<AnnotateLine>) -> &mut Self {
        self.entries.insert(
            (revision.to_string(), path.to_string()),
            Entry::Lines(Some(lines)),
        );
        self
    }

    /// Record `path` as deleted at `revision`.
    pub fn remove(&mut self, revision: &str, path: &str) -> &mut Self {
        self.entries
            .insert((revision.to_string(), path.to_string()), Entry::Lines(None));
        self
    }

    /// Make queries for `(revision, path)` fail.
    pub fn fail(&mut self, revision: &str, path: &str, message: &str) -> &mut Self {
        self.entries.insert(
            (revision.to_string(), path.to_string()),
            Entry::Failure(message.to_string()),
        );
        self
    }

    /// Load a fixture of the form
    /// `{"<revision>": {"<path>": [["<origin>", <line>], ...] | null}}`.
    pub fn from_json(input: &[u8]) -> Result<Self> {
        #[derive(Deserialize)]
        struct Fixture(HashMap<String, HashMap<String, Option<Vec<(String, u32)>>>>);

        let Fixture(revisions) = serde_json::from_slice(input)?;
        let mut blame = MemoryBlame::new();
        for (revision, paths) in revisions {
            for (path, lines) in paths {
                match lines {
                    Some(lines) => blame.insert(
                        &revision,
                        &path,
                        lines
                            .into_iter()
                            .map(|(origin, line)| AnnotateLine::new(origin, line))
                            .collect(),
                    ),
                    None => blame.remove(&revision, &path),
                };
            }
        }
        Ok(blame)
    }
}

impl BlameProvider for MemoryBlame {
    fn annotate(&self, revision: &str, path: &str) -> Result<Option<Vec<AnnotateLine>>> {
        match self.entries.get(&(revision.to_string(), path.to_string())) {
            Some(Entry::Lines(lines)) => Ok(lines.clone()),
            Some(Entry::Failure(message)) => Err(blame_error(revision, path, message.clone())),
            None => Ok(None),
        }
    }
}
