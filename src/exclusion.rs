//! Decides how loudly a coverage miss should be reported.
//!
//! Third-party code and files the coverage tool never instruments are
//! expected to be missing from the report, so they only log at `info`.

use std::path::Path;

use log::{warn, Level};

/// Repository-relative list of vendored path prefixes, one per line.
pub const THIRD_PARTY_PATHS: &str = "tools/rewriting/ThirdPartyPaths.txt";

/// Extensions the coverage tool produces line data for.
pub const COVERAGE_EXTENSIONS: &[&str] = &[
    // C
    "c", "h",
    // C++
    "cpp", "cc", "cxx", "hh", "hpp", "hxx",
    // JavaScript
    "js", "jsm", "mjs", "jsx", "xul", "xml", "html", "xhtml",
    // Rust
    "rs",
];

#[derive(Debug, Clone)]
pub struct ExclusionPolicy {
    pub third_party: Vec<String>,
    /// When false, misses on first-party sources drop to `info` as well.
    pub warnings_enabled: bool,
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self {
            third_party: Vec::new(),
            warnings_enabled: true,
        }
    }
}

impl ExclusionPolicy {
    pub fn new(third_party: Vec<String>) -> Self {
        Self {
            third_party,
            ..Default::default()
        }
    }

    /// Load the third-party prefixes from a repository checkout. A missing
    /// list is not an error.
    pub fn load(repo_dir: &Path) -> crate::error::Result<Self> {
        let path = repo_dir.join(THIRD_PARTY_PATHS);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Self::new(parse_prefixes(&content))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Missing third party exclusion list at {}",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn with_warnings(mut self, enabled: bool) -> Self {
        self.warnings_enabled = enabled;
        self
    }

    pub fn is_third_party(&self, path: &str) -> bool {
        self.third_party
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn is_supported_extension(&self, path: &str) -> bool {
        extension(path).is_some_and(|ext| COVERAGE_EXTENSIONS.contains(&ext))
    }

    /// Severity for "path not found in the coverage report".
    pub fn miss_level(&self, path: &str) -> Level {
        if self.is_third_party(path) || !self.is_supported_extension(path) || !self.warnings_enabled {
            Level::Info
        } else {
            Level::Warn
        }
    }

    /// Short reason attached to the miss log line.
    pub fn miss_reason(&self, path: &str) -> &'static str {
        if self.is_third_party(path) {
            "third party"
        } else if !self.is_supported_extension(path) {
            "unsupported extension"
        } else {
            "source file"
        }
    }
}

fn parse_prefixes(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Suffix after the last `.` of the final segment. Dotfiles like
/// `.hgignore` have no extension.
fn extension(path: &str) -> Option<&str> {
    let file_name = path.rsplit('/').next()?;
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}
