//! Code-review linkage: finding a commit's review unit and shaping results
//! for the review system.
//!
//! The review system receives, per review unit, a map from path to a string
//! with one `N`/`C`/`U`/`X` character per line of the file. That format is
//! consumed verbatim on the other side.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use log::info;
use regex::Regex;

use crate::error::Result;
use crate::model::AttributionResult;

/// Per review unit, path to rendered coverage string.
pub type CoveragePayload = BTreeMap<u64, BTreeMap<String, String>>;

static REVISION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Differential Revision: (https://phabricator\.services\.mozilla\.com/D([0-9]+))").unwrap()
});

/// Review unit id linked from a commit description, if any.
pub fn parse_review_id(description: &str) -> Option<u64> {
    REVISION_RE
        .captures(description)
        .and_then(|c| c.get(2))
        .and_then(|m| m.as_str().parse().ok())
}

/// Review unit URL linked from a commit description, if any.
pub fn parse_review_url(description: &str) -> Option<&str> {
    REVISION_RE
        .captures(description)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Collect the coverage strings of every commit linked to a review unit.
///
/// Commits without a review unit are dropped. Linked commits with no
/// attributable path keep an empty map.
pub fn coverage_payload(result: &AttributionResult) -> CoveragePayload {
    let mut payload = CoveragePayload::new();
    for (_, attribution) in result.iter() {
        let Some(review_id) = attribution.review_id else {
            continue;
        };
        let paths = payload.entry(review_id).or_default();
        for (path, path_attribution) in &attribution.paths {
            paths.insert(path.clone(), path_attribution.coverage.to_string());
        }
    }
    payload
}

/// Receiver of per-review coverage strings.
pub trait ResultSink {
    fn publish(&self, review_id: u64, coverage: &BTreeMap<String, String>) -> Result<()>;

    /// Publish every linked review unit of `result`, skipping empty ones.
    /// Returns how many units were published.
    fn publish_all(&self, result: &AttributionResult) -> Result<usize> {
        let mut published = 0;
        for (review_id, coverage) in coverage_payload(result) {
            info!("D{review_id} coverage: {coverage:?}");
            if coverage.is_empty() {
                continue;
            }
            self.publish(review_id, &coverage)?;
            published += 1;
        }
        Ok(published)
    }
}

/// Serialize a payload as a single JSON document.
pub fn payload_json(payload: &CoveragePayload) -> Result<String> {
    Ok(serde_json::to_string_pretty(payload)?)
}

/// Writes every published review unit into one JSON file at `path`.
///
/// Units accumulate in memory; the file is rewritten on every publish so a
/// partial run still leaves a valid document behind.
pub struct JsonFileSink {
    path: PathBuf,
    written: std::sync::Mutex<CoveragePayload>,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            written: std::sync::Mutex::new(CoveragePayload::new()),
        }
    }
}

impl ResultSink for JsonFileSink {
    fn publish(&self, review_id: u64, coverage: &BTreeMap<String, String>) -> Result<()> {
        let mut written = self
            .written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        written.insert(review_id, coverage.clone());
        std::fs::write(&self.path, payload_json(&written)?)?;
        Ok(())
    }
}
