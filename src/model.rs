//! Commits, coverage symbols and attribution results.
//!
//! Everything here is created fresh for one build and never mutated once the
//! engine hands it back.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Add;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::CommitcovError;

/// Compute a coverage rate, returning 0.0 when the total is zero.
#[must_use]
pub fn rate(covered: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        covered as f64 / total as f64
    }
}

/// A changeset belonging to a build, as reported by the version-control
/// gateway's automation-relevance endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Commit {
    #[serde(rename = "node")]
    pub id: String,
    #[serde(rename = "desc", default)]
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(
        rename = "backsoutnodes",
        default,
        deserialize_with = "deserialize_node_refs"
    )]
    pub backout_targets: Vec<String>,
}

impl Commit {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            files: Vec::new(),
            backout_targets: Vec::new(),
        }
    }

    /// First line of the description.
    pub fn summary(&self) -> &str {
        self.description.lines().next().unwrap_or("")
    }

    pub fn is_backout(&self) -> bool {
        !self.backout_targets.is_empty()
    }

    /// Whether the first description line carries any of `markers`.
    pub fn is_merge(&self, markers: &[String]) -> bool {
        let summary = self.summary();
        markers.iter().any(|m| summary.contains(m.as_str()))
    }

    /// Abbreviated id for display.
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

/// Abbreviate a changeset id to the 12 characters Mercurial prints.
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Backout targets come either as bare ids or as `{"node": ...}` objects.
fn deserialize_node_refs<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NodeRef {
        Id(String),
        Node { node: String },
    }

    let refs: Option<Vec<NodeRef>> = Option::deserialize(deserializer)?;
    Ok(refs
        .unwrap_or_default()
        .into_iter()
        .map(|r| match r {
            NodeRef::Id(id) => id,
            NodeRef::Node { node } => node,
        })
        .collect())
}

/// One line of blame output: the commit that introduced the line and the
/// 1-based line number it had in that commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnnotateLine {
    pub origin: String,
    pub line: u32,
}

impl AnnotateLine {
    pub fn new(origin: impl Into<String>, line: u32) -> Self {
        Self {
            origin: origin.into(),
            line,
        }
    }
}

/// Classification of a single line of a file at a commit's revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoverageSymbol {
    NotExecutable,
    Covered,
    Uncovered,
    /// The line's origin was overwritten before the build and has no
    /// measurement.
    Indeterminate,
}

impl CoverageSymbol {
    pub fn as_char(self) -> char {
        match self {
            CoverageSymbol::NotExecutable => 'N',
            CoverageSymbol::Covered => 'C',
            CoverageSymbol::Uncovered => 'U',
            CoverageSymbol::Indeterminate => 'X',
        }
    }
}

impl TryFrom<char> for CoverageSymbol {
    type Error = CommitcovError;

    fn try_from(c: char) -> std::result::Result<Self, Self::Error> {
        match c {
            'N' => Ok(CoverageSymbol::NotExecutable),
            'C' => Ok(CoverageSymbol::Covered),
            'U' => Ok(CoverageSymbol::Uncovered),
            'X' => Ok(CoverageSymbol::Indeterminate),
            other => Err(CommitcovError::Parse(format!("Unknown coverage symbol '{other}'"))),
        }
    }
}

impl fmt::Display for CoverageSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Per-line symbols for a whole file, rendered as a plain `N/C/U/X` string
/// on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoverageString(pub Vec<CoverageSymbol>);

impl CoverageString {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<CoverageSymbol> {
        self.0.get(index).copied()
    }

    pub fn symbols(&self) -> &[CoverageSymbol] {
        &self.0
    }
}

impl fmt::Display for CoverageString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for symbol in &self.0 {
            write!(f, "{}", symbol.as_char())?;
        }
        Ok(())
    }
}

impl std::str::FromStr for CoverageString {
    type Err = CommitcovError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.chars()
            .map(CoverageSymbol::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(CoverageString)
    }
}

impl Serialize for CoverageString {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Attribution of one path for one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathAttribution {
    pub coverage: CoverageString,
    /// Executable lines introduced by the commit.
    pub lines_added: u32,
    pub lines_covered: u32,
    pub lines_unknown: u32,
}

/// Aggregate line counts for a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommitTotals {
    pub added: u64,
    pub covered: u64,
    pub unknown: u64,
}

impl CommitTotals {
    /// Covered share of the added lines whose coverage is known.
    #[must_use]
    pub fn rate(&self) -> f64 {
        rate(self.covered, self.added.saturating_sub(self.unknown))
    }
}

impl Add for CommitTotals {
    type Output = CommitTotals;

    fn add(self, rhs: Self) -> Self::Output {
        CommitTotals {
            added: self.added + rhs.added,
            covered: self.covered + rhs.covered,
            unknown: self.unknown + rhs.unknown,
        }
    }
}

impl From<&PathAttribution> for CommitTotals {
    fn from(p: &PathAttribution) -> Self {
        CommitTotals {
            added: u64::from(p.lines_added),
            covered: u64::from(p.lines_covered),
            unknown: u64::from(p.lines_unknown),
        }
    }
}

/// Everything attributed to one commit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CommitAttribution {
    /// Code-review unit parsed from the commit description.
    pub review_id: Option<u64>,
    pub paths: BTreeMap<String, PathAttribution>,
}

impl CommitAttribution {
    pub fn totals(&self) -> CommitTotals {
        self.paths
            .values()
            .map(CommitTotals::from)
            .fold(CommitTotals::default(), |acc, t| acc + t)
    }
}

/// Attribution for every non-merge, non-backout commit of a build, in the
/// caller's commit order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttributionResult {
    pub commits: Vec<(String, CommitAttribution)>,
}

impl AttributionResult {
    pub fn get(&self, id: &str) -> Option<&CommitAttribution> {
        self.commits
            .iter()
            .find(|(node, _)| node == id)
            .map(|(_, attribution)| attribution)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CommitAttribution)> {
        self.commits.iter().map(|(id, a)| (id.as_str(), a))
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

impl Serialize for AttributionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.commits.len()))?;
        for (id, attribution) in &self.commits {
            map.serialize_entry(id, attribution)?;
        }
        map.end()
    }
}
