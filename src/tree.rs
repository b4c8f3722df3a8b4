//! Read-only view of a covdir coverage report.
//!
//! The external coverage tool emits a JSON tree where directories carry a
//! `children` map and files carry a per-line `coverage` array (`-1` or
//! `null` for lines that are not executable). The engine only ever looks a
//! file up by its slash-separated path.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{CommitcovError, Result};

/// Aggregates the coverage tool computed for a node. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageStats {
    #[serde(default)]
    pub coverage_percent: f64,
    #[serde(default)]
    pub lines_covered: u64,
    #[serde(default)]
    pub lines_missed: u64,
    #[serde(default)]
    pub lines_total: u64,
}

/// A node of the coverage tree: a directory of named children or a file
/// with one entry per source line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawNode")]
pub enum CoverageNode {
    Directory {
        name: String,
        stats: CoverageStats,
        children: BTreeMap<String, CoverageNode>,
    },
    File {
        name: String,
        stats: CoverageStats,
        coverage: Vec<Option<i64>>,
    },
}

/// The covdir node exactly as serialized.
#[derive(Deserialize)]
struct RawNode {
    #[serde(default)]
    name: String,
    #[serde(flatten)]
    stats: CoverageStats,
    children: Option<BTreeMap<String, CoverageNode>>,
    coverage: Option<Vec<Option<i64>>>,
}

impl TryFrom<RawNode> for CoverageNode {
    type Error = CommitcovError;

    fn try_from(raw: RawNode) -> Result<Self> {
        let RawNode {
            name,
            stats,
            children,
            coverage,
        } = raw;
        let has_children = children.as_ref().is_some_and(|c| !c.is_empty());
        let has_coverage = coverage.as_ref().is_some_and(|c| !c.is_empty());

        match (children, coverage) {
            _ if has_children && has_coverage => Err(CommitcovError::Parse(format!(
                "Coverage node '{name}' has both children and a coverage array"
            ))),
            (Some(children), _) if has_children => Ok(CoverageNode::Directory {
                name,
                stats,
                children,
            }),
            (None, Some(coverage)) => Ok(CoverageNode::File {
                name,
                stats,
                coverage,
            }),
            (Some(_), Some(coverage)) if has_coverage => Ok(CoverageNode::File {
                name,
                stats,
                coverage,
            }),
            _ => Ok(CoverageNode::Directory {
                name,
                stats,
                children: BTreeMap::new(),
            }),
        }
    }
}

impl CoverageNode {
    /// Parse a covdir JSON document.
    pub fn from_json(input: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(input)?)
    }

    /// Read and parse a covdir JSON file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read(path)?;
        Self::from_json(&content)
    }

    pub fn name(&self) -> &str {
        match self {
            CoverageNode::Directory { name, .. } | CoverageNode::File { name, .. } => name,
        }
    }

    pub fn stats(&self) -> &CoverageStats {
        match self {
            CoverageNode::Directory { stats, .. } | CoverageNode::File { stats, .. } => stats,
        }
    }

    fn child(&self, segment: &str) -> Option<&CoverageNode> {
        match self {
            CoverageNode::Directory { children, .. } => children.get(segment),
            CoverageNode::File { .. } => None,
        }
    }

    /// Walk every file below this node, depth first, with its path relative
    /// to this node.
    pub fn files(&self) -> Vec<(String, &[Option<i64>])> {
        let mut out = Vec::new();
        collect_files(self, String::new(), &mut out);
        out
    }
}

fn collect_files<'a>(node: &'a CoverageNode, prefix: String, out: &mut Vec<(String, &'a [Option<i64>])>) {
    match node {
        CoverageNode::File { coverage, .. } => out.push((prefix, coverage)),
        CoverageNode::Directory { children, .. } => {
            for (name, child) in children {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                collect_files(child, path, out);
            }
        }
    }
}

/// Look up the per-line coverage array of `path`.
///
/// Returns `None` when any segment is missing or the path names a directory.
/// Callers decide how loudly to report the miss; absent paths are common
/// (build files, headers that were never compiled).
pub fn find_coverage<'a>(tree: &'a CoverageNode, path: &str) -> Option<&'a [Option<i64>]> {
    let mut node = tree;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        node = node.child(segment)?;
    }
    match node {
        CoverageNode::File { coverage, .. } => Some(coverage),
        CoverageNode::Directory { .. } => None,
    }
}
