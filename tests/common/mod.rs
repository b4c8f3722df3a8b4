#![allow(dead_code)]

use std::path::PathBuf;

use commitcov::model::{short_id, AnnotateLine, Commit};
use commitcov::tree::CoverageNode;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use tempfile::TempDir;

pub const REV1: &str = "1111111111aa1111111111111111111111111111";
pub const REV2: &str = "2222222222bb2222222222222222222222222222";
pub const REV3: &str = "3333333333cc3333333333333333333333333333";
pub const REV4: &str = "4444444444dd4444444444444444444444444444";

/// Create a fresh temporary database, returning the connection, dir handle, and db path.
/// The caller must hold onto `TempDir` to keep the temp directory alive.
pub fn setup_db() -> (Connection, TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let conn = commitcov::db::open(&db_path).unwrap();
    commitcov::db::init_schema(&conn).unwrap();
    (conn, dir, db_path)
}

/// Build the covdir JSON for a set of source files, with a root directory
/// node and intermediate directories for nested paths.
pub fn covdir_json(files: &[(&str, Vec<Option<i64>>)]) -> Value {
    let mut root = Map::new();
    for (path, coverage) in files {
        let segments: Vec<&str> = path.split('/').collect();
        let (file_name, dirs) = segments.split_last().unwrap();
        let mut node = &mut root;
        for dir in dirs {
            let entry = node
                .entry(dir.to_string())
                .or_insert_with(|| json!({"name": dir, "children": {}}));
            node = entry["children"].as_object_mut().unwrap();
        }
        let total = coverage.len() as u64;
        let covered = coverage.iter().filter(|c| matches!(c, Some(n) if *n > 0)).count() as u64;
        node.insert(
            file_name.to_string(),
            json!({
                "name": file_name,
                "coverage": coverage,
                "coveragePercent": if total == 0 { 0.0 } else { 100.0 * covered as f64 / total as f64 },
                "linesCovered": covered,
                "linesMissed": total - covered,
                "linesTotal": total,
            }),
        );
    }
    json!({"name": "src", "children": root, "coverage": []})
}

pub fn covdir(files: &[(&str, Vec<Option<i64>>)]) -> CoverageNode {
    CoverageNode::from_json(covdir_json(files).to_string().as_bytes()).unwrap()
}

/// A changeset, optionally linked to review unit `D<review>`.
pub fn commit(id: &str, review: Option<u64>, files: &[&str]) -> Commit {
    let description = match review {
        Some(r) => format!(
            "Bug {r} - change\n\nDifferential Revision: https://phabricator.services.mozilla.com/D{r}"
        ),
        None => "Bug 0 - change without review".to_string(),
    };
    let mut commit = Commit::new(id, description);
    commit.files = files.iter().map(|f| f.to_string()).collect();
    commit
}

/// Annotate lines introduced by `rev`, using the abbreviated id the way
/// `hg annotate --changeset` prints it.
pub fn lines(rev: &str, range: std::ops::RangeInclusive<u32>) -> Vec<AnnotateLine> {
    range.map(|l| AnnotateLine::new(short_id(rev), l)).collect()
}

/// Concatenate annotate segments.
pub fn annotate(parts: &[Vec<AnnotateLine>]) -> Vec<AnnotateLine> {
    parts.concat()
}
