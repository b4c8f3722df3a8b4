//! SQLite store of per-commit coverage totals.
//!
//! One row per changeset. Changesets the engine did not attribute (merges,
//! backouts) are stored with NULL totals so a later run can tell "analyzed,
//! nothing to report" from "never analyzed".

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::error::{CommitcovError, Result};
use crate::model::{AttributionResult, Commit, CommitTotals};

pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA: &str = include_str!("../schema.sql");

/// Open (or create) the store at the given path.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

/// Ensure the schema is initialized. Safe to call on an already-initialized DB.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    match version {
        None => {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
        }
        Some(v) if v > SCHEMA_VERSION => {
            return Err(CommitcovError::Other(format!(
                "Database schema version {} is newer than this binary supports ({}). \
                 Please upgrade commitcov.",
                v, SCHEMA_VERSION
            )));
        }
        Some(_) => {}
    }
    Ok(())
}

/// A stored row.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRecord {
    pub node: String,
    pub build_revision: String,
    pub review_id: Option<u64>,
    /// `None` when the build attributed nothing to this changeset.
    pub totals: Option<CommitTotals>,
    pub created_at: String,
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<CommitRecord> {
    let added: Option<u64> = row.get(3)?;
    let covered: Option<u64> = row.get(4)?;
    let unknown: Option<u64> = row.get(5)?;
    let totals = match (added, covered, unknown) {
        (Some(added), Some(covered), Some(unknown)) => Some(CommitTotals {
            added,
            covered,
            unknown,
        }),
        _ => None,
    };
    Ok(CommitRecord {
        node: row.get(0)?,
        build_revision: row.get(1)?,
        review_id: row.get(2)?,
        totals,
        created_at: row.get(6)?,
    })
}

/// Store the totals of every changeset of a build.
///
/// `commits` is the full list the build was made of, including the merges
/// and backouts the engine skipped. Existing rows are replaced.
pub fn store_result(
    conn: &mut Connection,
    build_revision: &str,
    commits: &[Commit],
    result: &AttributionResult,
) -> Result<usize> {
    let tx = conn.transaction()?;
    let now = Utc::now().to_rfc3339();
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO commit_coverage (node, build_revision, review_id, added, covered, unknown, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(node) DO UPDATE SET \
                 build_revision = excluded.build_revision, \
                 review_id = excluded.review_id, \
                 added = excluded.added, \
                 covered = excluded.covered, \
                 unknown = excluded.unknown, \
                 created_at = excluded.created_at",
        )?;
        for commit in commits {
            let attribution = result.get(&commit.id);
            let totals = attribution.map(|a| a.totals());
            stmt.execute(params![
                commit.id,
                build_revision,
                attribution.and_then(|a| a.review_id),
                totals.map(|t| t.added),
                totals.map(|t| t.covered),
                totals.map(|t| t.unknown),
                now,
            ])?;
        }
    }
    tx.commit()?;
    Ok(commits.len())
}

pub fn get_commit(conn: &Connection, node: &str) -> Result<Option<CommitRecord>> {
    Ok(conn
        .query_row(
            "SELECT node, build_revision, review_id, added, covered, unknown, created_at \
             FROM commit_coverage WHERE node = ?1",
            params![node],
            record_from_row,
        )
        .optional()?)
}

/// Every stored changeset, oldest first.
pub fn list_commits(conn: &Connection) -> Result<Vec<CommitRecord>> {
    let mut stmt = conn.prepare(
        "SELECT node, build_revision, review_id, added, covered, unknown, created_at \
         FROM commit_coverage ORDER BY created_at, node",
    )?;
    let rows = stmt.query_map([], record_from_row)?;
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

/// Whether a build has already been analyzed.
pub fn is_analyzed(conn: &Connection, build_revision: &str) -> Result<bool> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM commit_coverage WHERE build_revision = ?1",
        params![build_revision],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
