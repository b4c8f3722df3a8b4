//! Command handler functions for the commitcov CLI.
//!
//! Each `cmd_*` function returns its output as a `String`, making them easy
//! to test without capturing stdout.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use log::info;
use rusqlite::Connection;

use crate::attribution::{AttributeOptions, Attributor};
use crate::blame::{BlameProvider, CachedBlame, HgBlame, MemoryBlame};
use crate::exclusion::ExclusionPolicy;
use crate::gateway::{load_changesets, Gateway};
use crate::model::{short_id, AttributionResult, Commit};
use crate::report::{BuildReport, MarkdownFormatter, ReportFormatter, TextFormatter};
use crate::review::{JsonFileSink, ResultSink};
use crate::tree::{find_coverage, CoverageNode};
use crate::db;

/// Output style for the `attribute` command.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum Style {
    #[default]
    Text,
    Markdown,
}

/// Where the changesets of the build come from.
pub enum ChangesetSource {
    /// A saved automation-relevance document.
    File(PathBuf),
    /// A live version-control gateway.
    Server(String),
}

/// Where annotate data comes from.
pub enum BlameSource {
    /// A local Mercurial clone.
    Repo(PathBuf),
    /// A JSON fixture (see [`MemoryBlame::from_json`]).
    Fixture(PathBuf),
}

/// Everything `cmd_attribute` needs.
pub struct AttributeRequest {
    pub report: PathBuf,
    pub build_revision: String,
    pub changesets: ChangesetSource,
    pub blame: BlameSource,
    /// Repository checkout holding the third-party path list, if any.
    pub repo_dir: Option<PathBuf>,
    pub payload: Option<PathBuf>,
    pub style: Style,
    pub options: AttributeOptions,
    pub warnings: bool,
    /// Re-analyze a build already present in the store.
    pub force: bool,
}

pub fn cmd_attribute(conn: Option<&mut Connection>, req: &AttributeRequest) -> Result<String> {
    if let Some(conn) = conn.as_deref() {
        if !req.force && db::is_analyzed(conn, &req.build_revision)? {
            return Ok(format!(
                "Build {} already analyzed (use --force to redo it)\n",
                short_id(&req.build_revision)
            ));
        }
    }

    let tree = CoverageNode::from_path(&req.report)
        .with_context(|| format!("Failed to read coverage report {}", req.report.display()))?;

    let commits: Vec<Commit> = match &req.changesets {
        ChangesetSource::File(path) => load_changesets(path)
            .with_context(|| format!("Failed to read changesets from {}", path.display()))?,
        ChangesetSource::Server(server) => Gateway::new(server.as_str())
            .automation_relevance(&req.build_revision)
            .context("Failed to fetch automation relevance changesets")?,
    };
    if commits.is_empty() {
        bail!("No changesets found for build {}", req.build_revision);
    }

    let policy = match &req.repo_dir {
        Some(dir) => ExclusionPolicy::load(dir)?,
        None => ExclusionPolicy::default(),
    }
    .with_warnings(req.warnings);
    let attributor = Attributor::new(policy, req.options.clone());

    let result = match &req.blame {
        BlameSource::Repo(dir) => {
            let blame = CachedBlame::new(HgBlame::new(dir));
            run(&attributor, &tree, req, &commits, &blame)?
        }
        BlameSource::Fixture(path) => {
            let content = std::fs::read(path)
                .with_context(|| format!("Failed to read blame fixture {}", path.display()))?;
            let blame = MemoryBlame::from_json(&content)?;
            run(&attributor, &tree, req, &commits, &blame)?
        }
    };

    if let Some(conn) = conn {
        let stored = db::store_result(conn, &req.build_revision, &commits, &result)?;
        info!("Stored coverage totals for {stored} changesets");
    }

    if let Some(path) = &req.payload {
        let published = JsonFileSink::new(path).publish_all(&result)?;
        info!("Wrote coverage for {published} review units to {}", path.display());
    }

    let report = BuildReport {
        build_revision: &req.build_revision,
        result: &result,
    };
    let formatter: &dyn ReportFormatter = match req.style {
        Style::Text => &TextFormatter,
        Style::Markdown => &MarkdownFormatter,
    };
    Ok(report.format(formatter))
}

fn run<B: BlameProvider>(
    attributor: &Attributor,
    tree: &CoverageNode,
    req: &AttributeRequest,
    commits: &[Commit],
    blame: &B,
) -> Result<AttributionResult> {
    attributor
        .attribute(tree, &req.build_revision, commits, blame)
        .with_context(|| format!("Attribution failed for build {}", req.build_revision))
}

pub fn cmd_show(conn: &Connection, node: &str) -> Result<String> {
    let Some(record) = db::get_commit(conn, node)? else {
        bail!("No coverage stored for changeset {node}");
    };

    let mut out = String::new();
    writeln!(out, "Changeset:  {}", record.node).unwrap();
    writeln!(out, "Build:      {}", record.build_revision).unwrap();
    if let Some(review_id) = record.review_id {
        writeln!(out, "Review:     D{review_id}").unwrap();
    }
    match record.totals {
        Some(t) => {
            writeln!(out, "Added:      {}", t.added).unwrap();
            writeln!(out, "Covered:    {} ({:.1}% of known)", t.covered, t.rate() * 100.0).unwrap();
            writeln!(out, "Unknown:    {}", t.unknown).unwrap();
        }
        None => writeln!(out, "No coverage found").unwrap(),
    }
    writeln!(out, "Analyzed:   {}", record.created_at).unwrap();
    Ok(out)
}

pub fn cmd_list(conn: &Connection) -> Result<String> {
    let records = db::list_commits(conn)?;
    if records.is_empty() {
        return Ok("No changesets in database.\n".to_string());
    }

    let mut out = String::new();
    writeln!(
        out,
        "{:<14} {:<14} {:>8} {:>8} {:>8} {:>8}",
        "CHANGESET", "BUILD", "ADDED", "COVERED", "UNKNOWN", "RATE"
    )
    .unwrap();
    writeln!(out, "{}", "-".repeat(66)).unwrap();
    for r in &records {
        match r.totals {
            Some(t) => writeln!(
                out,
                "{:<14} {:<14} {:>8} {:>8} {:>8} {:>7.1}%",
                short_id(&r.node),
                short_id(&r.build_revision),
                t.added,
                t.covered,
                t.unknown,
                t.rate() * 100.0
            )
            .unwrap(),
            None => writeln!(
                out,
                "{:<14} {:<14} {:>8} {:>8} {:>8} {:>8}",
                short_id(&r.node),
                short_id(&r.build_revision),
                "-",
                "-",
                "-",
                "-"
            )
            .unwrap(),
        }
    }
    Ok(out)
}

/// Print the line array recorded for one path of a coverage report.
pub fn cmd_tree(report: &Path, path: &str) -> Result<String> {
    let tree = CoverageNode::from_path(report)
        .with_context(|| format!("Failed to read coverage report {}", report.display()))?;
    let Some(coverage) = find_coverage(&tree, path) else {
        return Ok(format!("No coverage data for '{path}'\n"));
    };

    let mut out = String::new();
    writeln!(out, "{:>6}  {:>10}", "LINE", "HITS").unwrap();
    writeln!(out, "{}", "-".repeat(18)).unwrap();
    for (line, hits) in (1..).zip(coverage) {
        match hits {
            Some(count) if *count >= 0 => {
                let marker = if *count > 0 { "✓" } else { "✗" };
                writeln!(out, "{:>6}  {:>10}  {}", line, count, marker).unwrap();
            }
            _ => writeln!(out, "{:>6}  {:>10}", line, "-").unwrap(),
        }
    }
    Ok(out)
}
