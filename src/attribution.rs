//! Per-commit coverage attribution.
//!
//! Coverage is measured once, at the build changeset, but a build usually
//! stacks several commits. To report how well each commit's own lines were
//! exercised, every line measured at the build is identified by the
//! `(origin changeset, origin line)` pair blame assigns it. The same pair
//! shows up in blame at any earlier revision where that line exists, no
//! matter how far later commits displaced it. Lines of an earlier commit
//! whose pair is gone by the build were overwritten and can't be measured.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, error, info, log};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::blame::BlameProvider;
use crate::error::{CommitcovError, Result};
use crate::exclusion::ExclusionPolicy;
use crate::model::{
    AnnotateLine, AttributionResult, Commit, CommitAttribution, CoverageString, CoverageSymbol,
    PathAttribution,
};
use crate::review::parse_review_id;
use crate::tree::{find_coverage, CoverageNode};

const THREAD_POOL_NAME: &str = "commitcov";

/// Hit count measured at the build for a line identity. `None` marks a line
/// that is not executable.
pub type CoverageMap = HashMap<AnnotateLine, Option<i64>>;

/// Tunables for one attribution run.
#[derive(Debug, Clone)]
pub struct AttributeOptions {
    /// Substrings of a commit's first description line that mark a merge.
    pub merge_markers: Vec<String>,
    /// Worker threads for blame queries; `None` uses one per CPU.
    pub workers: Option<usize>,
}

impl Default for AttributeOptions {
    fn default() -> Self {
        Self {
            merge_markers: vec!["r=merge".to_string(), "a=merge".to_string()],
            workers: None,
        }
    }
}

/// Whether a blame origin and a changeset id name the same commit. Blame
/// tools print abbreviated ids, so a non-empty prefix matches.
pub fn same_commit(origin: &str, id: &str) -> bool {
    if origin.is_empty() || id.is_empty() {
        return false;
    }
    if origin.len() <= id.len() {
        id.starts_with(origin)
    } else {
        origin.starts_with(id)
    }
}

/// Key every line of the build annotate by its identity and attach the hit
/// count measured at the same position.
///
/// Lines past the end of the measured array are treated as not executable
/// (instrumentation ignores trailing lines). Negative counts are the
/// covdir sentinel for non-executable lines.
pub fn build_coverage_map(annotate: &[AnnotateLine], coverage: &[Option<i64>]) -> CoverageMap {
    annotate
        .iter()
        .enumerate()
        .map(|(lineno, identity)| {
            let hits = coverage
                .get(lineno)
                .copied()
                .flatten()
                .filter(|count| *count >= 0);
            (identity.clone(), hits)
        })
        .collect()
}

/// Classify every line of a file at some revision using the build's
/// coverage map.
pub fn apply_coverage_map(annotate: &[AnnotateLine], coverage_map: &CoverageMap) -> CoverageString {
    CoverageString(
        annotate
            .iter()
            .map(|identity| match coverage_map.get(identity) {
                Some(None) => CoverageSymbol::NotExecutable,
                Some(Some(count)) if *count > 0 => CoverageSymbol::Covered,
                Some(Some(_)) => CoverageSymbol::Uncovered,
                None => CoverageSymbol::Indeterminate,
            })
            .collect(),
    )
}

/// Classify a file at `commit_id` and count the lines that commit itself
/// introduced.
///
/// Added lines are the ones blame attributes to the commit at its own
/// revision, so pure deletions add nothing. Non-executable lines are never
/// counted as added.
pub fn attribute_path(
    commit_id: &str,
    annotate: &[AnnotateLine],
    coverage_map: &CoverageMap,
) -> PathAttribution {
    let coverage = apply_coverage_map(annotate, coverage_map);

    let mut lines_added = 0;
    let mut lines_covered = 0;
    let mut lines_unknown = 0;
    let own_lines = annotate
        .iter()
        .zip(coverage.symbols())
        .filter(|(identity, _)| same_commit(&identity.origin, commit_id));
    for (_, symbol) in own_lines {
        match symbol {
            CoverageSymbol::NotExecutable => continue,
            CoverageSymbol::Covered => lines_covered += 1,
            CoverageSymbol::Indeterminate => lines_unknown += 1,
            CoverageSymbol::Uncovered => {}
        }
        lines_added += 1;
    }

    PathAttribution {
        coverage,
        lines_added,
        lines_covered,
        lines_unknown,
    }
}

/// Attributes build coverage to the commits of a build.
#[derive(Debug, Clone, Default)]
pub struct Attributor {
    pub policy: ExclusionPolicy,
    pub options: AttributeOptions,
}

impl Attributor {
    pub fn new(policy: ExclusionPolicy, options: AttributeOptions) -> Self {
        Self { policy, options }
    }

    /// Merges and backouts carry no code of their own.
    pub fn is_relevant(&self, commit: &Commit) -> bool {
        !commit.is_backout() && !commit.is_merge(&self.options.merge_markers)
    }

    /// Look up `path`, logging a miss at the severity the policy picks.
    pub fn find_coverage<'t>(&self, tree: &'t CoverageNode, path: &str) -> Option<&'t [Option<i64>]> {
        let coverage = find_coverage(tree, path);
        if coverage.is_none() {
            log!(
                self.policy.miss_level(path),
                "Path not found in report ({}): {}",
                self.policy.miss_reason(path),
                path
            );
        }
        coverage
    }

    /// Attribute the coverage measured at `build_revision` to each commit.
    ///
    /// Every commit that is neither a merge nor a backout gets an entry, in
    /// input order, even when none of its paths could be attributed.
    ///
    /// Fails when a path with a coverage record has no annotate data at the
    /// build revision: the report and the revision disagree and nothing
    /// derived from them is trustworthy. Failures for a single commit's
    /// annotate only drop that `(commit, path)` pair.
    pub fn attribute<B>(
        &self,
        tree: &CoverageNode,
        build_revision: &str,
        commits: &[Commit],
        blame: &B,
    ) -> Result<AttributionResult>
    where
        B: BlameProvider + ?Sized,
    {
        let mut builder = ThreadPoolBuilder::new().thread_name(|idx| format!("{THREAD_POOL_NAME}-{idx}"));
        if let Some(workers) = self.options.workers {
            builder = builder.num_threads(workers);
        }
        let pool = builder.build()?;
        pool.install(|| self.attribute_in_pool(tree, build_revision, commits, blame))
    }

    fn attribute_in_pool<B>(
        &self,
        tree: &CoverageNode,
        build_revision: &str,
        commits: &[Commit],
        blame: &B,
    ) -> Result<AttributionResult>
    where
        B: BlameProvider + ?Sized,
    {
        let commits: Vec<&Commit> = commits.iter().filter(|c| self.is_relevant(c)).collect();

        let all_paths: BTreeSet<&str> = commits
            .iter()
            .flat_map(|c| c.files.iter().map(String::as_str))
            .collect();

        let records: BTreeMap<&str, &[Option<i64>]> = all_paths
            .into_iter()
            .filter_map(|path| self.find_coverage(tree, path).map(|c| (path, c)))
            .collect();

        info!(
            "Attributing {} commits over {} covered paths at {}",
            commits.len(),
            records.len(),
            build_revision
        );

        let coverage_maps: HashMap<&str, CoverageMap> = records
            .par_iter()
            .map(|(&path, &coverage)| -> Result<(&str, CoverageMap)> {
                let annotate = blame.annotate(build_revision, path)?.ok_or_else(|| {
                    CommitcovError::MissingBuildAnnotate {
                        revision: build_revision.to_string(),
                        path: path.to_string(),
                    }
                })?;
                Ok((path, build_coverage_map(&annotate, coverage)))
            })
            .collect::<Result<_>>()?;

        let commits = commits
            .par_iter()
            .map(|commit| {
                let attribution = attribute_commit(commit, &coverage_maps, blame);
                (commit.id.clone(), attribution)
            })
            .collect();

        Ok(AttributionResult { commits })
    }
}

fn attribute_commit<B>(commit: &Commit, coverage_maps: &HashMap<&str, CoverageMap>, blame: &B) -> CommitAttribution
where
    B: BlameProvider + ?Sized,
{
    let mut paths = BTreeMap::new();

    for path in &commit.files {
        let Some(coverage_map) = coverage_maps.get(path.as_str()) else {
            continue;
        };

        let annotate = match blame.annotate(&commit.id, path) {
            Ok(Some(annotate)) => annotate,
            Ok(None) => {
                debug!("{} removed {}, nothing to attribute", commit.short_id(), path);
                continue;
            }
            Err(e) => {
                error!("Skipping {} for {}: {}", path, commit.short_id(), e);
                continue;
            }
        };

        paths.insert(path.clone(), attribute_path(&commit.id, &annotate, coverage_map));
    }

    CommitAttribution {
        review_id: parse_review_id(&commit.description),
        paths,
    }
}
