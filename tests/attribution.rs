mod common;

use std::collections::BTreeMap;

use commitcov::attribution::{AttributeOptions, Attributor};
use commitcov::blame::MemoryBlame;
use commitcov::error::CommitcovError;
use commitcov::exclusion::ExclusionPolicy;
use commitcov::model::{AttributionResult, CommitAttribution, CoverageSymbol, PathAttribution};
use pretty_assertions::assert_eq;

use common::{annotate, commit, covdir, lines, REV1, REV2, REV3, REV4};

fn attributor() -> Attributor {
    Attributor::new(
        ExclusionPolicy::default(),
        AttributeOptions {
            workers: Some(2),
            ..Default::default()
        },
    )
}

fn path(coverage: &str, added: u32, covered: u32, unknown: u32) -> PathAttribution {
    PathAttribution {
        coverage: coverage.parse().unwrap(),
        lines_added: added,
        lines_covered: covered,
        lines_unknown: unknown,
    }
}

fn entry(review_id: Option<u64>, paths: &[(&str, PathAttribution)]) -> CommitAttribution {
    CommitAttribution {
        review_id,
        paths: paths
            .iter()
            .map(|(p, a)| (p.to_string(), a.clone()))
            .collect::<BTreeMap<_, _>>(),
    }
}

fn expected(entries: Vec<(&str, CommitAttribution)>) -> AttributionResult {
    AttributionResult {
        commits: entries
            .into_iter()
            .map(|(id, a)| (id.to_string(), a))
            .collect(),
    }
}

#[test]
fn single_commit_new_file() {
    let tree = covdir(&[("file", vec![None, Some(0), Some(1), Some(1), Some(1), Some(1), Some(0)])]);
    let mut blame = MemoryBlame::new();
    blame.insert(REV1, "file", lines(REV1, 1..=7));

    let commits = vec![commit(REV1, Some(1), &["file"])];
    let result = attributor().attribute(&tree, REV1, &commits, &blame).unwrap();

    assert_eq!(
        result,
        expected(vec![(REV1, entry(Some(1), &[("file", path("NUCCCCU", 6, 4, 0))]))])
    );
}

#[test]
fn commit_without_review_link() {
    let tree = covdir(&[("file", vec![None, Some(0), Some(1), Some(1), Some(1), Some(1), Some(0)])]);
    let mut blame = MemoryBlame::new();
    blame.insert(REV1, "file", lines(REV1, 1..=7));

    let commits = vec![commit(REV1, None, &["file"])];
    let result = attributor().attribute(&tree, REV1, &commits, &blame).unwrap();

    assert_eq!(
        result,
        expected(vec![(REV1, entry(None, &[("file", path("NUCCCCU", 6, 4, 0))]))])
    );
}

#[test]
fn file_without_coverage_record() {
    let tree = covdir(&[]);
    let mut blame = MemoryBlame::new();
    blame.insert(REV1, "file", lines(REV1, 1..=7));

    let commits = vec![commit(REV1, Some(1), &["file"])];
    let result = attributor().attribute(&tree, REV1, &commits, &blame).unwrap();

    assert_eq!(result, expected(vec![(REV1, entry(Some(1), &[]))]));
}

#[test]
fn two_commits_two_files() {
    let tree = covdir(&[
        ("file1_commit1", vec![None, Some(0), Some(1), Some(1), Some(1), Some(1), Some(0)]),
        ("file2_commit1", vec![Some(1), Some(1), Some(0)]),
        ("file3_commit2", vec![Some(1), Some(1), Some(0), Some(1), None]),
    ]);
    let mut blame = MemoryBlame::new();
    for rev in [REV1, REV2] {
        blame.insert(rev, "file1_commit1", lines(REV1, 1..=7));
        blame.insert(rev, "file2_commit1", lines(REV1, 1..=3));
    }
    blame.insert(REV2, "file3_commit2", lines(REV2, 1..=5));

    let commits = vec![
        commit(REV1, Some(1), &["file1_commit1", "file2_commit1"]),
        commit(REV2, Some(2), &["file3_commit2"]),
    ];
    let result = attributor().attribute(&tree, REV2, &commits, &blame).unwrap();

    assert_eq!(
        result,
        expected(vec![
            (
                REV1,
                entry(
                    Some(1),
                    &[
                        ("file1_commit1", path("NUCCCCU", 6, 4, 0)),
                        ("file2_commit1", path("CCU", 3, 2, 0)),
                    ]
                )
            ),
            (REV2, entry(Some(2), &[("file3_commit2", path("CCUCN", 4, 3, 0))])),
        ])
    );
}

#[test]
fn later_commit_overwrites_a_line() {
    // REV2 rewrites line 4 of the file REV1 introduced.
    let tree = covdir(&[("file", vec![None, Some(0), Some(1), Some(1), Some(1), Some(1), Some(0)])]);
    let at_rev2 = annotate(&[lines(REV1, 1..=3), lines(REV2, 4..=4), lines(REV1, 5..=7)]);
    let mut blame = MemoryBlame::new();
    blame.insert(REV1, "file", lines(REV1, 1..=7));
    blame.insert(REV2, "file", at_rev2);

    let commits = vec![
        commit(REV1, Some(1), &["file"]),
        commit(REV2, Some(2), &["file"]),
    ];
    let result = attributor().attribute(&tree, REV2, &commits, &blame).unwrap();

    assert_eq!(
        result,
        expected(vec![
            (REV1, entry(Some(1), &[("file", path("NUCXCCU", 6, 3, 1))])),
            (REV2, entry(Some(2), &[("file", path("NUCCCCU", 1, 1, 0))])),
        ])
    );
    let rev1 = &result.get(REV1).unwrap().paths["file"];
    assert_eq!(rev1.coverage.get(3), Some(CoverageSymbol::Indeterminate));
}

#[test]
fn later_commit_displaces_lines() {
    // REV2 adds two lines on top and two at the bottom of REV1's file.
    let tree = covdir(&[(
        "file",
        vec![
            Some(0),
            Some(1),
            None,
            Some(0),
            Some(1),
            Some(1),
            Some(1),
            Some(1),
            Some(0),
            Some(1),
            Some(0),
        ],
    )]);
    let at_rev2 = annotate(&[lines(REV2, 1..=2), lines(REV1, 1..=7), lines(REV2, 10..=11)]);
    let mut blame = MemoryBlame::new();
    blame.insert(REV1, "file", lines(REV1, 1..=7));
    blame.insert(REV2, "file", at_rev2);

    let commits = vec![
        commit(REV1, Some(1), &["file"]),
        commit(REV2, Some(2), &["file"]),
    ];
    let result = attributor().attribute(&tree, REV2, &commits, &blame).unwrap();

    assert_eq!(
        result,
        expected(vec![
            (REV1, entry(Some(1), &[("file", path("NUCCCCU", 6, 4, 0))])),
            (REV2, entry(Some(2), &[("file", path("UCNUCCCCUCU", 4, 2, 0))])),
        ])
    );
}

#[test]
fn later_commit_shrinks_file() {
    // REV2 deletes the last two lines; pure deletions add nothing.
    let tree = covdir(&[("file", vec![None, Some(0), Some(1), Some(1), Some(1)])]);
    let mut blame = MemoryBlame::new();
    blame.insert(REV1, "file", lines(REV1, 1..=7));
    blame.insert(REV2, "file", lines(REV1, 1..=5));

    let commits = vec![
        commit(REV1, Some(1), &["file"]),
        commit(REV2, Some(2), &["file"]),
    ];
    let result = attributor().attribute(&tree, REV2, &commits, &blame).unwrap();

    assert_eq!(
        result,
        expected(vec![
            (REV1, entry(Some(1), &[("file", path("NUCCCXX", 6, 3, 2))])),
            (REV2, entry(Some(2), &[("file", path("NUCCC", 0, 0, 0))])),
        ])
    );
}

#[test]
fn fully_superseded_file_is_all_unknown() {
    let tree = covdir(&[("file.cpp", vec![Some(1), Some(0), Some(1)])]);
    let mut blame = MemoryBlame::new();
    blame.insert(REV1, "file.cpp", lines(REV1, 1..=3));
    blame.insert(REV2, "file.cpp", lines(REV2, 1..=3));

    let commits = vec![
        commit(REV1, Some(1), &["file.cpp"]),
        commit(REV2, Some(2), &["file.cpp"]),
    ];
    let result = attributor().attribute(&tree, REV2, &commits, &blame).unwrap();

    let rev1 = &result.get(REV1).unwrap().paths["file.cpp"];
    assert_eq!(rev1, &path("XXX", 3, 0, 3));
    assert_eq!(rev1.lines_unknown, rev1.lines_added);
    let rev2 = &result.get(REV2).unwrap().paths["file.cpp"];
    assert_eq!(rev2, &path("CUC", 3, 2, 0));
}

#[test]
fn removed_file_is_not_attributed() {
    let tree = covdir(&[]);
    let mut blame = MemoryBlame::new();
    blame.insert(REV1, "file", lines(REV1, 1..=7));
    blame.remove(REV2, "file");

    let commits = vec![
        commit(REV1, Some(1), &["file"]),
        commit(REV2, None, &["file"]),
    ];
    let result = attributor().attribute(&tree, REV2, &commits, &blame).unwrap();

    assert_eq!(
        result,
        expected(vec![(REV1, entry(Some(1), &[])), (REV2, entry(None, &[]))])
    );
}

#[test]
fn backout_restores_removed_file() {
    let tree = covdir(&[("file", vec![None, Some(0), Some(1), Some(1), Some(1), Some(1), Some(0)])]);
    let mut blame = MemoryBlame::new();
    blame.insert(REV1, "file", lines(REV1, 1..=7));
    blame.remove(REV2, "file");
    blame.insert(REV3, "file", lines(REV1, 1..=7));

    let mut backout = commit(REV3, None, &["file"]);
    backout.description = format!("Backed out changeset {}", &REV2[..12]);
    backout.backout_targets.push(REV2.to_string());

    let commits = vec![
        commit(REV1, Some(1), &["file"]),
        commit(REV2, Some(2), &["file"]),
        backout,
    ];
    let result = attributor().attribute(&tree, REV3, &commits, &blame).unwrap();

    assert_eq!(
        result,
        expected(vec![
            (REV1, entry(Some(1), &[("file", path("NUCCCCU", 6, 4, 0))])),
            (REV2, entry(Some(2), &[])),
        ])
    );
    assert!(!result.contains(REV3));
}

#[test]
fn merges_and_backouts_are_not_keyed() {
    let tree = covdir(&[("a.cpp", vec![Some(1), Some(1)])]);
    let mut blame = MemoryBlame::new();
    blame.insert(REV1, "a.cpp", lines(REV1, 1..=2));
    blame.insert(REV4, "a.cpp", lines(REV1, 1..=2));

    let mut merge = commit(REV2, None, &["a.cpp"]);
    merge.description = "Merge autoland to mozilla-central a=merge".to_string();
    let mut backout = commit(REV3, None, &["a.cpp"]);
    backout.backout_targets.push(REV1.to_string());

    let commits = vec![commit(REV1, Some(1), &["a.cpp"]), merge, backout];
    let result = attributor().attribute(&tree, REV4, &commits, &blame).unwrap();

    assert_eq!(result.len(), 1);
    assert!(result.contains(REV1));
    assert!(!result.contains(REV2));
    assert!(!result.contains(REV3));
}

#[test]
fn custom_merge_markers() {
    let tree = covdir(&[]);
    let blame = MemoryBlame::new();
    let mut merge = commit(REV1, None, &[]);
    merge.description = "Merge branch 'main'".to_string();
    let commits = vec![merge, commit(REV2, None, &[])];

    let attributor = Attributor::new(
        ExclusionPolicy::default(),
        AttributeOptions {
            merge_markers: vec!["Merge branch".to_string()],
            workers: Some(1),
        },
    );
    let result = attributor.attribute(&tree, REV2, &commits, &blame).unwrap();
    assert_eq!(result, expected(vec![(REV2, entry(None, &[]))]));
}

#[test]
fn missing_build_annotate_is_fatal() {
    let tree = covdir(&[("file.cpp", vec![Some(1)])]);
    let mut blame = MemoryBlame::new();
    blame.insert(REV1, "file.cpp", lines(REV1, 1..=1));

    let commits = vec![commit(REV1, Some(1), &["file.cpp"])];
    let err = attributor().attribute(&tree, REV2, &commits, &blame).unwrap_err();
    assert!(
        matches!(err, CommitcovError::MissingBuildAnnotate { ref path, .. } if path == "file.cpp"),
        "unexpected error: {err}"
    );
}

#[test]
fn build_annotate_failure_is_fatal() {
    let tree = covdir(&[("file.cpp", vec![Some(1)])]);
    let mut blame = MemoryBlame::new();
    blame.fail(REV1, "file.cpp", "hg crashed");

    let commits = vec![commit(REV1, Some(1), &["file.cpp"])];
    let err = attributor().attribute(&tree, REV1, &commits, &blame).unwrap_err();
    assert!(matches!(err, CommitcovError::Blame { .. }), "unexpected error: {err}");
}

#[test]
fn commit_annotate_failure_skips_only_that_pair() {
    let tree = covdir(&[
        ("a.cpp", vec![Some(1), Some(0)]),
        ("b.cpp", vec![Some(1), Some(1)]),
    ]);
    let mut blame = MemoryBlame::new();
    blame.insert(REV2, "a.cpp", lines(REV1, 1..=2));
    blame.insert(REV2, "b.cpp", lines(REV2, 1..=2));
    blame.fail(REV1, "a.cpp", "connection reset");

    let commits = vec![
        commit(REV1, Some(1), &["a.cpp"]),
        commit(REV2, Some(2), &["b.cpp"]),
    ];
    let result = attributor().attribute(&tree, REV2, &commits, &blame).unwrap();

    assert_eq!(
        result,
        expected(vec![
            (REV1, entry(Some(1), &[])),
            (REV2, entry(Some(2), &[("b.cpp", path("CC", 2, 2, 0))])),
        ])
    );
}

#[test]
fn lines_past_measured_array_are_not_executable() {
    let tree = covdir(&[("dom/file.cpp", vec![Some(0), Some(3)])]);
    let mut blame = MemoryBlame::new();
    blame.insert(REV1, "dom/file.cpp", lines(REV1, 1..=4));

    let commits = vec![commit(REV1, None, &["dom/file.cpp"])];
    let result = attributor().attribute(&tree, REV1, &commits, &blame).unwrap();

    assert_eq!(
        result.get(REV1).unwrap().paths["dom/file.cpp"],
        path("UCNN", 2, 1, 0)
    );
}

#[test]
fn third_party_and_unsupported_paths_are_skipped_silently() {
    let tree = covdir(&[("dom/file.cpp", vec![Some(1)])]);
    let mut blame = MemoryBlame::new();
    blame.insert(REV1, "dom/file.cpp", lines(REV1, 1..=1));

    let commits = vec![commit(
        REV1,
        Some(7),
        &["dom/file.cpp", "third_party/lib.c", "dom/moz.build"],
    )];
    let attributor = Attributor::new(
        ExclusionPolicy::new(vec!["third_party".to_string()]),
        AttributeOptions::default(),
    );
    let result = attributor.attribute(&tree, REV1, &commits, &blame).unwrap();

    let paths: Vec<&String> = result.get(REV1).unwrap().paths.keys().collect();
    assert_eq!(paths, vec!["dom/file.cpp"]);
}

#[test]
fn attribution_is_idempotent_and_conserves_counts() {
    let tree = covdir(&[
        ("a/one.cpp", vec![None, Some(0), Some(2), Some(0), Some(1)]),
        ("a/two.js", vec![Some(1), Some(1), Some(0)]),
    ]);
    let one_at_rev2 = annotate(&[
        lines(REV1, 1..=2),
        lines(REV2, 3..=3),
        lines(REV1, 4..=4),
        lines(REV2, 5..=5),
    ]);
    let mut blame = MemoryBlame::new();
    blame.insert(REV1, "a/one.cpp", lines(REV1, 1..=4));
    blame.insert(REV2, "a/one.cpp", one_at_rev2.clone());
    blame.insert(REV3, "a/one.cpp", one_at_rev2);
    blame.insert(REV2, "a/two.js", lines(REV2, 1..=2));
    blame.insert(REV3, "a/two.js", annotate(&[lines(REV2, 1..=2), lines(REV3, 3..=3)]));

    let commits = vec![
        commit(REV1, Some(1), &["a/one.cpp"]),
        commit(REV2, Some(2), &["a/one.cpp", "a/two.js"]),
        commit(REV3, Some(3), &["a/two.js"]),
    ];

    let attributor = attributor();
    let first = attributor.attribute(&tree, REV3, &commits, &blame).unwrap();
    let second = attributor.attribute(&tree, REV3, &commits, &blame).unwrap();
    assert_eq!(first, second);

    let order: Vec<&str> = first.iter().map(|(id, _)| id).collect();
    assert_eq!(order, vec![REV1, REV2, REV3]);

    for (_, attribution) in first.iter() {
        for p in attribution.paths.values() {
            assert!(p.lines_covered + p.lines_unknown <= p.lines_added);
            let not_executable = p
                .coverage
                .symbols()
                .iter()
                .filter(|s| **s == CoverageSymbol::NotExecutable)
                .count();
            assert!(p.lines_added as usize + not_executable <= p.coverage.len());
        }
    }

    // REV1's line 3 was overwritten by REV2.
    assert_eq!(first.get(REV1).unwrap().paths["a/one.cpp"], path("NUXU", 3, 0, 1));
    assert_eq!(first.get(REV2).unwrap().paths["a/one.cpp"], path("NUCUC", 2, 2, 0));
    assert_eq!(first.get(REV2).unwrap().paths["a/two.js"], path("CC", 2, 2, 0));
    assert_eq!(first.get(REV3).unwrap().paths["a/two.js"], path("CCU", 1, 0, 0));
    assert_eq!(first.get(REV2).unwrap().totals().added, 4);
}

#[test]
fn single_worker_matches_parallel_run() {
    let tree = covdir(&[("x.rs", vec![Some(1), Some(0), None])]);
    let mut blame = MemoryBlame::new();
    blame.insert(REV1, "x.rs", lines(REV1, 1..=3));
    let commits = vec![commit(REV1, Some(9), &["x.rs"])];

    let serial = Attributor::new(
        ExclusionPolicy::default(),
        AttributeOptions {
            workers: Some(1),
            ..Default::default()
        },
    );
    let parallel = Attributor::new(
        ExclusionPolicy::default(),
        AttributeOptions {
            workers: Some(8),
            ..Default::default()
        },
    );
    assert_eq!(
        serial.attribute(&tree, REV1, &commits, &blame).unwrap(),
        parallel.attribute(&tree, REV1, &commits, &blame).unwrap()
    );
}
