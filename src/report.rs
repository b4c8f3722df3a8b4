//! Output formatting for attribution results.

use std::fmt::Write;

use crate::model::{short_id, AttributionResult, CommitTotals, CoverageString, CoverageSymbol};

/// Attribution results for one build, ready to be formatted.
pub struct BuildReport<'a> {
    pub build_revision: &'a str,
    pub result: &'a AttributionResult,
}

impl BuildReport<'_> {
    /// Format using a specific formatter.
    #[must_use]
    pub fn format(&self, formatter: &dyn ReportFormatter) -> String {
        formatter.format(self)
    }

    /// Totals over every commit of the build.
    pub fn totals(&self) -> CommitTotals {
        self.result
            .iter()
            .map(|(_, a)| a.totals())
            .fold(CommitTotals::default(), |acc, t| acc + t)
    }
}

/// Trait for formatting build reports.
pub trait ReportFormatter {
    /// Format the report to a string.
    fn format(&self, report: &BuildReport<'_>) -> String;
}

/// Plain text formatter.
pub struct TextFormatter;

impl ReportFormatter for TextFormatter {
    fn format(&self, report: &BuildReport<'_>) -> String {
        let mut out = String::new();
        let build = short_id(report.build_revision);

        if report.result.is_empty() {
            writeln!(out, "No commits to attribute for build {build}.").unwrap();
            return out;
        }

        writeln!(out, "Commit coverage for build {build}:").unwrap();
        for (id, attribution) in report.result.iter() {
            let totals = attribution.totals();
            let review = attribution
                .review_id
                .map(|r| format!(" (D{r})"))
                .unwrap_or_default();
            writeln!(out).unwrap();
            writeln!(
                out,
                "{}{review}  {}/{} covered, {} unknown",
                short_id(id),
                totals.covered,
                totals.added,
                totals.unknown
            )
            .unwrap();

            if attribution.paths.is_empty() {
                writeln!(out, "  no coverage data").unwrap();
                continue;
            }
            for (path, p) in &attribution.paths {
                let uncovered = format_symbol_ranges(&p.coverage, CoverageSymbol::Uncovered);
                write!(
                    out,
                    "  {path}  {}/{} ({} unknown)",
                    p.lines_covered, p.lines_added, p.lines_unknown
                )
                .unwrap();
                if !uncovered.is_empty() {
                    write!(out, "  uncovered in file: {uncovered}").unwrap();
                }
                out.push('\n');
            }
        }

        let totals = report.totals();
        writeln!(out).unwrap();
        writeln!(
            out,
            "Total: {}/{} added lines covered ({:.1}% of known), {} unknown",
            totals.covered,
            totals.added,
            totals.rate() * 100.0,
            totals.unknown
        )
        .unwrap();
        out
    }
}

/// Markdown formatter.
pub struct MarkdownFormatter;

impl ReportFormatter for MarkdownFormatter {
    fn format(&self, report: &BuildReport<'_>) -> String {
        let mut md = String::new();
        let totals = report.totals();
        let build = short_id(report.build_revision);

        writeln!(md, "### Commit Coverage: {:.1}%\n", totals.rate() * 100.0).unwrap();
        writeln!(
            md,
            "**{}** of **{}** added lines covered in build `{build}`\n",
            totals.covered, totals.added
        )
        .unwrap();

        if report.result.is_empty() {
            md.push_str("No commits to attribute.\n");
            return md;
        }

        md.push_str("| Commit | Review | Added | Covered | Unknown | Rate |\n");
        md.push_str("|:-------|:-------|------:|--------:|--------:|-----:|\n");
        for (id, attribution) in report.result.iter() {
            let t = attribution.totals();
            let review = attribution
                .review_id
                .map(|r| format!("D{r}"))
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                md,
                "| `{}` | {review} | {} | {} | {} | {:.0}% |",
                short_id(id),
                t.added,
                t.covered,
                t.unknown,
                t.rate() * 100.0
            )
            .unwrap();
        }

        md.push_str("\n<details>\n<summary>Uncovered lines (whole file)</summary>\n\n");
        for (id, attribution) in report.result.iter() {
            for (path, p) in &attribution.paths {
                let ranges = format_symbol_ranges(&p.coverage, CoverageSymbol::Uncovered);
                if ranges.is_empty() {
                    continue;
                }
                writeln!(md, "**`{}`** `{path}`: {ranges}\n", short_id(id)).unwrap();
            }
        }
        md.push_str("</details>\n");
        md
    }
}

/// Render the 1-based lines carrying `symbol` as compact ranges, e.g.
/// "1, 3-5, 8".
#[must_use]
pub fn format_symbol_ranges(coverage: &CoverageString, symbol: CoverageSymbol) -> String {
    let lines: Vec<u32> = coverage
        .symbols()
        .iter()
        .zip(1u32..)
        .filter(|(s, _)| **s == symbol)
        .map(|(_, line)| line)
        .collect();

    coalesce_ranges(&lines)
        .iter()
        .map(|&(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}-{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Coalesce sorted line numbers into `(start, end)` ranges of consecutive
/// lines.
#[must_use]
pub fn coalesce_ranges(lines: &[u32]) -> Vec<(u32, u32)> {
    let Some((&first, rest)) = lines.split_first() else {
        return Vec::new();
    };

    let mut ranges = Vec::new();
    let mut start = first;
    let mut end = first;
    for &line in rest {
        if line == end + 1 {
            end = line;
        } else {
            ranges.push((start, end));
            start = line;
            end = line;
        }
    }
    ranges.push((start, end));
    ranges
}
