use std::fmt::Write;

use chrono::NaiveDate;
use serde::Serialize;

use crate::hierarchy::{Project, Study};
use crate::models::{CheckType, EditStatus, EditTypeMetric, ProjectVersion, QueryAction};
use crate::summary::{SummaryBundle, TypeAverages, TypeTotals};

const CHECK_TYPES: [CheckType; 2] = [CheckType::Field, CheckType::Programmed];

const METRIC_COLUMNS: [&str; 9] = [
    "Total Edits",
    "Fired",
    "Unfired",
    "% Fired",
    "% Unfired",
    "With Change",
    "No Change",
    "Queries",
    "Open Queries",
];

const SUMMARY_TYPE_COLUMNS: [&str; 12] = [
    "Checks",
    "Fired",
    "Not Fired",
    "Open",
    "% Fired",
    "% Not Fired",
    "% Fired OpenQuery",
    "% Not Fired OpenQuery",
    "With Change",
    "No Change",
    "% Change",
    "% No Change",
];

/// Column names of the summary CSV, in `SummaryRow` field order.
const SUMMARY_CSV_HEADER: [&str; 30] = [
    "criteria",
    "aggregate",
    "threshold",
    "sample_count",
    "subject_count",
    "total_checks",
    "fld_checks",
    "fld_fired",
    "fld_not_fired",
    "fld_open",
    "fld_pct_fired",
    "fld_pct_not_fired",
    "fld_pct_fired_open_query",
    "fld_pct_not_fired_open_query",
    "fld_with_change",
    "fld_no_change",
    "fld_pct_change",
    "fld_pct_no_change",
    "prg_checks",
    "prg_fired",
    "prg_not_fired",
    "prg_open",
    "prg_pct_fired",
    "prg_pct_not_fired",
    "prg_pct_fired_open_query",
    "prg_pct_not_fired_open_query",
    "prg_with_change",
    "prg_no_change",
    "prg_pct_change",
    "prg_pct_no_change",
];

pub fn report_file_name(study: &Study, generated: NaiveDate) -> String {
    format!("{}_{}.md", study.url().prefix(), generated.format("%Y-%m-%d"))
}

pub fn summary_file_name(study: &Study, generated: NaiveDate) -> String {
    format!(
        "{}_{}_summary.csv",
        study.url().prefix(),
        generated.format("%Y-%m-%d")
    )
}

pub fn build_report(study: &Study, bundles: &[SummaryBundle], generated: NaiveDate) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Edit Check Usage Report");
    let _ = writeln!(
        output,
        "Generated for {} on {} ({} projects)",
        study.url().display_url(),
        generated,
        study.projects().len()
    );

    write_subject_counts(&mut output, study);
    write_unused_edits(&mut output, study, QueryAction::OpenQuery);
    write_unused_edits(&mut output, study, QueryAction::WithoutOpenQuery);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Version Metrics");
    if study.projects().is_empty() {
        let _ = writeln!(output, "No projects with edit checks.");
    } else {
        write_metric_header(&mut output);
        for project in study.projects() {
            for version in project.versions() {
                write_metric_row(&mut output, version);
            }
        }
    }

    write_status_metrics(&mut output, study);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Last Version Metrics");
    let last_versions: Vec<&ProjectVersion> = study
        .projects()
        .iter()
        .filter_map(Project::last_version)
        .collect();
    if last_versions.is_empty() {
        let _ = writeln!(output, "No current versions recorded.");
    } else {
        write_metric_header(&mut output);
        for version in last_versions {
            write_metric_row(&mut output, version);
        }
    }

    write_summary_counts(&mut output, bundles);

    output
}

fn write_subject_counts(output: &mut String, study: &Study) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## Subject Counts");

    if study.projects().is_empty() {
        let _ = writeln!(output, "No projects recorded for this URL.");
        return;
    }

    let _ = writeln!(
        output,
        "| Project | Subjects | Screening | Screen Failures | Enrolled | Early Terminated | Completed | Follow Up | Updated |"
    );
    let _ = writeln!(output, "|---|---|---|---|---|---|---|---|---|");
    for project in study.projects() {
        let counts = project.subject_count();
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} | {} | {} | {} | {} |",
            project.name(),
            positive_or_dash(Some(counts.subject_count)),
            positive_or_dash(counts.screening),
            positive_or_dash(counts.screening_failure),
            positive_or_dash(counts.enrolled),
            positive_or_dash(counts.early_terminated),
            positive_or_dash(counts.completed),
            positive_or_dash(counts.follow_up),
            counts
                .refresh_date
                .map(|date| date.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
}

fn write_unused_edits(output: &mut String, study: &Study, action: QueryAction) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## Unused Edits {}", action.label());

    let edits: Vec<(&Project, _)> = study
        .projects()
        .iter()
        .flat_map(|project| {
            project
                .unused_edits(action)
                .iter()
                .map(move |edit| (project, edit))
        })
        .collect();

    if edits.is_empty() {
        let _ = writeln!(output, "No unused edit checks.");
        return;
    }

    let _ = writeln!(
        output,
        "| Project | Edit Check | Type | Form OID | Field OID | Variable OID | Times Used | Custom Function | Non-conformant | Required | Future | Range |"
    );
    let _ = writeln!(output, "|---|---|---|---|---|---|---|---|---|---|---|---|");
    for (project, edit) in edits {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} | {} | {} | {} | {} | {} | {} | {} |",
            project.name(),
            edit.name,
            edit.check_type().abbreviation(),
            edit.form_oids,
            edit.field_oids,
            edit.variable_oids,
            edit.usage_count,
            yes_no(edit.custom_function),
            yes_no(edit.is_non_conformant()),
            yes_no(edit.is_required()),
            yes_no(edit.is_future_date()),
            yes_no(edit.is_range()),
        );
    }
}

fn write_table_header(output: &mut String, leading: &[&str], per_type: &[&str]) {
    let mut columns: Vec<String> = leading.iter().map(|column| column.to_string()).collect();
    for check_type in CHECK_TYPES {
        let abbr = check_type.abbreviation();
        columns.extend(per_type.iter().map(|column| format!("{column} ({abbr})")));
    }
    let _ = writeln!(output, "| {} |", columns.join(" | "));
    let _ = writeln!(output, "|{}", "---|".repeat(columns.len()));
}

fn write_metric_header(output: &mut String) {
    write_table_header(
        output,
        &[
            "Project",
            "CRF Version",
            "Last Version",
            "Active Edits",
            "Inactive Edits",
        ],
        &METRIC_COLUMNS,
    );
}

fn write_metric_row(output: &mut String, version: &ProjectVersion) {
    let _ = write!(
        output,
        "| {} | {} | {} | {} | {} |",
        version.project_name,
        version.version_id,
        yes_no(version.last_version),
        version.edit_count(EditStatus::Active),
        version.edit_count(EditStatus::Inactive)
    );
    for check_type in CHECK_TYPES {
        write_metric_cells(output, version.metrics(check_type));
    }
    let _ = writeln!(output);
}

/// One Active and one Inactive row per version.
fn write_status_metrics(output: &mut String, study: &Study) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## Version Metrics by Status");

    if study.projects().is_empty() {
        let _ = writeln!(output, "No projects with edit checks.");
        return;
    }

    write_table_header(
        output,
        &["Project", "CRF Version", "Status", "Edits"],
        &METRIC_COLUMNS,
    );
    for version in study.projects().iter().flat_map(Project::versions) {
        for status in [EditStatus::Active, EditStatus::Inactive] {
            let _ = write!(
                output,
                "| {} | {} | {} | {} |",
                version.project_name,
                version.version_id,
                status.label(),
                version.edit_count(status)
            );
            for check_type in CHECK_TYPES {
                write_metric_cells(output, version.metrics_for(status, check_type));
            }
            let _ = writeln!(output);
        }
    }
}

fn write_metric_cells(output: &mut String, metric: &EditTypeMetric) {
    let _ = write!(
        output,
        " {} | {} | {} | {:.2} | {:.2} | {} | {} | {} | {} |",
        metric.total_edits,
        metric.total_fired_with_open_query,
        metric.total_not_fired_with_open_query,
        metric.percentage_fired_with_open_query,
        metric.percentage_not_fired_with_open_query,
        metric.total_edits_fired_with_change,
        metric.total_edits_fired_with_no_change,
        metric.total_queries,
        metric.total_open_queries
    );
}

fn write_summary_counts(output: &mut String, bundles: &[SummaryBundle]) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary Counts");

    let rows = summary_rows(bundles);
    if rows.is_empty() {
        let _ = writeln!(output, "No projects matched any summary criteria.");
        return;
    }

    write_table_header(
        output,
        &[
            "Criteria",
            "Aggregate",
            "Threshold",
            "Sample Count",
            "Subject Count",
            "Total Checks",
        ],
        &SUMMARY_TYPE_COLUMNS,
    );
    for row in rows {
        let mut cells = vec![
            row.criteria.clone(),
            row.aggregate.to_string(),
            row.threshold.clone(),
            row.sample_count.to_string(),
            format!("{:.2}", row.subject_count),
            format!("{:.2}", row.total_checks),
        ];
        for line in [row.field_line(), row.programmed_line()] {
            cells.extend(line.cells());
        }
        let _ = writeln!(output, "| {} |", cells.join(" | "));
    }
}

/// One flattened Sum or Average line of the summary table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub criteria: String,
    pub aggregate: &'static str,
    pub threshold: String,
    pub sample_count: i64,
    pub subject_count: f64,
    pub total_checks: f64,
    pub fld_checks: f64,
    pub fld_fired: f64,
    pub fld_not_fired: f64,
    pub fld_open: f64,
    pub fld_pct_fired: f64,
    pub fld_pct_not_fired: f64,
    pub fld_pct_fired_open_query: f64,
    pub fld_pct_not_fired_open_query: f64,
    pub fld_with_change: f64,
    pub fld_no_change: f64,
    pub fld_pct_change: f64,
    pub fld_pct_no_change: f64,
    pub prg_checks: f64,
    pub prg_fired: f64,
    pub prg_not_fired: f64,
    pub prg_open: f64,
    pub prg_pct_fired: f64,
    pub prg_pct_not_fired: f64,
    pub prg_pct_fired_open_query: f64,
    pub prg_pct_not_fired_open_query: f64,
    pub prg_with_change: f64,
    pub prg_no_change: f64,
    pub prg_pct_change: f64,
    pub prg_pct_no_change: f64,
}

/// Sum and Average rows for every category with at least one record.
pub fn summary_rows(bundles: &[SummaryBundle]) -> Vec<SummaryRow> {
    let mut rows = Vec::new();

    for bundle in bundles {
        let sums = &bundle.sums;
        if sums.record_count == 0 {
            continue;
        }
        let threshold = if sums.threshold > 0 {
            format!("> {}", sums.threshold)
        } else {
            "ALL".to_string()
        };

        rows.push(SummaryRow::assemble(
            &sums.label,
            "Sum",
            &threshold,
            sums.record_count,
            sums.subject_count as f64,
            sums.total_edits as f64,
            CHECK_TYPES.map(|check_type| TypeLine::from_totals(sums.totals(check_type))),
        ));

        let averages = &bundle.averages;
        rows.push(SummaryRow::assemble(
            &averages.label,
            "Average",
            &threshold,
            averages.record_count,
            averages.subject_count,
            averages.total_edits,
            CHECK_TYPES.map(|check_type| TypeLine::from_averages(averages.averages(check_type))),
        ));
    }

    rows
}

/// Write the summary rows as CSV. The header is written even when no
/// category has records.
pub fn write_summary_csv<W: std::io::Write>(
    writer: W,
    bundles: &[SummaryBundle],
) -> anyhow::Result<()> {
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    csv_writer.write_record(SUMMARY_CSV_HEADER)?;
    for row in summary_rows(bundles) {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

struct TypeLine {
    checks: f64,
    fired: f64,
    not_fired: f64,
    open: f64,
    pct_fired: f64,
    pct_not_fired: f64,
    pct_fired_open_query: f64,
    pct_not_fired_open_query: f64,
    with_change: f64,
    no_change: f64,
    pct_change: f64,
    pct_no_change: f64,
}

impl TypeLine {
    fn from_totals(totals: &TypeTotals) -> Self {
        Self {
            checks: totals.edits as f64,
            fired: totals.fired as f64,
            not_fired: totals.not_fired as f64,
            open: totals.open_queries as f64,
            pct_fired: totals.percentage_fired(),
            pct_not_fired: totals.percentage_not_fired(),
            pct_fired_open_query: totals.percentage_fired_with_open_query(),
            pct_not_fired_open_query: totals.percentage_not_fired_with_open_query(),
            with_change: totals.fired_with_change as f64,
            no_change: totals.fired_without_change as f64,
            pct_change: totals.percentage_changed(),
            pct_no_change: totals.percentage_not_changed(),
        }
    }

    fn from_averages(averages: &TypeAverages) -> Self {
        Self {
            checks: averages.edits,
            fired: averages.fired,
            not_fired: averages.not_fired,
            open: averages.open_queries,
            pct_fired: averages.percentage_fired(),
            pct_not_fired: averages.percentage_not_fired(),
            pct_fired_open_query: averages.percentage_fired_with_open_query(),
            pct_not_fired_open_query: averages.percentage_not_fired_with_open_query(),
            with_change: averages.fired_with_change,
            no_change: averages.fired_without_change,
            pct_change: averages.percentage_changed(),
            pct_no_change: averages.percentage_not_changed(),
        }
    }

    fn cells(&self) -> Vec<String> {
        let count = |value: f64| format!("{value:.2}");
        let pct = |value: f64| format!("{value:.2}%");
        vec![
            count(self.checks),
            count(self.fired),
            count(self.not_fired),
            count(self.open),
            pct(self.pct_fired),
            pct(self.pct_not_fired),
            pct(self.pct_fired_open_query),
            pct(self.pct_not_fired_open_query),
            count(self.with_change),
            count(self.no_change),
            pct(self.pct_change),
            pct(self.pct_no_change),
        ]
    }
}

impl SummaryRow {
    fn assemble(
        criteria: &str,
        aggregate: &'static str,
        threshold: &str,
        sample_count: i64,
        subject_count: f64,
        total_checks: f64,
        [fld, prg]: [TypeLine; 2],
    ) -> Self {
        Self {
            criteria: criteria.to_string(),
            aggregate,
            threshold: threshold.to_string(),
            sample_count,
            subject_count,
            total_checks,
            fld_checks: fld.checks,
            fld_fired: fld.fired,
            fld_not_fired: fld.not_fired,
            fld_open: fld.open,
            fld_pct_fired: fld.pct_fired,
            fld_pct_not_fired: fld.pct_not_fired,
            fld_pct_fired_open_query: fld.pct_fired_open_query,
            fld_pct_not_fired_open_query: fld.pct_not_fired_open_query,
            fld_with_change: fld.with_change,
            fld_no_change: fld.no_change,
            fld_pct_change: fld.pct_change,
            fld_pct_no_change: fld.pct_no_change,
            prg_checks: prg.checks,
            prg_fired: prg.fired,
            prg_not_fired: prg.not_fired,
            prg_open: prg.open,
            prg_pct_fired: prg.pct_fired,
            prg_pct_not_fired: prg.pct_not_fired,
            prg_pct_fired_open_query: prg.pct_fired_open_query,
            prg_pct_not_fired_open_query: prg.pct_not_fired_open_query,
            prg_with_change: prg.with_change,
            prg_no_change: prg.no_change,
            prg_pct_change: prg.pct_change,
            prg_pct_no_change: prg.pct_no_change,
        }
    }

    fn field_line(&self) -> TypeLine {
        TypeLine {
            checks: self.fld_checks,
            fired: self.fld_fired,
            not_fired: self.fld_not_fired,
            open: self.fld_open,
            pct_fired: self.fld_pct_fired,
            pct_not_fired: self.fld_pct_not_fired,
            pct_fired_open_query: self.fld_pct_fired_open_query,
            pct_not_fired_open_query: self.fld_pct_not_fired_open_query,
            with_change: self.fld_with_change,
            no_change: self.fld_no_change,
            pct_change: self.fld_pct_change,
            pct_no_change: self.fld_pct_no_change,
        }
    }

    fn programmed_line(&self) -> TypeLine {
        TypeLine {
            checks: self.prg_checks,
            fired: self.prg_fired,
            not_fired: self.prg_not_fired,
            open: self.prg_open,
            pct_fired: self.prg_pct_fired,
            pct_not_fired: self.prg_pct_not_fired,
            pct_fired_open_query: self.prg_pct_fired_open_query,
            pct_not_fired_open_query: self.prg_pct_not_fired_open_query,
            with_change: self.prg_with_change,
            no_change: self.prg_no_change,
            pct_change: self.prg_pct_change,
            pct_no_change: self.prg_pct_no_change,
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Y"
    } else {
        "N"
    }
}

fn positive_or_dash(value: Option<i64>) -> String {
    match value {
        Some(count) if count > 0 => count.to_string(),
        _ => "-".to_string(),
    }
}
