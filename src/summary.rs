//! Threshold-partitioned summary statistics over the last version of each project.

use serde::Serialize;
use tracing::warn;

use crate::hierarchy::Project;
use crate::models::{CheckType, EditTypeMetric, ProjectVersion};

pub const DEFAULT_SUBJECT_THRESHOLD: i64 = 10;
pub const DEFAULT_COMPLETED_MINIMUM: i64 = 1;

/// A predicate over projects; categories are independent, so one project may
/// count towards several of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SummaryCategory {
    AllProjects,
    SubjectsAbove { threshold: i64 },
    CompletedSubjects { minimum: i64 },
}

impl SummaryCategory {
    /// All projects, one category per subject threshold, then completed subjects.
    pub fn standard(thresholds: &[i64], completed_minimum: i64) -> Vec<Self> {
        let mut categories = vec![SummaryCategory::AllProjects];
        categories.extend(
            thresholds
                .iter()
                .map(|&threshold| SummaryCategory::SubjectsAbove { threshold }),
        );
        categories.push(SummaryCategory::CompletedSubjects {
            minimum: completed_minimum,
        });
        categories
    }

    pub fn label(&self) -> String {
        match self {
            SummaryCategory::AllProjects => "All Projects".to_string(),
            SummaryCategory::SubjectsAbove { threshold } => {
                format!("Subject Count > {threshold}")
            }
            SummaryCategory::CompletedSubjects { minimum } => {
                format!("Completed Subjects > {minimum}")
            }
        }
    }

    pub fn threshold(&self) -> i64 {
        match self {
            SummaryCategory::AllProjects => 0,
            SummaryCategory::SubjectsAbove { threshold } => *threshold,
            SummaryCategory::CompletedSubjects { minimum } => *minimum,
        }
    }

    pub fn includes(&self, project: &Project) -> bool {
        match self {
            SummaryCategory::AllProjects => true,
            SummaryCategory::SubjectsAbove { threshold } => {
                project.subject_count().subject_count > *threshold
            }
            SummaryCategory::CompletedSubjects { minimum } => project
                .subject_count()
                .completed
                .is_some_and(|completed| completed > *minimum),
        }
    }
}

/// Summed counts for one check type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TypeTotals {
    pub edits: i64,
    pub edits_with_open_query: i64,
    pub fired: i64,
    pub not_fired: i64,
    pub fired_with_open_query: i64,
    pub not_fired_with_open_query: i64,
    pub open_queries: i64,
    pub fired_with_change: i64,
    pub fired_without_change: i64,
}

impl TypeTotals {
    fn add(&mut self, metric: &EditTypeMetric) {
        self.edits += metric.total_edits.or_zero();
        self.edits_with_open_query += metric.total_edits_with_open_query.or_zero();
        self.fired += metric.total_edits_fired.or_zero();
        self.not_fired += metric.total_edits_not_fired.or_zero();
        self.fired_with_open_query += metric.total_fired_with_open_query.or_zero();
        self.not_fired_with_open_query += metric.total_not_fired_with_open_query.or_zero();
        self.open_queries += metric.total_open_queries.or_zero();
        self.fired_with_change += metric.total_edits_fired_with_change.or_zero();
        self.fired_without_change += metric.total_edits_fired_with_no_change.or_zero();
    }

    fn averaged(&self, records: i64) -> TypeAverages {
        TypeAverages {
            edits: per_record(self.edits, records),
            edits_with_open_query: per_record(self.edits_with_open_query, records),
            fired: per_record(self.fired, records),
            not_fired: per_record(self.not_fired, records),
            fired_with_open_query: per_record(self.fired_with_open_query, records),
            not_fired_with_open_query: per_record(self.not_fired_with_open_query, records),
            open_queries: per_record(self.open_queries, records),
            fired_with_change: per_record(self.fired_with_change, records),
            fired_without_change: per_record(self.fired_without_change, records),
        }
    }

    pub fn percentage_fired(&self) -> f64 {
        ratio(self.fired as f64, self.edits as f64)
    }

    pub fn percentage_not_fired(&self) -> f64 {
        ratio(self.not_fired as f64, self.edits as f64)
    }

    pub fn percentage_fired_with_open_query(&self) -> f64 {
        ratio(
            self.fired_with_open_query as f64,
            self.edits_with_open_query as f64,
        )
    }

    pub fn percentage_not_fired_with_open_query(&self) -> f64 {
        ratio(
            self.not_fired_with_open_query as f64,
            self.edits_with_open_query as f64,
        )
    }

    pub fn percentage_changed(&self) -> f64 {
        ratio(self.fired_with_change as f64, self.fired as f64)
    }

    pub fn percentage_not_changed(&self) -> f64 {
        ratio(self.fired_without_change as f64, self.fired as f64)
    }
}

/// Per-record means for one check type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypeAverages {
    pub edits: f64,
    pub edits_with_open_query: f64,
    pub fired: f64,
    pub not_fired: f64,
    pub fired_with_open_query: f64,
    pub not_fired_with_open_query: f64,
    pub open_queries: f64,
    pub fired_with_change: f64,
    pub fired_without_change: f64,
}

impl TypeAverages {
    pub fn percentage_fired(&self) -> f64 {
        ratio(self.fired, self.edits)
    }

    pub fn percentage_not_fired(&self) -> f64 {
        ratio(self.not_fired, self.edits)
    }

    pub fn percentage_fired_with_open_query(&self) -> f64 {
        ratio(self.fired_with_open_query, self.edits_with_open_query)
    }

    pub fn percentage_not_fired_with_open_query(&self) -> f64 {
        ratio(self.not_fired_with_open_query, self.edits_with_open_query)
    }

    pub fn percentage_changed(&self) -> f64 {
        ratio(self.fired_with_change, self.fired)
    }

    pub fn percentage_not_changed(&self) -> f64 {
        ratio(self.fired_without_change, self.fired)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryCounts {
    pub label: String,
    pub threshold: i64,
    pub record_count: i64,
    pub subject_count: i64,
    pub total_edits: i64,
    pub field: TypeTotals,
    pub programmed: TypeTotals,
}

impl SummaryCounts {
    pub fn new(category: &SummaryCategory) -> Self {
        Self {
            label: category.label(),
            threshold: category.threshold(),
            record_count: 0,
            subject_count: 0,
            total_edits: 0,
            field: TypeTotals::default(),
            programmed: TypeTotals::default(),
        }
    }

    fn accumulate(&mut self, project: &Project, last: &ProjectVersion) {
        self.record_count += 1;
        self.subject_count += project.subject_count().subject_count;
        self.total_edits += last.total_edits();
        self.field.add(last.metrics(CheckType::Field));
        self.programmed.add(last.metrics(CheckType::Programmed));
    }

    pub fn totals(&self, check_type: CheckType) -> &TypeTotals {
        match check_type {
            CheckType::Field => &self.field,
            CheckType::Programmed => &self.programmed,
        }
    }

    /// Field-by-field means; an empty category averages to all zeros.
    pub fn averages(&self) -> AverageSummaryCounts {
        AverageSummaryCounts {
            label: self.label.clone(),
            threshold: self.threshold,
            record_count: self.record_count,
            subject_count: per_record(self.subject_count, self.record_count),
            total_edits: per_record(self.total_edits, self.record_count),
            field: self.field.averaged(self.record_count),
            programmed: self.programmed.averaged(self.record_count),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AverageSummaryCounts {
    pub label: String,
    pub threshold: i64,
    pub record_count: i64,
    pub subject_count: f64,
    pub total_edits: f64,
    pub field: TypeAverages,
    pub programmed: TypeAverages,
}

impl AverageSummaryCounts {
    pub fn averages(&self, check_type: CheckType) -> &TypeAverages {
        match check_type {
            CheckType::Field => &self.field,
            CheckType::Programmed => &self.programmed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryBundle {
    pub category: SummaryCategory,
    pub sums: SummaryCounts,
    pub averages: AverageSummaryCounts,
}

/// Roll the last version of every project into one bundle per category,
/// in the order the categories were requested.
pub fn summarize<'a, P>(projects: P, categories: &[SummaryCategory]) -> Vec<SummaryBundle>
where
    P: IntoIterator<Item = &'a Project>,
{
    let mut sums: Vec<SummaryCounts> = categories.iter().map(SummaryCounts::new).collect();

    for project in projects {
        let Some(last) = project.last_version() else {
            warn!(project = project.name(), "project has no last version; left out of summaries");
            continue;
        };
        for (category, summary) in categories.iter().zip(sums.iter_mut()) {
            if category.includes(project) {
                summary.accumulate(project, last);
            }
        }
    }

    categories
        .iter()
        .zip(sums)
        .map(|(category, sums)| SummaryBundle {
            category: *category,
            averages: sums.averages(),
            sums,
        })
        .collect()
}

fn per_record(sum: i64, records: i64) -> f64 {
    if records > 0 {
        sum as f64 / records as f64
    } else {
        0.0
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        100.0 * numerator / denominator
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawEditCounts, ScopedMetrics, SubjectCount};
    use proptest::prelude::*;

    fn metric(total: i64, fired: i64, changed: i64) -> EditTypeMetric {
        EditTypeMetric::from_raw(&RawEditCounts {
            total_edits: Some(total),
            total_edits_fired: Some(fired),
            total_edits_not_fired: Some(total - fired),
            total_edits_fired_with_change: Some(changed),
            total_edits_fired_with_no_change: Some(fired - changed),
            total_open_queries: Some(1),
            ..RawEditCounts::default()
        })
    }

    fn version(version_id: i64, last: bool, field: EditTypeMetric) -> ProjectVersion {
        let active = ScopedMetrics {
            field,
            programmed: metric(4, 2, 1),
        };
        ProjectVersion {
            study_id: 1,
            project_id: 1,
            project_name: "P".to_string(),
            version_id,
            last_version: last,
            subject_count: None,
            status: Default::default(),
            all: active.clone(),
            inactive: ScopedMetrics::default(),
            active,
        }
    }

    fn project(name: &str, subjects: i64, completed: Option<i64>, field: EditTypeMetric) -> Project {
        Project::with_versions(
            name,
            SubjectCount {
                subject_count: subjects,
                completed,
                ..SubjectCount::default()
            },
            vec![version(1, false, metric(100, 100, 100)), version(2, true, field)],
        )
    }

    #[test]
    fn threshold_category_filters_by_subject_count() {
        let projects = vec![
            project("Small", 5, None, metric(10, 4, 1)),
            project("Large", 20, None, metric(30, 12, 6)),
        ];
        let categories = SummaryCategory::standard(&[10], DEFAULT_COMPLETED_MINIMUM);

        let bundles = summarize(&projects, &categories);

        let all = &bundles[0].sums;
        assert_eq!(all.label, "All Projects");
        assert_eq!(all.record_count, 2);
        assert_eq!(all.subject_count, 25);
        assert_eq!(all.field.edits, 40);

        let above = &bundles[1].sums;
        assert_eq!(above.threshold, 10);
        assert_eq!(above.record_count, 1);
        assert_eq!(above.subject_count, 20);
        assert_eq!(above.field.edits, 30);
        assert_eq!(above.field.fired, 12);
        assert_eq!(above.field.fired_with_change, 6);
        assert_eq!(above.programmed.edits, 4);
        assert_eq!(above.total_edits, 34);
    }

    #[test]
    fn only_the_last_version_is_counted() {
        let projects = vec![project("Only", 50, None, metric(8, 2, 0))];

        let bundles = summarize(&projects, &[SummaryCategory::AllProjects]);

        assert_eq!(bundles[0].sums.field.edits, 8);
        assert_eq!(bundles[0].sums.field.open_queries, 1);
    }

    #[test]
    fn completed_subjects_require_more_than_minimum() {
        let projects = vec![
            project("None", 30, None, metric(10, 5, 1)),
            project("One", 30, Some(1), metric(10, 5, 1)),
            project("Two", 30, Some(2), metric(10, 5, 1)),
        ];

        let bundles = summarize(
            &projects,
            &[SummaryCategory::CompletedSubjects {
                minimum: DEFAULT_COMPLETED_MINIMUM,
            }],
        );

        assert_eq!(bundles[0].sums.record_count, 1);
    }

    #[test]
    fn empty_category_averages_to_zero() {
        let projects = vec![project("Tiny", 3, None, metric(10, 5, 1))];

        let bundles = summarize(&projects, &[SummaryCategory::SubjectsAbove { threshold: 100 }]);

        let averages = &bundles[0].averages;
        assert_eq!(averages.record_count, 0);
        assert_eq!(averages.subject_count, 0.0);
        assert_eq!(averages.total_edits, 0.0);
        assert_eq!(averages.field, TypeAverages::default());
        assert_eq!(averages.programmed, TypeAverages::default());
        assert_eq!(averages.field.percentage_fired(), 0.0);
        assert_eq!(bundles[0].sums.field.percentage_changed(), 0.0);
    }

    #[test]
    fn averages_divide_sums_by_record_count() {
        let projects = vec![
            project("A", 20, None, metric(10, 4, 2)),
            project("B", 40, None, metric(30, 8, 2)),
        ];

        let bundles = summarize(&projects, &[SummaryCategory::AllProjects]);

        let averages = &bundles[0].averages;
        assert_eq!(averages.subject_count, 30.0);
        assert_eq!(averages.field.edits, 20.0);
        assert_eq!(averages.field.fired, 6.0);
        assert_eq!(bundles[0].sums.field.percentage_fired(), 30.0);
        assert_eq!(averages.field.percentage_fired(), 30.0);
        assert_eq!(bundles[0].sums.field.percentage_changed(), 100.0 * 4.0 / 12.0);
    }

    #[test]
    fn projects_without_last_version_are_skipped() {
        let orphan = Project::with_versions(
            "Orphan",
            SubjectCount {
                subject_count: 20,
                ..SubjectCount::default()
            },
            vec![version(1, false, metric(10, 4, 2))],
        );

        let bundles = summarize(&[orphan], &[SummaryCategory::AllProjects]);

        assert_eq!(bundles[0].sums.record_count, 0);
    }

    #[test]
    fn unknown_counts_contribute_nothing() {
        let projects = vec![project("Unknown", 20, None, EditTypeMetric::default())];

        let bundles = summarize(&projects, &[SummaryCategory::AllProjects]);

        assert_eq!(bundles[0].sums.record_count, 1);
        assert_eq!(bundles[0].sums.field.edits, 0);
        assert_eq!(bundles[0].sums.total_edits, 4);
    }

    #[test]
    fn open_query_percentages_share_their_denominator() {
        let mut raw = RawEditCounts {
            total_edits: Some(10),
            total_edits_with_open_query: Some(8),
            total_fired_with_open_query: Some(6),
            total_not_fired_with_open_query: Some(2),
            ..RawEditCounts::default()
        };
        let first = EditTypeMetric::from_raw(&raw);
        raw.total_edits_with_open_query = Some(0);
        raw.total_fired_with_open_query = Some(0);
        raw.total_not_fired_with_open_query = Some(0);
        let second = EditTypeMetric::from_raw(&raw);
        let projects = vec![project("A", 20, None, first), project("B", 20, None, second)];

        let bundles = summarize(&projects, &[SummaryCategory::AllProjects]);

        let totals = bundles[0].sums.totals(CheckType::Field);
        assert_eq!(totals.percentage_fired_with_open_query(), 75.0);
        assert_eq!(totals.percentage_not_fired_with_open_query(), 25.0);
        let averages = bundles[0].averages.averages(CheckType::Field);
        assert_eq!(averages.percentage_fired_with_open_query(), 75.0);
        assert_eq!(averages.percentage_not_fired_with_open_query(), 25.0);
        assert_eq!(TypeTotals::default().percentage_not_fired_with_open_query(), 0.0);
    }

    proptest! {
        #[test]
        fn summary_percentages_stay_finite(
            edits in 0i64..500,
            fired in 0i64..500,
            open in 0i64..500,
        ) {
            let totals = TypeTotals {
                edits,
                fired,
                not_fired: edits - fired.min(edits),
                edits_with_open_query: open,
                not_fired_with_open_query: open / 2,
                ..TypeTotals::default()
            };
            for value in [
                totals.percentage_fired(),
                totals.percentage_not_fired(),
                totals.percentage_not_fired_with_open_query(),
                totals.percentage_changed(),
            ] {
                prop_assert!(value.is_finite());
                prop_assert!(value >= 0.0);
            }
        }
    }

    #[test]
    fn standard_categories_keep_request_order() {
        let categories = SummaryCategory::standard(&[10, 50], 1);
        let labels: Vec<String> = categories.iter().map(SummaryCategory::label).collect();
        assert_eq!(
            labels,
            vec![
                "All Projects",
                "Subject Count > 10",
                "Subject Count > 50",
                "Completed Subjects > 1"
            ]
        );
    }
}
