//! Metric reconciliation for a single project version.
//!
//! Raw column values are resolved into [`Count`]s, inactive counts are
//! derived from the all-checks and active-only aggregates, and the ratio
//! percentages are computed under zero guards.

use crate::models::{EditStatusCounts, EditTypeMetric, RawEditCounts, ScopedMetrics};
use crate::nullable::{resolve, Count};

/// `100 * numerator / denominator`, or 0.0 when the ratio is undefined.
pub fn percentage(numerator: Count, denominator: Count) -> f64 {
    match (numerator.value(), denominator.value()) {
        (Some(numerator), Some(denominator)) if denominator > 0 => {
            100.0 * numerator as f64 / denominator as f64
        }
        _ => 0.0,
    }
}

impl EditTypeMetric {
    pub fn from_raw(raw: &RawEditCounts) -> Self {
        let mut metric = Self {
            total_edits: resolve(raw.total_edits),
            total_active_edits: resolve(raw.total_active_edits),
            total_edits_with_open_query: resolve(raw.total_edits_with_open_query),
            total_queries: resolve(raw.total_queries),
            total_queries_open_query: resolve(raw.total_queries_open_query),
            total_open_queries: resolve(raw.total_open_queries),
            total_edits_fired: resolve(raw.total_edits_fired),
            total_edits_not_fired: resolve(raw.total_edits_not_fired),
            total_fired_with_open_query: resolve(raw.total_fired_with_open_query),
            total_not_fired_with_open_query: resolve(raw.total_not_fired_with_open_query),
            total_edits_fired_with_change: resolve(raw.total_edits_fired_with_change),
            total_edits_fired_with_no_change: resolve(raw.total_edits_fired_with_no_change),
            total_queries_with_change: resolve(raw.total_queries_with_change),
            total_open_edits: resolve(raw.total_open_edits),
            ..Self::default()
        };
        metric.calculate_percentages();
        metric
    }

    /// Field-wise `all - active`; unknown on either side stays unknown.
    pub fn inactive(all: &Self, active: &Self) -> Self {
        let mut metric = Self {
            total_edits: all.total_edits - active.total_edits,
            total_active_edits: all.total_active_edits - active.total_active_edits,
            total_edits_with_open_query: all.total_edits_with_open_query
                - active.total_edits_with_open_query,
            total_queries: all.total_queries - active.total_queries,
            total_queries_open_query: all.total_queries_open_query
                - active.total_queries_open_query,
            total_open_queries: all.total_open_queries - active.total_open_queries,
            total_edits_fired: all.total_edits_fired - active.total_edits_fired,
            total_edits_not_fired: all.total_edits_not_fired - active.total_edits_not_fired,
            total_fired_with_open_query: all.total_fired_with_open_query
                - active.total_fired_with_open_query,
            total_not_fired_with_open_query: all.total_not_fired_with_open_query
                - active.total_not_fired_with_open_query,
            total_edits_fired_with_change: all.total_edits_fired_with_change
                - active.total_edits_fired_with_change,
            total_edits_fired_with_no_change: all.total_edits_fired_with_no_change
                - active.total_edits_fired_with_no_change,
            total_queries_with_change: all.total_queries_with_change
                - active.total_queries_with_change,
            total_open_edits: all.total_open_edits - active.total_open_edits,
            ..Self::default()
        };
        metric.calculate_percentages();
        metric
    }

    pub fn calculate_percentages(&mut self) {
        self.percentage_fired = percentage(self.total_edits_fired, self.total_edits);
        self.percentage_not_fired = percentage(self.total_edits_not_fired, self.total_edits);

        self.percentage_fired_with_open_query = percentage(
            self.total_fired_with_open_query,
            self.total_edits_with_open_query,
        );
        self.percentage_not_fired_with_open_query = percentage(
            self.total_not_fired_with_open_query,
            self.total_edits_with_open_query,
        );

        self.percentage_changed =
            percentage(self.total_edits_fired_with_change, self.total_edits_fired);
        self.percentage_not_changed =
            percentage(self.total_edits_fired_with_no_change, self.total_edits_fired);
    }
}

impl ScopedMetrics {
    pub fn from_raw(field: &RawEditCounts, programmed: &RawEditCounts) -> Self {
        Self {
            field: EditTypeMetric::from_raw(field),
            programmed: EditTypeMetric::from_raw(programmed),
        }
    }

    pub fn inactive(all: &Self, active: &Self) -> Self {
        Self {
            field: EditTypeMetric::inactive(&all.field, &active.field),
            programmed: EditTypeMetric::inactive(&all.programmed, &active.programmed),
        }
    }

    /// Total edits across both check types, skipping unknown values.
    pub fn known_total_edits(&self) -> i64 {
        [self.field.total_edits, self.programmed.total_edits]
            .into_iter()
            .filter_map(Count::value)
            .filter(|count| *count >= 0)
            .sum()
    }
}

impl EditStatusCounts {
    pub fn from_scopes(active: &ScopedMetrics, inactive: &ScopedMetrics) -> Self {
        Self {
            active: active.known_total_edits(),
            inactive: inactive.known_total_edits(),
        }
    }
}
