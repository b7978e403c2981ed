//! Single-pass grouping of the sorted metric stream into project versions.

use std::cmp::Ordering;

use tracing::debug;

use crate::error::CoreError;
use crate::models::{
    CheckScope, EditStatusCounts, MetricRow, ProjectVersion, RawEditCounts, ScopedMetrics,
    VersionKey,
};

/// Groups contiguous rows sharing a (study, project, version) key.
///
/// Rows must arrive sorted by study, project name, project id, version and
/// check status. A finished [`ProjectVersion`] is yielded whenever the key
/// changes, and the last in-progress version is flushed once the input is
/// exhausted. Only the in-progress version is held, so a key that sorts
/// before it is reported as out of order.
pub struct StreamGrouper<I> {
    rows: I,
    current: Option<VersionAccumulator>,
}

impl<I> StreamGrouper<I>
where
    I: Iterator<Item = MetricRow>,
{
    pub fn new<T>(rows: T) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self {
            rows: rows.into_iter(),
            current: None,
        }
    }
}

impl<I> Iterator for StreamGrouper<I>
where
    I: Iterator<Item = MetricRow>,
{
    type Item = Result<ProjectVersion, CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(row) = self.rows.next() {
            let Some(accumulator) = self.current.as_mut() else {
                self.current = Some(VersionAccumulator::start(row));
                continue;
            };

            match accumulator.position_of(&row) {
                Ordering::Equal => {
                    if let Err(err) = accumulator.merge(row) {
                        return Some(Err(err));
                    }
                }
                Ordering::Greater => {
                    let finished = self.current.replace(VersionAccumulator::start(row));
                    if let Some(finished) = finished {
                        return Some(Ok(finished.finalize()));
                    }
                }
                Ordering::Less => {
                    let key = row.key();
                    return Some(Err(CoreError::OutOfOrder {
                        study_id: key.study_id,
                        project_id: key.project_id,
                        version_id: key.version_id,
                    }));
                }
            }
        }

        let last = self.current.take()?;
        Some(Ok(last.finalize()))
    }
}

/// Group a sorted row set, stopping at the first malformed row.
pub fn group_versions<T>(rows: T) -> Result<Vec<ProjectVersion>, CoreError>
where
    T: IntoIterator<Item = MetricRow>,
{
    StreamGrouper::new(rows).collect()
}

struct VersionAccumulator {
    key: VersionKey,
    project_name: String,
    last_version: bool,
    subject_count: Option<i64>,
    active: Option<(RawEditCounts, RawEditCounts)>,
    all: Option<(RawEditCounts, RawEditCounts)>,
}

impl VersionAccumulator {
    fn start(row: MetricRow) -> Self {
        let mut accumulator = Self {
            key: row.key(),
            project_name: row.project_name.clone(),
            last_version: false,
            subject_count: None,
            active: None,
            all: None,
        };
        // A fresh accumulator holds no scope yet, so the first merge cannot collide.
        let _ = accumulator.merge(row);
        accumulator
    }

    /// Where `row` falls relative to this version in the stream's sort order.
    fn position_of(&self, row: &MetricRow) -> Ordering {
        (
            row.study_id,
            row.project_name.as_str(),
            row.project_id,
            row.version_id,
        )
            .cmp(&(
                self.key.study_id,
                self.project_name.as_str(),
                self.key.project_id,
                self.key.version_id,
            ))
    }

    fn merge(&mut self, row: MetricRow) -> Result<(), CoreError> {
        self.last_version |= row.last_version;
        self.subject_count = match (self.subject_count, row.subject_count) {
            (Some(current), Some(incoming)) => Some(current.max(incoming)),
            (current, incoming) => current.or(incoming),
        };

        let slot = match row.scope {
            CheckScope::ActiveOnly => &mut self.active,
            CheckScope::AllChecks => &mut self.all,
        };
        if slot.is_some() {
            return Err(CoreError::DuplicateScope {
                project_id: self.key.project_id,
                version_id: self.key.version_id,
                scope: row.scope,
            });
        }
        *slot = Some((row.field, row.programmed));
        Ok(())
    }

    fn finalize(self) -> ProjectVersion {
        let scoped = |counts: Option<(RawEditCounts, RawEditCounts)>| {
            let (field, programmed) = counts.unwrap_or_default();
            ScopedMetrics::from_raw(&field, &programmed)
        };

        if self.active.is_none() || self.all.is_none() {
            debug!(
                project = %self.project_name,
                version = self.key.version_id,
                has_active = self.active.is_some(),
                has_all = self.all.is_some(),
                "version is missing a check scope; its counts are unknown"
            );
        }

        let active = scoped(self.active);
        let all = scoped(self.all);
        let inactive = ScopedMetrics::inactive(&all, &active);

        ProjectVersion {
            study_id: self.key.study_id,
            project_id: self.key.project_id,
            project_name: self.project_name,
            version_id: self.key.version_id,
            last_version: self.last_version,
            subject_count: self.subject_count,
            status: EditStatusCounts::from_scopes(&active, &inactive),
            active,
            all,
            inactive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nullable::Count;

    fn counts(total_edits: i64, fired: i64) -> RawEditCounts {
        RawEditCounts {
            total_edits: Some(total_edits),
            total_edits_fired: Some(fired),
            total_edits_not_fired: Some(total_edits - fired),
            ..RawEditCounts::default()
        }
    }

    fn row(project_id: i64, version_id: i64, scope: CheckScope, total: i64, fired: i64) -> MetricRow {
        MetricRow {
            study_id: 1,
            project_id,
            project_name: format!("P{project_id}"),
            version_id,
            last_version: false,
            subject_count: Some(12),
            scope,
            field: counts(total, fired),
            programmed: counts(total * 2, fired),
        }
    }

    #[test]
    fn empty_input_emits_nothing() {
        let versions = group_versions(Vec::new()).unwrap();
        assert!(versions.is_empty());
    }

    #[test]
    fn merges_both_scopes_into_one_version() {
        let rows = vec![
            row(1, 10, CheckScope::ActiveOnly, 7, 3),
            row(1, 10, CheckScope::AllChecks, 10, 4),
        ];

        let versions = group_versions(rows).unwrap();

        assert_eq!(versions.len(), 1);
        let version = &versions[0];
        assert_eq!(version.active.field.total_edits, Count::known(7));
        assert_eq!(version.all.field.total_edits, Count::known(10));
        assert_eq!(version.inactive.field.total_edits, Count::known(3));
        assert_eq!(version.inactive.field.total_edits_fired, Count::known(1));
        assert!((version.active.field.percentage_fired - 300.0 / 7.0).abs() < 1e-9);
        assert_eq!(version.status.active, 7 + 14);
        assert_eq!(version.status.inactive, 3 + 6);
    }

    #[test]
    fn emits_one_version_per_key_in_first_seen_order() {
        let rows = vec![
            row(1, 10, CheckScope::ActiveOnly, 1, 0),
            row(1, 10, CheckScope::AllChecks, 2, 0),
            row(1, 11, CheckScope::ActiveOnly, 3, 0),
            row(2, 10, CheckScope::ActiveOnly, 4, 0),
            row(2, 10, CheckScope::AllChecks, 5, 0),
        ];

        let keys: Vec<(i64, i64)> = group_versions(rows)
            .unwrap()
            .iter()
            .map(|version| (version.project_id, version.version_id))
            .collect();

        assert_eq!(keys, vec![(1, 10), (1, 11), (2, 10)]);
    }

    #[test]
    fn final_version_is_flushed_at_end_of_stream() {
        let mut grouper = StreamGrouper::new(vec![
            row(1, 10, CheckScope::ActiveOnly, 1, 0),
            row(1, 11, CheckScope::ActiveOnly, 9, 2),
            row(1, 11, CheckScope::AllChecks, 9, 2),
        ]);

        let first = grouper.next().unwrap().unwrap();
        assert_eq!(first.version_id, 10);

        let tail = grouper.next().unwrap().unwrap();
        assert_eq!(tail.version_id, 11);
        assert_eq!(tail.all.field.total_edits, Count::known(9));

        assert!(grouper.next().is_none());
        assert!(grouper.next().is_none());
    }

    #[test]
    fn missing_scope_leaves_counts_unknown() {
        let versions = group_versions(vec![row(1, 10, CheckScope::ActiveOnly, 5, 1)]).unwrap();

        let version = &versions[0];
        assert_eq!(version.all.field.total_edits, Count::unknown());
        assert_eq!(version.inactive.field.total_edits, Count::unknown());
        assert_eq!(version.status.inactive, 0);
    }

    #[test]
    fn last_version_flag_and_subject_count_are_carried() {
        let mut active = row(1, 10, CheckScope::ActiveOnly, 5, 1);
        active.subject_count = None;
        let mut all = row(1, 10, CheckScope::AllChecks, 5, 1);
        all.last_version = true;
        all.subject_count = Some(30);

        let versions = group_versions(vec![active, all]).unwrap();

        assert!(versions[0].last_version);
        assert_eq!(versions[0].subject_count, Some(30));
    }

    #[test]
    fn rejects_duplicate_scope_rows() {
        let result = group_versions(vec![
            row(1, 10, CheckScope::ActiveOnly, 5, 1),
            row(1, 10, CheckScope::ActiveOnly, 5, 1),
        ]);

        assert_eq!(
            result.unwrap_err(),
            CoreError::DuplicateScope {
                project_id: 1,
                version_id: 10,
                scope: CheckScope::ActiveOnly,
            }
        );
    }

    #[test]
    fn rejects_non_contiguous_keys() {
        let result = group_versions(vec![
            row(1, 10, CheckScope::ActiveOnly, 5, 1),
            row(1, 11, CheckScope::ActiveOnly, 5, 1),
            row(1, 10, CheckScope::AllChecks, 5, 1),
        ]);

        assert_eq!(
            result.unwrap_err(),
            CoreError::OutOfOrder {
                study_id: 1,
                project_id: 1,
                version_id: 10,
            }
        );
    }

    #[test]
    fn rejects_project_sorted_before_the_current_one() {
        let mut grouper = StreamGrouper::new(vec![
            row(2, 10, CheckScope::ActiveOnly, 5, 1),
            row(3, 10, CheckScope::ActiveOnly, 5, 1),
            row(1, 10, CheckScope::ActiveOnly, 5, 1),
        ]);

        assert_eq!(grouper.next().unwrap().unwrap().project_id, 2);
        assert_eq!(
            grouper.next().unwrap().unwrap_err(),
            CoreError::OutOfOrder {
                study_id: 1,
                project_id: 1,
                version_id: 10,
            }
        );
    }

    #[test]
    fn versions_follow_project_name_order() {
        let mut zeta = row(1, 10, CheckScope::ActiveOnly, 5, 1);
        zeta.project_name = "Zeta".to_string();
        let mut alpha = row(2, 10, CheckScope::ActiveOnly, 5, 1);
        alpha.project_name = "Alpha".to_string();

        let names: Vec<String> = group_versions(vec![alpha, zeta])
            .unwrap()
            .into_iter()
            .map(|version| version.project_name)
            .collect();

        assert_eq!(names, vec!["Alpha", "Zeta"]);
    }
}
