use std::fmt;

use chrono::NaiveDateTime;

use crate::error::CoreError;
use crate::nullable::Count;

/// Check names carrying this prefix are field checks; everything else is programmed.
pub const FIELD_CHECK_PREFIX: &str = "SYS_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckType {
    Field,
    Programmed,
}

impl CheckType {
    pub fn from_check_name(name: &str) -> Self {
        if name.starts_with(FIELD_CHECK_PREFIX) {
            CheckType::Field
        } else {
            CheckType::Programmed
        }
    }

    pub fn abbreviation(self) -> &'static str {
        match self {
            CheckType::Field => "fld",
            CheckType::Programmed => "prg",
        }
    }
}

/// Which checks a row of counts was aggregated over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckScope {
    ActiveOnly,
    AllChecks,
}

impl CheckScope {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckScope::ActiveOnly => "ACTIVE",
            CheckScope::AllChecks => "ALL",
        }
    }
}

impl fmt::Display for CheckScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for CheckScope {
    type Error = CoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(CheckScope::ActiveOnly),
            "ALL" => Ok(CheckScope::AllChecks),
            _ => Err(CoreError::UnknownCheckStatus(value.to_string())),
        }
    }
}

/// Whether a check's action set raises an open query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryAction {
    OpenQuery,
    WithoutOpenQuery,
}

impl QueryAction {
    pub fn label(self) -> &'static str {
        match self {
            QueryAction::OpenQuery => "with OpenQuery",
            QueryAction::WithoutOpenQuery => "without OpenQuery",
        }
    }
}

/// Whether a check is still switched on in its CRF version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditStatus {
    Active,
    Inactive,
}

impl EditStatus {
    pub fn label(self) -> &'static str {
        match self {
            EditStatus::Active => "Active",
            EditStatus::Inactive => "Inactive",
        }
    }
}

/// A data-capture site URL and its studies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyUrl {
    pub id: i64,
    pub url: String,
    pub alternate_url: Option<String>,
}

impl StudyUrl {
    /// The alternate URL wins when it is set.
    pub fn display_url(&self) -> &str {
        match self.alternate_url.as_deref() {
            Some(alternate) if !alternate.is_empty() => alternate,
            _ => &self.url,
        }
    }

    /// `pharma.example.com` becomes `pharma`.
    pub fn prefix(&self) -> &str {
        self.display_url().split('.').next().unwrap_or_default()
    }
}

/// Raw per-check-type aggregates as the data source returns them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEditCounts {
    pub total_edits: Option<i64>,
    pub total_active_edits: Option<i64>,
    pub total_edits_with_open_query: Option<i64>,
    pub total_queries: Option<i64>,
    pub total_queries_open_query: Option<i64>,
    pub total_open_queries: Option<i64>,
    pub total_edits_fired: Option<i64>,
    pub total_edits_not_fired: Option<i64>,
    pub total_fired_with_open_query: Option<i64>,
    pub total_not_fired_with_open_query: Option<i64>,
    pub total_edits_fired_with_change: Option<i64>,
    pub total_edits_fired_with_no_change: Option<i64>,
    pub total_queries_with_change: Option<i64>,
    pub total_open_edits: Option<i64>,
}

/// One row of the sorted metric stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRow {
    pub study_id: i64,
    pub project_id: i64,
    pub project_name: String,
    pub version_id: i64,
    pub last_version: bool,
    pub subject_count: Option<i64>,
    pub scope: CheckScope,
    pub field: RawEditCounts,
    pub programmed: RawEditCounts,
}

impl MetricRow {
    pub fn key(&self) -> VersionKey {
        VersionKey {
            study_id: self.study_id,
            project_id: self.project_id,
            version_id: self.version_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionKey {
    pub study_id: i64,
    pub project_id: i64,
    pub version_id: i64,
}

/// Aggregate counts for one check type, one version and one scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditTypeMetric {
    pub total_edits: Count,
    pub total_active_edits: Count,
    pub total_edits_with_open_query: Count,
    pub total_queries: Count,
    pub total_queries_open_query: Count,
    pub total_open_queries: Count,
    pub total_edits_fired: Count,
    pub total_edits_not_fired: Count,
    pub total_fired_with_open_query: Count,
    pub total_not_fired_with_open_query: Count,
    pub total_edits_fired_with_change: Count,
    pub total_edits_fired_with_no_change: Count,
    pub total_queries_with_change: Count,
    pub total_open_edits: Count,
    pub percentage_fired: f64,
    pub percentage_not_fired: f64,
    pub percentage_fired_with_open_query: f64,
    pub percentage_not_fired_with_open_query: f64,
    pub percentage_changed: f64,
    pub percentage_not_changed: f64,
}

/// Field and programmed metrics for one scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopedMetrics {
    pub field: EditTypeMetric,
    pub programmed: EditTypeMetric,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditStatusCounts {
    pub active: i64,
    pub inactive: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectVersion {
    pub study_id: i64,
    pub project_id: i64,
    pub project_name: String,
    pub version_id: i64,
    pub last_version: bool,
    pub subject_count: Option<i64>,
    pub status: EditStatusCounts,
    pub active: ScopedMetrics,
    pub all: ScopedMetrics,
    pub inactive: ScopedMetrics,
}

impl ProjectVersion {
    /// Metrics reported for the version: active checks only.
    pub fn metrics(&self, check_type: CheckType) -> &EditTypeMetric {
        self.metrics_for(EditStatus::Active, check_type)
    }

    pub fn metrics_for(&self, status: EditStatus, check_type: CheckType) -> &EditTypeMetric {
        let scoped = match status {
            EditStatus::Active => &self.active,
            EditStatus::Inactive => &self.inactive,
        };
        match check_type {
            CheckType::Field => &scoped.field,
            CheckType::Programmed => &scoped.programmed,
        }
    }

    /// Known checks of either type with the given status.
    pub fn edit_count(&self, status: EditStatus) -> i64 {
        match status {
            EditStatus::Active => self.status.active,
            EditStatus::Inactive => self.status.inactive,
        }
    }

    pub fn total_edits(&self) -> i64 {
        self.active.field.total_edits.or_zero() + self.active.programmed.total_edits.or_zero()
    }
}

/// Subject enrolment snapshot for a project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectCount {
    pub project_id: i64,
    pub project_name: String,
    pub refresh_date: Option<NaiveDateTime>,
    pub subject_count: i64,
    pub screening: Option<i64>,
    pub screening_failure: Option<i64>,
    pub enrolled: Option<i64>,
    pub early_terminated: Option<i64>,
    pub completed: Option<i64>,
    pub follow_up: Option<i64>,
}

/// A check definition that never fired for its project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnusedEditCheck {
    pub project_id: i64,
    pub name: String,
    pub form_oids: String,
    pub field_oids: String,
    pub variable_oids: String,
    pub usage_count: i64,
    pub custom_function: bool,
}

impl UnusedEditCheck {
    pub fn check_type(&self) -> CheckType {
        CheckType::from_check_name(&self.name)
    }

    pub fn is_non_conformant(&self) -> bool {
        self.name.starts_with("SYS_NC_")
    }

    pub fn is_required(&self) -> bool {
        self.name.starts_with("SYS_REQ_")
    }

    pub fn is_future_date(&self) -> bool {
        self.name.starts_with("SYS_FUTURE_")
    }

    pub fn is_range(&self) -> bool {
        self.name.starts_with("SYS_Q_RANGE_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(alternate: Option<&str>) -> StudyUrl {
        StudyUrl {
            id: 1,
            url: "pharma.mdsol.com".to_string(),
            alternate_url: alternate.map(str::to_string),
        }
    }

    #[test]
    fn alternate_url_takes_precedence() {
        assert_eq!(url(None).display_url(), "pharma.mdsol.com");
        assert_eq!(url(Some("")).display_url(), "pharma.mdsol.com");
        assert_eq!(url(Some("acme.mdsol.com")).display_url(), "acme.mdsol.com");
        assert_eq!(url(Some("acme.mdsol.com")).prefix(), "acme");
    }

    #[test]
    fn check_scope_parses_discriminator() {
        assert_eq!(CheckScope::try_from("ACTIVE"), Ok(CheckScope::ActiveOnly));
        assert_eq!(CheckScope::try_from("all"), Ok(CheckScope::AllChecks));
        assert_eq!(
            CheckScope::try_from("INACTIVE"),
            Err(CoreError::UnknownCheckStatus("INACTIVE".to_string()))
        );
    }

    #[test]
    fn check_type_follows_naming_convention() {
        assert_eq!(CheckType::from_check_name("SYS_REQ_AGE"), CheckType::Field);
        assert_eq!(CheckType::from_check_name("AE_ONSET_CHECK"), CheckType::Programmed);
    }

    #[test]
    fn unused_checks_are_classified_by_prefix() {
        let check = UnusedEditCheck {
            project_id: 1,
            name: "SYS_Q_RANGE_WEIGHT".to_string(),
            form_oids: "VS".to_string(),
            field_oids: "WEIGHT".to_string(),
            variable_oids: "VSWT".to_string(),
            usage_count: 0,
            custom_function: false,
        };
        assert!(check.is_range());
        assert!(!check.is_required());
        assert!(!check.is_non_conformant());
        assert!(!check.is_future_date());
        assert_eq!(check.check_type(), CheckType::Field);
    }
}
