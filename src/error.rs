//! Errors raised by the reconciliation core.
//!
//! Numeric edge cases (missing values, zero denominators, empty categories)
//! are never errors; only malformed row streams end up here.

use thiserror::Error;

use crate::models::CheckScope;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("duplicate {scope} row for project {project_id} version {version_id}")]
    DuplicateScope {
        project_id: i64,
        version_id: i64,
        scope: CheckScope,
    },

    #[error(
        "row for study {study_id} project {project_id} version {version_id} is out of order; \
         input must be sorted by study, project name, project, version"
    )]
    OutOfOrder {
        study_id: i64,
        project_id: i64,
        version_id: i64,
    },

    #[error("study {0} has not been registered")]
    UnknownStudy(i64),

    #[error("project {project_id} not found in study {study_id}")]
    UnknownProject { study_id: i64, project_id: i64 },

    #[error("unrecognised check status: {0}")]
    UnknownCheckStatus(String),
}
