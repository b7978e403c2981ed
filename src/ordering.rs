use crate::hierarchy::Project;
use crate::models::ProjectVersion;

/// Stable sort by project name, case-sensitive ascending.
pub fn sort_projects(projects: &mut [Project]) {
    projects.sort_by(|a, b| a.name().cmp(b.name()));
}

/// Stable sort by numeric version id, ascending.
pub fn sort_versions(versions: &mut [ProjectVersion]) {
    versions.sort_by_key(|version| version.version_id);
}
