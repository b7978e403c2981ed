//! Assembly of the Study -> Project -> ProjectVersion tree.
//!
//! The builder owns every entity while the tree is being put together and
//! keys studies and projects by their database ids. [`HierarchyBuilder::build`]
//! orders the children and hands back an immutable [`Hierarchy`] that is only
//! read through its accessors.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::error::CoreError;
use crate::models::{ProjectVersion, QueryAction, StudyUrl, SubjectCount, UnusedEditCheck};
use crate::ordering::{sort_projects, sort_versions};

/// A project and its CRF versions within one study URL.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    name: String,
    subject_count: SubjectCount,
    versions: Vec<ProjectVersion>,
    unused_with_open_query: Vec<UnusedEditCheck>,
    unused: Vec<UnusedEditCheck>,
}

/// One study URL with its projects ordered by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Study {
    url: StudyUrl,
    projects: Vec<Project>,
}

#[derive(Debug, Default)]
pub struct HierarchyBuilder {
    studies: BTreeMap<i64, StudyEntry>,
}

#[derive(Debug)]
struct StudyEntry {
    url: StudyUrl,
    projects: BTreeMap<i64, Project>,
}

impl HierarchyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_study(&mut self, url: StudyUrl) {
        self.studies.entry(url.id).or_insert_with(|| StudyEntry {
            url,
            projects: BTreeMap::new(),
        });
    }

    /// Add a version under its project. Until a snapshot is attached the
    /// project's subject count is the largest count carried on its versions.
    pub fn push_version(&mut self, version: ProjectVersion) -> Result<(), CoreError> {
        let study = self
            .studies
            .get_mut(&version.study_id)
            .ok_or(CoreError::UnknownStudy(version.study_id))?;

        let project = study
            .projects
            .entry(version.project_id)
            .or_insert_with(|| Project::new(version.project_id, &version.project_name));
        if let Some(count) = version.subject_count {
            project.subject_count.subject_count = project.subject_count.subject_count.max(count);
        }
        project.versions.push(version);
        Ok(())
    }

    pub fn project_ids(&self, study_id: i64) -> Vec<i64> {
        self.studies
            .get(&study_id)
            .map(|study| study.projects.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Attach subject snapshots by project id, replacing the counts taken
    /// from the rows. Snapshots for projects with no versions are ignored.
    pub fn attach_subject_counts(
        &mut self,
        study_id: i64,
        counts: Vec<SubjectCount>,
    ) -> Result<(), CoreError> {
        let study = self
            .studies
            .get_mut(&study_id)
            .ok_or(CoreError::UnknownStudy(study_id))?;

        for count in counts {
            match study.projects.get_mut(&count.project_id) {
                Some(project) => project.subject_count = count,
                None => debug!(
                    project = %count.project_name,
                    "subject count for project without edit checks ignored"
                ),
            }
        }
        Ok(())
    }

    pub fn attach_unused_edits(
        &mut self,
        study_id: i64,
        project_id: i64,
        action: QueryAction,
        edits: Vec<UnusedEditCheck>,
    ) -> Result<(), CoreError> {
        let project = self
            .studies
            .get_mut(&study_id)
            .ok_or(CoreError::UnknownStudy(study_id))?
            .projects
            .get_mut(&project_id)
            .ok_or(CoreError::UnknownProject {
                study_id,
                project_id,
            })?;

        match action {
            QueryAction::OpenQuery => project.unused_with_open_query = edits,
            QueryAction::WithoutOpenQuery => project.unused = edits,
        }
        Ok(())
    }

    /// Flag the version matching each project's current-version marker.
    ///
    /// Projects without a marker, or whose marker names no known version,
    /// keep the flags carried on their rows.
    pub fn mark_last_versions(
        &mut self,
        study_id: i64,
        markers: &HashMap<i64, i64>,
    ) -> Result<(), CoreError> {
        let study = self
            .studies
            .get_mut(&study_id)
            .ok_or(CoreError::UnknownStudy(study_id))?;

        for (project_id, project) in study.projects.iter_mut() {
            let Some(current) = markers.get(project_id) else {
                continue;
            };
            if project.version_by_id(*current).is_none() {
                warn!(
                    project = %project.name,
                    marker = *current,
                    "current version marker matches no version"
                );
                continue;
            }
            for version in project.versions.iter_mut() {
                version.last_version = version.version_id == *current;
            }
        }
        Ok(())
    }

    pub fn build(self) -> Hierarchy {
        let studies = self
            .studies
            .into_iter()
            .map(|(study_id, entry)| {
                let mut projects: Vec<Project> = entry.projects.into_values().collect();
                for project in projects.iter_mut() {
                    sort_versions(&mut project.versions);
                    if !project.has_single_last_version() {
                        warn!(
                            project = %project.name,
                            "project does not have exactly one current version"
                        );
                    }
                }
                sort_projects(&mut projects);
                (
                    study_id,
                    Study {
                        url: entry.url,
                        projects,
                    },
                )
            })
            .collect();

        Hierarchy { studies }
    }
}

/// The finished, ordered tree handed to report rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct Hierarchy {
    studies: BTreeMap<i64, Study>,
}

impl Hierarchy {
    pub fn study(&self, study_id: i64) -> Option<&Study> {
        self.studies.get(&study_id)
    }
}

impl Study {
    pub fn url(&self) -> &StudyUrl {
        &self.url
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn project_by_name(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|project| project.name == name)
    }
}

impl Project {
    pub fn new(project_id: i64, name: &str) -> Self {
        Self {
            name: name.to_string(),
            subject_count: SubjectCount {
                project_id,
                project_name: name.to_string(),
                ..SubjectCount::default()
            },
            versions: Vec::new(),
            unused_with_open_query: Vec::new(),
            unused: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subject_count(&self) -> &SubjectCount {
        &self.subject_count
    }

    /// Versions in ascending id order.
    pub fn versions(&self) -> &[ProjectVersion] {
        &self.versions
    }

    pub fn version_by_id(&self, version_id: i64) -> Option<&ProjectVersion> {
        self.versions
            .iter()
            .find(|version| version.version_id == version_id)
    }

    pub fn last_version(&self) -> Option<&ProjectVersion> {
        self.versions.iter().find(|version| version.last_version)
    }

    pub fn has_single_last_version(&self) -> bool {
        self.versions
            .iter()
            .filter(|version| version.last_version)
            .count()
            == 1
    }

    pub fn unused_edits(&self, action: QueryAction) -> &[UnusedEditCheck] {
        match action {
            QueryAction::OpenQuery => &self.unused_with_open_query,
            QueryAction::WithoutOpenQuery => &self.unused,
        }
    }
}

#[cfg(test)]
impl Project {
    pub fn with_versions(
        name: &str,
        subject_count: SubjectCount,
        versions: Vec<ProjectVersion>,
    ) -> Self {
        Self {
            subject_count,
            versions,
            ..Project::new(0, name)
        }
    }
}
