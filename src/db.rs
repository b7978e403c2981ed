use std::collections::HashMap;

use anyhow::Context;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::models::{
    CheckScope, MetricRow, QueryAction, RawEditCounts, StudyUrl, SubjectCount, UnusedEditCheck,
};

/// Aggregates computed per check type. Every value is NULL when the version
/// has no checks of that type, mirroring a missing row.
const METRIC_COLUMNS: &[(&str, &str)] = &[
    ("total_edits", "1"),
    (
        "total_active_edits",
        "CASE WHEN s.is_active = 1 THEN 1 ELSE 0 END",
    ),
    (
        "total_edits_with_open_query",
        "CASE WHEN s.actions LIKE '%OpenQuery%' THEN 1 ELSE 0 END",
    ),
    ("total_queries", "s.total_check_executions"),
    (
        "total_queries_open_query",
        "CASE WHEN s.actions LIKE '%OpenQuery%' THEN s.total_check_executions ELSE 0 END",
    ),
    (
        "total_open_queries",
        "CASE WHEN s.open_checks >= 0 THEN s.open_checks ELSE 0 END",
    ),
    (
        "total_edits_fired",
        "CASE WHEN s.total_check_executions > 0 THEN 1 ELSE 0 END",
    ),
    (
        "total_edits_not_fired",
        "CASE WHEN s.total_check_executions = 0 THEN 1 ELSE 0 END",
    ),
    (
        "total_fired_with_open_query",
        "CASE WHEN s.total_check_executions > 0 AND s.actions LIKE '%OpenQuery%' THEN 1 ELSE 0 END",
    ),
    (
        "total_not_fired_with_open_query",
        "CASE WHEN s.total_check_executions = 0 AND s.actions LIKE '%OpenQuery%' THEN 1 ELSE 0 END",
    ),
    (
        "total_edits_fired_with_change",
        "CASE WHEN s.change_count > 0 THEN 1 ELSE 0 END",
    ),
    (
        "total_edits_fired_with_no_change",
        "CASE WHEN s.change_count = 0 AND s.no_change_count > 0 THEN 1 ELSE 0 END",
    ),
    (
        "total_queries_with_change",
        "CASE WHEN s.change_count > 0 THEN s.change_count ELSE 0 END",
    ),
    (
        "total_open_edits",
        "CASE WHEN s.open_checks > 0 THEN 1 ELSE 0 END",
    ),
];

const FIELD_FILTER: &str = r"s.edit_check_name LIKE 'SYS\_%'";
const PROGRAMMED_FILTER: &str = r"s.edit_check_name NOT LIKE 'SYS\_%'";

fn type_columns(prefix: &str, filter: &str) -> String {
    METRIC_COLUMNS
        .iter()
        .map(|(name, expr)| {
            format!(
                "CASE WHEN COUNT(*) FILTER (WHERE {filter}) = 0 THEN NULL \
                 ELSE (SUM({expr}) FILTER (WHERE {filter}))::bigint END AS {prefix}_{name}"
            )
        })
        .collect::<Vec<_>>()
        .join(",\n       ")
}

fn metric_rows_query() -> String {
    format!(
        r#"
        WITH scoped AS (
            SELECT edt.*, 'ACTIVE'::text AS check_status
            FROM edit_check edt
            WHERE edt.url_id = $1 AND edt.is_active = 1
            UNION ALL
            SELECT edt.*, 'ALL'::text AS check_status
            FROM edit_check edt
            WHERE edt.url_id = $1
        )
        SELECT s.url_id::bigint AS url_id,
               s.project_id::bigint AS project_id,
               pj.project_name,
               s.crf_version_id::bigint AS crf_version_id,
               COALESCE(plv.crf_version_id = s.crf_version_id, FALSE) AS last_version,
               MAX(s.subject_count)::bigint AS subject_count,
               s.check_status,
               {field},
               {programmed}
        FROM scoped s
            JOIN project pj ON pj.id = s.project_id
            LEFT JOIN project_last_version plv ON plv.project_id = s.project_id
        GROUP BY s.url_id, s.project_id, pj.project_name, s.crf_version_id,
                 plv.crf_version_id, s.check_status
        ORDER BY s.url_id, pj.project_name COLLATE "C", s.project_id, s.crf_version_id, s.check_status
        "#,
        field = type_columns("fld", FIELD_FILTER),
        programmed = type_columns("prg", PROGRAMMED_FILTER),
    )
}

fn raw_counts(row: &PgRow, prefix: &str) -> anyhow::Result<RawEditCounts> {
    let get = |name: &str| -> anyhow::Result<Option<i64>> {
        let column = format!("{prefix}_{name}");
        row.try_get(column.as_str())
            .with_context(|| format!("reading column {column}"))
    };

    Ok(RawEditCounts {
        total_edits: get("total_edits")?,
        total_active_edits: get("total_active_edits")?,
        total_edits_with_open_query: get("total_edits_with_open_query")?,
        total_queries: get("total_queries")?,
        total_queries_open_query: get("total_queries_open_query")?,
        total_open_queries: get("total_open_queries")?,
        total_edits_fired: get("total_edits_fired")?,
        total_edits_not_fired: get("total_edits_not_fired")?,
        total_fired_with_open_query: get("total_fired_with_open_query")?,
        total_not_fired_with_open_query: get("total_not_fired_with_open_query")?,
        total_edits_fired_with_change: get("total_edits_fired_with_change")?,
        total_edits_fired_with_no_change: get("total_edits_fired_with_no_change")?,
        total_queries_with_change: get("total_queries_with_change")?,
        total_open_edits: get("total_open_edits")?,
    })
}

fn study_url(row: &PgRow) -> anyhow::Result<StudyUrl> {
    Ok(StudyUrl {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        alternate_url: row.try_get("alternate_url")?,
    })
}

pub async fn list_urls(pool: &PgPool) -> anyhow::Result<Vec<StudyUrl>> {
    let rows = sqlx::query(
        "SELECT id::bigint AS id, url, alternate_url FROM rave_url ORDER BY url, alternate_url",
    )
    .fetch_all(pool)
    .await
    .context("failed to list study URLs")?;

    rows.iter().map(study_url).collect()
}

pub async fn fetch_matching_urls(pool: &PgPool, pattern: &str) -> anyhow::Result<Vec<StudyUrl>> {
    let rows = sqlx::query(
        r#"
        SELECT id::bigint AS id, url, alternate_url
        FROM rave_url
        WHERE url LIKE '%' || $1 || '%'
           OR alternate_url LIKE '%' || $1 || '%'
        ORDER BY id
        "#,
    )
    .bind(pattern)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to match study URLs against {pattern}"))?;

    rows.iter().map(study_url).collect()
}

/// Metric rows for one study URL, sorted by study, project, version and scope.
pub async fn fetch_metric_rows(pool: &PgPool, url_id: i64) -> anyhow::Result<Vec<MetricRow>> {
    let query = metric_rows_query();
    let rows = sqlx::query(&query)
        .bind(url_id)
        .fetch_all(pool)
        .await
        .context("failed to fetch edit check metrics")?;

    let mut metrics = Vec::with_capacity(rows.len());
    for row in rows {
        let status: String = row.try_get("check_status")?;
        metrics.push(MetricRow {
            study_id: row.try_get("url_id")?,
            project_id: row.try_get("project_id")?,
            project_name: row.try_get("project_name")?,
            version_id: row.try_get("crf_version_id")?,
            last_version: row.try_get("last_version")?,
            subject_count: row.try_get("subject_count")?,
            scope: CheckScope::try_from(status.as_str())?,
            field: raw_counts(&row, "fld")?,
            programmed: raw_counts(&row, "prg")?,
        });
    }

    Ok(metrics)
}

/// Current version per project id.
pub async fn fetch_last_versions(pool: &PgPool, url_id: i64) -> anyhow::Result<HashMap<i64, i64>> {
    let rows = sqlx::query(
        r#"
        SELECT plv.project_id::bigint AS project_id,
               plv.crf_version_id::bigint AS crf_version_id
        FROM project_last_version plv
            JOIN project pj ON pj.id = plv.project_id
        WHERE pj.url_id = $1
        "#,
    )
    .bind(url_id)
    .fetch_all(pool)
    .await
    .context("failed to fetch current project versions")?;

    let mut markers = HashMap::with_capacity(rows.len());
    for row in rows {
        markers.insert(row.try_get("project_id")?, row.try_get("crf_version_id")?);
    }
    Ok(markers)
}

pub async fn fetch_subject_counts(
    pool: &PgPool,
    url_id: i64,
) -> anyhow::Result<Vec<SubjectCount>> {
    let rows = sqlx::query(
        r#"
        SELECT edt.project_id::bigint AS project_id,
               pj.project_name,
               rd.refresh_date::timestamp AS refresh_date,
               COALESCE(MAX(edt.subject_count), 0)::bigint AS subject_count,
               MAX(edt.screening_subjects)::bigint AS screening_subject_count,
               MAX(edt.screening_failure_subjects)::bigint AS screening_failure_subject_count,
               MAX(edt.enrolled_subjects)::bigint AS enrolled_subject_count,
               MAX(edt.early_terminated_subjects)::bigint AS early_terminated_subject_count,
               MAX(edt.completed_subjects)::bigint AS completed_subject_count,
               MAX(edt.enrolled_follow_up_subjects)::bigint AS follow_up_subject_count
        FROM edit_check edt
            JOIN project pj ON edt.project_id = pj.id
            LEFT JOIN refresh_date rd ON pj.id = rd.project_id
        WHERE edt.url_id = $1
        GROUP BY edt.project_id, pj.project_name, rd.refresh_date
        "#,
    )
    .bind(url_id)
    .fetch_all(pool)
    .await
    .context("failed to fetch subject counts")?;

    let mut counts = Vec::with_capacity(rows.len());
    for row in rows {
        counts.push(SubjectCount {
            project_id: row.try_get("project_id")?,
            project_name: row.try_get("project_name")?,
            refresh_date: row.try_get("refresh_date")?,
            subject_count: row.try_get("subject_count")?,
            screening: row.try_get("screening_subject_count")?,
            screening_failure: row.try_get("screening_failure_subject_count")?,
            enrolled: row.try_get("enrolled_subject_count")?,
            early_terminated: row.try_get("early_terminated_subject_count")?,
            completed: row.try_get("completed_subject_count")?,
            follow_up: row.try_get("follow_up_subject_count")?,
        });
    }

    Ok(counts)
}

/// Checks of a project that never executed, restricted by open-query action.
pub async fn fetch_unused_edits(
    pool: &PgPool,
    project_id: i64,
    action: QueryAction,
) -> anyhow::Result<Vec<UnusedEditCheck>> {
    let rows = sqlx::query(
        r#"
        SELECT total.project_id::bigint AS project_id,
               total.edit_check_name,
               (SELECT COALESCE(array_to_string(array_remove(array_agg(DISTINCT chk.form_oid), NULL), '|'), '')
                FROM edit_check chk
                WHERE chk.project_id = total.project_id
                  AND chk.edit_check_name = total.edit_check_name) AS form_oids,
               (SELECT COALESCE(array_to_string(array_remove(array_agg(DISTINCT chk.field_oid), NULL), '|'), '')
                FROM edit_check chk
                WHERE chk.project_id = total.project_id
                  AND chk.edit_check_name = total.edit_check_name) AS field_oids,
               (SELECT COALESCE(array_to_string(array_remove(array_agg(DISTINCT chk.variable_oid), NULL), '|'), '')
                FROM edit_check chk
                WHERE chk.project_id = total.project_id
                  AND chk.edit_check_name = total.edit_check_name) AS variable_oids,
               EXISTS (SELECT 1
                       FROM edit_check cf
                       WHERE cf.project_id = total.project_id
                         AND cf.edit_check_name = total.edit_check_name
                         AND cf.actions LIKE '%CustomFunction%') AS custom_function
        FROM (SELECT project_id,
                     edit_check_name,
                     SUM(total_check_executions) AS total_executions
              FROM edit_check
              WHERE project_id = $1
                AND (actions LIKE '%OpenQuery%') = $2
              GROUP BY project_id, edit_check_name) total
        WHERE total.total_executions = 0
        ORDER BY total.edit_check_name
        "#,
    )
    .bind(project_id)
    .bind(action == QueryAction::OpenQuery)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to fetch unused edit checks for project {project_id}"))?;

    let mut edits = Vec::with_capacity(rows.len());
    for row in rows {
        edits.push(UnusedEditCheck {
            project_id: row.try_get("project_id")?,
            name: row.try_get("edit_check_name")?,
            form_oids: row.try_get("form_oids")?,
            field_oids: row.try_get("field_oids")?,
            variable_oids: row.try_get("variable_oids")?,
            usage_count: 0,
            custom_function: row.try_get("custom_function")?,
        });
    }

    Ok(edits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_query_selects_every_column_for_both_types() {
        let query = metric_rows_query();
        for (name, _) in METRIC_COLUMNS {
            assert!(query.contains(&format!("AS fld_{name}")), "missing fld_{name}");
            assert!(query.contains(&format!("AS prg_{name}")), "missing prg_{name}");
        }
        assert!(query.contains("ORDER BY s.url_id, pj.project_name COLLATE \"C\", s.project_id"));
    }
}
