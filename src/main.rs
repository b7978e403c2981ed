use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgGroup, Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

mod db;
mod error;
mod grouping;
mod hierarchy;
mod metrics;
mod models;
mod nullable;
mod ordering;
mod report;
mod summary;

use hierarchy::{Hierarchy, HierarchyBuilder};
use models::{QueryAction, StudyUrl};
use summary::{SummaryCategory, DEFAULT_COMPLETED_MINIMUM, DEFAULT_SUBJECT_THRESHOLD};

const URL_DOMAIN: &str = ".mdsol.com";

#[derive(Parser)]
#[command(name = "editcheck-metrics")]
#[command(about = "Edit check usage metrics per study, project and CRF version", long_about = None)]
struct Cli {
    /// Overrides DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,
    /// Increase log verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("selection")
        .args(["pattern", "url"])
        .required(true)
        .multiple(true)
))]
struct Selection {
    /// Substring matched against study URLs
    #[arg(long)]
    pattern: Vec<String>,
    /// Site name; the domain is appended when missing
    #[arg(long)]
    url: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List every known study URL
    ListUrls,
    /// Write the markdown report and summary CSV for each selected URL
    Report {
        #[command(flatten)]
        selection: Selection,
        #[arg(long = "threshold", default_values_t = [DEFAULT_SUBJECT_THRESHOLD])]
        thresholds: Vec<i64>,
        #[arg(long, default_value_t = DEFAULT_COMPLETED_MINIMUM)]
        completed_minimum: i64,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Print summary statistics as JSON
    Summary {
        #[command(flatten)]
        selection: Selection,
        /// Summarise a single project by name
        #[arg(long)]
        project: Option<String>,
        #[arg(long = "threshold", default_values_t = [DEFAULT_SUBJECT_THRESHOLD])]
        thresholds: Vec<i64>,
        #[arg(long, default_value_t = DEFAULT_COMPLETED_MINIMUM)]
        completed_minimum: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let database_url = match cli.database_url {
        Some(url) => url,
        None => std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to the edit check metrics database")?,
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::ListUrls => {
            let urls = db::list_urls(&pool).await?;
            if urls.is_empty() {
                println!("No study URLs found.");
                return Ok(());
            }
            for url in urls {
                println!("{:>6}  {}", url.id, url.display_url());
            }
        }
        Commands::Report {
            selection,
            thresholds,
            completed_minimum,
            out_dir,
        } => {
            let categories = SummaryCategory::standard(&thresholds, completed_minimum);
            let generated = chrono::Local::now().date_naive();
            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("failed to create {}", out_dir.display()))?;

            for url in resolve_urls(&pool, &selection).await? {
                let study_id = url.id;
                let hierarchy = load_study(&pool, url).await?;
                let study = hierarchy
                    .study(study_id)
                    .with_context(|| format!("study {study_id} missing from hierarchy"))?;
                let bundles = summary::summarize(study.projects(), &categories);

                let report_path = out_dir.join(report::report_file_name(study, generated));
                std::fs::write(&report_path, report::build_report(study, &bundles, generated))
                    .with_context(|| format!("failed to write {}", report_path.display()))?;

                let summary_path = out_dir.join(report::summary_file_name(study, generated));
                let file = std::fs::File::create(&summary_path)
                    .with_context(|| format!("failed to create {}", summary_path.display()))?;
                report::write_summary_csv(file, &bundles)?;

                info!(
                    url = study.url().display_url(),
                    projects = study.projects().len(),
                    report = %report_path.display(),
                    "report written"
                );
                println!("Report written to {}.", report_path.display());
            }
        }
        Commands::Summary {
            selection,
            project,
            thresholds,
            completed_minimum,
        } => {
            let categories = SummaryCategory::standard(&thresholds, completed_minimum);
            let mut output = Vec::new();
            for url in resolve_urls(&pool, &selection).await? {
                let study_id = url.id;
                let hierarchy = load_study(&pool, url).await?;
                let study = hierarchy
                    .study(study_id)
                    .with_context(|| format!("study {study_id} missing from hierarchy"))?;
                let bundles = match project.as_deref() {
                    Some(name) => {
                        let found = study.project_by_name(name);
                        if found.is_none() {
                            warn!(
                                url = study.url().display_url(),
                                project = name,
                                "project not found"
                            );
                            continue;
                        }
                        summary::summarize(found, &categories)
                    }
                    None => summary::summarize(study.projects(), &categories),
                };
                output.push(serde_json::json!({
                    "url": study.url().display_url(),
                    "project": project,
                    "summaries": bundles,
                }));
            }
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn setup_logging(verbose: u8) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("editcheck_metrics={level}")));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.ends_with(URL_DOMAIN) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{URL_DOMAIN}")
    }
}

/// Every URL matched by the selection, once each, in id order.
async fn resolve_urls(pool: &PgPool, selection: &Selection) -> anyhow::Result<Vec<StudyUrl>> {
    let mut needles: Vec<String> = selection.pattern.clone();
    needles.extend(selection.url.iter().map(|url| normalize_url(url)));

    let mut urls = BTreeMap::new();
    for needle in needles {
        let matches = db::fetch_matching_urls(pool, &needle).await?;
        if matches.is_empty() {
            warn!(pattern = %needle, "no study URLs matched");
        }
        for url in matches {
            urls.entry(url.id).or_insert(url);
        }
    }

    Ok(urls.into_values().collect())
}

async fn load_study(pool: &PgPool, url: StudyUrl) -> anyhow::Result<Hierarchy> {
    let study_id = url.id;
    info!(url = url.display_url(), "loading edit check metrics");

    let rows = db::fetch_metric_rows(pool, study_id).await?;
    let versions = grouping::group_versions(rows)
        .with_context(|| format!("malformed metric rows for {}", url.display_url()))?;

    let mut builder = HierarchyBuilder::new();
    builder.register_study(url);
    for version in versions {
        builder.push_version(version)?;
    }

    let markers = db::fetch_last_versions(pool, study_id).await?;
    builder.mark_last_versions(study_id, &markers)?;

    let counts = db::fetch_subject_counts(pool, study_id).await?;
    builder.attach_subject_counts(study_id, counts)?;

    for project_id in builder.project_ids(study_id) {
        for action in [QueryAction::OpenQuery, QueryAction::WithoutOpenQuery] {
            let edits = db::fetch_unused_edits(pool, project_id, action).await?;
            builder.attach_unused_edits(study_id, project_id, action, edits)?;
        }
    }

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_url_appends_domain_once() {
        assert_eq!(normalize_url("pharma"), "pharma.mdsol.com");
        assert_eq!(normalize_url(" pharma.mdsol.com "), "pharma.mdsol.com");
    }

    #[test]
    fn selection_requires_pattern_or_url() {
        assert!(Cli::try_parse_from(["editcheck-metrics", "report"]).is_err());

        let cli = Cli::try_parse_from([
            "editcheck-metrics",
            "report",
            "--url",
            "pharma",
            "--pattern",
            "onc",
            "--threshold",
            "20",
            "--threshold",
            "50",
        ])
        .unwrap();
        match cli.command {
            Commands::Report {
                selection,
                thresholds,
                completed_minimum,
                ..
            } => {
                assert_eq!(selection.url, vec!["pharma"]);
                assert_eq!(selection.pattern, vec!["onc"]);
                assert_eq!(thresholds, vec![20, 50]);
                assert_eq!(completed_minimum, DEFAULT_COMPLETED_MINIMUM);
            }
            _ => panic!("expected report command"),
        }
    }

    #[test]
    fn threshold_defaults_to_ten() {
        let cli = Cli::try_parse_from(["editcheck-metrics", "summary", "--pattern", "x"]).unwrap();
        match cli.command {
            Commands::Summary {
                thresholds,
                project,
                ..
            } => {
                assert_eq!(thresholds, vec![10]);
                assert_eq!(project, None);
            }
            _ => panic!("expected summary command"),
        }
    }
}
