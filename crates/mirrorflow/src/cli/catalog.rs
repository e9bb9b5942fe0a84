//! Catalog commands - fetch operator catalogs and query them
//!
//! `fetch` runs the orchestrator over the configured source × version matrix.
//! The query commands answer from the fetched index and fall back to the
//! built-in tables, so they work before anything was fetched.

use crate::cli::context::AppContext;
use crate::cli::error::HelpfulError;
use crate::cli::output::{
    format_time_ago, origin_label, print_json, print_table, print_table_colored,
};
use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;
use comfy_table::Color;
use mirrorflow_catalog::{
    orchestrator_from_config, CatalogCache, ContainerPuller, JobOutcome, MasterIndex,
    OperatorQuery, SystemClock,
};
use mirrorflow_protocol::api::{ListCatalogsResponse, ListChannelsResponse, ListOperatorsResponse};
use mirrorflow_protocol::{CatalogSourceType, PlatformVersion};
use std::sync::Arc;
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum CatalogAction {
    /// Pull catalog images and index their operators
    Fetch {
        /// Re-fetch even when the previous extraction is still fresh
        #[arg(long)]
        force: bool,

        /// Only these sources (default: [catalog].sources)
        #[arg(long = "source")]
        sources: Vec<CatalogSourceType>,

        /// Only these platform versions (default: [catalog].versions)
        #[arg(long = "version")]
        versions: Vec<PlatformVersion>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List catalog sources and the fetch state of each version
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List operators, optionally for one source and/or version
    Operators {
        #[arg(long)]
        source: Option<CatalogSourceType>,

        #[arg(long)]
        version: Option<PlatformVersion>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the channels of one operator
    Channels {
        /// Operator package name
        operator: String,

        #[arg(long)]
        source: CatalogSourceType,

        #[arg(long)]
        version: PlatformVersion,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl CatalogAction {
    pub fn wants_json(&self) -> bool {
        match self {
            CatalogAction::Fetch { json, .. }
            | CatalogAction::List { json }
            | CatalogAction::Operators { json, .. }
            | CatalogAction::Channels { json, .. } => *json,
        }
    }
}

pub async fn run(ctx: &AppContext, action: CatalogAction) -> Result<()> {
    match action {
        CatalogAction::Fetch {
            force,
            sources,
            versions,
            json,
        } => fetch(ctx, force, sources, versions, json).await,
        CatalogAction::List { json } => list(ctx, json).await,
        CatalogAction::Operators {
            source,
            version,
            json,
        } => operators(ctx, source, version, json).await,
        CatalogAction::Channels {
            operator,
            source,
            version,
            json,
        } => channels(ctx, &operator, source, version, json).await,
    }
}

async fn fetch(
    ctx: &AppContext,
    force: bool,
    sources: Vec<CatalogSourceType>,
    versions: Vec<PlatformVersion>,
    json: bool,
) -> Result<()> {
    let config = &ctx.config.catalog;
    let puller = ContainerPuller::new(&config.container_binary);
    let mut orchestrator =
        orchestrator_from_config(puller, ctx.catalog_store(), config, Arc::new(SystemClock))
            .with_force(force);
    if !sources.is_empty() {
        orchestrator = orchestrator.with_sources(sources);
    }
    if !versions.is_empty() {
        orchestrator = orchestrator.with_versions(versions);
    }

    info!("Fetching {} catalog(s)", orchestrator.jobs().len());
    let index = orchestrator.run().await?;

    if json {
        print_json(&index)?;
    } else {
        print_fetch_summary(&index);
    }

    if index.has_failures() {
        return Err(HelpfulError::fetch_failed(index.failed, index.total).into());
    }
    Ok(())
}

fn print_fetch_summary(index: &MasterIndex) {
    let rows = index
        .jobs
        .iter()
        .map(|job| {
            let (outcome, color) = match job.outcome {
                JobOutcome::Success => ("fetched", Color::Green),
                JobOutcome::Skipped => ("fresh", Color::DarkGrey),
                JobOutcome::Failed => ("failed", Color::Red),
            };
            vec![
                (job.source.to_string(), None),
                (job.version.to_string(), None),
                (outcome.to_string(), Some(color)),
                (job.attempts.to_string(), None),
                (
                    job.operator_count
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    None,
                ),
                (job.error.clone().unwrap_or_default(), Some(Color::Red)),
            ]
        })
        .collect();

    print_table_colored(
        &["SOURCE", "VERSION", "RESULT", "ATTEMPTS", "OPERATORS", "ERROR"],
        rows,
    );
    println!(
        "{} job(s): {} fetched, {} fresh, {} failed",
        index.total, index.success, index.skipped, index.failed
    );
}

fn cache(ctx: &AppContext) -> CatalogCache {
    CatalogCache::new(ctx.catalog_store(), &ctx.config.catalog)
}

async fn list(ctx: &AppContext, json: bool) -> Result<()> {
    let catalogs = cache(ctx).list_catalogs().await;

    if json {
        return print_json(&ListCatalogsResponse {
            catalogs: catalogs.as_ref().clone(),
        });
    }

    let now = Utc::now();
    let mut rows = Vec::new();
    for catalog in catalogs.iter() {
        for info in &catalog.versions {
            rows.push(vec![
                catalog.display_name.clone(),
                info.version.to_string(),
                if info.prefetched { "yes" } else { "no" }.to_string(),
                info.operator_count
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                info.extracted_at
                    .map(|t| format_time_ago(t, now))
                    .unwrap_or_else(|| "never".to_string()),
                info.image.clone(),
            ]);
        }
    }
    print_table(
        &["CATALOG", "VERSION", "FETCHED", "OPERATORS", "EXTRACTED", "IMAGE"],
        rows,
    );
    Ok(())
}

async fn operators(
    ctx: &AppContext,
    source: Option<CatalogSourceType>,
    version: Option<PlatformVersion>,
    json: bool,
) -> Result<()> {
    let catalogs = cache(ctx)
        .list_operators(OperatorQuery { source, version })
        .await;

    if json {
        return print_json(&ListOperatorsResponse {
            catalogs: catalogs.as_ref().clone(),
        });
    }

    let mut rows = Vec::new();
    for catalog in catalogs.iter() {
        for op in &catalog.operators {
            rows.push(vec![
                catalog.source.to_string(),
                catalog.version.to_string(),
                op.name.clone(),
                op.default_channel.clone(),
                op.channels.join(", "),
                origin_label(catalog.origin).to_string(),
            ]);
        }
    }
    let count = rows.len();
    print_table(
        &["SOURCE", "VERSION", "OPERATOR", "DEFAULT", "CHANNELS", "FROM"],
        rows,
    );
    println!("{} operator(s)", count);
    Ok(())
}

async fn channels(
    ctx: &AppContext,
    operator: &str,
    source: CatalogSourceType,
    version: PlatformVersion,
    json: bool,
) -> Result<()> {
    let (channels, origin) = cache(ctx).lookup_channels(operator, source, version).await;

    if json {
        return print_json(&ListChannelsResponse {
            operator: operator.to_string(),
            origin,
            channels,
        });
    }

    println!(
        "{} ({} {}, {}):",
        operator,
        source.display_name(),
        version,
        origin_label(origin)
    );
    for channel in channels {
        println!("  {}", channel);
    }
    Ok(())
}
