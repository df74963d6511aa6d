//! Campaign Attribution — operator CLI for the multi-touch attribution engine.
//!
//! Reads bookings (with their touchpoint journeys) from a JSON file and
//! prints attribution, model comparisons, ROAS, or a full recompute as JSON.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use campaign_core::config::AppConfig;
use campaign_core::types::Booking;
use campaign_reporting::aggregate::{
    aggregate_by_channel, channel_roas, compare_models, ChannelBreakdown,
};
use campaign_reporting::{
    recompute_bulk, AttributionSettings, BulkOutcome, BulkRecomputer, InMemoryResultSink,
    InMemoryTouchpointStore, ModelKind,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "campaign-attribution")]
#[command(about = "Multi-touch revenue attribution for booking journeys")]
#[command(version)]
struct Cli {
    /// Time-decay half-life in hours (overrides config)
    #[arg(long, env = "CAMPAIGN_ATTRIBUTION__ATTRIBUTION__HALF_LIFE_HOURS")]
    half_life_hours: Option<f64>,

    /// Bookings per concurrent chunk during recompute (overrides config)
    #[arg(long, env = "CAMPAIGN_ATTRIBUTION__ATTRIBUTION__CHUNK_SIZE")]
    chunk_size: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Attribute every completed booking and roll credit up by channel
    Attribute {
        /// JSON file holding an array of bookings
        #[arg(short, long)]
        input: PathBuf,

        /// first-touch, last-touch, linear, time-decay or position-based
        #[arg(short, long)]
        model: Option<ModelKind>,
    },

    /// Channel credit under all five models side by side
    Compare {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Attributed revenue against ad spend per channel
    Roas {
        #[arg(short, long)]
        input: PathBuf,

        /// JSON object mapping channel id to spend
        #[arg(short, long)]
        spend: PathBuf,

        #[arg(short, long)]
        model: Option<ModelKind>,
    },

    /// Recompute and persist attribution for a company and date range
    Recompute {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        model: Option<ModelKind>,

        /// Company the bookings belong to (overrides config)
        #[arg(long)]
        company_id: Option<String>,

        /// Inclusive range start, RFC 3339
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// Exclusive range end, RFC 3339
        #[arg(long)]
        end: Option<DateTime<Utc>>,
    },
}

#[derive(Serialize)]
struct AttributeReport<'a> {
    channels: ChannelBreakdown,
    #[serde(flatten)]
    outcome: &'a BulkOutcome,
}

fn load_bookings(path: &Path) -> anyhow::Result<Vec<Booking>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading bookings from {}", path.display()))?;
    let bookings: Vec<Booking> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing bookings from {}", path.display()))?;
    info!(count = bookings.len(), path = %path.display(), "Bookings loaded");
    Ok(bookings)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn channel_totals(bookings: &[Booking], outcome: &BulkOutcome) -> ChannelBreakdown {
    let fractions: HashMap<_, Vec<f64>> = outcome
        .results
        .iter()
        .map(|(id, r)| (*id, r.credits.iter().map(|c| c.fraction).collect()))
        .collect();

    aggregate_by_channel(bookings.iter().filter_map(|b| {
        fractions
            .get(&b.booking_id)
            .map(|f| (&b.journey, b.revenue, f.as_slice()))
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the JSON report.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campaign_attribution=info,campaign_reporting=info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(hours) = cli.half_life_hours {
        config.attribution.half_life_hours = hours;
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.attribution.chunk_size = chunk_size;
    }

    let settings = AttributionSettings::from_config(&config.attribution)?;
    let default_model: ModelKind = config.attribution.default_model.parse()?;

    info!(
        default_model = %default_model,
        half_life_hours = config.attribution.half_life_hours,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Attribute { input, model } => {
            let bookings = load_bookings(&input)?;
            let model = settings.model(model.unwrap_or(default_model));
            let outcome = recompute_bulk(&bookings, &model)?;
            let channels = channel_totals(&bookings, &outcome);
            print_json(&AttributeReport {
                channels,
                outcome: &outcome,
            })?;
        }
        Commands::Compare { input } => {
            let journeys: Vec<_> = load_bookings(&input)?
                .into_iter()
                .filter(|b| b.status.is_attributable())
                .map(|b| (b.journey, b.revenue))
                .collect();
            print_json(&compare_models(&journeys, &settings)?)?;
        }
        Commands::Roas {
            input,
            spend,
            model,
        } => {
            let bookings = load_bookings(&input)?;
            let raw = std::fs::read_to_string(&spend)
                .with_context(|| format!("reading spend from {}", spend.display()))?;
            let spend: HashMap<String, f64> =
                serde_json::from_str(&raw).context("parsing channel spend")?;

            let model = settings.model(model.unwrap_or(default_model));
            let outcome = recompute_bulk(&bookings, &model)?;
            let credits = channel_totals(&bookings, &outcome);
            print_json(&channel_roas(&credits, &spend))?;
        }
        Commands::Recompute {
            input,
            model,
            company_id,
            start,
            end,
        } => {
            let company_id = company_id
                .or(config.attribution.company_id.clone())
                .unwrap_or_else(|| "default".to_string());

            let store = Arc::new(InMemoryTouchpointStore::new());
            for booking in load_bookings(&input)? {
                store.insert(company_id.clone(), booking);
            }
            let sink = Arc::new(InMemoryResultSink::new());

            let recomputer = BulkRecomputer::new(store, sink.clone())
                .with_chunk_size(config.attribution.chunk_size);

            let cancel = recomputer.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, stopping recompute");
                    cancel.cancel();
                }
            });

            let outcome = recomputer
                .run(
                    &company_id,
                    start.unwrap_or(DateTime::<Utc>::MIN_UTC),
                    end.unwrap_or(DateTime::<Utc>::MAX_UTC),
                    settings.model(model.unwrap_or(default_model)),
                )
                .await?;
            info!(persisted = sink.len(), "Recompute complete");
            print_json(&outcome)?;
        }
    }

    Ok(())
}
