mod mock_data;

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use rust_decimal::Decimal;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use finsight::{
    binding::SystemClock,
    feed::{ChangeFeed, InvalidationMap, MemoryFeed},
    source::InMemoryRecordSource,
    BoundAggregate, Clock, Config, Dashboard, Granularity, PeriodAggregate,
};

use crate::mock_data::{seed_demo_data, DEMO_RESOURCES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// In-process broadcast channel
    Memory,
    /// Redis pub/sub (requires the `redis` feature)
    Redis,
}

/// Finsight - Live period aggregates for a personal finance dashboard
#[derive(Parser, Debug)]
#[command(name = "finsight")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Period granularity for the aggregates
    #[arg(long, short, default_value = "monthly")]
    granularity: Granularity,

    /// Number of simulated remote writes
    #[arg(long, short, default_value = "3")]
    writes: u32,

    /// Identity the dashboard is mounted for
    #[arg(long, default_value = "demo", env = "FINSIGHT_IDENTITY")]
    identity: String,

    /// Debounce window for change events, in milliseconds
    #[arg(long, env = "FINSIGHT_DEBOUNCE_MS")]
    debounce_ms: Option<u64>,

    /// Change-feed transport
    #[arg(long, value_enum, default_value = "memory")]
    transport: Transport,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "finsight=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::from_env();
    if let Some(debounce_ms) = cli.debounce_ms {
        config.debounce_ms = debounce_ms;
    }
    config.validate().context("invalid configuration")?;

    let transport = init_transport(cli.transport, &config).await?;
    let source = InMemoryRecordSource::with_feed(Arc::clone(&transport));
    let clock = SystemClock;
    seed_demo_data(&source, clock.today()).await?;

    let dashboard = Dashboard::new(
        &config,
        transport,
        Arc::new(source.clone()),
        Arc::new(clock),
        InvalidationMap::for_resources(DEMO_RESOURCES),
    )?;

    tokio::select! {
        result = run_demo(&dashboard, &source, &cli, &config) => result?,
        _ = signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
    }

    dashboard.shutdown().await?;
    Ok(())
}

async fn init_transport(transport: Transport, config: &Config) -> Result<Arc<dyn ChangeFeed>> {
    match transport {
        Transport::Memory => Ok(Arc::new(MemoryFeed::with_capacity(
            config.feed_channel_capacity,
        ))),
        #[cfg(feature = "redis")]
        Transport::Redis => {
            let feed = finsight::feed::RedisFeed::new(&config.redis_url, config.feed_channel_capacity)
                .await
                .with_context(|| format!("connecting to {}", config.redis_url))?;
            tracing::info!(url = %config.redis_url, "Using Redis change feed");
            Ok(Arc::new(feed))
        }
        #[cfg(not(feature = "redis"))]
        Transport::Redis => bail!("finsight was built without the `redis` feature"),
    }
}

/// Mounts the dashboard, renders every card, then simulates remote writes
/// and logs each re-render.
async fn run_demo(
    dashboard: &Dashboard,
    source: &InMemoryRecordSource,
    cli: &Cli,
    config: &Config,
) -> Result<()> {
    let generation = dashboard.mount(cli.identity.as_str()).await?;
    tracing::info!(identity = %cli.identity, %generation, "Dashboard mounted");

    let mut cards: Vec<(&str, BoundAggregate)> = DEMO_RESOURCES
        .iter()
        .map(|&resource| (resource, dashboard.aggregate(resource, cli.granularity)))
        .collect();

    for (resource, card) in cards.iter_mut() {
        match card.ready().await {
            Some(aggregate) => log_card(resource, &aggregate),
            None => tracing::warn!(resource = %resource, "Card closed before loading"),
        }
    }

    let balance = dashboard.balance(&DEMO_RESOURCES, cli.granularity).await?;
    tracing::info!(%balance, "Global balance");

    let wait = config.debounce() * 4 + Duration::from_secs(1);
    let today = SystemClock.today();
    let Some((_, expenses)) = cards.iter_mut().find(|(resource, _)| *resource == "expenses") else {
        bail!("expenses card missing");
    };

    for write in 1..=cli.writes {
        let amount = Decimal::new(i64::from(write) * 1_000, 2);
        source.insert("expenses", today, amount).await?;
        tracing::info!(write, %amount, "Simulated remote write");

        match tokio::time::timeout(wait, expenses.changed()).await {
            Ok(Some(view)) => {
                if let Some(aggregate) = view.aggregate() {
                    log_card("expenses", aggregate);
                }
            }
            Ok(None) => bail!("expenses card closed"),
            Err(_) => tracing::warn!(write, "No re-render within {:?}", wait),
        }
    }

    let status = dashboard.status().await;
    tracing::info!(
        state = ?status.state,
        generation = %status.generation,
        degraded = status.degraded,
        "Subscription status"
    );
    Ok(())
}

fn log_card(resource: &str, aggregate: &PeriodAggregate) {
    tracing::info!(
        resource,
        label = %aggregate.period_label,
        current = %aggregate.current_total,
        previous = %aggregate.previous_total,
        change = %aggregate.rounded_change(2),
        trend = ?aggregate.trend(),
        balance = %aggregate.balance,
        "Aggregate"
    );
}
