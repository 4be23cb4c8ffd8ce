use anyhow::Context;
use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand};
use indicator_core::domain::{DateRange, SnapshotCategory};
use indicator_core::query::MarketQueries;
use indicator_core::storage::{PgStore, Store};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOOKBACK_DAYS: i64 = 30;

#[derive(Debug, Parser)]
#[command(name = "indicator_cli", about = "Schema and read access for the indicator store")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending migrations and verify the live schema.
    Migrate,

    /// Row counts of every table and date spans of the date-keyed ones.
    Status,

    /// Sector or global snapshots, ordered by name.
    Snapshots {
        /// SECTOR or GLOBAL.
        #[arg(long)]
        category: SnapshotCategory,

        /// Rows to skip. Only meaningful with --limit.
        #[arg(long, requires = "limit")]
        offset: Option<usize>,

        /// Page size. Prints the page together with the category total.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Daily market facts in a date range.
    MarketDays {
        /// YYYY-MM-DD. Defaults to 30 days before --to.
        #[arg(long)]
        from: Option<NaiveDate>,

        /// YYYY-MM-DD. Defaults to the latest completed trading day in Vietnam.
        #[arg(long)]
        to: Option<String>,
    },

    /// Daily returns of one portfolio.
    PortfolioReturns {
        #[arg(long)]
        code: String,

        #[arg(long)]
        from: Option<NaiveDate>,

        #[arg(long)]
        to: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct DailyReturn {
    date: NaiveDate,
    daily_return: Decimal,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = indicator_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    if let Err(err) = run(args, &settings).await {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %format!("{err:#}"), "command failed");
        return Err(err);
    }
    Ok(())
}

async fn run(args: Args, settings: &indicator_core::config::Settings) -> anyhow::Result<()> {
    let db_url = settings.require_database_url()?;
    let store = PgStore::connect(db_url, settings.db_max_connections)
        .await
        .context("connect DATABASE_URL failed")?;
    let queries = MarketQueries::new(&store);

    match args.command {
        Command::Migrate => {
            let report = store.ensure_schema().await.context("ensure schema failed")?;
            print_json(&report)
        }
        Command::Status => print_json(&queries.status().await?),
        Command::Snapshots {
            category,
            offset,
            limit,
        } => {
            match limit {
                Some(limit) => {
                    let page = queries
                        .snapshots_page(category, offset.unwrap_or(0), limit)
                        .await?;
                    tracing::info!(
                        %category,
                        rows = page.records.len(),
                        total = page.total,
                        "snapshots listed"
                    );
                    print_json(&page)
                }
                None => {
                    let records = store.snapshots_by_category(category, None).await?;
                    tracing::info!(%category, rows = records.len(), "snapshots listed");
                    print_json(&records)
                }
            }
        }
        Command::MarketDays { from, to } => {
            let range = resolve_range(from, to.as_deref(), settings)?;
            print_json(&queries.market_days(range).await?)
        }
        Command::PortfolioReturns { code, from, to } => {
            let range = resolve_range(from, to.as_deref(), settings)?;
            let rows: Vec<DailyReturn> = queries
                .portfolio_returns(&code, range)
                .await?
                .into_iter()
                .map(|(date, daily_return)| DailyReturn { date, daily_return })
                .collect();
            print_json(&rows)
        }
    }
}

fn resolve_range(
    from: Option<NaiveDate>,
    to: Option<&str>,
    settings: &indicator_core::config::Settings,
) -> anyhow::Result<DateRange> {
    let end = indicator_core::time::vn_market::resolve_as_of_date(
        to,
        chrono::Utc::now(),
        &settings.market_holidays,
    )?;
    let start = from.unwrap_or(end - Duration::days(DEFAULT_LOOKBACK_DAYS));
    Ok(DateRange::new(start, end)?)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("serialize output failed")?;
    println!("{out}");
    Ok(())
}

fn init_sentry(settings: &indicator_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
