pub mod memory;
pub mod postgres;

use crate::domain::{
    DateRange, MacroPeriodicFact, MarketDailyFact, MarketSnapshot, Page, PortfolioDailyLog,
    PortfolioInfo, SnapshotCategory, SnapshotKey, SnapshotRecord,
};
use crate::error::StoreResult;
use crate::schema::{self, SchemaReport};
use chrono::NaiveDate;
use futures::stream::BoxStream;
use serde::Serialize;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Ascending rows of a range query. Nothing runs until the stream is polled; calling the range
/// method again issues a fresh query.
pub type RowStream<'a, T> = BoxStream<'a, StoreResult<T>>;

/// Date-keyed table families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DateFamily {
    MarketDays,
    MacroPeriods,
    PortfolioLog,
}

impl DateFamily {
    pub const ALL: [DateFamily; 3] = [
        DateFamily::MarketDays,
        DateFamily::MacroPeriods,
        DateFamily::PortfolioLog,
    ];

    pub fn table(self) -> &'static str {
        match self {
            DateFamily::MarketDays => schema::MARKET_INDICATORS,
            DateFamily::MacroPeriods => schema::MACRO_INDICATORS,
            DateFamily::PortfolioLog => schema::PORTFOLIO_DAILY_LOG,
        }
    }

    pub fn date_column(self) -> &'static str {
        match self {
            DateFamily::MarketDays => "trade_date",
            DateFamily::MacroPeriods => "report_date",
            DateFamily::PortfolioLog => "log_date",
        }
    }
}

/// Row count and date span of a date-keyed table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub table: &'static str,
    pub rows: u64,
    pub first: Option<NaiveDate>,
    pub last: Option<NaiveDate>,
}

/// Row count of a table without a date key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRows {
    pub table: &'static str,
    pub rows: u64,
}

/// Typed access to the indicator tables.
///
/// Fact tables (`market_indicators`, `macro_indicators`, `portfolio_daily_log`) are append-only:
/// writing an existing key fails with `DuplicateKey` and leaves the stored row untouched.
/// Snapshots and portfolio info are overwritten in place. Every write is atomic per row.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Applies pending migrations and verifies the live catalog. Idempotent.
    async fn ensure_schema(&self) -> StoreResult<SchemaReport>;

    async fn insert_market_day(&self, fact: &MarketDailyFact) -> StoreResult<()>;

    async fn market_day(&self, trade_date: NaiveDate) -> StoreResult<Option<MarketDailyFact>>;

    fn market_days(&self, range: DateRange) -> RowStream<'_, MarketDailyFact>;

    /// Most recent days first.
    async fn latest_market_days(&self, limit: usize) -> StoreResult<Vec<MarketDailyFact>>;

    async fn insert_macro_period(&self, fact: &MacroPeriodicFact) -> StoreResult<()>;

    async fn macro_period(&self, report_date: NaiveDate) -> StoreResult<Option<MacroPeriodicFact>>;

    fn macro_periods(&self, range: DateRange) -> RowStream<'_, MacroPeriodicFact>;

    /// Inserts or replaces the snapshot and stamps `updated_at`.
    async fn upsert_snapshot(&self, snapshot: &MarketSnapshot) -> StoreResult<SnapshotRecord>;

    async fn snapshot(&self, key: &SnapshotKey) -> StoreResult<Option<SnapshotRecord>>;

    /// Snapshots of one category ordered by name, compared bytewise.
    async fn snapshots_by_category(
        &self,
        category: SnapshotCategory,
        page: Option<Page>,
    ) -> StoreResult<Vec<SnapshotRecord>>;

    /// Number of stored snapshots, optionally restricted to one category.
    async fn snapshot_count(&self, category: Option<SnapshotCategory>) -> StoreResult<u64>;

    /// Inserts or replaces the portfolio, including its yearly returns.
    async fn upsert_portfolio(&self, info: &PortfolioInfo) -> StoreResult<()>;

    async fn portfolio(&self, code: &str) -> StoreResult<Option<PortfolioInfo>>;

    async fn portfolio_count(&self) -> StoreResult<u64>;

    /// Fails with `ForeignKeyViolation` when the portfolio code is unknown.
    async fn insert_portfolio_log(&self, entry: &PortfolioDailyLog) -> StoreResult<()>;

    async fn portfolio_log(
        &self,
        log_date: NaiveDate,
        code: &str,
    ) -> StoreResult<Option<PortfolioDailyLog>>;

    fn portfolio_log_range(&self, code: &str, range: DateRange) -> RowStream<'_, PortfolioDailyLog>;

    async fn coverage(&self, family: DateFamily) -> StoreResult<Coverage>;
}
