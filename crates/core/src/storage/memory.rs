use super::{Coverage, DateFamily, RowStream, Store};
use crate::domain::{
    DateRange, MacroPeriodicFact, MarketDailyFact, MarketSnapshot, Page, PortfolioDailyLog,
    PortfolioInfo, SnapshotCategory, SnapshotKey, SnapshotRecord,
};
use crate::error::{StoreError, StoreResult};
use crate::schema::{self, ObservedColumn, SchemaReport};
use chrono::{NaiveDate, SubsecRound, Utc};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    catalog: BTreeMap<String, Vec<ObservedColumn>>,
    applied: Vec<i64>,
    market_days: BTreeMap<NaiveDate, MarketDailyFact>,
    macro_periods: BTreeMap<NaiveDate, MacroPeriodicFact>,
    snapshots: BTreeMap<SnapshotKey, SnapshotRecord>,
    portfolios: BTreeMap<String, PortfolioInfo>,
    // Keyed (code, date) so one portfolio's log is a contiguous range.
    portfolio_log: BTreeMap<(String, NaiveDate), PortfolioDailyLog>,
}

/// In-process backend with the same semantics as [`super::PgStore`].
///
/// All tables sit behind one lock: a write is applied whole or not at all, and readers see
/// either the state before it or after it.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a catalog that already holds `columns`, as a database created by an older
    /// schema would.
    pub fn with_existing_columns(columns: Vec<ObservedColumn>) -> Self {
        let mut tables = Tables::default();
        for c in columns {
            tables.catalog.entry(c.table.clone()).or_default().push(c);
        }
        Self {
            inner: Arc::new(RwLock::new(tables)),
        }
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn ensure_schema(&self) -> StoreResult<SchemaReport> {
        let mut tables = self.inner.write().await;

        let mut applied = Vec::new();
        for m in schema::MIGRATIONS {
            if !tables.applied.contains(&m.version) {
                tables.applied.push(m.version);
                applied.push(m.version);
            }
        }

        // CREATE TABLE IF NOT EXISTS: tables already present keep their columns.
        let declared = schema::declared_tables();
        for t in &declared {
            if !tables.catalog.contains_key(t.name) {
                let cols = t
                    .columns
                    .iter()
                    .map(|c| ObservedColumn {
                        table: t.name.to_string(),
                        column: c.name.to_string(),
                        ty: c.ty.clone(),
                    })
                    .collect();
                tables.catalog.insert(t.name.to_string(), cols);
            }
        }

        let observed: Vec<ObservedColumn> = tables.catalog.values().flatten().cloned().collect();
        schema::check_compat(&declared, &observed)?;

        tracing::info!(applied = ?applied, tables = declared.len(), "schema ensured");
        Ok(SchemaReport {
            applied,
            tables: declared.iter().map(|t| t.name).collect(),
            indexes: schema::INDEXES.iter().map(|i| i.name).collect(),
        })
    }

    async fn insert_market_day(&self, fact: &MarketDailyFact) -> StoreResult<()> {
        let fact = fact.normalized()?;
        let mut tables = self.inner.write().await;
        if tables.market_days.contains_key(&fact.trade_date) {
            return Err(StoreError::DuplicateKey {
                table: schema::MARKET_INDICATORS,
                key: fact.trade_date.to_string(),
            });
        }
        tracing::debug!(trade_date = %fact.trade_date, metrics = fact.metrics.len(), "market day inserted");
        tables.market_days.insert(fact.trade_date, fact);
        Ok(())
    }

    async fn market_day(&self, trade_date: NaiveDate) -> StoreResult<Option<MarketDailyFact>> {
        Ok(self.inner.read().await.market_days.get(&trade_date).cloned())
    }

    fn market_days(&self, range: DateRange) -> RowStream<'_, MarketDailyFact> {
        stream::once(async move {
            let tables = self.inner.read().await;
            tables
                .market_days
                .range(range.start()..=range.end())
                .map(|(_, f)| Ok(f.clone()))
                .collect::<Vec<_>>()
        })
        .flat_map(stream::iter)
        .boxed()
    }

    async fn latest_market_days(&self, limit: usize) -> StoreResult<Vec<MarketDailyFact>> {
        let tables = self.inner.read().await;
        Ok(tables.market_days.values().rev().take(limit).cloned().collect())
    }

    async fn insert_macro_period(&self, fact: &MacroPeriodicFact) -> StoreResult<()> {
        let fact = fact.normalized()?;
        let mut tables = self.inner.write().await;
        if tables.macro_periods.contains_key(&fact.report_date) {
            return Err(StoreError::DuplicateKey {
                table: schema::MACRO_INDICATORS,
                key: fact.report_date.to_string(),
            });
        }
        tables.macro_periods.insert(fact.report_date, fact);
        Ok(())
    }

    async fn macro_period(&self, report_date: NaiveDate) -> StoreResult<Option<MacroPeriodicFact>> {
        Ok(self.inner.read().await.macro_periods.get(&report_date).cloned())
    }

    fn macro_periods(&self, range: DateRange) -> RowStream<'_, MacroPeriodicFact> {
        stream::once(async move {
            let tables = self.inner.read().await;
            tables
                .macro_periods
                .range(range.start()..=range.end())
                .map(|(_, f)| Ok(f.clone()))
                .collect::<Vec<_>>()
        })
        .flat_map(stream::iter)
        .boxed()
    }

    async fn upsert_snapshot(&self, snapshot: &MarketSnapshot) -> StoreResult<SnapshotRecord> {
        let record = SnapshotRecord {
            snapshot: snapshot.normalized()?,
            updated_at: Utc::now().trunc_subsecs(6),
        };
        let key = record.snapshot.key();
        tracing::debug!(%key, "snapshot upserted");
        self.inner.write().await.snapshots.insert(key, record.clone());
        Ok(record)
    }

    async fn snapshot(&self, key: &SnapshotKey) -> StoreResult<Option<SnapshotRecord>> {
        let key = SnapshotKey::new(key.name.trim(), key.category);
        Ok(self.inner.read().await.snapshots.get(&key).cloned())
    }

    async fn snapshots_by_category(
        &self,
        category: SnapshotCategory,
        page: Option<Page>,
    ) -> StoreResult<Vec<SnapshotRecord>> {
        let tables = self.inner.read().await;
        // Keys order by category, then name bytewise, like `COLLATE "C"`.
        let rows = tables
            .snapshots
            .iter()
            .filter(|(k, _)| k.category == category)
            .map(|(_, r)| r.clone());
        Ok(match page {
            Some(p) => rows.skip(p.offset).take(p.limit).collect(),
            None => rows.collect(),
        })
    }

    async fn snapshot_count(&self, category: Option<SnapshotCategory>) -> StoreResult<u64> {
        let tables = self.inner.read().await;
        let rows = match category {
            Some(c) => tables.snapshots.keys().filter(|k| k.category == c).count(),
            None => tables.snapshots.len(),
        };
        Ok(rows as u64)
    }

    async fn upsert_portfolio(&self, info: &PortfolioInfo) -> StoreResult<()> {
        let info = info.normalized()?;
        tracing::debug!(code = %info.code, years = info.yearly_returns.len(), "portfolio upserted");
        self.inner
            .write()
            .await
            .portfolios
            .insert(info.code.clone(), info);
        Ok(())
    }

    async fn portfolio(&self, code: &str) -> StoreResult<Option<PortfolioInfo>> {
        Ok(self.inner.read().await.portfolios.get(code.trim()).cloned())
    }

    async fn portfolio_count(&self) -> StoreResult<u64> {
        Ok(self.inner.read().await.portfolios.len() as u64)
    }

    async fn insert_portfolio_log(&self, entry: &PortfolioDailyLog) -> StoreResult<()> {
        let entry = entry.normalized()?;
        let mut tables = self.inner.write().await;

        if !tables.portfolios.contains_key(&entry.portfolio_code) {
            return Err(StoreError::ForeignKeyViolation {
                table: schema::PORTFOLIO_DAILY_LOG,
                key: entry.key(),
                referenced: format!("portfolio {}", entry.portfolio_code),
            });
        }

        let key = (entry.portfolio_code.clone(), entry.log_date);
        if tables.portfolio_log.contains_key(&key) {
            return Err(StoreError::DuplicateKey {
                table: schema::PORTFOLIO_DAILY_LOG,
                key: entry.key(),
            });
        }

        tracing::debug!(key = %entry.key(), "portfolio log inserted");
        tables.portfolio_log.insert(key, entry);
        Ok(())
    }

    async fn portfolio_log(
        &self,
        log_date: NaiveDate,
        code: &str,
    ) -> StoreResult<Option<PortfolioDailyLog>> {
        let key = (code.trim().to_string(), log_date);
        Ok(self.inner.read().await.portfolio_log.get(&key).cloned())
    }

    fn portfolio_log_range(&self, code: &str, range: DateRange) -> RowStream<'_, PortfolioDailyLog> {
        let code = code.trim().to_string();
        stream::once(async move {
            let tables = self.inner.read().await;
            let lo = (code.clone(), range.start());
            let hi = (code, range.end());
            tables
                .portfolio_log
                .range(lo..=hi)
                .map(|(_, e)| Ok(e.clone()))
                .collect::<Vec<_>>()
        })
        .flat_map(stream::iter)
        .boxed()
    }

    async fn coverage(&self, family: DateFamily) -> StoreResult<Coverage> {
        let tables = self.inner.read().await;
        let dates: Vec<NaiveDate> = match family {
            DateFamily::MarketDays => tables.market_days.keys().copied().collect(),
            DateFamily::MacroPeriods => tables.macro_periods.keys().copied().collect(),
            DateFamily::PortfolioLog => tables.portfolio_log.keys().map(|(_, d)| *d).collect(),
        };

        Ok(Coverage {
            table: family.table(),
            rows: dates.len() as u64,
            first: dates.iter().min().copied(),
            last: dates.iter().max().copied(),
        })
    }
}
