//! Read-only compositions over a [`Store`]. Nothing here writes.

use crate::domain::{
    DateRange, MarketDailyFact, MarketSnapshot, Page, PortfolioDailyLog, SnapshotCategory,
    SnapshotKey, SnapshotRecord,
};
use crate::error::StoreResult;
use crate::schema;
use crate::storage::{Coverage, DateFamily, Store, TableRows};
use chrono::NaiveDate;
use futures::TryStreamExt;
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Instant;

/// One page of a category listing plus the size of the whole category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotPage {
    pub category: SnapshotCategory,
    pub offset: usize,
    pub limit: usize,
    pub total: u64,
    pub records: Vec<SnapshotRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    /// Row count of every table.
    pub tables: Vec<TableRows>,
    /// Date span of the date-keyed tables.
    pub coverage: Vec<Coverage>,
}

pub struct MarketQueries<'s, S: Store + ?Sized> {
    store: &'s S,
}

impl<'s, S: Store + ?Sized> MarketQueries<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Every snapshot of `category`, ordered by entity name.
    pub async fn list_by_category(
        &self,
        category: SnapshotCategory,
    ) -> StoreResult<Vec<MarketSnapshot>> {
        let records = self.store.snapshots_by_category(category, None).await?;
        Ok(records.into_iter().map(|r| r.snapshot).collect())
    }

    pub async fn snapshots_page(
        &self,
        category: SnapshotCategory,
        offset: usize,
        limit: usize,
    ) -> StoreResult<SnapshotPage> {
        let total = self.store.snapshot_count(Some(category)).await?;
        let records = self
            .store
            .snapshots_by_category(category, Some(Page::new(offset, limit)))
            .await?;
        Ok(SnapshotPage {
            category,
            offset,
            limit,
            total,
            records,
        })
    }

    pub async fn snapshot(
        &self,
        name: &str,
        category: SnapshotCategory,
    ) -> StoreResult<Option<SnapshotRecord>> {
        self.store.snapshot(&SnapshotKey::new(name, category)).await
    }

    /// `(date, daily return)` pairs in ascending date order. Unknown codes yield nothing.
    pub async fn portfolio_returns(
        &self,
        code: &str,
        range: DateRange,
    ) -> StoreResult<Vec<(NaiveDate, Decimal)>> {
        let started = Instant::now();
        let rows: Vec<PortfolioDailyLog> =
            self.store.portfolio_log_range(code, range).try_collect().await?;

        tracing::debug!(
            code,
            %range,
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "portfolio returns"
        );
        Ok(rows.into_iter().map(|r| (r.log_date, r.daily_return)).collect())
    }

    pub async fn market_days(&self, range: DateRange) -> StoreResult<Vec<MarketDailyFact>> {
        let started = Instant::now();
        let rows: Vec<MarketDailyFact> = self.store.market_days(range).try_collect().await?;

        tracing::debug!(
            %range,
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "market days"
        );
        Ok(rows)
    }

    pub async fn latest_market_days(&self, limit: usize) -> StoreResult<Vec<MarketDailyFact>> {
        self.store.latest_market_days(limit).await
    }

    pub async fn status(&self) -> StoreResult<StoreStatus> {
        let mut coverage = Vec::with_capacity(DateFamily::ALL.len());
        for family in DateFamily::ALL {
            coverage.push(self.store.coverage(family).await?);
        }

        let mut tables: Vec<TableRows> = coverage
            .iter()
            .map(|c| TableRows {
                table: c.table,
                rows: c.rows,
            })
            .collect();
        tables.push(TableRows {
            table: schema::MARKET_SNAPSHOTS,
            rows: self.store.snapshot_count(None).await?,
        });
        tables.push(TableRows {
            table: schema::PORTFOLIO_INFO,
            rows: self.store.portfolio_count().await?,
        });

        Ok(StoreStatus { tables, coverage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MarketMetric, PortfolioInfo, SectorValuation, SnapshotScores};
    use crate::storage::MemoryStore;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.ensure_schema().await.unwrap();

        store
            .upsert_snapshot(&MarketSnapshot::sector(
                "Banking",
                SnapshotScores::default(),
                SectorValuation {
                    pe_percentile: Some(dec!(42.5)),
                    pb_percentile: Some(dec!(67.0)),
                },
            ))
            .await
            .unwrap();
        store
            .upsert_snapshot(&MarketSnapshot::global(
                "Vietnam",
                SnapshotScores {
                    ytd_return: Some(dec!(12.3)),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();

        store
            .upsert_portfolio(&PortfolioInfo::new("40YO", "40 Years Old"))
            .await
            .unwrap();
        store
            .insert_portfolio_log(&PortfolioDailyLog::new(d(2026, 1, 5), "40YO", dec!(0.0042)))
            .await
            .unwrap();
        store
            .insert_portfolio_log(&PortfolioDailyLog::new(d(2026, 2, 2), "40YO", dec!(-0.0015)))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn lists_each_category_separately() {
        let store = seeded().await;
        let q = MarketQueries::new(&store);

        let sectors = q.list_by_category(SnapshotCategory::Sector).await.unwrap();
        assert_eq!(sectors.len(), 1);
        assert_eq!(sectors[0].name(), "Banking");
        assert_eq!(
            sectors[0].sector_valuation().unwrap().pb_percentile,
            Some(dec!(67.0))
        );

        let global = q.list_by_category(SnapshotCategory::Global).await.unwrap();
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].name(), "Vietnam");
        assert_eq!(global[0].scores().ytd_return, Some(dec!(12.3)));
    }

    #[tokio::test]
    async fn portfolio_returns_within_range() {
        let store = seeded().await;
        let q = MarketQueries::new(&store);

        let january = DateRange::new(d(2026, 1, 1), d(2026, 1, 31)).unwrap();
        assert_eq!(
            q.portfolio_returns("40YO", january).await.unwrap(),
            vec![(d(2026, 1, 5), dec!(0.0042))]
        );
        assert!(q.portfolio_returns("VNI", january).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn point_lookup_and_paging() {
        let store = seeded().await;
        let q = MarketQueries::new(&store);

        let banking = q.snapshot("Banking", SnapshotCategory::Sector).await.unwrap();
        assert!(banking.is_some());
        assert!(q
            .snapshot("Banking", SnapshotCategory::Global)
            .await
            .unwrap()
            .is_none());

        let page = q.snapshots_page(SnapshotCategory::Sector, 1, 10).await.unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn pages_carry_category_total() {
        let store = seeded().await;
        for name in ["Steel", "Retail", "Energy"] {
            store
                .upsert_snapshot(&MarketSnapshot::sector(
                    name,
                    SnapshotScores::default(),
                    SectorValuation::default(),
                ))
                .await
                .unwrap();
        }

        let q = MarketQueries::new(&store);
        let page = q.snapshots_page(SnapshotCategory::Sector, 1, 2).await.unwrap();
        let names: Vec<_> = page.records.iter().map(|r| r.snapshot.name()).collect();
        assert_eq!(names, vec!["Energy", "Retail"]);
        assert_eq!(page.total, 4);
        assert_eq!((page.offset, page.limit), (1, 2));

        let global = q.snapshots_page(SnapshotCategory::Global, 0, 2).await.unwrap();
        assert_eq!(global.total, 1);
        assert_eq!(global.records.len(), 1);
    }

    #[tokio::test]
    async fn status_counts_every_table() {
        let store = seeded().await;
        store
            .insert_market_day(
                &MarketDailyFact::new(d(2026, 9, 1)).with(MarketMetric::ClosePrice, dec!(1500.25)),
            )
            .await
            .unwrap();

        let q = MarketQueries::new(&store);
        let status = q.status().await.unwrap();
        let coverage: Vec<u64> = status.coverage.iter().map(|c| c.rows).collect();
        assert_eq!(coverage, vec![1, 0, 2]);
        assert_eq!(status.coverage[2].first, Some(d(2026, 1, 5)));
        assert_eq!(status.coverage[2].last, Some(d(2026, 2, 2)));

        let tables: Vec<(&str, u64)> = status.tables.iter().map(|t| (t.table, t.rows)).collect();
        assert_eq!(
            tables,
            vec![
                (schema::MARKET_INDICATORS, 1),
                (schema::MACRO_INDICATORS, 0),
                (schema::PORTFOLIO_DAILY_LOG, 2),
                (schema::MARKET_SNAPSHOTS, 2),
                (schema::PORTFOLIO_INFO, 1),
            ]
        );

        let days = q
            .market_days(DateRange::day(d(2026, 9, 1)))
            .await
            .unwrap();
        assert_eq!(days[0].close_price(), Some(dec!(1500.25)));
        assert_eq!(q.latest_market_days(5).await.unwrap(), days);
    }
}
