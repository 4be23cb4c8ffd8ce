//! Runs against a live Postgres only when `TEST_DATABASE_URL` is set; otherwise every test returns
//! immediately.

use chrono::{Duration, NaiveDate, Utc};
use futures::TryStreamExt;
use indicator_core::domain::{
    DateRange, MacroMetric, MacroPeriodicFact, MarketDailyFact, MarketMetric, MarketSnapshot,
    PortfolioDailyLog, PortfolioInfo, SectorValuation, SnapshotCategory, SnapshotScores,
};
use indicator_core::query::MarketQueries;
use indicator_core::storage::{PgStore, Store};
use rust_decimal_macros::dec;

async fn store() -> Option<PgStore> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let store = PgStore::connect(&url, 2).await.expect("connect TEST_DATABASE_URL");
    store.ensure_schema().await.expect("ensure schema");
    Some(store)
}

/// Distinct per run so reruns against the same database do not collide.
fn run_tag() -> i64 {
    Utc::now().timestamp_micros()
}

fn run_date(tag: i64) -> NaiveDate {
    let base = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap();
    base + Duration::days(tag.rem_euclid(40_000))
}

#[tokio::test]
async fn schema_is_idempotent() {
    let Some(store) = store().await else { return };
    let report = store.ensure_schema().await.unwrap();
    assert!(report.applied.is_empty());
    assert_eq!(report.tables.len(), 6);
}

#[tokio::test]
async fn market_day_keeps_exact_decimal_and_rejects_duplicates() {
    let Some(store) = store().await else { return };
    let day = run_date(run_tag());
    let fact = MarketDailyFact::new(day)
        .with(MarketMetric::ClosePrice, dec!(1500.25))
        .with(MarketMetric::PeVnindex, dec!(13.123456));

    if store.insert_market_day(&fact).await.is_err() {
        // Date already used by an earlier run.
        return;
    }
    let got = store.market_day(day).await.unwrap().unwrap();
    assert_eq!(got.close_price(), Some(dec!(1500.25)));
    assert_eq!(got.metric(MarketMetric::PeVnindex), Some(dec!(13.1234)));

    let err = store
        .insert_market_day(&MarketDailyFact::new(day).with(MarketMetric::ClosePrice, dec!(1)))
        .await
        .unwrap_err();
    assert!(err.is_duplicate_key());
    assert_eq!(store.market_day(day).await.unwrap(), Some(got));

    let rows: Vec<MarketDailyFact> = store
        .market_days(DateRange::day(day))
        .try_collect()
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn snapshots_overwrite_and_filter_by_category() {
    let Some(store) = store().await else { return };
    let name = format!("Banking-{}", run_tag());

    let first = MarketSnapshot::sector(
        &name,
        SnapshotScores::default(),
        SectorValuation {
            pe_percentile: Some(dec!(42.5)),
            pb_percentile: Some(dec!(67.0)),
        },
    );
    let second = MarketSnapshot::sector(
        &name,
        SnapshotScores {
            ytd_return: Some(dec!(3.5)),
            ..Default::default()
        },
        SectorValuation::default(),
    );
    store.upsert_snapshot(&first).await.unwrap();
    let written = store.upsert_snapshot(&second).await.unwrap();

    let q = MarketQueries::new(&store);
    let got = q.snapshot(&name, SnapshotCategory::Sector).await.unwrap().unwrap();
    assert_eq!(got, written);
    assert!(q.snapshot(&name, SnapshotCategory::Global).await.unwrap().is_none());

    let sectors = q.list_by_category(SnapshotCategory::Sector).await.unwrap();
    assert_eq!(sectors.iter().filter(|s| s.name() == name).count(), 1);
    let global = q.list_by_category(SnapshotCategory::Global).await.unwrap();
    assert!(global.iter().all(|s| s.category() == SnapshotCategory::Global));
}

#[tokio::test]
async fn portfolio_log_enforces_reference_and_ranges() {
    let Some(store) = store().await else { return };
    let code = format!("T{}", run_tag() % 1_000_000_000);

    let orphan = PortfolioDailyLog::new(NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(), &code, dec!(0.001));
    assert!(store
        .insert_portfolio_log(&orphan)
        .await
        .unwrap_err()
        .is_foreign_key_violation());

    let mut info = PortfolioInfo::new(&code, "Integration");
    info.yearly_returns.insert(2025, dec!(11.5));
    store.upsert_portfolio(&info).await.unwrap();
    info.yearly_returns.clear();
    info.yearly_returns.insert(2026, dec!(2.25));
    store.upsert_portfolio(&info).await.unwrap();
    assert_eq!(store.portfolio(&code).await.unwrap(), Some(info));

    store.insert_portfolio_log(&orphan).await.unwrap();
    let january = DateRange::new(
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
    )
    .unwrap();
    let returns = MarketQueries::new(&store)
        .portfolio_returns(&code, january)
        .await
        .unwrap();
    assert_eq!(returns, vec![(orphan.log_date, dec!(0.001))]);
}

#[tokio::test]
async fn macro_period_is_append_only_and_ranged() {
    let Some(store) = store().await else { return };
    let first_day = run_date(run_tag());
    let second_day = first_day + Duration::days(1);

    let first = MacroPeriodicFact::new(first_day)
        .labelled("Q1")
        .with(MacroMetric::GdpGrowthPct, dec!(5.66));
    if store.insert_macro_period(&first).await.is_err() {
        // Date already used by an earlier run.
        return;
    }
    let stored = store.macro_period(first_day).await.unwrap().unwrap();
    assert_eq!(stored.metric(MacroMetric::GdpGrowthPct), Some(dec!(5.66)));

    let err = store
        .insert_macro_period(&MacroPeriodicFact::new(first_day))
        .await
        .unwrap_err();
    assert!(err.is_duplicate_key());
    assert_eq!(store.macro_period(first_day).await.unwrap(), Some(stored));

    let _ = store.insert_macro_period(&MacroPeriodicFact::new(second_day)).await;
    let range = DateRange::new(first_day, second_day).unwrap();
    let rows: Vec<MacroPeriodicFact> = store.macro_periods(range).try_collect().await.unwrap();
    assert!(rows.windows(2).all(|w| w[0].report_date < w[1].report_date));
    assert!(rows.iter().all(|r| range.contains(r.report_date)));
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn snapshot_names_sort_bytewise() {
    let Some(store) = store().await else { return };
    let prefix = format!("Sort-{}-", run_tag());
    for suffix in ["alpha", "Zeta"] {
        store
            .upsert_snapshot(&MarketSnapshot::global(
                format!("{prefix}{suffix}"),
                SnapshotScores::default(),
            ))
            .await
            .unwrap();
    }

    let names: Vec<String> = store
        .snapshots_by_category(SnapshotCategory::Global, None)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.snapshot.name().to_string())
        .filter(|n| n.starts_with(&prefix))
        .collect();
    assert_eq!(names, vec![format!("{prefix}Zeta"), format!("{prefix}alpha")]);

    let page = MarketQueries::new(&store)
        .snapshots_page(SnapshotCategory::Global, 0, 1)
        .await
        .unwrap();
    assert!(page.total >= 2);
    assert_eq!(page.records.len(), 1);
}
