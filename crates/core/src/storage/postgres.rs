use super::{Coverage, DateFamily, RowStream, Store};
use crate::domain::metric::Metric;
use crate::domain::{
    DateRange, MacroMetric, MacroPeriodicFact, MarketDailyFact, MarketMetric, MarketSnapshot,
    Numeric, Page, PortfolioDailyLog, PortfolioInfo, SectorValuation, SnapshotCategory,
    SnapshotKey, SnapshotRecord, SnapshotScores,
};
use crate::error::{StoreError, StoreResult};
use crate::schema::{self, ColumnType, ObservedColumn, SchemaReport};
use chrono::{NaiveDate, SubsecRound, Utc};
use futures::StreamExt;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use std::collections::BTreeMap;
use std::sync::OnceLock;

const SNAPSHOT_COLUMNS: &str = "entity_name, category, ytd_return, percentile_growth, \
     percentile_valuation, pe_percentile, pb_percentile, updated_at";

/// PostgreSQL backend. Each write is a single statement or a single transaction, so readers see
/// either the old row or the new one.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

struct Statements {
    market_by_date: String,
    market_range: String,
    market_latest: String,
    macro_by_date: String,
    macro_range: String,
    snapshot_by_key: String,
    snapshots_by_category: String,
}

fn statements() -> &'static Statements {
    static STATEMENTS: OnceLock<Statements> = OnceLock::new();
    STATEMENTS.get_or_init(|| {
        let market = select_list::<MarketMetric>("trade_date");
        let macro_cols = select_list::<MacroMetric>("report_date, period_label");
        let mt = schema::MARKET_INDICATORS;
        let ma = schema::MACRO_INDICATORS;
        let ms = schema::MARKET_SNAPSHOTS;
        Statements {
            market_by_date: format!("SELECT {market} FROM {mt} WHERE trade_date = $1"),
            market_range: format!(
                "SELECT {market} FROM {mt} WHERE trade_date BETWEEN $1 AND $2 ORDER BY trade_date ASC"
            ),
            market_latest: format!(
                "SELECT {market} FROM {mt} ORDER BY trade_date DESC LIMIT $1"
            ),
            macro_by_date: format!("SELECT {macro_cols} FROM {ma} WHERE report_date = $1"),
            macro_range: format!(
                "SELECT {macro_cols} FROM {ma} WHERE report_date BETWEEN $1 AND $2 ORDER BY report_date ASC"
            ),
            snapshot_by_key: format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM {ms} WHERE entity_name = $1 AND category = $2"
            ),
            // LIMIT NULL means no limit. COLLATE "C" orders names bytewise whatever the
            // database locale.
            snapshots_by_category: format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM {ms} WHERE category = $1 \
                 ORDER BY entity_name COLLATE \"C\" ASC LIMIT $2 OFFSET $3"
            ),
        }
    })
}

fn select_list<M: Metric>(keys: &str) -> String {
    let mut out = keys.to_string();
    for m in M::ALL {
        out.push_str(", ");
        out.push_str(m.column());
    }
    out
}

fn push_metric_columns<M: Metric>(qb: &mut QueryBuilder<'_, Postgres>) {
    for m in M::ALL {
        qb.push(", ").push(m.column());
    }
}

fn push_metric_binds<M: Metric>(qb: &mut QueryBuilder<'_, Postgres>, metrics: &BTreeMap<M, Decimal>) {
    for m in M::ALL {
        qb.push(", ").push_bind(metrics.get(m).copied());
    }
}

fn metrics_from_row<M: Metric>(row: &PgRow) -> StoreResult<BTreeMap<M, Decimal>> {
    let mut out = BTreeMap::new();
    for m in M::ALL {
        if let Some(v) = row.try_get::<Option<Decimal>, _>(m.column())? {
            out.insert(*m, v);
        }
    }
    Ok(out)
}

fn market_day_from_row(row: &PgRow) -> StoreResult<MarketDailyFact> {
    Ok(MarketDailyFact {
        trade_date: row.try_get("trade_date")?,
        metrics: metrics_from_row(row)?,
    })
}

fn macro_period_from_row(row: &PgRow) -> StoreResult<MacroPeriodicFact> {
    Ok(MacroPeriodicFact {
        report_date: row.try_get("report_date")?,
        period_label: row.try_get("period_label")?,
        metrics: metrics_from_row(row)?,
    })
}

fn snapshot_from_row(row: &PgRow) -> StoreResult<SnapshotRecord> {
    let name: String = row.try_get("entity_name")?;
    let category: String = row.try_get("category")?;
    let scores = SnapshotScores {
        ytd_return: row.try_get("ytd_return")?,
        percentile_growth: row.try_get("percentile_growth")?,
        percentile_valuation: row.try_get("percentile_valuation")?,
    };

    let snapshot = match category.parse::<SnapshotCategory>()? {
        SnapshotCategory::Sector => MarketSnapshot::Sector {
            name,
            scores,
            valuation: SectorValuation {
                pe_percentile: row.try_get("pe_percentile")?,
                pb_percentile: row.try_get("pb_percentile")?,
            },
        },
        SnapshotCategory::Global => MarketSnapshot::Global { name, scores },
    };

    Ok(SnapshotRecord {
        snapshot,
        updated_at: row.try_get("updated_at")?,
    })
}

fn log_from_row(row: &PgRow) -> StoreResult<PortfolioDailyLog> {
    Ok(PortfolioDailyLog {
        log_date: row.try_get("log_date")?,
        portfolio_code: row.try_get("portfolio_code")?,
        daily_return: row.try_get("daily_return")?,
    })
}

fn log_write_error(err: sqlx::Error, entry: &PortfolioDailyLog) -> StoreError {
    let (foreign_key, unique) = match err.as_database_error() {
        Some(db) => (db.is_foreign_key_violation(), db.is_unique_violation()),
        None => (false, false),
    };

    if foreign_key {
        StoreError::ForeignKeyViolation {
            table: schema::PORTFOLIO_DAILY_LOG,
            key: entry.key(),
            referenced: format!("portfolio {}", entry.portfolio_code),
        }
    } else if unique {
        StoreError::DuplicateKey {
            table: schema::PORTFOLIO_DAILY_LOG,
            key: entry.key(),
        }
    } else {
        StoreError::Database(err)
    }
}

fn column_type(
    data_type: &str,
    char_len: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
) -> ColumnType {
    match (data_type, char_len, precision, scale) {
        ("date", ..) => ColumnType::Date,
        ("integer", ..) => ColumnType::Integer,
        ("text", ..) | ("character varying", None, ..) => ColumnType::Text,
        ("timestamp with time zone", ..) => ColumnType::TimestampTz,
        ("character varying", Some(n), ..) => ColumnType::Varchar(n as u32),
        ("numeric", _, Some(p), Some(s)) => ColumnType::Numeric(Numeric::new(p as u32, s as u32)),
        (other, ..) => ColumnType::Other(other.to_string()),
    }
}

async fn applied_versions(pool: &PgPool) -> StoreResult<Vec<i64>> {
    let (exists,): (bool,) =
        sqlx::query_as("SELECT to_regclass('_sqlx_migrations') IS NOT NULL")
            .fetch_one(pool)
            .await?;
    if !exists {
        return Ok(Vec::new());
    }

    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT version FROM _sqlx_migrations WHERE success ORDER BY version")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(v,)| v).collect())
}

async fn observed_columns(pool: &PgPool) -> StoreResult<Vec<ObservedColumn>> {
    let tables: Vec<String> = schema::declared_tables()
        .iter()
        .map(|t| t.name.to_string())
        .collect();

    let rows = sqlx::query_as::<_, (String, String, String, Option<i32>, Option<i32>, Option<i32>)>(
        "SELECT table_name::text, column_name::text, data_type::text, \
                character_maximum_length::int4, numeric_precision::int4, numeric_scale::int4 \
         FROM information_schema.columns \
         WHERE table_schema = current_schema() AND table_name::text = ANY($1)",
    )
    .bind(&tables)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(table, column, data_type, char_len, precision, scale)| ObservedColumn {
            ty: column_type(&data_type, char_len, precision, scale),
            table,
            column,
        })
        .collect())
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn ensure_schema(&self) -> StoreResult<SchemaReport> {
        let t0 = std::time::Instant::now();
        let before = applied_versions(&self.pool).await?;

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        let applied: Vec<i64> = applied_versions(&self.pool)
            .await?
            .into_iter()
            .filter(|v| !before.contains(v))
            .collect();

        let declared = schema::declared_tables();
        let observed = observed_columns(&self.pool).await?;
        schema::check_compat(&declared, &observed)?;

        tracing::info!(
            applied = ?applied,
            tables = declared.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "schema ensured"
        );

        Ok(SchemaReport {
            applied,
            tables: declared.iter().map(|t| t.name).collect(),
            indexes: schema::INDEXES.iter().map(|i| i.name).collect(),
        })
    }

    async fn insert_market_day(&self, fact: &MarketDailyFact) -> StoreResult<()> {
        let fact = fact.normalized()?;

        let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO ");
        qb.push(schema::MARKET_INDICATORS).push(" (trade_date");
        push_metric_columns::<MarketMetric>(&mut qb);
        qb.push(") VALUES (").push_bind(fact.trade_date);
        push_metric_binds(&mut qb, &fact.metrics);
        qb.push(") ON CONFLICT (trade_date) DO NOTHING");

        let res = qb.build().persistent(false).execute(&self.pool).await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::DuplicateKey {
                table: schema::MARKET_INDICATORS,
                key: fact.trade_date.to_string(),
            });
        }

        tracing::debug!(
            trade_date = %fact.trade_date,
            metrics = fact.metrics.len(),
            "market day inserted"
        );
        Ok(())
    }

    async fn market_day(&self, trade_date: NaiveDate) -> StoreResult<Option<MarketDailyFact>> {
        sqlx::query(&statements().market_by_date)
            .bind(trade_date)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| market_day_from_row(&row))
            .transpose()
    }

    fn market_days(&self, range: DateRange) -> RowStream<'_, MarketDailyFact> {
        sqlx::query(&statements().market_range)
            .bind(range.start())
            .bind(range.end())
            .fetch(&self.pool)
            .map(|row| row.map_err(StoreError::from).and_then(|r| market_day_from_row(&r)))
            .boxed()
    }

    async fn latest_market_days(&self, limit: usize) -> StoreResult<Vec<MarketDailyFact>> {
        let rows = sqlx::query(&statements().market_latest)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(market_day_from_row).collect()
    }

    async fn insert_macro_period(&self, fact: &MacroPeriodicFact) -> StoreResult<()> {
        let fact = fact.normalized()?;

        let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO ");
        qb.push(schema::MACRO_INDICATORS)
            .push(" (report_date, period_label");
        push_metric_columns::<MacroMetric>(&mut qb);
        qb.push(") VALUES (")
            .push_bind(fact.report_date)
            .push(", ")
            .push_bind(fact.period_label.clone());
        push_metric_binds(&mut qb, &fact.metrics);
        qb.push(") ON CONFLICT (report_date) DO NOTHING");

        let res = qb.build().persistent(false).execute(&self.pool).await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::DuplicateKey {
                table: schema::MACRO_INDICATORS,
                key: fact.report_date.to_string(),
            });
        }

        tracing::debug!(report_date = %fact.report_date, "macro period inserted");
        Ok(())
    }

    async fn macro_period(&self, report_date: NaiveDate) -> StoreResult<Option<MacroPeriodicFact>> {
        sqlx::query(&statements().macro_by_date)
            .bind(report_date)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| macro_period_from_row(&row))
            .transpose()
    }

    fn macro_periods(&self, range: DateRange) -> RowStream<'_, MacroPeriodicFact> {
        sqlx::query(&statements().macro_range)
            .bind(range.start())
            .bind(range.end())
            .fetch(&self.pool)
            .map(|row| row.map_err(StoreError::from).and_then(|r| macro_period_from_row(&r)))
            .boxed()
    }

    async fn upsert_snapshot(&self, snapshot: &MarketSnapshot) -> StoreResult<SnapshotRecord> {
        let snapshot = snapshot.normalized()?;
        // TIMESTAMPTZ keeps microseconds; stamp at that resolution so the record we return
        // matches what a later read sees.
        let updated_at = Utc::now().trunc_subsecs(6);
        let scores = snapshot.scores();
        let valuation = snapshot.sector_valuation().cloned().unwrap_or_default();

        sqlx::query(
            "INSERT INTO market_snapshots (entity_name, category, ytd_return, percentile_growth, \
                 percentile_valuation, pe_percentile, pb_percentile, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (entity_name, category) DO UPDATE \
               SET ytd_return = EXCLUDED.ytd_return, \
                   percentile_growth = EXCLUDED.percentile_growth, \
                   percentile_valuation = EXCLUDED.percentile_valuation, \
                   pe_percentile = EXCLUDED.pe_percentile, \
                   pb_percentile = EXCLUDED.pb_percentile, \
                   updated_at = EXCLUDED.updated_at",
        )
        .bind(snapshot.name())
        .bind(snapshot.category().as_str())
        .bind(scores.ytd_return)
        .bind(scores.percentile_growth)
        .bind(scores.percentile_valuation)
        .bind(valuation.pe_percentile)
        .bind(valuation.pb_percentile)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(key = %snapshot.key(), "snapshot upserted");
        Ok(SnapshotRecord {
            snapshot,
            updated_at,
        })
    }

    async fn snapshot(&self, key: &SnapshotKey) -> StoreResult<Option<SnapshotRecord>> {
        sqlx::query(&statements().snapshot_by_key)
            .bind(key.name.trim())
            .bind(key.category.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| snapshot_from_row(&row))
            .transpose()
    }

    async fn snapshots_by_category(
        &self,
        category: SnapshotCategory,
        page: Option<Page>,
    ) -> StoreResult<Vec<SnapshotRecord>> {
        let rows = sqlx::query(&statements().snapshots_by_category)
            .bind(category.as_str())
            .bind(page.map(|p| p.limit as i64))
            .bind(page.map_or(0, |p| p.offset as i64))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(snapshot_from_row).collect()
    }

    async fn snapshot_count(&self, category: Option<SnapshotCategory>) -> StoreResult<u64> {
        let (rows,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM market_snapshots WHERE $1::text IS NULL OR category = $1",
        )
        .bind(category.map(SnapshotCategory::as_str))
        .fetch_one(&self.pool)
        .await?;
        Ok(rows as u64)
    }

    async fn upsert_portfolio(&self, info: &PortfolioInfo) -> StoreResult<()> {
        let info = info.normalized()?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO portfolio_info (portfolio_code, portfolio_name, inception_return, \
                 avg_return_1y, value_at_risk, alpha, beta, risk_free_rate) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (portfolio_code) DO UPDATE \
               SET portfolio_name = EXCLUDED.portfolio_name, \
                   inception_return = EXCLUDED.inception_return, \
                   avg_return_1y = EXCLUDED.avg_return_1y, \
                   value_at_risk = EXCLUDED.value_at_risk, \
                   alpha = EXCLUDED.alpha, \
                   beta = EXCLUDED.beta, \
                   risk_free_rate = EXCLUDED.risk_free_rate",
        )
        .bind(&info.code)
        .bind(&info.name)
        .bind(info.inception_return)
        .bind(info.avg_return_1y)
        .bind(info.value_at_risk)
        .bind(info.alpha)
        .bind(info.beta)
        .bind(info.risk_free_rate)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM portfolio_yearly_returns WHERE portfolio_code = $1")
            .bind(&info.code)
            .execute(&mut *tx)
            .await?;

        if !info.yearly_returns.is_empty() {
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO portfolio_yearly_returns (portfolio_code, year, annual_return) ",
            );
            qb.push_values(&info.yearly_returns, |mut b, (year, ret)| {
                b.push_bind(&info.code).push_bind(*year).push_bind(*ret);
            });
            qb.build().persistent(false).execute(&mut *tx).await?;
        }

        tx.commit().await?;

        tracing::debug!(
            code = %info.code,
            years = info.yearly_returns.len(),
            "portfolio upserted"
        );
        Ok(())
    }

    async fn portfolio(&self, code: &str) -> StoreResult<Option<PortfolioInfo>> {
        let row = sqlx::query_as::<
            _,
            (
                String,
                String,
                Option<Decimal>,
                Option<Decimal>,
                Option<Decimal>,
                Option<Decimal>,
                Option<Decimal>,
                Option<Decimal>,
            ),
        >(
            "SELECT portfolio_code, portfolio_name, inception_return, avg_return_1y, \
                    value_at_risk, alpha, beta, risk_free_rate \
             FROM portfolio_info WHERE portfolio_code = $1",
        )
        .bind(code.trim())
        .fetch_optional(&self.pool)
        .await?;

        let Some((code, name, inception_return, avg_return_1y, value_at_risk, alpha, beta, risk_free_rate)) =
            row
        else {
            return Ok(None);
        };

        let years = sqlx::query_as::<_, (i32, Decimal)>(
            "SELECT year, annual_return FROM portfolio_yearly_returns \
             WHERE portfolio_code = $1 ORDER BY year ASC",
        )
        .bind(&code)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(PortfolioInfo {
            code,
            name,
            inception_return,
            avg_return_1y,
            value_at_risk,
            alpha,
            beta,
            risk_free_rate,
            yearly_returns: years.into_iter().collect(),
        }))
    }

    async fn portfolio_count(&self) -> StoreResult<u64> {
        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM portfolio_info")
            .fetch_one(&self.pool)
            .await?;
        Ok(rows as u64)
    }

    async fn insert_portfolio_log(&self, entry: &PortfolioDailyLog) -> StoreResult<()> {
        let entry = entry.normalized()?;

        let res = sqlx::query(
            "INSERT INTO portfolio_daily_log (log_date, portfolio_code, daily_return) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (log_date, portfolio_code) DO NOTHING",
        )
        .bind(entry.log_date)
        .bind(&entry.portfolio_code)
        .bind(entry.daily_return)
        .execute(&self.pool)
        .await
        .map_err(|e| log_write_error(e, &entry))?;

        if res.rows_affected() == 0 {
            return Err(StoreError::DuplicateKey {
                table: schema::PORTFOLIO_DAILY_LOG,
                key: entry.key(),
            });
        }

        tracing::debug!(key = %entry.key(), "portfolio log inserted");
        Ok(())
    }

    async fn portfolio_log(
        &self,
        log_date: NaiveDate,
        code: &str,
    ) -> StoreResult<Option<PortfolioDailyLog>> {
        sqlx::query(
            "SELECT log_date, portfolio_code, daily_return FROM portfolio_daily_log \
             WHERE log_date = $1 AND portfolio_code = $2",
        )
        .bind(log_date)
        .bind(code.trim())
        .fetch_optional(&self.pool)
        .await?
        .map(|row| log_from_row(&row))
        .transpose()
    }

    fn portfolio_log_range(&self, code: &str, range: DateRange) -> RowStream<'_, PortfolioDailyLog> {
        sqlx::query(
            "SELECT log_date, portfolio_code, daily_return FROM portfolio_daily_log \
             WHERE portfolio_code = $1 AND log_date BETWEEN $2 AND $3 \
             ORDER BY log_date ASC",
        )
        .bind(code.trim().to_string())
        .bind(range.start())
        .bind(range.end())
        .fetch(&self.pool)
        .map(|row| row.map_err(StoreError::from).and_then(|r| log_from_row(&r)))
        .boxed()
    }

    async fn coverage(&self, family: DateFamily) -> StoreResult<Coverage> {
        let table = family.table();
        let column = family.date_column();
        let sql = format!("SELECT COUNT(*), MIN({column}), MAX({column}) FROM {table}");
        let (rows, first, last): (i64, Option<NaiveDate>, Option<NaiveDate>) =
            sqlx::query_as(&sql).fetch_one(&self.pool).await?;

        Ok(Coverage {
            table,
            rows: rows as u64,
            first,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_catalog_types() {
        assert_eq!(column_type("date", None, None, None), ColumnType::Date);
        assert_eq!(
            column_type("numeric", None, Some(18), Some(4)),
            ColumnType::Numeric(Numeric::new(18, 4))
        );
        assert_eq!(
            column_type("character varying", Some(20), None, None),
            ColumnType::Varchar(20)
        );
        assert_eq!(column_type("character varying", None, None, None), ColumnType::Text);
        assert_eq!(
            column_type("double precision", None, Some(53), None),
            ColumnType::Other("double precision".into())
        );
        assert_eq!(
            column_type("numeric", None, None, None),
            ColumnType::Other("numeric".into())
        );
    }

    #[test]
    fn select_lists_cover_every_metric() {
        let s = statements();
        for m in MarketMetric::ALL {
            assert!(s.market_range.contains(m.column()));
        }
        for m in MacroMetric::ALL {
            assert!(s.macro_by_date.contains(m.column()));
        }
        assert!(s.market_range.ends_with("ORDER BY trade_date ASC"));
    }

    #[test]
    fn snapshot_listing_orders_bytewise() {
        let sql = &statements().snapshots_by_category;
        assert!(sql.contains(r#"ORDER BY entity_name COLLATE "C" ASC"#), "{sql}");
        assert!(sql.contains(SNAPSHOT_COLUMNS));
    }
}
