//! Declared logical model and the versioned migrations that create it.
//!
//! Migrations under `migrations/` are the only way the physical schema changes. After they run,
//! the live catalog is compared against [`declared_tables`] and any incompatible column is a
//! [`StoreError::SchemaConflict`].

use crate::domain::economy::PERIOD_LABEL_MAX_LEN;
use crate::domain::portfolio::{self, CODE_MAX_LEN, NAME_MAX_LEN};
use crate::domain::snapshot::{self, ENTITY_NAME_MAX_LEN};
use crate::domain::{MacroMetric, MarketMetric, Metric, Numeric};
use crate::error::{StoreError, StoreResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

pub const MARKET_INDICATORS: &str = "market_indicators";
pub const MACRO_INDICATORS: &str = "macro_indicators";
pub const MARKET_SNAPSHOTS: &str = "market_snapshots";
pub const PORTFOLIO_INFO: &str = "portfolio_info";
pub const PORTFOLIO_YEARLY_RETURNS: &str = "portfolio_yearly_returns";
pub const PORTFOLIO_DAILY_LOG: &str = "portfolio_daily_log";

const CATEGORY_MAX_LEN: u32 = 16;

pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "market indicators",
        sql: include_str!("../../migrations/0001_market_indicators.sql"),
    },
    Migration {
        version: 2,
        description: "macro indicators",
        sql: include_str!("../../migrations/0002_macro_indicators.sql"),
    },
    Migration {
        version: 3,
        description: "market snapshots",
        sql: include_str!("../../migrations/0003_market_snapshots.sql"),
    },
    Migration {
        version: 4,
        description: "portfolios",
        sql: include_str!("../../migrations/0004_portfolios.sql"),
    },
];

#[derive(Debug, Clone, Copy)]
pub struct IndexDef {
    pub name: &'static str,
    pub table: &'static str,
    pub columns: &'static [&'static str],
}

/// Secondary indexes. Date lookups on the fact tables ride on their primary keys.
pub const INDEXES: &[IndexDef] = &[
    IndexDef {
        name: "idx_market_snapshots_category",
        table: MARKET_SNAPSHOTS,
        columns: &["category", "entity_name"],
    },
    IndexDef {
        name: "idx_portfolio_daily_log_code_date",
        table: PORTFOLIO_DAILY_LOG,
        columns: &["portfolio_code", "log_date"],
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Date,
    Integer,
    Text,
    TimestampTz,
    Varchar(u32),
    Numeric(Numeric),
    /// Anything the model never declares (FLOAT, unconstrained NUMERIC, ...).
    Other(String),
}

impl ColumnType {
    /// Whether a column found in the catalog can hold every value of `self` without loss.
    pub fn accepts(&self, found: &ColumnType) -> bool {
        match (self, found) {
            (ColumnType::Varchar(want), ColumnType::Varchar(have)) => have >= want,
            (ColumnType::Varchar(_), ColumnType::Text) => true,
            (ColumnType::Numeric(want), ColumnType::Numeric(have)) => {
                have.scale == want.scale && have.precision >= want.precision
            }
            (ColumnType::Other(_), _) => false,
            (want, have) => want == have,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Date => f.write_str("DATE"),
            ColumnType::Integer => f.write_str("INTEGER"),
            ColumnType::Text => f.write_str("TEXT"),
            ColumnType::TimestampTz => f.write_str("TIMESTAMPTZ"),
            ColumnType::Varchar(n) => write!(f, "VARCHAR({n})"),
            ColumnType::Numeric(n) => write!(f, "{n}"),
            ColumnType::Other(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
}

#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: Vec<ColumnDef>,
}

/// A column as reported by the live catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedColumn {
    pub table: String,
    pub column: String,
    pub ty: ColumnType,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaReport {
    /// Migration versions applied by this call; empty when the schema was already current.
    pub applied: Vec<i64>,
    pub tables: Vec<&'static str>,
    pub indexes: Vec<&'static str>,
}

fn col(name: &'static str, ty: ColumnType) -> ColumnDef {
    ColumnDef { name, ty }
}

fn metric_columns<M: Metric>(out: &mut Vec<ColumnDef>) {
    for m in M::ALL {
        out.push(col(m.column(), ColumnType::Numeric(m.numeric())));
    }
}

pub fn declared_tables() -> Vec<TableDef> {
    let mut market = vec![col("trade_date", ColumnType::Date)];
    metric_columns::<MarketMetric>(&mut market);

    let mut macro_cols = vec![
        col("report_date", ColumnType::Date),
        col("period_label", ColumnType::Varchar(PERIOD_LABEL_MAX_LEN as u32)),
    ];
    metric_columns::<MacroMetric>(&mut macro_cols);

    let code = || col("portfolio_code", ColumnType::Varchar(CODE_MAX_LEN as u32));

    vec![
        TableDef {
            name: MARKET_INDICATORS,
            columns: market,
        },
        TableDef {
            name: MACRO_INDICATORS,
            columns: macro_cols,
        },
        TableDef {
            name: MARKET_SNAPSHOTS,
            columns: vec![
                col("entity_name", ColumnType::Varchar(ENTITY_NAME_MAX_LEN as u32)),
                col("category", ColumnType::Varchar(CATEGORY_MAX_LEN)),
                col("ytd_return", ColumnType::Numeric(snapshot::YTD_RETURN)),
                col("percentile_growth", ColumnType::Numeric(snapshot::PERCENTILE)),
                col("percentile_valuation", ColumnType::Numeric(snapshot::PERCENTILE)),
                col("pe_percentile", ColumnType::Numeric(snapshot::PERCENTILE)),
                col("pb_percentile", ColumnType::Numeric(snapshot::PERCENTILE)),
                col("updated_at", ColumnType::TimestampTz),
            ],
        },
        TableDef {
            name: PORTFOLIO_INFO,
            columns: vec![
                code(),
                col("portfolio_name", ColumnType::Varchar(NAME_MAX_LEN as u32)),
                col("inception_return", ColumnType::Numeric(portfolio::RETURN_PCT)),
                col("avg_return_1y", ColumnType::Numeric(portfolio::RETURN_PCT)),
                col("value_at_risk", ColumnType::Numeric(portfolio::RETURN_PCT)),
                col("alpha", ColumnType::Numeric(portfolio::COEFFICIENT)),
                col("beta", ColumnType::Numeric(portfolio::COEFFICIENT)),
                col("risk_free_rate", ColumnType::Numeric(portfolio::RETURN_PCT)),
            ],
        },
        TableDef {
            name: PORTFOLIO_YEARLY_RETURNS,
            columns: vec![
                code(),
                col("year", ColumnType::Integer),
                col("annual_return", ColumnType::Numeric(portfolio::RETURN_PCT)),
            ],
        },
        TableDef {
            name: PORTFOLIO_DAILY_LOG,
            columns: vec![
                col("log_date", ColumnType::Date),
                code(),
                col("daily_return", ColumnType::Numeric(portfolio::DAILY_RETURN)),
            ],
        },
    ]
}

/// Fails on the first declared column that is missing or cannot hold the declared type.
/// Extra columns in the catalog are ignored.
pub fn check_compat(declared: &[TableDef], observed: &[ObservedColumn]) -> StoreResult<()> {
    let mut found: BTreeMap<(&str, &str), &ColumnType> = BTreeMap::new();
    for c in observed {
        found.insert((c.table.as_str(), c.column.as_str()), &c.ty);
    }

    for table in declared {
        for column in &table.columns {
            match found.get(&(table.name, column.name)) {
                Some(ty) if column.ty.accepts(ty) => {}
                Some(ty) => {
                    return Err(StoreError::SchemaConflict {
                        table: table.name.to_string(),
                        column: column.name.to_string(),
                        declared: column.ty.to_string(),
                        found: ty.to_string(),
                    })
                }
                None => {
                    return Err(StoreError::SchemaConflict {
                        table: table.name.to_string(),
                        column: column.name.to_string(),
                        declared: column.ty.to_string(),
                        found: "missing".to_string(),
                    })
                }
            }
        }
    }
    Ok(())
}

/// The catalog a fresh database ends up with after every migration.
pub fn declared_catalog() -> Vec<ObservedColumn> {
    declared_tables()
        .into_iter()
        .flat_map(|t| {
            t.columns.into_iter().map(move |c| ObservedColumn {
                table: t.name.to_string(),
                column: c.name.to_string(),
                ty: c.ty,
            })
        })
        .collect()
}
