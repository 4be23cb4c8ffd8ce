pub mod domain;
pub mod error;
pub mod query;
pub mod schema;
pub mod storage;
pub mod time;

pub use error::{StoreError, StoreResult};

pub mod config {
    use anyhow::Context;
    use chrono::NaiveDate;

    const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub db_max_connections: u32,
        pub sentry_dsn: Option<String>,
        /// Market closures beyond the fixed calendar (Tet, Hung Kings).
        pub market_holidays: Vec<NaiveDate>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let db_max_connections = match std::env::var("DB_MAX_CONNECTIONS") {
                Ok(s) => s
                    .trim()
                    .parse()
                    .with_context(|| format!("DB_MAX_CONNECTIONS must be a positive integer, got `{s}`"))?,
                Err(_) => DEFAULT_DB_MAX_CONNECTIONS,
            };

            let market_holidays = match std::env::var("VN_MARKET_HOLIDAYS") {
                Ok(s) => crate::time::vn_market::parse_holidays(&s)
                    .context("VN_MARKET_HOLIDAYS must be YYYY-MM-DD,YYYY-MM-DD,...")?,
                Err(_) => Vec::new(),
            };

            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                db_max_connections,
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                market_holidays,
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }
    }
}
