pub mod economy;
pub mod market;
pub mod metric;
pub mod numeric;
pub mod portfolio;
pub mod range;
pub mod snapshot;

pub use economy::{MacroMetric, MacroPeriodicFact};
pub use market::{MarketDailyFact, MarketMetric};
pub use metric::Metric;
pub use numeric::Numeric;
pub use portfolio::{PortfolioDailyLog, PortfolioInfo};
pub use range::{DateRange, Page};
pub use snapshot::{
    MarketSnapshot, SectorValuation, SnapshotCategory, SnapshotKey, SnapshotRecord, SnapshotScores,
};
