use crate::domain::numeric::{check_percentile, Numeric};
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const ENTITY_NAME_MAX_LEN: usize = 100;
pub const YTD_RETURN: Numeric = Numeric::new(12, 4);
pub const PERCENTILE: Numeric = Numeric::new(7, 4);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SnapshotCategory {
    Sector,
    Global,
}

impl SnapshotCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotCategory::Sector => "SECTOR",
            SnapshotCategory::Global => "GLOBAL",
        }
    }
}

impl fmt::Display for SnapshotCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotCategory {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SECTOR" => Ok(SnapshotCategory::Sector),
            "GLOBAL" => Ok(SnapshotCategory::Global),
            other => Err(StoreError::InvalidInput(format!(
                "unknown snapshot category `{other}`"
            ))),
        }
    }
}

/// Scores every snapshot carries, whatever its category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotScores {
    pub ytd_return: Option<Decimal>,
    pub percentile_growth: Option<Decimal>,
    pub percentile_valuation: Option<Decimal>,
}

/// Valuation percentiles that only exist for sectors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorValuation {
    pub pe_percentile: Option<Decimal>,
    pub pb_percentile: Option<Decimal>,
}

/// Current comparative state of a sector or a country/global market. Overwritten on refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "UPPERCASE")]
pub enum MarketSnapshot {
    Sector {
        name: String,
        scores: SnapshotScores,
        valuation: SectorValuation,
    },
    Global {
        name: String,
        scores: SnapshotScores,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub category: SnapshotCategory,
    pub name: String,
}

impl SnapshotKey {
    pub fn new(name: impl Into<String>, category: SnapshotCategory) -> Self {
        Self {
            category,
            name: name.into(),
        }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.name, self.category)
    }
}

/// A stored snapshot together with the time the store last wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub snapshot: MarketSnapshot,
    pub updated_at: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn sector(name: impl Into<String>, scores: SnapshotScores, valuation: SectorValuation) -> Self {
        MarketSnapshot::Sector {
            name: name.into(),
            scores,
            valuation,
        }
    }

    pub fn global(name: impl Into<String>, scores: SnapshotScores) -> Self {
        MarketSnapshot::Global {
            name: name.into(),
            scores,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            MarketSnapshot::Sector { name, .. } | MarketSnapshot::Global { name, .. } => name,
        }
    }

    pub fn category(&self) -> SnapshotCategory {
        match self {
            MarketSnapshot::Sector { .. } => SnapshotCategory::Sector,
            MarketSnapshot::Global { .. } => SnapshotCategory::Global,
        }
    }

    pub fn scores(&self) -> &SnapshotScores {
        match self {
            MarketSnapshot::Sector { scores, .. } | MarketSnapshot::Global { scores, .. } => scores,
        }
    }

    pub fn sector_valuation(&self) -> Option<&SectorValuation> {
        match self {
            MarketSnapshot::Sector { valuation, .. } => Some(valuation),
            MarketSnapshot::Global { .. } => None,
        }
    }

    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.name(), self.category())
    }

    /// Validated copy: trimmed name, percentiles in [0, 100], values on the column grid.
    pub fn normalized(&self) -> StoreResult<Self> {
        let name = self.name().trim().to_string();
        if name.is_empty() {
            return Err(StoreError::InvalidInput("snapshot name must be non-empty".into()));
        }
        if name.chars().count() > ENTITY_NAME_MAX_LEN {
            return Err(StoreError::InvalidInput(format!(
                "snapshot name exceeds {ENTITY_NAME_MAX_LEN} characters"
            )));
        }

        let scores = normalize_scores(self.scores())?;
        Ok(match self {
            MarketSnapshot::Sector { valuation, .. } => MarketSnapshot::Sector {
                name,
                scores,
                valuation: normalize_valuation(valuation)?,
            },
            MarketSnapshot::Global { .. } => MarketSnapshot::Global { name, scores },
        })
    }
}

fn normalize_scores(s: &SnapshotScores) -> StoreResult<SnapshotScores> {
    check_percentile("percentile_growth", s.percentile_growth)?;
    check_percentile("percentile_valuation", s.percentile_valuation)?;
    Ok(SnapshotScores {
        ytd_return: YTD_RETURN.fit_opt("ytd_return", s.ytd_return)?,
        percentile_growth: PERCENTILE.fit_opt("percentile_growth", s.percentile_growth)?,
        percentile_valuation: PERCENTILE.fit_opt("percentile_valuation", s.percentile_valuation)?,
    })
}

fn normalize_valuation(v: &SectorValuation) -> StoreResult<SectorValuation> {
    check_percentile("pe_percentile", v.pe_percentile)?;
    check_percentile("pb_percentile", v.pb_percentile)?;
    Ok(SectorValuation {
        pe_percentile: PERCENTILE.fit_opt("pe_percentile", v.pe_percentile)?,
        pb_percentile: PERCENTILE.fit_opt("pb_percentile", v.pb_percentile)?,
    })
}
