use crate::domain::numeric::Numeric;
use crate::error::{StoreError, StoreResult};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CODE_MAX_LEN: usize = 20;
pub const NAME_MAX_LEN: usize = 200;

pub const RETURN_PCT: Numeric = Numeric::new(12, 4);
pub const COEFFICIENT: Numeric = Numeric::new(12, 6);
pub const DAILY_RETURN: Numeric = Numeric::new(12, 6);

/// Summary of a tracked model portfolio, keyed by its stable code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioInfo {
    pub code: String,
    pub name: String,
    pub inception_return: Option<Decimal>,
    pub avg_return_1y: Option<Decimal>,
    pub value_at_risk: Option<Decimal>,
    pub alpha: Option<Decimal>,
    pub beta: Option<Decimal>,
    pub risk_free_rate: Option<Decimal>,
    /// Calendar year -> return for that year, in percent.
    #[serde(default)]
    pub yearly_returns: BTreeMap<i32, Decimal>,
}

impl PortfolioInfo {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            inception_return: None,
            avg_return_1y: None,
            value_at_risk: None,
            alpha: None,
            beta: None,
            risk_free_rate: None,
            yearly_returns: BTreeMap::new(),
        }
    }

    pub fn normalized(&self) -> StoreResult<Self> {
        let code = normalize_code(&self.code)?;
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(StoreError::InvalidInput(format!(
                "portfolio {code} must have a name"
            )));
        }
        if name.chars().count() > NAME_MAX_LEN {
            return Err(StoreError::InvalidInput(format!(
                "portfolio {code} name exceeds {NAME_MAX_LEN} characters"
            )));
        }

        let mut yearly_returns = BTreeMap::new();
        for (year, ret) in &self.yearly_returns {
            yearly_returns.insert(*year, RETURN_PCT.fit("annual_return", *ret)?);
        }

        Ok(Self {
            code,
            name,
            inception_return: RETURN_PCT.fit_opt("inception_return", self.inception_return)?,
            avg_return_1y: RETURN_PCT.fit_opt("avg_return_1y", self.avg_return_1y)?,
            value_at_risk: RETURN_PCT.fit_opt("value_at_risk", self.value_at_risk)?,
            alpha: COEFFICIENT.fit_opt("alpha", self.alpha)?,
            beta: COEFFICIENT.fit_opt("beta", self.beta)?,
            risk_free_rate: RETURN_PCT.fit_opt("risk_free_rate", self.risk_free_rate)?,
            yearly_returns,
        })
    }
}

/// Return of one portfolio on one day. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioDailyLog {
    pub log_date: NaiveDate,
    pub portfolio_code: String,
    pub daily_return: Decimal,
}

impl PortfolioDailyLog {
    pub fn new(log_date: NaiveDate, portfolio_code: impl Into<String>, daily_return: Decimal) -> Self {
        Self {
            log_date,
            portfolio_code: portfolio_code.into(),
            daily_return,
        }
    }

    pub fn key(&self) -> String {
        format!("({}, {})", self.log_date, self.portfolio_code)
    }

    pub fn normalized(&self) -> StoreResult<Self> {
        Ok(Self {
            log_date: self.log_date,
            portfolio_code: normalize_code(&self.portfolio_code)?,
            daily_return: DAILY_RETURN.fit("daily_return", self.daily_return)?,
        })
    }
}

pub fn normalize_code(code: &str) -> StoreResult<String> {
    let code = code.trim();
    if code.is_empty() {
        return Err(StoreError::InvalidInput("portfolio code must be non-empty".into()));
    }
    if code.chars().count() > CODE_MAX_LEN {
        return Err(StoreError::InvalidInput(format!(
            "portfolio code `{code}` exceeds {CODE_MAX_LEN} characters"
        )));
    }
    Ok(code.to_string())
}
