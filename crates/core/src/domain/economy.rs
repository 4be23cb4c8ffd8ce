use crate::domain::metric::{fit_metrics, metric_set};
use crate::error::{StoreError, StoreResult};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PERIOD_LABEL_MAX_LEN: usize = 20;

metric_set! {
    /// Periodic macroeconomic readings stored in `macro_indicators`.
    pub enum MacroMetric {
        GdpGrowthPct => ("gdp_growth_pct", 18, 4),
        M2GrowthPct => ("m2_growth_pct", 18, 4),
        MarginRatio => ("margin_ratio", 18, 4),
        DepositRatio => ("deposit_ratio", 18, 4),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroPeriodicFact {
    pub report_date: NaiveDate,
    /// Human label of the period as published, e.g. "thg 1-23".
    pub period_label: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<MacroMetric, Decimal>,
}

impl MacroPeriodicFact {
    pub fn new(report_date: NaiveDate) -> Self {
        Self {
            report_date,
            period_label: None,
            metrics: BTreeMap::new(),
        }
    }

    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.period_label = Some(label.into());
        self
    }

    pub fn with(mut self, metric: MacroMetric, value: Decimal) -> Self {
        self.metrics.insert(metric, value);
        self
    }

    pub fn metric(&self, metric: MacroMetric) -> Option<Decimal> {
        self.metrics.get(&metric).copied()
    }

    pub fn normalized(&self) -> StoreResult<Self> {
        let period_label = self
            .period_label
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        if let Some(label) = &period_label {
            if label.chars().count() > PERIOD_LABEL_MAX_LEN {
                return Err(StoreError::InvalidInput(format!(
                    "period label `{label}` exceeds {PERIOD_LABEL_MAX_LEN} characters"
                )));
            }
        }

        Ok(Self {
            report_date: self.report_date,
            period_label,
            metrics: fit_metrics(&self.metrics)?,
        })
    }
}
