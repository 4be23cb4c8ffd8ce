use crate::domain::metric::{fit_metrics, metric_set};
use crate::error::StoreResult;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

metric_set! {
    /// Daily market readings stored in `market_indicators`.
    pub enum MarketMetric {
        ClosePrice => ("close_price", 18, 2),
        VolatilityIndex => ("volatility_index", 18, 4),
        BreadthIndex => ("breadth_index", 18, 4),
        Dividend12mPct => ("dividend_12m_pct", 18, 4),
        EpsVnindex => ("eps_vnindex", 18, 4),
        EpsNonbank => ("eps_nonbank", 18, 4),
        PeUnder10Pct => ("st_pe_under_10_pct", 18, 4),
        PbUnder1Pct => ("st_pb_under_1_pct", 18, 4),
        PeVnindex => ("pe_vnindex", 18, 4),
        PeNonbank => ("pe_nonbank", 18, 4),
        PeBank => ("pe_bank", 18, 4),
        PbVnindex => ("pb_vnindex", 18, 4),
        PbNonbank => ("pb_nonbank", 18, 4),
        PbBank => ("pb_bank", 18, 4),
        Ret40YearsOldPct => ("ret_40years_old_pct", 18, 4),
        RetVniAdjustedPct => ("ret_vni_adjusted_pct", 18, 4),
        TurnoverRatio => ("turnover_ratio", 18, 4),
        DerivativesRatio => ("derivatives_ratio", 18, 4),
        InsiderTransaction3mPct => ("insider_transaction_3m_pct", 18, 4),
        TrendProbability => ("trend_probability", 18, 4),
        Avg50dOrders => ("avg_50d_orders", 18, 0),
        MatchingRatePct => ("matching_rate_pct", 18, 4),
        CorSpx => ("cor_spx", 18, 4),
        CorVn1y => ("cor_vn1y", 18, 4),
        CorUsd => ("cor_usd", 18, 4),
        HeaConsumption => ("hea_consumption", 18, 4),
        HeaProduction => ("hea_production", 18, 4),
        HeaLabor => ("hea_labor", 18, 4),
    }
}

/// One trading day of market readings. Missing metrics are unknown, not zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketDailyFact {
    pub trade_date: NaiveDate,
    #[serde(default)]
    pub metrics: BTreeMap<MarketMetric, Decimal>,
}

impl MarketDailyFact {
    pub fn new(trade_date: NaiveDate) -> Self {
        Self {
            trade_date,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with(mut self, metric: MarketMetric, value: Decimal) -> Self {
        self.metrics.insert(metric, value);
        self
    }

    pub fn metric(&self, metric: MarketMetric) -> Option<Decimal> {
        self.metrics.get(&metric).copied()
    }

    pub fn close_price(&self) -> Option<Decimal> {
        self.metric(MarketMetric::ClosePrice)
    }

    /// Copy with every reading truncated onto its column's grid.
    pub fn normalized(&self) -> StoreResult<Self> {
        Ok(Self {
            trade_date: self.trade_date,
            metrics: fit_metrics(&self.metrics)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metric::Metric;
    use rust_decimal_macros::dec;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 9, 1).unwrap()
    }

    #[test]
    fn metric_columns_are_unique() {
        let mut seen = std::collections::BTreeSet::new();
        for m in MarketMetric::ALL {
            assert!(seen.insert(m.column()), "duplicate column {}", m.column());
        }
    }

    #[test]
    fn parses_metric_from_column_name() {
        let m: MarketMetric = "st_pe_under_10_pct".parse().unwrap();
        assert_eq!(m, MarketMetric::PeUnder10Pct);
        assert!("no_such_column".parse::<MarketMetric>().is_err());
    }

    #[test]
    fn normalizes_per_column_scale() {
        let fact = MarketDailyFact::new(day())
            .with(MarketMetric::ClosePrice, dec!(1500.259))
            .with(MarketMetric::Avg50dOrders, dec!(120345.9))
            .with(MarketMetric::CorSpx, dec!(0.123456));

        let n = fact.normalized().unwrap();
        assert_eq!(n.close_price(), Some(dec!(1500.25)));
        assert_eq!(n.metric(MarketMetric::Avg50dOrders), Some(dec!(120345)));
        assert_eq!(n.metric(MarketMetric::CorSpx), Some(dec!(0.1234)));
        assert_eq!(n.metric(MarketMetric::BreadthIndex), None);
    }

    #[test]
    fn serializes_metrics_by_column_name() {
        let fact = MarketDailyFact::new(day()).with(MarketMetric::ClosePrice, dec!(1500.25));
        let v = serde_json::to_value(&fact).unwrap();
        assert_eq!(v["trade_date"], "2026-09-01");
        assert_eq!(v["metrics"]["close_price"], "1500.25");

        let back: MarketDailyFact = serde_json::from_value(v).unwrap();
        assert_eq!(back, fact);
    }
}
