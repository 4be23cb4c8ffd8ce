use anyhow::Context;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use std::collections::HashSet;

const ICT_OFFSET_SECS: i32 = 7 * 3600;

// HOSE closes its ATC session at 14:45 ICT; end-of-day figures settle by 15:30.
const CLOSE_CUTOFF_HOUR_ICT: u32 = 15;
const CLOSE_CUTOFF_MINUTE_ICT: u32 = 30;

// (month, day) closures observed every year. Lunar New Year and Hung Kings day move and come
// from configuration.
const FIXED_HOLIDAYS: [(u32, u32); 4] = [(1, 1), (4, 30), (5, 1), (9, 2)];

/// Latest trading date whose data should be complete at `now_utc`.
///
/// An explicit `YYYY-MM-DD` argument wins. Otherwise the Vietnam local date is taken, moved back
/// a day before the close cutoff, then rolled back over weekends, fixed holidays and `extra_holidays`.
pub fn resolve_as_of_date(
    as_of_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
    extra_holidays: &[NaiveDate],
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = as_of_date_arg {
        return NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid as-of date `{s}`, expected YYYY-MM-DD"));
    }

    let ict = chrono::FixedOffset::east_opt(ICT_OFFSET_SECS).context("invalid ICT offset")?;
    let now_ict = now_utc.with_timezone(&ict);

    let cutoff_reached =
        (now_ict.hour(), now_ict.minute()) >= (CLOSE_CUTOFF_HOUR_ICT, CLOSE_CUTOFF_MINUTE_ICT);
    let mut date = now_ict.date_naive();
    if !cutoff_reached {
        date -= Duration::days(1);
    }

    let extra: HashSet<NaiveDate> = extra_holidays.iter().copied().collect();
    while !is_trading_day(date, &extra) {
        date -= Duration::days(1);
    }

    Ok(date)
}

pub fn is_trading_day(date: NaiveDate, extra_holidays: &HashSet<NaiveDate>) -> bool {
    !is_weekend(date) && !is_fixed_holiday(date) && !extra_holidays.contains(&date)
}

/// Parses a comma separated `YYYY-MM-DD` list, as found in `VN_MARKET_HOLIDAYS`.
pub fn parse_holidays(raw: &str) -> anyhow::Result<Vec<NaiveDate>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            NaiveDate::parse_from_str(part, "%Y-%m-%d")
                .with_context(|| format!("invalid holiday `{part}`"))
        })
        .collect()
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun)
}

fn is_fixed_holiday(date: NaiveDate) -> bool {
    FIXED_HOLIDAYS.contains(&(date.month(), date.day()))
}
