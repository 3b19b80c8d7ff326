//! Trading session boundaries in exchange-local time.

use crate::core::config::ScheduleConfig;
use anyhow::Result;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct TradingWindow {
    start: NaiveTime,
    end: NaiveTime,
    offset: FixedOffset,
    holidays: BTreeSet<NaiveDate>,
}

impl TradingWindow {
    pub fn new(
        start: NaiveTime,
        end: NaiveTime,
        offset: FixedOffset,
        holidays: impl IntoIterator<Item = NaiveDate>,
    ) -> Self {
        Self {
            start,
            end,
            offset,
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        Ok(Self::new(
            config.start_time()?,
            config.end_time()?,
            config.offset()?,
            config.holidays.iter().copied(),
        ))
    }

    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    pub fn local_time(&self, now: DateTime<Utc>) -> NaiveTime {
        now.with_timezone(&self.offset).time()
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Whether `now` falls inside the intraday window of a trading day.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let time = self.local_time(now);
        self.is_trading_day(self.local_date(now)) && time >= self.start && time <= self.end
    }
}
