//! Working-day arithmetic plus the calendar seams the engine consumes:
//! the holiday provider and the clock.
use super::error::LeaveError;
use chrono::{Datelike, FixedOffset, NaiveDate, Utc, Weekday};
use std::collections::{BTreeSet, HashSet};

/// Supplies the non-working dates of the organisation.
pub trait HolidayCalendar: Send + Sync {
    fn holidays_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<HashSet<NaiveDate>>;
}

/// A fixed list of holidays, typically loaded from HR's yearly calendar.
#[derive(Debug, Clone, Default)]
pub struct StaticHolidays {
    dates: BTreeSet<NaiveDate>,
}

impl StaticHolidays {
    pub fn new(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            dates: dates.into_iter().collect(),
        }
    }
}

impl HolidayCalendar for StaticHolidays {
    fn holidays_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<HashSet<NaiveDate>> {
        if end < start {
            return Ok(HashSet::new());
        }
        Ok(self.dates.range(start..=end).copied().collect())
    }
}

/// Source of "today" in the organisation's timezone.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct WorkingDaysCalculator {
    weekend: Vec<Weekday>,
}

impl Default for WorkingDaysCalculator {
    fn default() -> Self {
        Self::new(vec![Weekday::Sat, Weekday::Sun])
    }
}

impl WorkingDaysCalculator {
    pub fn new(weekend: Vec<Weekday>) -> Self {
        Self { weekend }
    }

    pub fn is_working_day(&self, date: NaiveDate, holidays: &HashSet<NaiveDate>) -> bool {
        !self.weekend.contains(&date.weekday()) && !holidays.contains(&date)
    }

    /// Counts working days in `start..=end`. Both dates must already be
    /// normalised to the organisation's midnight.
    pub fn count(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        holidays: &HashSet<NaiveDate>,
    ) -> Result<u32, LeaveError> {
        if end < start {
            return Err(LeaveError::InvalidDateRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }

        let days = start
            .iter_days()
            .take_while(|day| *day <= end)
            .filter(|day| self.is_working_day(*day, holidays))
            .count();

        Ok(days as u32)
    }
}
