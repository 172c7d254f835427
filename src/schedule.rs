//! Replay schedules: a start date plus a day-of-week pattern.
//!
//! A rerun runs on a schedule like Monday-Wednesday-Friday starting from
//! some date. `DateSource` iterates those dates; the projector maps
//! archived items onto them.

use chrono::{Datelike, Days, NaiveDate, Weekday};

use crate::error::{RecastError, Result};

/// Generates the scheduled calendar dates, in UTC days.
#[derive(Debug, Clone)]
pub struct DateSource {
    start_date: NaiveDate,
    schedule: Vec<Weekday>,
    cursor: NaiveDate,
}

impl DateSource {
    /// A source whose first emitted date is the first scheduled day on or
    /// after `start`.
    pub fn new(start: NaiveDate, schedule: Vec<Weekday>) -> Self {
        DateSource {
            start_date: start,
            schedule,
            // one day early so the start date itself is caught
            cursor: start - Days::new(1),
        }
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    fn contains_day(&self, day: NaiveDate) -> bool {
        self.schedule.contains(&day.weekday())
    }

    /// The next date on the schedule, strictly after the previous one.
    pub fn next_date(&mut self) -> Result<NaiveDate> {
        if self.schedule.is_empty() {
            return Err(RecastError::Schedule("next_date on empty schedule".into()));
        }
        if self.cursor < self.start_date {
            self.cursor = self.start_date;
        } else {
            self.cursor = self.cursor + Days::new(1);
        }
        while !self.contains_day(self.cursor) {
            self.cursor = self.cursor + Days::new(1);
        }
        Ok(self.cursor)
    }

    /// Move the cursor by `n` scheduled days, forward or backward.
    ///
    /// Skipping backward walks day by day to each previous scheduled day,
    /// and may pass the start date; `next_date` clamps there, so a large
    /// backward skip re-emits the first scheduled date.
    pub fn skip_forward(&mut self, n: i64) {
        if self.schedule.is_empty() {
            return;
        }
        let mut n = n;
        while n != 0 {
            if n > 0 {
                let _ = self.next_date();
                n -= 1;
            } else {
                loop {
                    self.cursor = self.cursor - Days::new(1);
                    if self.contains_day(self.cursor) {
                        break;
                    }
                }
                n += 1;
            }
        }
    }

    /// Reset so the next emitted date is the first scheduled date again.
    pub fn reset(&mut self) {
        self.cursor = self.start_date - Days::new(1);
    }

    /// How many scheduled dates fall in `[from, to)`?
    ///
    /// Pure: the cursor is not touched. A `from` that is itself not on
    /// the schedule contributes nothing to the count.
    pub fn dates_in_range(&self, from: NaiveDate, to: NaiveDate) -> i64 {
        if from >= to {
            return 0;
        }
        let mut count = 0;
        let mut day = from;
        while day < to {
            if self.contains_day(day) {
                count += 1;
            }
            day = day + Days::new(1);
        }
        count
    }
}
