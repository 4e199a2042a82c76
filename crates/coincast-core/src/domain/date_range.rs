use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Date, Duration};

use crate::ValidationError;

/// Inclusive calendar date range with `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    start: Date,
    end: Date,
}

impl DateRange {
    pub fn new(start: Date, end: Date) -> Result<Self, ValidationError> {
        if start >= end {
            return Err(ValidationError::InvertedDateRange {
                start: format_date(start),
                end: format_date(end),
            });
        }
        Ok(Self { start, end })
    }

    pub fn start(self) -> Date {
        self.start
    }

    pub fn end(self) -> Date {
        self.end
    }

    /// Number of calendar days covered, both ends included.
    pub fn day_count(self) -> usize {
        usize::try_from((self.end - self.start).whole_days() + 1).unwrap_or(0)
    }

    pub fn contains(self, date: Date) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn days(self) -> impl Iterator<Item = Date> {
        let start = self.start;
        (0..self.day_count()).map(move |offset| start + Duration::days(offset as i64))
    }
}

impl Display for DateRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", format_date(self.start), format_date(self.end))
    }
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(field: &'static str, input: &str) -> Result<Date, ValidationError> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(input.trim(), &format).map_err(|_| ValidationError::InvalidDate {
        field,
        value: input.to_owned(),
    })
}

pub fn format_date(date: Date) -> String {
    let format = format_description!("[year]-[month]-[day]");
    date.format(&format).unwrap_or_else(|_| date.to_string())
}
