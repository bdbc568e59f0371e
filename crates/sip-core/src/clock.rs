//! Wall clock used for report dates and artifact names.

use chrono::{Local, NaiveDate, NaiveDateTime};

/// Source of the current local time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }

    /// Report date as `YYYY-MM-DD`
    fn report_date(&self) -> String {
        self.today().format("%Y-%m-%d").to_string()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Always returns the same instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_report_date() {
        let at = NaiveDate::from_ymd_opt(2024, 7, 27)
            .and_then(|d| d.and_hms_opt(15, 30, 0))
            .unwrap();
        assert_eq!(FixedClock(at).report_date(), "2024-07-27");
    }
}
