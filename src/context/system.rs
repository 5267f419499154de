//! Deterministic system context derived from the clock
//!
//! No external calls: every factor here is a pure function of a timestamp,
//! so callers pass the instant in and tests pick arbitrary ones.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};

use crate::context::{ContextFactors, FactorName};

pub struct SystemContextProvider;

impl SystemContextProvider {
    /// Factors for the current instant
    pub fn now(&self) -> ContextFactors {
        self.factors_at(Utc::now())
    }

    /// Factors for an arbitrary instant
    pub fn factors_at(&self, at: DateTime<Utc>) -> ContextFactors {
        let hour = at.hour();
        let weekday = at.weekday();
        let is_weekend = matches!(weekday, Weekday::Sat | Weekday::Sun);
        let is_work_hours = !is_weekend && (9..17).contains(&hour);

        let mut factors = ContextFactors::new();
        // All names are static and known valid; insertion cannot fail.
        let entries = [
            ("time_of_day", time_of_day(hour).to_string()),
            ("day_of_week", day_name(weekday).to_string()),
            ("is_weekend", is_weekend.to_string()),
            ("is_work_hours", is_work_hours.to_string()),
            ("season", season(at.month()).to_string()),
        ];
        for (name, value) in entries {
            let name = FactorName::new(name).expect("static factor name");
            factors.insert(name, value).expect("static system factor");
        }
        factors
    }
}

fn time_of_day(hour: u32) -> &'static str {
    match hour {
        0..=5 => "night",
        6..=11 => "morning",
        12..=17 => "afternoon",
        _ => "evening",
    }
}

fn day_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Northern-Hemisphere meteorological season
fn season(month: u32) -> &'static str {
    match month {
        12 | 1 | 2 => "winter",
        3..=5 => "spring",
        6..=8 => "summer",
        _ => "fall",
    }
}
