//! Simulated clock. A day is split into steps; each step has a duration in hours and a set of
//! venue types where agents mix. Weekdays and weekends follow separate schedules.
//!
//! Without an `initial_day` the run starts on a Monday, so day indices 5 and 6 mod 7 are the
//! weekend. With an `initial_day` (`YYYY-MM-DD`) the calendar decides, and policy windows may
//! be given as dates.

use std::collections::BTreeSet;

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::Deserialize;

use crate::error::SimError;
use crate::venue::VenueType;

const HOURS_PER_DAY: f64 = 24.0;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parses a `YYYY-MM-DD` date.
pub fn parse_date(text: &str) -> Result<NaiveDate, SimError> {
    NaiveDate::parse_from_str(text, DATE_FORMAT).map_err(|e| {
        SimError::ConfigurationError(format!("malformed date '{text}', expected YYYY-MM-DD: {e}"))
    })
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimerConfig {
    #[serde(default = "default_total_days")]
    pub total_days: f64,
    #[serde(default = "default_step_duration")]
    pub weekday_step_duration: Vec<f64>,
    #[serde(default = "default_activities")]
    pub weekday_activities: Vec<Vec<String>>,
    /// Falls back to the weekday schedule when absent.
    #[serde(default)]
    pub weekend_step_duration: Option<Vec<f64>>,
    #[serde(default)]
    pub weekend_activities: Option<Vec<Vec<String>>>,
    /// Calendar date of day 0, `YYYY-MM-DD`.
    #[serde(default)]
    pub initial_day: Option<String>,
}

fn default_total_days() -> f64 {
    10.0
}

fn default_step_duration() -> Vec<f64> {
    vec![HOURS_PER_DAY]
}

fn default_activities() -> Vec<Vec<String>> {
    vec![["household", "school", "company", "leisure"]
        .iter()
        .map(ToString::to_string)
        .collect()]
}

impl Default for TimerConfig {
    fn default() -> Self {
        TimerConfig {
            total_days: default_total_days(),
            weekday_step_duration: default_step_duration(),
            weekday_activities: default_activities(),
            weekend_step_duration: None,
            weekend_activities: None,
            initial_day: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Schedule {
    /// Step durations in days.
    durations: Vec<f64>,
    activities: Vec<Vec<VenueType>>,
}

impl Schedule {
    fn parse(
        durations: &[f64],
        activities: &[Vec<String>],
        what: &str,
    ) -> Result<Schedule, SimError> {
        if durations.is_empty() || durations.len() != activities.len() {
            return Err(SimError::ConfigurationError(format!(
                "{what} schedule has {} durations and {} activity lists",
                durations.len(),
                activities.len()
            )));
        }
        if durations.iter().any(|&hours| !(hours > 0.0 && hours.is_finite())) {
            return Err(SimError::ConfigurationError(format!(
                "{what} step durations must be positive"
            )));
        }
        let total: f64 = durations.iter().sum();
        if (total - HOURS_PER_DAY).abs() > 1e-9 {
            return Err(SimError::ConfigurationError(format!(
                "{what} step durations sum to {total} hours instead of {HOURS_PER_DAY}"
            )));
        }
        let activities = activities
            .iter()
            .map(|names| {
                names
                    .iter()
                    .map(|name| VenueType::from_name(name))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Schedule {
            durations: durations.iter().map(|hours| hours / HOURS_PER_DAY).collect(),
            activities,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Timer {
    total_days: f64,
    initial_day: Option<NaiveDate>,
    weekday: Schedule,
    weekend: Schedule,
    now: f64,
    day: usize,
    step_in_day: usize,
    step: usize,
}

impl Timer {
    pub fn from_config(config: &TimerConfig) -> Result<Timer, SimError> {
        if !(config.total_days > 0.0 && config.total_days.is_finite()) {
            return Err(SimError::ConfigurationError(format!(
                "total_days must be positive, got {}",
                config.total_days
            )));
        }
        let weekday = Schedule::parse(
            &config.weekday_step_duration,
            &config.weekday_activities,
            "weekday",
        )?;
        let weekend = Schedule::parse(
            config
                .weekend_step_duration
                .as_deref()
                .unwrap_or(&config.weekday_step_duration),
            config
                .weekend_activities
                .as_deref()
                .unwrap_or(&config.weekday_activities),
            "weekend",
        )?;
        let initial_day = config.initial_day.as_deref().map(parse_date).transpose()?;
        Ok(Timer {
            total_days: config.total_days,
            initial_day,
            weekday,
            weekend,
            now: 0.0,
            day: 0,
            step_in_day: 0,
            step: 0,
        })
    }

    /// Days elapsed since the start of the run.
    #[must_use]
    pub fn now(&self) -> f64 {
        self.now
    }

    /// Steps taken so far.
    #[must_use]
    pub fn step(&self) -> usize {
        self.step
    }

    #[must_use]
    pub fn day(&self) -> usize {
        self.day
    }

    #[must_use]
    pub fn total_days(&self) -> f64 {
        self.total_days
    }

    #[must_use]
    pub fn initial_day(&self) -> Option<NaiveDate> {
        self.initial_day
    }

    /// Calendar date of the current day, if the run has an `initial_day`.
    #[must_use]
    pub fn date(&self) -> Option<NaiveDate> {
        self.initial_day?.checked_add_days(Days::new(self.day as u64))
    }

    #[must_use]
    pub fn is_weekend(&self) -> bool {
        match self.date() {
            Some(date) => matches!(date.weekday(), Weekday::Sat | Weekday::Sun),
            None => self.day % 7 >= 5,
        }
    }

    fn schedule(&self) -> &Schedule {
        if self.is_weekend() {
            &self.weekend
        } else {
            &self.weekday
        }
    }

    #[must_use]
    pub fn active_venue_types(&self) -> &[VenueType] {
        &self.schedule().activities[self.step_in_day]
    }

    /// Every venue type that appears in either schedule.
    #[must_use]
    pub fn scheduled_venue_types(&self) -> BTreeSet<VenueType> {
        self.weekday
            .activities
            .iter()
            .chain(&self.weekend.activities)
            .flatten()
            .copied()
            .collect()
    }

    /// Length of the current step in days.
    #[must_use]
    pub fn step_duration(&self) -> f64 {
        self.schedule().durations[self.step_in_day]
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.now >= self.total_days - 1e-9
    }

    /// Moves to the next step and returns the new time.
    pub fn next(&mut self) -> f64 {
        self.step += 1;
        self.step_in_day += 1;
        if self.step_in_day == self.schedule().durations.len() {
            self.step_in_day = 0;
            self.day += 1;
            // exact day boundaries, no accumulated rounding
            self.now = self.day as f64;
        } else {
            self.now += self.schedule().durations[self.step_in_day - 1];
        }
        self.now
    }

    pub fn reset(&mut self) {
        self.now = 0.0;
        self.day = 0;
        self.step_in_day = 0;
        self.step = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_almost_eq;

    fn split_day() -> TimerConfig {
        TimerConfig {
            total_days: 7.0,
            weekday_step_duration: vec![8.0, 16.0],
            weekday_activities: vec![
                vec!["school".to_string(), "company".to_string()],
                vec!["household".to_string()],
            ],
            weekend_step_duration: Some(vec![24.0]),
            weekend_activities: Some(vec![vec!["leisure".to_string()]]),
            initial_day: None,
        }
    }

    #[test]
    fn weekday_steps_then_weekend() {
        let mut timer = Timer::from_config(&split_day()).unwrap();
        assert_eq!(
            timer.scheduled_venue_types().into_iter().collect::<Vec<_>>(),
            vec![
                VenueType::Household,
                VenueType::School,
                VenueType::Company,
                VenueType::Leisure
            ]
        );
        assert_eq!(
            timer.active_venue_types(),
            &[VenueType::School, VenueType::Company]
        );
        assert_almost_eq!(timer.step_duration(), 1.0 / 3.0, 1e-12);

        assert_almost_eq!(timer.next(), 1.0 / 3.0, 1e-12);
        assert_eq!(timer.active_venue_types(), &[VenueType::Household]);
        assert_eq!(timer.next(), 1.0);
        assert_eq!(timer.day(), 1);

        // days 1..=4 have two steps each
        for _ in 0..8 {
            timer.next();
        }
        assert_eq!(timer.day(), 5);
        assert!(timer.is_weekend());
        assert_eq!(timer.active_venue_types(), &[VenueType::Leisure]);
        timer.next();
        timer.next();
        assert_eq!(timer.now(), 7.0);
        assert!(timer.is_finished());
        assert_eq!(timer.step(), 12);

        timer.reset();
        assert_eq!(timer.now(), 0.0);
        assert!(!timer.is_finished());
    }

    #[test]
    fn default_config_is_one_step_per_day() {
        let mut timer = Timer::from_config(&TimerConfig::default()).unwrap();
        assert_eq!(timer.active_venue_types().len(), 4);
        assert_eq!(timer.scheduled_venue_types().len(), 4);
        let mut steps = 0;
        while !timer.is_finished() {
            timer.next();
            steps += 1;
        }
        assert_eq!(steps, 10);
    }

    #[test]
    fn invalid_schedules_are_rejected() {
        let mut config = split_day();
        config.weekday_step_duration = vec![8.0];
        assert!(matches!(
            Timer::from_config(&config),
            Err(SimError::ConfigurationError(_))
        ));

        let mut config = split_day();
        config.weekday_step_duration = vec![8.0, 8.0];
        assert!(matches!(
            Timer::from_config(&config),
            Err(SimError::ConfigurationError(_))
        ));

        let mut config = split_day();
        config.weekday_activities[1] = vec!["stadium".to_string()];
        assert!(matches!(
            Timer::from_config(&config),
            Err(SimError::ConfigurationError(_))
        ));
    }

    #[test]
    fn initial_day_sets_the_calendar() {
        let mut config = split_day();
        // a Saturday
        config.initial_day = Some("2020-03-07".to_string());
        let mut timer = Timer::from_config(&config).unwrap();
        assert_eq!(timer.initial_day(), NaiveDate::from_ymd_opt(2020, 3, 7));
        assert!(timer.is_weekend());
        assert_eq!(timer.active_venue_types(), &[VenueType::Leisure]);
        timer.next();
        timer.next();
        assert_eq!(timer.date(), NaiveDate::from_ymd_opt(2020, 3, 9));
        assert!(!timer.is_weekend());
        assert_eq!(
            timer.active_venue_types(),
            &[VenueType::School, VenueType::Company]
        );
    }

    #[test]
    fn malformed_initial_day_is_rejected() {
        for bad in ["2020-13-01", "07/03/2020", "2020-03"] {
            let mut config = split_day();
            config.initial_day = Some(bad.to_string());
            assert!(
                matches!(
                    Timer::from_config(&config),
                    Err(SimError::ConfigurationError(_))
                ),
                "{bad}"
            );
        }
    }
}
