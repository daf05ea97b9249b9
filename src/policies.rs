//! Non-pharmaceutical interventions, each active on a half-open time window `[start, end)`
//! measured in simulated days.
//!
//! A window bound is either a day offset (`start_time`, `end_time`) or a `YYYY-MM-DD` date
//! (`start_date`, `end_date`) counted from the timer's `initial_day`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use log::debug;
use serde::Deserialize;

use crate::error::SimError;
use crate::timer::parse_date;
use crate::venue::VenueType;

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct WindowConfig {
    #[serde(default)]
    pub start_time: Option<f64>,
    #[serde(default)]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

impl WindowConfig {
    /// A window given in days since the start of the run.
    #[must_use]
    pub fn days(start: f64, end: f64) -> WindowConfig {
        WindowConfig {
            start_time: Some(start),
            end_time: Some(end),
            ..WindowConfig::default()
        }
    }

    fn resolve(&self, initial_day: Option<NaiveDate>, what: &str) -> Result<Window, SimError> {
        let start = window_bound(
            self.start_time,
            self.start_date.as_deref(),
            initial_day,
            &format!("{what} policy start"),
        )?;
        let end = window_bound(
            self.end_time,
            self.end_date.as_deref(),
            initial_day,
            &format!("{what} policy end"),
        )?;
        Window::new(start, end, what)
    }
}

/// Day offset of one window bound given either as a day count or as a date.
fn window_bound(
    time: Option<f64>,
    date: Option<&str>,
    initial_day: Option<NaiveDate>,
    what: &str,
) -> Result<f64, SimError> {
    match (time, date) {
        (Some(time), None) => Ok(time),
        (None, Some(date)) => {
            let date = parse_date(date)?;
            let initial_day = initial_day.ok_or_else(|| {
                SimError::ConfigurationError(format!("{what} date needs timer.initial_day"))
            })?;
            Ok((date - initial_day).num_days() as f64)
        }
        (Some(_), Some(_)) => Err(SimError::ConfigurationError(format!(
            "{what} is given both as a time and as a date"
        ))),
        (None, None) => Err(SimError::ConfigurationError(format!(
            "{what} needs a time or a date"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InteractionPolicyConfig {
    #[serde(flatten)]
    pub window: WindowConfig,
    pub beta_factors: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CloseVenuePolicyConfig {
    #[serde(flatten)]
    pub window: WindowConfig,
    pub venue_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuarantinePolicyConfig {
    #[serde(flatten)]
    pub window: WindowConfig,
    pub agents: Vec<usize>,
    pub compliance: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    #[serde(default)]
    pub interaction: Vec<InteractionPolicyConfig>,
    #[serde(default)]
    pub close_venue: Vec<CloseVenuePolicyConfig>,
    #[serde(default)]
    pub quarantine: Vec<QuarantinePolicyConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Window {
    start: f64,
    end: f64,
}

impl Window {
    fn new(start: f64, end: f64, what: &str) -> Result<Window, SimError> {
        if !(start.is_finite() && end > start) {
            return Err(SimError::ConfigurationError(format!(
                "{what} policy window [{start}, {end}) is empty or invalid"
            )));
        }
        Ok(Window { start, end })
    }

    fn contains(self, time: f64) -> bool {
        self.start <= time && time < self.end
    }
}

fn check_fraction(value: f64, what: &str) -> Result<f64, SimError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(SimError::ConfigurationError(format!(
            "{what} must lie in [0, 1], got {value}"
        )))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InteractionPolicy {
    window: Window,
    beta_factors: BTreeMap<VenueType, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseVenuePolicy {
    window: Window,
    venue_types: BTreeSet<VenueType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuarantinePolicy {
    window: Window,
    agents: Vec<usize>,
    compliance: f64,
}

/// Multipliers for one step, consumed by `InfectionPassing`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepModifiers {
    beta_factors: BTreeMap<VenueType, f64>,
    closed: BTreeSet<VenueType>,
    /// Per-agent factor on susceptibility and outgoing infectiousness outside households.
    agent_factors: Option<Vec<f64>>,
}

impl StepModifiers {
    /// No intervention in effect.
    #[must_use]
    pub fn none() -> StepModifiers {
        StepModifiers::default()
    }

    #[must_use]
    pub fn beta_factor(&self, venue_type: VenueType) -> f64 {
        self.beta_factors.get(&venue_type).copied().unwrap_or(1.0)
    }

    #[must_use]
    pub fn is_closed(&self, venue_type: VenueType) -> bool {
        self.closed.contains(&venue_type)
    }

    #[must_use]
    pub fn agent_factors(&self) -> Option<&[f64]> {
        self.agent_factors.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Policies {
    interaction: Vec<InteractionPolicy>,
    close_venue: Vec<CloseVenuePolicy>,
    quarantine: Vec<QuarantinePolicy>,
}

impl Policies {
    /// Builds the policies in `config`. Date bounds are resolved against `initial_day`.
    pub fn from_config(
        config: &PolicyConfig,
        initial_day: Option<NaiveDate>,
    ) -> Result<Policies, SimError> {
        let mut interaction = Vec::new();
        for policy in &config.interaction {
            let mut beta_factors = BTreeMap::new();
            for (name, &factor) in &policy.beta_factors {
                let venue_type = VenueType::from_name(name)?;
                beta_factors.insert(venue_type, check_fraction(factor, "beta factor")?);
            }
            interaction.push(InteractionPolicy {
                window: policy.window.resolve(initial_day, "interaction")?,
                beta_factors,
            });
        }

        let mut close_venue = Vec::new();
        for policy in &config.close_venue {
            close_venue.push(CloseVenuePolicy {
                window: policy.window.resolve(initial_day, "close venue")?,
                venue_types: policy
                    .venue_types
                    .iter()
                    .map(|name| VenueType::from_name(name))
                    .collect::<Result<_, _>>()?,
            });
        }

        let mut quarantine = Vec::new();
        for policy in &config.quarantine {
            quarantine.push(QuarantinePolicy {
                window: policy.window.resolve(initial_day, "quarantine")?,
                agents: policy.agents.clone(),
                compliance: check_fraction(policy.compliance, "quarantine compliance")?,
            });
        }

        Ok(Policies {
            interaction,
            close_venue,
            quarantine,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interaction.is_empty() && self.close_venue.is_empty() && self.quarantine.is_empty()
    }

    /// Combines every policy active at `time`. Interaction factors multiply; quarantine
    /// factors multiply per agent.
    pub fn modifiers(&self, time: f64, n_agents: usize) -> Result<StepModifiers, SimError> {
        let mut modifiers = StepModifiers::none();

        for policy in self.interaction.iter().filter(|p| p.window.contains(time)) {
            for (&venue_type, &factor) in &policy.beta_factors {
                *modifiers.beta_factors.entry(venue_type).or_insert(1.0) *= factor;
            }
        }

        for policy in self.close_venue.iter().filter(|p| p.window.contains(time)) {
            modifiers.closed.extend(policy.venue_types.iter().copied());
        }

        for policy in self.quarantine.iter().filter(|p| p.window.contains(time)) {
            let factors = modifiers
                .agent_factors
                .get_or_insert_with(|| vec![1.0; n_agents]);
            for &agent in &policy.agents {
                let Some(factor) = factors.get_mut(agent) else {
                    return Err(SimError::ShapeMismatch(format!(
                        "quarantined agent {agent} out of range for {n_agents} agents"
                    )));
                };
                *factor *= 1.0 - policy.compliance;
            }
        }

        if modifiers != StepModifiers::none() {
            debug!("policies at t={time}: {modifiers:?}");
        }
        Ok(modifiers)
    }
}
