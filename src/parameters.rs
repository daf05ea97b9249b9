//! Run configuration, loaded from JSON and held by the `Context`.
//!
//! ```json
//! {
//!   "temperature": 0.1,
//!   "sampler": "categorical",
//!   "reduction": "sum",
//!   "seed": 8675309,
//!   "log_beta": {"household": -0.4, "school": -0.9, "company": -1.2},
//!   "variants": [{"max_infectiousness": 1.0}],
//!   "timer": {"total_days": 10},
//!   "policies": {"close_venue": [{"start_time": 3, "end_time": 5, "venue_types": ["school"]}]},
//!   "seed_infections": {"indices": [0, 5, 9]}
//! }
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::{info, trace};
use serde::Deserialize;

use crate::agent_state::VariantParameters;
use crate::context::Context;
use crate::define_data_plugin;
use crate::error::SimError;
use crate::infection_sampler::{SamplerKind, DEFAULT_TEMPERATURE};
use crate::interaction_graph::Reduction;
use crate::policies::{Policies, PolicyConfig};
use crate::timer::{Timer, TimerConfig};
use crate::venue::VenueType;

/// How the initial infections are placed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedConfig {
    Indices(Vec<usize>),
    Fraction(f64),
    /// Per-district case counts. Accepted by the parser so the error can name it, but not
    /// supported.
    Districts(BTreeMap<String, usize>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Parameters {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub sampler: SamplerKind,
    #[serde(default)]
    pub reduction: Reduction,
    #[serde(default)]
    pub seed: u64,
    pub log_beta: BTreeMap<String, f64>,
    #[serde(default = "default_variants")]
    pub variants: Vec<VariantParameters>,
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub policies: PolicyConfig,
    #[serde(default)]
    pub seed_infections: Option<SeedConfig>,
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_variants() -> Vec<VariantParameters> {
    vec![VariantParameters::default()]
}

impl Parameters {
    pub fn from_json_str(json: &str) -> Result<Parameters, SimError> {
        let parameters: Parameters = serde_json::from_str(json)?;
        parameters.validate()?;
        Ok(parameters)
    }

    pub fn from_file(path: &Path) -> Result<Parameters, SimError> {
        trace!("loading parameters from {}", path.display());
        let reader = BufReader::new(File::open(path)?);
        let parameters: Parameters = serde_json::from_reader(reader)?;
        parameters.validate()?;
        Ok(parameters)
    }

    #[must_use]
    pub fn n_variants(&self) -> usize {
        self.variants.len()
    }

    /// Checks value ranges and venue names.
    pub fn validate(&self) -> Result<(), SimError> {
        if !(self.temperature > 0.0 && self.temperature.is_finite()) {
            return Err(SimError::ConfigurationError(format!(
                "temperature must be positive, got {}",
                self.temperature
            )));
        }
        if self.variants.is_empty() {
            return Err(SimError::ConfigurationError(
                "at least one variant is required".to_string(),
            ));
        }
        for variant in &self.variants {
            let fields = [
                variant.max_infectiousness,
                variant.shape,
                variant.rate,
                variant.shift,
            ];
            if fields.iter().any(|x| !x.is_finite())
                || variant.max_infectiousness < 0.0
                || variant.rate <= 0.0
            {
                return Err(SimError::ConfigurationError(format!(
                    "invalid variant parameters {variant:?}"
                )));
            }
        }
        self.log_betas()?;
        let timer = Timer::from_config(&self.timer)?;
        Policies::from_config(&self.policies, timer.initial_day())?;
        match &self.seed_infections {
            Some(SeedConfig::Fraction(f)) if !(0.0..=1.0).contains(f) => {
                Err(SimError::ConfigurationError(format!(
                    "seeding fraction must lie in [0, 1], got {f}"
                )))
            }
            Some(SeedConfig::Districts(_)) => Err(SimError::ConfigurationError(
                "seeding by district is not supported".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// `log_beta` keyed by parsed venue type.
    pub fn log_betas(&self) -> Result<BTreeMap<VenueType, f64>, SimError> {
        let mut parsed = BTreeMap::new();
        for (name, &value) in &self.log_beta {
            if !value.is_finite() {
                return Err(SimError::ConfigurationError(format!(
                    "log_beta for {name} must be finite, got {value}"
                )));
            }
            parsed.insert(VenueType::from_name(name)?, value);
        }
        Ok(parsed)
    }
}

define_data_plugin!(ParametersPlugin, Option<Parameters>, None);

pub trait ContextParametersExt {
    /// Reads, validates and stores the parameters at `path`.
    fn load_parameters_from_file(&mut self, path: &Path) -> Result<(), SimError>;

    fn set_parameters(&mut self, parameters: Parameters) -> Result<(), SimError>;

    /// # Errors
    ///
    /// `ConfigurationError` if no parameters were loaded.
    fn get_parameters(&self) -> Result<&Parameters, SimError>;
}

impl ContextParametersExt for Context {
    fn load_parameters_from_file(&mut self, path: &Path) -> Result<(), SimError> {
        let parameters = Parameters::from_file(path)?;
        info!("loaded parameters from {}", path.display());
        *self.get_data_container_mut(ParametersPlugin) = Some(parameters);
        Ok(())
    }

    fn set_parameters(&mut self, parameters: Parameters) -> Result<(), SimError> {
        parameters.validate()?;
        *self.get_data_container_mut(ParametersPlugin) = Some(parameters);
        Ok(())
    }

    fn get_parameters(&self) -> Result<&Parameters, SimError> {
        self.get_data_container(ParametersPlugin)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                SimError::ConfigurationError("parameters have not been loaded".to_string())
            })
    }
}
