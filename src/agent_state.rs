//! Per-agent epidemiological state.
//!
//! Columns are agents, rows are variants. Differentiable quantities are `Tensor`s on the run's
//! tape; demographic attributes and symptom stages are plain vectors because nothing is
//! differentiated through them.

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::symptoms::Symptoms;
use crate::tensor::{Tape, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    #[default]
    Female,
    Male,
}

/// Infectiousness profile of one variant.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct VariantParameters {
    pub max_infectiousness: f64,
    #[serde(default = "default_shape")]
    pub shape: f64,
    #[serde(default = "default_rate")]
    pub rate: f64,
    #[serde(default)]
    pub shift: f64,
}

fn default_shape() -> f64 {
    1.0
}

fn default_rate() -> f64 {
    1.0
}

impl Default for VariantParameters {
    fn default() -> Self {
        VariantParameters {
            max_infectiousness: 1.0,
            shape: default_shape(),
            rate: default_rate(),
            shift: 0.0,
        }
    }
}

/// `[n_variants, n_agents]` row-major arrays of infectiousness profile parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct InfectionParameters {
    pub n_variants: usize,
    pub max_infectiousness: Vec<f64>,
    pub shape: Vec<f64>,
    pub rate: Vec<f64>,
    pub shift: Vec<f64>,
}

impl InfectionParameters {
    /// Every agent shares the profile of each variant.
    #[must_use]
    pub fn from_variants(variants: &[VariantParameters], n_agents: usize) -> InfectionParameters {
        let expand = |field: fn(&VariantParameters) -> f64| -> Vec<f64> {
            variants
                .iter()
                .flat_map(|variant| std::iter::repeat_n(field(variant), n_agents))
                .collect()
        };
        InfectionParameters {
            n_variants: variants.len(),
            max_infectiousness: expand(|v| v.max_infectiousness),
            shape: expand(|v| v.shape),
            rate: expand(|v| v.rate),
            shift: expand(|v| v.shift),
        }
    }
}

pub struct AgentState {
    tape: Tape,
    n_agents: usize,
    n_variants: usize,
    pub age: Vec<u8>,
    pub sex: Vec<Sex>,
    susceptibility: Tensor,
    is_infected: Tensor,
    infection_time: Tensor,
    infected_variant: Tensor,
    transmission: Tensor,
    pub infection_parameters: InfectionParameters,
    pub symptoms: Symptoms,
}

impl AgentState {
    /// A fully susceptible, uninfected population.
    pub fn new(
        tape: &Tape,
        age: Vec<u8>,
        sex: Vec<Sex>,
        infection_parameters: InfectionParameters,
    ) -> Result<AgentState, SimError> {
        let n_agents = age.len();
        let n_variants = infection_parameters.n_variants;
        if sex.len() != n_agents {
            return Err(SimError::ShapeMismatch(format!(
                "{} sexes for {n_agents} agents",
                sex.len()
            )));
        }
        if n_variants == 0 {
            return Err(SimError::ConfigurationError(
                "at least one variant is required".to_string(),
            ));
        }
        let expected = n_variants * n_agents;
        for (name, values) in [
            ("max_infectiousness", &infection_parameters.max_infectiousness),
            ("shape", &infection_parameters.shape),
            ("rate", &infection_parameters.rate),
            ("shift", &infection_parameters.shift),
        ] {
            if values.len() != expected {
                return Err(SimError::ShapeMismatch(format!(
                    "{name} has {} entries, expected {expected}",
                    values.len()
                )));
            }
        }

        Ok(AgentState {
            tape: tape.clone(),
            n_agents,
            n_variants,
            age,
            sex,
            susceptibility: tape.ones(n_variants, n_agents),
            is_infected: tape.zeros(1, n_agents),
            infection_time: tape.zeros(1, n_agents),
            infected_variant: tape.zeros(n_variants, n_agents),
            transmission: tape.zeros(n_variants, n_agents),
            infection_parameters,
            symptoms: Symptoms::new(n_agents),
        })
    }

    #[must_use]
    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    #[must_use]
    pub fn n_agents(&self) -> usize {
        self.n_agents
    }

    #[must_use]
    pub fn n_variants(&self) -> usize {
        self.n_variants
    }

    /// `[n_variants, n_agents]`, each entry in `[0, 1]`.
    #[must_use]
    pub fn susceptibility(&self) -> &Tensor {
        &self.susceptibility
    }

    /// `[1, n_agents]`; 1.0 once infected, up to the straight-through relaxation.
    #[must_use]
    pub fn is_infected(&self) -> &Tensor {
        &self.is_infected
    }

    #[must_use]
    pub fn infection_time(&self) -> &Tensor {
        &self.infection_time
    }

    /// `[n_variants, n_agents]` one-hot column for infected agents, zero column otherwise.
    #[must_use]
    pub fn infected_variant(&self) -> &Tensor {
        &self.infected_variant
    }

    #[must_use]
    pub fn transmission(&self) -> &Tensor {
        &self.transmission
    }

    /// Total infected so far as a differentiable `[1, 1]` tensor.
    #[must_use]
    pub fn cases(&self) -> Tensor {
        self.is_infected.sum()
    }

    /// Indices of agents whose `is_infected` value is 1.
    #[must_use]
    pub fn infected_agents(&self) -> Vec<usize> {
        self.is_infected
            .values()
            .iter()
            .enumerate()
            .filter(|(_, &x)| x > 0.5)
            .map(|(agent, _)| agent)
            .collect()
    }

    fn check_shape(&self, what: &str, tensor: &Tensor, rows: usize) -> Result<(), SimError> {
        if tensor.shape() != (rows, self.n_agents) {
            return Err(SimError::ShapeMismatch(format!(
                "{what} has shape {:?}, expected [{rows}, {}]",
                tensor.shape(),
                self.n_agents
            )));
        }
        Ok(())
    }

    pub fn set_transmission(&mut self, transmission: Tensor) -> Result<(), SimError> {
        self.check_shape("transmission", &transmission, self.n_variants)?;
        self.transmission = transmission;
        Ok(())
    }

    pub fn set_susceptibility(&mut self, susceptibility: Tensor) -> Result<(), SimError> {
        self.check_shape("susceptibility", &susceptibility, self.n_variants)?;
        self.susceptibility = susceptibility;
        Ok(())
    }

    /// Applies `new_infected` (`[1, n_agents]`, entries 0 or 1) at `time`:
    ///
    /// * `susceptibility = max(susceptibility - new_infected, 0)`
    /// * `is_infected += new_infected`
    /// * `infection_time += new_infected * (time - infection_time)`
    /// * `infected_variant += variant`
    ///
    /// Every update is a tensor op, so gradients reach whatever produced `new_infected`.
    pub fn infect_people(
        &mut self,
        time: f64,
        new_infected: &Tensor,
        variant: &Tensor,
    ) -> Result<(), SimError> {
        self.check_shape("new infections", new_infected, 1)?;
        self.check_shape("infected variant", variant, self.n_variants)?;

        let susceptibility = self.susceptibility.sub(new_infected)?.clamp_min(0.0);
        let is_infected = self.is_infected.add(new_infected)?;
        let elapsed = self.infection_time.neg().add_scalar(time);
        let infection_time = self.infection_time.add(&new_infected.mul(&elapsed)?)?;
        let infected_variant = self.infected_variant.add(variant)?;

        self.susceptibility = susceptibility;
        self.is_infected = is_infected;
        self.infection_time = infection_time;
        self.infected_variant = infected_variant;
        Ok(())
    }

    /// Forces `mask` agents (`[1, n_agents]`, entries 0 or 1) into the infected state at
    /// time 0 with variant `variant`, leaving every other agent's values and gradients
    /// untouched.
    pub(crate) fn force_infected(&mut self, mask: &Tensor, variant: usize) -> Result<(), SimError> {
        self.check_shape("seed mask", mask, 1)?;
        let keep = mask.one_minus();
        let mut variant_rows = vec![0.0; self.n_variants * self.n_agents];
        for (agent, &m) in mask.values().iter().enumerate() {
            variant_rows[variant * self.n_agents + agent] = m;
        }
        let variant_rows = self
            .tape
            .constant(self.n_variants, self.n_agents, variant_rows)?;

        self.susceptibility = self.susceptibility.mul(&keep)?;
        self.is_infected = self.is_infected.mul(&keep)?.add(mask)?;
        self.infection_time = self.infection_time.mul(&keep)?;
        self.infected_variant = self.infected_variant.mul(&keep)?.add(&variant_rows)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_almost_eq;

    fn population(tape: &Tape, n_agents: usize, n_variants: usize) -> AgentState {
        let variants = vec![VariantParameters::default(); n_variants];
        AgentState::new(
            tape,
            vec![30; n_agents],
            vec![Sex::Female; n_agents],
            InfectionParameters::from_variants(&variants, n_agents),
        )
        .unwrap()
    }

    #[test]
    fn new_population_is_susceptible() {
        let tape = Tape::new();
        let state = population(&tape, 4, 2);
        assert_eq!(state.susceptibility().shape(), (2, 4));
        assert!(state.susceptibility().values().iter().all(|&s| s == 1.0));
        assert_eq!(state.cases().item().unwrap(), 0.0);
        assert!(state.infected_agents().is_empty());
    }

    #[test]
    fn mismatched_demographics_are_rejected() {
        let tape = Tape::new();
        let result = AgentState::new(
            &tape,
            vec![30; 3],
            vec![Sex::Male; 2],
            InfectionParameters::from_variants(&[VariantParameters::default()], 3),
        );
        assert!(matches!(result, Err(SimError::ShapeMismatch(_))));
    }

    #[test]
    fn infect_people_update_rule() {
        let tape = Tape::new();
        let mut state = population(&tape, 3, 1);
        let new_infected = tape.constant(1, 3, vec![0.0, 1.0, 0.0]).unwrap();
        state
            .infect_people(4.0, &new_infected, &new_infected)
            .unwrap();

        assert_eq!(state.susceptibility().values(), &[1.0, 0.0, 1.0]);
        assert_eq!(state.is_infected().values(), &[0.0, 1.0, 0.0]);
        assert_eq!(state.infection_time().values(), &[0.0, 4.0, 0.0]);
        assert_eq!(state.infected_agents(), vec![1]);

        // A second application to the same agent cannot push susceptibility below zero.
        state
            .infect_people(5.0, &new_infected, &new_infected)
            .unwrap();
        assert_eq!(state.susceptibility().values(), &[1.0, 0.0, 1.0]);
    }

    #[test]
    fn infection_time_is_differentiable_in_new_infected() {
        let tape = Tape::new();
        let mut state = population(&tape, 2, 1);
        let new_infected = tape.variable(1, 2, vec![1.0, 0.0]).unwrap();
        state
            .infect_people(3.0, &new_infected, &new_infected)
            .unwrap();
        let grads = state.infection_time().sum().backward().unwrap();
        let g = grads.wrt(&new_infected).unwrap();
        assert_almost_eq!(g[0], 3.0, 1e-12);
        assert_almost_eq!(g[1], 3.0, 1e-12);
    }

    #[test]
    fn wrong_shapes_are_rejected() {
        let tape = Tape::new();
        let mut state = population(&tape, 3, 2);
        let bad = tape.zeros(1, 2);
        let variant = tape.zeros(2, 3);
        assert!(matches!(
            state.infect_people(0.0, &bad, &variant),
            Err(SimError::ShapeMismatch(_))
        ));
        assert!(matches!(
            state.set_transmission(tape.zeros(1, 3)),
            Err(SimError::ShapeMismatch(_))
        ));
    }
}
