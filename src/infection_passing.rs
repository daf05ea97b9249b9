//! Per-step not-infected probabilities.
//!
//! For each active venue type `t` with coefficient `β_t = exp(log_beta_t)`:
//!
//! ```text
//! venue_load[v, venue] = Σ_{members}  transmission[v, a] * is_infected[a]
//! H[v, a]             += β_t * susceptibility[v, a] * venue_load[v, venue_of(a)]
//! p_not_infected[v, a] = exp(-max(H[v, a], 0))
//! ```
//!
//! All steps are tensor ops, so `p_not_infected` is differentiable in every `log_beta_t`.

use std::collections::BTreeMap;

use log::trace;

use crate::agent_state::AgentState;
use crate::error::SimError;
use crate::interaction_graph::InteractionGraph;
use crate::policies::StepModifiers;
use crate::tensor::{Tape, Tensor};
use crate::venue::VenueType;

/// Holds one learnable `log_beta` per venue type.
pub struct InfectionPassing {
    log_betas: BTreeMap<VenueType, Tensor>,
}

impl InfectionPassing {
    /// Registers every coefficient as a `[1, 1]` variable on `tape`.
    pub fn new(tape: &Tape, log_betas: &BTreeMap<VenueType, f64>) -> Result<Self, SimError> {
        let mut variables = BTreeMap::new();
        for (&venue_type, &log_beta) in log_betas {
            if !log_beta.is_finite() {
                return Err(SimError::ConfigurationError(format!(
                    "log_beta for {venue_type} must be finite, got {log_beta}"
                )));
            }
            variables.insert(venue_type, tape.scalar_variable(log_beta));
        }
        Ok(InfectionPassing {
            log_betas: variables,
        })
    }

    /// The `[1, 1]` variable to differentiate against.
    #[must_use]
    pub fn log_beta(&self, venue_type: VenueType) -> Option<&Tensor> {
        self.log_betas.get(&venue_type)
    }

    pub fn log_betas(&self) -> impl Iterator<Item = (VenueType, &Tensor)> {
        self.log_betas.iter().map(|(&venue_type, t)| (venue_type, t))
    }

    /// `[n_variants, n_agents]` probability that each agent escapes infection by each variant
    /// during this step, given the venue types active in it.
    pub fn not_infected_probs(
        &self,
        state: &AgentState,
        graph: &InteractionGraph,
        active: &[VenueType],
        modifiers: &StepModifiers,
    ) -> Result<Tensor, SimError> {
        if graph.n_agents() != state.n_agents() {
            return Err(SimError::ShapeMismatch(format!(
                "graph has {} agents, state has {}",
                graph.n_agents(),
                state.n_agents()
            )));
        }
        let tape = state.tape();
        let (n_variants, n_agents) = (state.n_variants(), state.n_agents());

        let infectiousness = state.transmission().mul(state.is_infected())?;
        let quarantine = modifiers
            .agent_factors()
            .map(|factors| tape.constant(1, n_agents, factors.to_vec()))
            .transpose()?;

        let mut hazard = tape.zeros(n_variants, n_agents);
        for &venue_type in active {
            if modifiers.is_closed(venue_type) {
                trace!("{venue_type} closed");
                continue;
            }
            let log_beta = self.log_beta(venue_type).ok_or_else(|| {
                SimError::ConfigurationError(format!(
                    "no log_beta for active venue type {venue_type}"
                ))
            })?;
            let beta = log_beta.exp().scale(modifiers.beta_factor(venue_type));

            let (outgoing, susceptibility) = match (&quarantine, venue_type) {
                (Some(factors), t) if t != VenueType::Household => (
                    infectiousness.mul(factors)?,
                    state.susceptibility().mul(factors)?,
                ),
                _ => (infectiousness.clone(), state.susceptibility().clone()),
            };

            let venue_load = graph.scatter_to_venues(venue_type, &outgoing)?;
            let exposure = graph.gather_to_agents(venue_type, &venue_load)?;
            let contribution = susceptibility.mul(&exposure)?.mul(&beta)?;
            hazard = hazard.add(&contribution)?;
        }

        hazard.check_finite("hazard")?;
        let probs = hazard.clamp_min(0.0).neg().exp();
        probs.check_finite("not-infected probability")?;
        Ok(probs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_state::{InfectionParameters, Sex, VariantParameters};
    use crate::assert_almost_eq;
    use crate::interaction_graph::Reduction;

    /// Two agents sharing one school; agent 0 infected with transmission 1.
    fn pair(tape: &Tape) -> (AgentState, InteractionGraph) {
        let mut state = AgentState::new(
            tape,
            vec![10; 2],
            vec![Sex::Female; 2],
            InfectionParameters::from_variants(&[VariantParameters::default()], 2),
        )
        .unwrap();
        let first = tape.constant(1, 2, vec![1.0, 0.0]).unwrap();
        state.infect_people(0.0, &first, &first).unwrap();
        state.set_transmission(tape.ones(1, 2)).unwrap();

        let mut graph = InteractionGraph::new(2, Reduction::Sum);
        graph
            .add_venue_type(VenueType::School, 1, vec![(0, 0), (1, 0)])
            .unwrap();
        (state, graph)
    }

    fn passing(tape: &Tape, log_beta: f64) -> InfectionPassing {
        InfectionPassing::new(tape, &BTreeMap::from([(VenueType::School, log_beta)])).unwrap()
    }

    #[test]
    fn shared_venue_with_unit_beta() {
        let tape = Tape::new();
        let (state, graph) = pair(&tape);
        let probs = passing(&tape, 0.0)
            .not_infected_probs(&state, &graph, &[VenueType::School], &StepModifiers::none())
            .unwrap();
        assert_almost_eq!(probs.get(0, 1), (-1.0_f64).exp(), 1e-12);
        // the infected agent has no susceptibility left
        assert_eq!(probs.get(0, 0), 1.0);
    }

    #[test]
    fn probability_gradient_in_log_beta() {
        let tape = Tape::new();
        let (state, graph) = pair(&tape);
        let passing = passing(&tape, 0.0);
        let probs = passing
            .not_infected_probs(&state, &graph, &[VenueType::School], &StepModifiers::none())
            .unwrap();
        let grads = probs.element(0, 1).unwrap().backward().unwrap();
        // d/dlogβ exp(-e^logβ) at logβ = 0 is -exp(-1)
        let log_beta = passing.log_beta(VenueType::School).unwrap();
        assert_almost_eq!(grads.scalar_wrt(log_beta), -(-1.0_f64).exp(), 1e-12);
    }

    #[test]
    fn inactive_venue_types_contribute_nothing() {
        let tape = Tape::new();
        let (state, graph) = pair(&tape);
        let probs = passing(&tape, 0.0)
            .not_infected_probs(&state, &graph, &[], &StepModifiers::none())
            .unwrap();
        assert_eq!(probs.values(), &[1.0, 1.0]);
    }

    #[test]
    fn large_hazard_stays_a_valid_probability() {
        let tape = Tape::new();
        let (state, graph) = pair(&tape);
        let probs = passing(&tape, 50.0_f64.ln())
            .not_infected_probs(&state, &graph, &[VenueType::School], &StepModifiers::none())
            .unwrap();
        let p = probs.get(0, 1);
        assert!(p >= 0.0 && p.is_finite());
        assert_almost_eq!(p, (-50.0_f64).exp(), 1e-30);

        let tape = Tape::new();
        let (state, graph) = pair(&tape);
        let probs = passing(&tape, 710.0)
            .not_infected_probs(&state, &graph, &[VenueType::School], &StepModifiers::none());
        assert!(matches!(probs, Err(SimError::NumericalInstability(_))));
    }

    #[test]
    fn missing_coefficient_is_configuration_error() {
        let tape = Tape::new();
        let (state, graph) = pair(&tape);
        let result = passing(&tape, 0.0).not_infected_probs(
            &state,
            &graph,
            &[VenueType::Company],
            &StepModifiers::none(),
        );
        assert!(matches!(result, Err(SimError::ConfigurationError(_))));
    }

    #[test]
    fn non_finite_log_beta_is_rejected() {
        let tape = Tape::new();
        let result = InfectionPassing::new(&tape, &BTreeMap::from([(VenueType::School, f64::NAN)]));
        assert!(matches!(result, Err(SimError::ConfigurationError(_))));
    }
}
