//! Per-step infectiousness of every agent.

use crate::agent_state::AgentState;
use crate::error::SimError;
use crate::tensor::Tensor;

/// Produces the `[n_variants, n_agents]` transmission tensor for the step starting at `time`.
/// Values for uninfected agents are ignored downstream.
pub trait TransmissionUpdater {
    fn transmission(&mut self, state: &AgentState, time: f64) -> Result<Tensor, SimError>;
}

/// Every infected agent transmits at its variant's `max_infectiousness` from the moment of
/// infection.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxInfectiousnessTransmission;

impl TransmissionUpdater for MaxInfectiousnessTransmission {
    fn transmission(&mut self, state: &AgentState, _time: f64) -> Result<Tensor, SimError> {
        let params = &state.infection_parameters;
        let profile = state.tape().constant(
            state.n_variants(),
            state.n_agents(),
            params.max_infectiousness.clone(),
        )?;
        profile.mul(state.infected_variant())
    }
}

/// Gamma-shaped infectiousness, `max * pdf(t - infection_time - shift; shape, rate)`,
/// normalised so the profile peaks at `max`. Differentiable in `infection_time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GammaTransmission;

impl TransmissionUpdater for GammaTransmission {
    fn transmission(&mut self, state: &AgentState, time: f64) -> Result<Tensor, SimError> {
        let params = &state.infection_parameters;
        let n_agents = state.n_agents();
        let tape = state.tape();

        // since infection, broadcast across variants
        let since = state.infection_time().neg().add_scalar(time);
        let shift = tape.constant(state.n_variants(), n_agents, params.shift.clone())?;
        let x = since.sub(&shift)?.clamp_min(0.0);

        // log of the unnormalised gamma density: (k - 1) ln x - r x, minus its value at the
        // mode (k - 1) / r so the peak equals 1
        let mut k_minus_one = Vec::with_capacity(params.shape.len());
        let mut peak_log = Vec::with_capacity(params.shape.len());
        for (&k, &r) in params.shape.iter().zip(&params.rate) {
            let km1 = (k - 1.0).max(0.0);
            k_minus_one.push(km1);
            let mode = km1 / r;
            peak_log.push(if km1 > 0.0 { km1 * mode.ln() - r * mode } else { 0.0 });
        }
        let shape_term = tape.constant(state.n_variants(), n_agents, k_minus_one)?;
        let rate = tape.constant(state.n_variants(), n_agents, params.rate.clone())?;
        let peak_log = tape.constant(state.n_variants(), n_agents, peak_log)?;
        let log_density = shape_term
            .mul(&x.ln())?
            .sub(&rate.mul(&x)?)?
            .sub(&peak_log)?;

        let max = tape.constant(
            state.n_variants(),
            n_agents,
            params.max_infectiousness.clone(),
        )?;
        max.mul(&log_density.exp())?.mul(state.infected_variant())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_state::{InfectionParameters, Sex, VariantParameters};
    use crate::assert_almost_eq;
    use crate::tensor::Tape;

    fn state_with_one_infected(tape: &Tape, variant: VariantParameters) -> AgentState {
        let mut state = AgentState::new(
            tape,
            vec![40; 2],
            vec![Sex::Female; 2],
            InfectionParameters::from_variants(&[variant], 2),
        )
        .unwrap();
        let new_infected = tape.constant(1, 2, vec![1.0, 0.0]).unwrap();
        state.infect_people(1.0, &new_infected, &new_infected).unwrap();
        state
    }

    #[test]
    fn max_infectiousness_applies_to_infected_only() {
        let tape = Tape::new();
        let variant = VariantParameters {
            max_infectiousness: 2.5,
            ..VariantParameters::default()
        };
        let state = state_with_one_infected(&tape, variant);
        let t = MaxInfectiousnessTransmission
            .transmission(&state, 3.0)
            .unwrap();
        assert_eq!(t.values(), &[2.5, 0.0]);
    }

    #[test]
    fn gamma_profile_peaks_at_max() {
        let tape = Tape::new();
        let variant = VariantParameters {
            max_infectiousness: 2.0,
            shape: 3.0,
            rate: 1.0,
            shift: 0.0,
        };
        let state = state_with_one_infected(&tape, variant);
        // infected at t = 1, mode at (k - 1) / r = 2 days later
        let t = GammaTransmission.transmission(&state, 3.0).unwrap();
        assert_almost_eq!(t.get(0, 0), 2.0, 1e-9);
        assert_eq!(t.get(0, 1), 0.0);

        let later = GammaTransmission.transmission(&state, 8.0).unwrap();
        assert!(later.get(0, 0) < 2.0);
        assert!(later.get(0, 0) > 0.0);
    }
}
