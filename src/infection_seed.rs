//! Initial infections.
//!
//! `infect_people_at_indices` is a deterministic, non-differentiable seeding for ground-truth
//! runs. `infect_fraction_of_people` draws the seeds with a relaxed-Bernoulli straight-through
//! sample so that the seeding fraction itself can be calibrated by gradient descent.

use log::info;
use rand::Rng;

use crate::agent_state::AgentState;
use crate::error::SimError;
use crate::infection_sampler::relaxed_bernoulli_straight_through;
use crate::symptoms::{EXPOSED, SUSCEPTIBLE};
use crate::tensor::Tensor;

/// Forces the agents at `indices` into the infected state with variant 0: susceptibility 0,
/// `is_infected` 1, infection time 0, `current_stage` susceptible and `next_stage` exposed
/// (due immediately). All other agents keep their values.
pub fn infect_people_at_indices(state: &mut AgentState, indices: &[usize]) -> Result<(), SimError> {
    let n_agents = state.n_agents();
    let mut mask = vec![0.0; n_agents];
    for &agent in indices {
        let Some(slot) = mask.get_mut(agent) else {
            return Err(SimError::ShapeMismatch(format!(
                "seed index {agent} out of range for {n_agents} agents"
            )));
        };
        *slot = 1.0;
    }
    let mask = state.tape().constant(1, n_agents, mask)?;
    state.force_infected(&mask, 0)?;

    for &agent in indices {
        state.symptoms.current_stage[agent] = SUSCEPTIBLE;
        state.symptoms.next_stage[agent] = EXPOSED;
        state.symptoms.time_to_next_stage[agent] = 0.0;
    }
    info!("seeded {} infections by index", indices.len());
    Ok(())
}

/// Infects each agent independently with probability `fraction` (a `[1, 1]` tensor in
/// `[0, 1]`) at `time`, through the regular infection update so gradients reach `fraction`.
/// Symptom stages are left for the symptoms updater. Returns the `[1, n_agents]` seeds.
pub fn infect_fraction_of_people<R: Rng>(
    state: &mut AgentState,
    fraction: &Tensor,
    time: f64,
    temperature: f64,
    rng: &mut R,
) -> Result<Tensor, SimError> {
    let f = fraction.item()?;
    if !(0.0..=1.0).contains(&f) {
        return Err(SimError::InvalidProbability(format!(
            "seeding fraction {f} outside [0, 1]"
        )));
    }
    let n_agents = state.n_agents();
    let probs = fraction.mul(&state.tape().ones(1, n_agents))?;
    let new_infected = relaxed_bernoulli_straight_through(&probs, temperature, rng)?;

    let mut variant_rows = vec![new_infected.clone()];
    if state.n_variants() > 1 {
        variant_rows.push(state.tape().zeros(state.n_variants() - 1, n_agents));
    }
    let variant = Tensor::vstack(&variant_rows)?;
    state.infect_people(time, &new_infected, &variant)?;
    info!(
        "seeded {} infections from fraction {f}",
        new_infected.values().iter().sum::<f64>()
    );
    Ok(new_infected)
}
