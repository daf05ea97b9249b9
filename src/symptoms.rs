//! Symptom stage bookkeeping. Stages are small integer codes; nothing here is differentiable.

use crate::agent_state::AgentState;
use crate::error::SimError;

pub const RECOVERED: u8 = 0;
pub const SUSCEPTIBLE: u8 = 1;
pub const EXPOSED: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Symptoms {
    pub current_stage: Vec<u8>,
    pub next_stage: Vec<u8>,
    /// Absolute time at which `next_stage` becomes current.
    pub time_to_next_stage: Vec<f64>,
}

impl Symptoms {
    #[must_use]
    pub fn new(n_agents: usize) -> Symptoms {
        Symptoms {
            current_stage: vec![SUSCEPTIBLE; n_agents],
            next_stage: vec![SUSCEPTIBLE; n_agents],
            time_to_next_stage: vec![0.0; n_agents],
        }
    }

    /// Marks `agent` as infected at `time`: still susceptible now, exposed next.
    pub fn mark_infected(&mut self, agent: usize, time: f64) {
        self.current_stage[agent] = SUSCEPTIBLE;
        self.next_stage[agent] = EXPOSED;
        self.time_to_next_stage[agent] = time;
    }
}

/// Advances symptom stages after each step's infections have been applied.
pub trait SymptomsUpdater {
    fn update(&mut self, state: &mut AgentState, time: f64) -> Result<(), SimError>;
}

/// Moves infected agents out of `SUSCEPTIBLE` and applies due stage transitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageAdvancer;

impl SymptomsUpdater for StageAdvancer {
    fn update(&mut self, state: &mut AgentState, time: f64) -> Result<(), SimError> {
        let infected = state.infected_agents();
        let symptoms = &mut state.symptoms;
        for agent in infected {
            if symptoms.current_stage[agent] == SUSCEPTIBLE
                && symptoms.next_stage[agent] == SUSCEPTIBLE
            {
                symptoms.mark_infected(agent, time);
            }
        }
        for agent in 0..symptoms.current_stage.len() {
            if symptoms.current_stage[agent] != symptoms.next_stage[agent]
                && time >= symptoms.time_to_next_stage[agent]
            {
                symptoms.current_stage[agent] = symptoms.next_stage[agent];
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_state::{InfectionParameters, Sex, VariantParameters};
    use crate::tensor::Tape;

    #[test]
    fn infected_agents_become_exposed() {
        let tape = Tape::new();
        let mut state = AgentState::new(
            &tape,
            vec![20; 3],
            vec![Sex::Male; 3],
            InfectionParameters::from_variants(&[VariantParameters::default()], 3),
        )
        .unwrap();
        let new_infected = tape.constant(1, 3, vec![0.0, 1.0, 0.0]).unwrap();
        state.infect_people(2.0, &new_infected, &new_infected).unwrap();

        StageAdvancer.update(&mut state, 2.0).unwrap();
        assert_eq!(state.symptoms.current_stage, vec![SUSCEPTIBLE, EXPOSED, SUSCEPTIBLE]);
        assert_eq!(state.symptoms.time_to_next_stage[1], 2.0);
    }

    #[test]
    fn pending_transition_waits_for_its_time() {
        let mut symptoms = Symptoms::new(1);
        symptoms.mark_infected(0, 5.0);
        assert_eq!(symptoms.current_stage[0], SUSCEPTIBLE);
        assert_eq!(symptoms.next_stage[0], EXPOSED);
        assert_ne!(RECOVERED, EXPOSED);
    }
}
