//! The step loop.
//!
//! One step, at timer time `t` with active venue types `A`:
//!
//! 1. read the policy modifiers in force at `t`,
//! 2. recompute every agent's transmission,
//! 3. compute the not-infected probabilities over `A`,
//! 4. sample new infections and apply them to the agent state,
//! 5. advance symptom stages,
//! 6. move the timer on.
//!
//! Every tensor produced along the way stays on the run's tape, so the cumulative case count
//! after any step can be differentiated against each `log_beta`.
//!
//! A `Simulation` can be driven directly with `run`, or through a `Context` with
//! `ContextSimulationExt::run_simulation`, which schedules each step as a plan and writes a
//! `CasesReport` row per step when that report has been registered.

use std::collections::BTreeSet;

use log::{debug, info, trace};
use rand::Rng;

use crate::agent_state::AgentState;
use crate::context::Context;
use crate::define_data_plugin;
use crate::define_rng;
use crate::error::SimError;
use crate::infection_passing::InfectionPassing;
use crate::infection_sampler::InfectionSampler;
use crate::infection_seed::{infect_fraction_of_people, infect_people_at_indices};
use crate::interaction_graph::InteractionGraph;
use crate::parameters::{ContextParametersExt, Parameters, SeedConfig};
use crate::policies::Policies;
use crate::random::ContextRandomExt;
use crate::report::{CasesReport, ContextReportExt};
use crate::symptoms::{StageAdvancer, SymptomsUpdater};
use crate::tensor::{Tape, Tensor};
use crate::timer::Timer;
use crate::transmission::{MaxInfectiousnessTransmission, TransmissionUpdater};
use crate::venue::VenueType;
use crate::world::World;

define_rng!(SeedingRng);
define_rng!(InfectionRng);

/// What happened during one step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Start of the step, in days.
    pub time: f64,
    pub step: usize,
    pub day: usize,
    pub active_venue_types: Vec<VenueType>,
    /// `[1, n_agents]`, 1.0 for agents infected during the step.
    pub new_infected: Tensor,
    /// `[1, 1]` cumulative infected count after the step.
    pub cases: Tensor,
}

impl StepOutcome {
    #[must_use]
    pub fn new_infections(&self) -> f64 {
        self.new_infected.values().iter().sum()
    }

    #[must_use]
    pub fn total_infected(&self) -> f64 {
        self.cases.values()[0]
    }

    #[must_use]
    pub fn report(&self) -> CasesReport {
        CasesReport {
            time: self.time,
            step: self.step,
            active_venue_types: self
                .active_venue_types
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(";"),
            new_infections: self.new_infections(),
            total_infected: self.total_infected(),
        }
    }
}

/// Results of a complete run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// `[1, steps]` cumulative infected count after each step.
    pub cases_per_step: Tensor,
    /// New infections per simulated day, indexed by day.
    pub daily_cases: Vec<f64>,
}

impl RunOutcome {
    #[must_use]
    pub fn steps(&self) -> usize {
        self.cases_per_step.cols()
    }

    /// `[1, 1]` cumulative infected count at the end of the run.
    pub fn final_cases(&self) -> Result<Tensor, SimError> {
        self.cases_per_step.element(0, self.steps() - 1)
    }
}

#[derive(Default)]
struct RunRecorder {
    cases: Vec<Tensor>,
    daily_cases: Vec<f64>,
}

impl RunRecorder {
    fn record(&mut self, outcome: &StepOutcome) {
        if self.daily_cases.len() <= outcome.day {
            self.daily_cases.resize(outcome.day + 1, 0.0);
        }
        self.daily_cases[outcome.day] += outcome.new_infections();
        self.cases.push(outcome.cases.clone());
    }

    fn finish(self) -> Result<RunOutcome, SimError> {
        let steps = self.cases.len();
        let cases_per_step = Tensor::vstack(&self.cases)?.reshape(1, steps)?;
        Ok(RunOutcome {
            cases_per_step,
            daily_cases: self.daily_cases,
        })
    }
}

pub struct Simulation {
    state: AgentState,
    graph: InteractionGraph,
    passing: InfectionPassing,
    sampler: InfectionSampler,
    timer: Timer,
    policies: Policies,
    transmission: Box<dyn TransmissionUpdater>,
    symptoms: Box<dyn SymptomsUpdater>,
}

impl Simulation {
    /// Checks that every venue type the timer schedules is in the graph and has a `log_beta`.
    pub fn new(
        state: AgentState,
        graph: InteractionGraph,
        passing: InfectionPassing,
        sampler: InfectionSampler,
        timer: Timer,
    ) -> Result<Simulation, SimError> {
        if graph.n_agents() != state.n_agents() {
            return Err(SimError::ShapeMismatch(format!(
                "graph has {} agents, state has {}",
                graph.n_agents(),
                state.n_agents()
            )));
        }
        let scheduled: BTreeSet<VenueType> = timer.scheduled_venue_types();
        for venue_type in &scheduled {
            if !graph.contains(*venue_type) {
                return Err(SimError::ConfigurationError(format!(
                    "venue type {venue_type} is scheduled but not in the interaction graph"
                )));
            }
            if passing.log_beta(*venue_type).is_none() {
                return Err(SimError::ConfigurationError(format!(
                    "venue type {venue_type} is scheduled but has no log_beta"
                )));
            }
        }
        trace!(
            "simulation over {} agents, {} variants, venue types {scheduled:?}",
            state.n_agents(),
            state.n_variants()
        );
        Ok(Simulation {
            state,
            graph,
            passing,
            sampler,
            timer,
            policies: Policies::default(),
            transmission: Box::new(MaxInfectiousnessTransmission),
            symptoms: Box::new(StageAdvancer),
        })
    }

    /// Builds every component from `parameters` and `world` on `tape`.
    pub fn from_parameters(
        tape: &Tape,
        parameters: &Parameters,
        world: World,
    ) -> Result<Simulation, SimError> {
        parameters.validate()?;
        let (state, graph) = world.into_parts(tape, &parameters.variants, parameters.reduction)?;
        let passing = InfectionPassing::new(tape, &parameters.log_betas()?)?;
        let sampler = InfectionSampler::new(parameters.sampler, parameters.temperature)?;
        let timer = Timer::from_config(&parameters.timer)?;
        let policies = Policies::from_config(&parameters.policies, timer.initial_day())?;
        Ok(Simulation::new(state, graph, passing, sampler, timer)?.with_policies(policies))
    }

    #[must_use]
    pub fn with_policies(mut self, policies: Policies) -> Simulation {
        self.policies = policies;
        self
    }

    #[must_use]
    pub fn with_transmission(mut self, transmission: Box<dyn TransmissionUpdater>) -> Simulation {
        self.transmission = transmission;
        self
    }

    #[must_use]
    pub fn with_symptoms(mut self, symptoms: Box<dyn SymptomsUpdater>) -> Simulation {
        self.symptoms = symptoms;
        self
    }

    #[must_use]
    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }

    #[must_use]
    pub fn graph(&self) -> &InteractionGraph {
        &self.graph
    }

    #[must_use]
    pub fn passing(&self) -> &InfectionPassing {
        &self.passing
    }

    #[must_use]
    pub fn sampler(&self) -> &InfectionSampler {
        &self.sampler
    }

    #[must_use]
    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    #[must_use]
    pub fn policies(&self) -> &Policies {
        &self.policies
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.timer.is_finished()
    }

    /// Places the initial infections. For fraction seeding, returns the `[1, 1]` fraction
    /// variable so the caller can differentiate against it.
    pub fn seed_infections<R: Rng>(
        &mut self,
        seed: &SeedConfig,
        rng: &mut R,
    ) -> Result<Option<Tensor>, SimError> {
        match seed {
            SeedConfig::Indices(indices) => {
                infect_people_at_indices(&mut self.state, indices)?;
                Ok(None)
            }
            SeedConfig::Fraction(fraction) => {
                let fraction = self.state.tape().scalar_variable(*fraction);
                infect_fraction_of_people(
                    &mut self.state,
                    &fraction,
                    self.timer.now(),
                    self.sampler.temperature(),
                    rng,
                )?;
                Ok(Some(fraction))
            }
            SeedConfig::Districts(_) => Err(SimError::ConfigurationError(
                "seeding by district is not supported".to_string(),
            )),
        }
    }

    /// Runs the current step and advances the timer.
    ///
    /// # Errors
    ///
    /// `SimError` if the timer has already finished, or any error from the step's
    /// components. On error the timer is not advanced, but state updates made by the
    /// components that ran before the failing one are kept.
    pub fn step<R: Rng>(&mut self, rng: &mut R) -> Result<StepOutcome, SimError> {
        if self.timer.is_finished() {
            return Err(SimError::SimError(format!(
                "the run ended at day {}",
                self.timer.total_days()
            )));
        }
        let time = self.timer.now();
        let step = self.timer.step();
        let day = self.timer.day();
        let active = self.timer.active_venue_types().to_vec();

        let modifiers = self.policies.modifiers(time, self.state.n_agents())?;
        let transmission = self.transmission.transmission(&self.state, time)?;
        self.state.set_transmission(transmission)?;
        let probs = self
            .passing
            .not_infected_probs(&self.state, &self.graph, &active, &modifiers)?;
        let sampled = self.sampler.sample(&probs, rng)?;
        self.state
            .infect_people(time, &sampled.infected, &sampled.variant)?;
        self.symptoms.update(&mut self.state, time)?;

        let outcome = StepOutcome {
            time,
            step,
            day,
            active_venue_types: active,
            new_infected: sampled.infected,
            cases: self.state.cases(),
        };
        debug!(
            "step {step} (t={time:.3}, {:?}): {} new infections, {} infected",
            outcome.active_venue_types,
            outcome.new_infections(),
            outcome.total_infected()
        );
        self.timer.next();
        Ok(outcome)
    }

    /// Steps until the timer finishes.
    pub fn run<R: Rng>(&mut self, rng: &mut R) -> Result<RunOutcome, SimError> {
        if self.timer.is_finished() {
            return Err(SimError::SimError("the simulation has already finished".to_string()));
        }
        let mut recorder = RunRecorder::default();
        while !self.timer.is_finished() {
            let outcome = self.step(rng)?;
            recorder.record(&outcome);
        }
        let outcome = recorder.finish()?;
        info!(
            "run finished after {} steps: {} infected",
            outcome.steps(),
            self.state.cases().values()[0]
        );
        Ok(outcome)
    }
}

struct SimulationData {
    simulation: Option<Simulation>,
    recorder: RunRecorder,
    error: Option<SimError>,
}

define_data_plugin!(
    SimulationPlugin,
    SimulationData,
    SimulationData {
        simulation: None,
        recorder: RunRecorder::default(),
        error: None,
    }
);

pub trait ContextSimulationExt {
    fn set_simulation(&mut self, simulation: Simulation);

    /// Builds the simulation from the loaded parameters and `world`, and seeds the random
    /// streams with the parameters' seed.
    fn build_simulation(&mut self, tape: &Tape, world: World) -> Result<(), SimError>;

    fn get_simulation(&self) -> Option<&Simulation>;

    fn take_simulation(&mut self) -> Option<Simulation>;

    /// Applies the `seed_infections` entry of the loaded parameters, if any, drawing from the
    /// seeding stream.
    ///
    /// # Panics
    ///
    /// Panics if the random streams were never initialized (see `build_simulation`).
    fn seed_infections(&mut self) -> Result<Option<Tensor>, SimError>;

    /// Schedules every remaining step as a plan at its start time and executes the context.
    /// Writes a `CasesReport` row per step if that report was added.
    ///
    /// # Panics
    ///
    /// Panics if the random streams were never initialized (see `build_simulation`).
    fn run_simulation(&mut self) -> Result<RunOutcome, SimError>;
}

fn take_simulation_or_err(context: &mut Context) -> Result<Simulation, SimError> {
    context
        .get_data_container_mut(SimulationPlugin)
        .simulation
        .take()
        .ok_or_else(|| SimError::SimError("no simulation has been set".to_string()))
}

fn run_step(context: &mut Context) {
    let result = take_simulation_or_err(context).and_then(|mut simulation| {
        let outcome = context.sample(InfectionRng, |rng| simulation.step(rng));
        let next_time = (!simulation.is_finished()).then(|| simulation.timer().now());
        context.get_data_container_mut(SimulationPlugin).simulation = Some(simulation);
        let outcome = outcome?;

        if context.has_report::<CasesReport>() {
            context.send_report(outcome.report())?;
        }
        context
            .get_data_container_mut(SimulationPlugin)
            .recorder
            .record(&outcome);
        if let Some(time) = next_time {
            context.add_plan(time, run_step);
        }
        Ok(())
    });
    if let Err(e) = result {
        context.get_data_container_mut(SimulationPlugin).error = Some(e);
        context.shutdown();
    }
}

impl ContextSimulationExt for Context {
    fn set_simulation(&mut self, simulation: Simulation) {
        self.get_data_container_mut(SimulationPlugin).simulation = Some(simulation);
    }

    fn build_simulation(&mut self, tape: &Tape, world: World) -> Result<(), SimError> {
        let parameters = self.get_parameters()?;
        let seed = parameters.seed;
        let simulation = Simulation::from_parameters(tape, parameters, world)?;
        self.init_random(seed);
        self.set_simulation(simulation);
        Ok(())
    }

    fn get_simulation(&self) -> Option<&Simulation> {
        self.get_data_container(SimulationPlugin)
            .and_then(|data| data.simulation.as_ref())
    }

    fn take_simulation(&mut self) -> Option<Simulation> {
        self.get_data_container_mut(SimulationPlugin).simulation.take()
    }

    fn seed_infections(&mut self) -> Result<Option<Tensor>, SimError> {
        let Some(seed) = self.get_parameters()?.seed_infections.clone() else {
            return Ok(None);
        };
        let mut simulation = take_simulation_or_err(self)?;
        let result = self.sample(SeedingRng, |rng| simulation.seed_infections(&seed, rng));
        self.set_simulation(simulation);
        result
    }

    fn run_simulation(&mut self) -> Result<RunOutcome, SimError> {
        let start = match self.get_simulation() {
            Some(simulation) if simulation.is_finished() => {
                return Err(SimError::SimError("the simulation has already finished".to_string()))
            }
            Some(simulation) => simulation.timer().now(),
            None => return Err(SimError::SimError("no simulation has been set".to_string())),
        };
        let data = self.get_data_container_mut(SimulationPlugin);
        data.recorder = RunRecorder::default();
        data.error = None;

        self.add_plan(start.max(self.get_current_time()), run_step);
        self.execute();

        let data = self.get_data_container_mut(SimulationPlugin);
        if let Some(e) = data.error.take() {
            return Err(e);
        }
        let outcome = std::mem::take(&mut data.recorder).finish()?;
        info!("run finished after {} steps", outcome.steps());
        Ok(outcome)
    }
}
