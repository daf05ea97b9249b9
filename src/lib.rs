//! A differentiable agent-based epidemic simulator.
//!
//! Agents meet in venues of several types (households, schools, companies, ...). Every step,
//! the infectiousness of infected agents is summed per venue, spread back to the venue's
//! members, and turned into a per-agent probability of escaping infection. New infections are
//! then drawn with a temperature-controlled relaxed sampler whose forward value is hard (an
//! agent is infected or not) but whose gradient flows back to the per-venue-type transmission
//! coefficients `log_beta`. The cumulative case count after any step can therefore be
//! differentiated against every `log_beta`, which is what calibration needs.
//!
//! The central object of a run is the `Context`, which owns
//! * the simulated clock and a queue of plans to execute at future times,
//! * data plugins holding each module's state (parameters, the `Simulation`, random
//!   number streams, report writers).
//!
//! Modules expose their API through extension traits on `Context`:
//! * `ContextParametersExt` loads and validates the JSON parameters,
//! * `ContextSimulationExt` builds the `Simulation`, seeds it and runs it step by step,
//! * `ContextRandomExt` hands out named, reproducible random streams,
//! * `ContextReportExt` writes CSV reports.
//!
//! Differentiable state lives in `tensor::Tensor`s recorded on a `tensor::Tape`; calling
//! `backward` on a `[1, 1]` tensor returns the gradients of every variable on the tape.
pub mod agent_state;
pub mod context;
pub mod error;
pub mod hashing;
pub mod infection_passing;
pub mod infection_sampler;
pub mod infection_seed;
pub mod interaction_graph;
pub mod log;
mod macros;
pub mod numeric;
pub mod parameters;
pub mod plan;
pub mod policies;
pub mod random;
pub mod report;
pub mod runner;
pub mod simulation;
pub mod symptoms;
pub mod tensor;
pub mod timer;
pub mod transmission;
pub mod venue;
pub mod world;

pub use agent_state::{AgentState, InfectionParameters, Sex, VariantParameters};
pub use context::Context;
pub use error::SimError;
pub use hashing::HashMap;
pub use infection_passing::InfectionPassing;
pub use infection_sampler::{InfectionSampler, SampledInfection, SamplerKind};
pub use infection_seed::{infect_fraction_of_people, infect_people_at_indices};
pub use interaction_graph::{InteractionGraph, Reduction};
pub use parameters::{ContextParametersExt, Parameters, SeedConfig};
pub use policies::{Policies, PolicyConfig, StepModifiers};
pub use random::ContextRandomExt;
pub use report::{CasesReport, ContextReportExt, Report};
pub use simulation::{ContextSimulationExt, RunOutcome, Simulation, StepOutcome};
pub use symptoms::{StageAdvancer, SymptomsUpdater};
pub use tensor::{Gradients, Tape, Tensor};
pub use timer::{Timer, TimerConfig};
pub use transmission::{GammaTransmission, MaxInfectiousnessTransmission, TransmissionUpdater};
pub use venue::VenueType;
pub use world::World;

// Re-exported for use in macros
pub use rand;
