//! A JSON description of the population and its venues.
//!
//! ```json
//! {
//!   "agents": [{"age": 34, "sex": "female"}, {"age": 8, "sex": "male"}],
//!   "venues": {"household": {"people": [2]}, "school": {"people": [1]}},
//!   "memberships": {"household": [[0, 0], [1, 0]], "school": [[1, 0]]}
//! }
//! ```
//!
//! `people` lists the head count of each venue, so its length is the number of venues of
//! that type. Memberships are `[agent, venue]` pairs.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::{info, warn};
use serde::Deserialize;

use crate::agent_state::{AgentState, InfectionParameters, Sex, VariantParameters};
use crate::error::SimError;
use crate::interaction_graph::{InteractionGraph, Reduction};
use crate::tensor::Tape;
use crate::venue::{VenueTable, VenueType, Venues};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentRecord {
    pub age: u8,
    #[serde(default)]
    pub sex: Sex,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VenueRecord {
    pub people: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct World {
    pub agents: Vec<AgentRecord>,
    #[serde(default)]
    pub venues: BTreeMap<VenueType, VenueRecord>,
    #[serde(default)]
    pub memberships: BTreeMap<VenueType, Vec<(usize, usize)>>,
}

impl World {
    pub fn from_json_str(json: &str) -> Result<World, SimError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<World, SimError> {
        let reader = BufReader::new(File::open(path)?);
        let world: World = serde_json::from_reader(reader)?;
        info!(
            "loaded world from {}: {} agents, {} venue types",
            path.display(),
            world.agents.len(),
            world.venues.len()
        );
        Ok(world)
    }

    #[must_use]
    pub fn n_agents(&self) -> usize {
        self.agents.len()
    }

    /// Venue tables keyed by type.
    #[must_use]
    pub fn venue_tables(&self) -> Venues {
        self.venues
            .iter()
            .map(|(&venue_type, record)| {
                let mut table = VenueTable::with_count(record.people.len());
                table.people.clone_from(&record.people);
                (venue_type, table)
            })
            .collect()
    }

    /// Builds a fully susceptible population and its interaction graph.
    ///
    /// Every membership type must have a venue table, and every pair must name an existing
    /// agent and venue.
    pub fn into_parts(
        self,
        tape: &Tape,
        variants: &[VariantParameters],
        reduction: Reduction,
    ) -> Result<(AgentState, InteractionGraph), SimError> {
        let n_agents = self.n_agents();
        let venues = self.venue_tables();

        let mut graph = InteractionGraph::new(n_agents, reduction);
        for (venue_type, table) in &venues {
            let edges = self.memberships.get(venue_type).cloned().unwrap_or_default();
            graph.add_venue_type(*venue_type, table.len(), edges)?;

            if let Some(members) = graph.members_per_venue(*venue_type) {
                if members != table.people.as_slice() {
                    warn!("{venue_type} head counts differ from the memberships");
                }
            }
        }
        if let Some(venue_type) = self
            .memberships
            .keys()
            .find(|venue_type| !venues.contains_key(venue_type))
        {
            return Err(SimError::ShapeMismatch(format!(
                "memberships given for {venue_type} but the world has no {venue_type} venues"
            )));
        }

        let (age, sex) = self.agents.iter().map(|agent| (agent.age, agent.sex)).unzip();
        let state = AgentState::new(
            tape,
            age,
            sex,
            InfectionParameters::from_variants(variants, n_agents),
        )?;
        Ok((state, graph))
    }
}
