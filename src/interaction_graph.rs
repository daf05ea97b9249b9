//! The bipartite agent-venue graph and the two message-passing primitives over it.
//!
//! For every venue type the graph stores one undirected edge per (agent, venue) membership.
//! `scatter_to_venues` aggregates agent values into their venues and `gather_to_agents`
//! hands venue values back to the members. Both are tensor ops, so gradients flow through
//! them.

use std::collections::BTreeMap;
use std::rc::Rc;

use log::{trace, warn};
use serde::Deserialize;

use crate::error::SimError;
use crate::tensor::Tensor;
use crate::venue::VenueType;

/// How agent values combine at a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    #[default]
    Sum,
    Mean,
}

#[derive(Debug, Clone)]
struct VenueMembership {
    n_venues: usize,
    /// Edge endpoints, sorted by (venue, agent).
    agents: Rc<[usize]>,
    venues: Rc<[usize]>,
    members_per_venue: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct InteractionGraph {
    n_agents: usize,
    reduction: Reduction,
    memberships: BTreeMap<VenueType, VenueMembership>,
}

impl InteractionGraph {
    #[must_use]
    pub fn new(n_agents: usize, reduction: Reduction) -> InteractionGraph {
        InteractionGraph {
            n_agents,
            reduction,
            memberships: BTreeMap::new(),
        }
    }

    /// Registers `n_venues` venues of `venue_type` with their (agent, venue) memberships.
    ///
    /// Duplicate edges are dropped. An agent may belong to at most one venue of each type.
    pub fn add_venue_type(
        &mut self,
        venue_type: VenueType,
        n_venues: usize,
        edges: impl IntoIterator<Item = (usize, usize)>,
    ) -> Result<(), SimError> {
        if self.memberships.contains_key(&venue_type) {
            return Err(SimError::ConfigurationError(format!(
                "venue type {venue_type} is already in the graph"
            )));
        }

        let mut pairs = Vec::new();
        for (agent, venue) in edges {
            if agent >= self.n_agents || venue >= n_venues {
                return Err(SimError::ShapeMismatch(format!(
                    "{venue_type} edge ({agent}, {venue}) outside {} agents x {n_venues} venues",
                    self.n_agents
                )));
            }
            pairs.push((venue, agent));
        }
        let before = pairs.len();
        pairs.sort_unstable();
        pairs.dedup();
        if pairs.len() < before {
            warn!(
                "dropped {} duplicate {venue_type} memberships",
                before - pairs.len()
            );
        }

        let mut venue_of_agent: Vec<Option<usize>> = vec![None; self.n_agents];
        let mut members_per_venue = vec![0; n_venues];
        for &(venue, agent) in &pairs {
            if let Some(previous) = venue_of_agent[agent].replace(venue) {
                return Err(SimError::ConfigurationError(format!(
                    "agent {agent} belongs to {venue_type} venues {previous} and {venue}"
                )));
            }
            members_per_venue[venue] += 1;
        }

        trace!(
            "added {venue_type}: {n_venues} venues, {} memberships",
            pairs.len()
        );
        self.memberships.insert(
            venue_type,
            VenueMembership {
                n_venues,
                agents: pairs.iter().map(|&(_, agent)| agent).collect(),
                venues: pairs.iter().map(|&(venue, _)| venue).collect(),
                members_per_venue,
            },
        );
        Ok(())
    }

    #[must_use]
    pub fn n_agents(&self) -> usize {
        self.n_agents
    }

    #[must_use]
    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    #[must_use]
    pub fn contains(&self, venue_type: VenueType) -> bool {
        self.memberships.contains_key(&venue_type)
    }

    pub fn venue_types(&self) -> impl Iterator<Item = VenueType> + '_ {
        self.memberships.keys().copied()
    }

    #[must_use]
    pub fn n_venues(&self, venue_type: VenueType) -> Option<usize> {
        self.memberships.get(&venue_type).map(|m| m.n_venues)
    }

    #[must_use]
    pub fn edge_count(&self, venue_type: VenueType) -> Option<usize> {
        self.memberships.get(&venue_type).map(|m| m.agents.len())
    }

    #[must_use]
    pub fn members_per_venue(&self, venue_type: VenueType) -> Option<&[usize]> {
        self.memberships
            .get(&venue_type)
            .map(|m| m.members_per_venue.as_slice())
    }

    fn membership(&self, venue_type: VenueType) -> Result<&VenueMembership, SimError> {
        self.memberships.get(&venue_type).ok_or_else(|| {
            SimError::ConfigurationError(format!("venue type {venue_type} is not in the graph"))
        })
    }

    /// Aggregates `[rows, n_agents]` agent values into `[rows, n_venues]` venue values.
    pub fn scatter_to_venues(
        &self,
        venue_type: VenueType,
        agent_values: &Tensor,
    ) -> Result<Tensor, SimError> {
        let membership = self.membership(venue_type)?;
        if agent_values.cols() != self.n_agents {
            return Err(SimError::ShapeMismatch(format!(
                "agent values have {} columns for {} agents",
                agent_values.cols(),
                self.n_agents
            )));
        }
        let per_edge = agent_values.gather_cols(&membership.agents)?;
        let load = per_edge.scatter_add_cols(&membership.venues, membership.n_venues)?;
        match self.reduction {
            Reduction::Sum => Ok(load),
            Reduction::Mean => {
                let inverse_sizes = membership
                    .members_per_venue
                    .iter()
                    .map(|&n| 1.0 / n.max(1) as f64)
                    .collect();
                let inverse_sizes =
                    load.tape().constant(1, membership.n_venues, inverse_sizes)?;
                load.mul(&inverse_sizes)
            }
        }
    }

    /// Hands `[rows, n_venues]` venue values to each member agent as `[rows, n_agents]`.
    /// Agents outside every venue of the type receive zero.
    pub fn gather_to_agents(
        &self,
        venue_type: VenueType,
        venue_values: &Tensor,
    ) -> Result<Tensor, SimError> {
        let membership = self.membership(venue_type)?;
        if venue_values.cols() != membership.n_venues {
            return Err(SimError::ShapeMismatch(format!(
                "venue values have {} columns for {} {venue_type} venues",
                venue_values.cols(),
                membership.n_venues
            )));
        }
        let per_edge = venue_values.gather_cols(&membership.venues)?;
        per_edge.scatter_add_cols(&membership.agents, self.n_agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_almost_eq;
    use crate::tensor::Tape;

    fn two_schools() -> InteractionGraph {
        let mut graph = InteractionGraph::new(5, Reduction::Sum);
        graph
            .add_venue_type(VenueType::School, 2, vec![(0, 0), (1, 0), (2, 1), (3, 1)])
            .unwrap();
        graph
    }

    #[test]
    fn scatter_sums_members() {
        let graph = two_schools();
        let tape = Tape::new();
        let x = tape.constant(1, 5, vec![1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        let load = graph.scatter_to_venues(VenueType::School, &x).unwrap();
        assert_eq!(load.values(), &[3.0, 7.0]);

        let back = graph.gather_to_agents(VenueType::School, &load).unwrap();
        // agent 4 is in no school
        assert_eq!(back.values(), &[3.0, 3.0, 7.0, 7.0, 0.0]);
    }

    #[test]
    fn mean_reduction_divides_by_venue_size() {
        let mut graph = InteractionGraph::new(3, Reduction::Mean);
        graph
            .add_venue_type(VenueType::Household, 2, vec![(0, 0), (1, 0)])
            .unwrap();
        let tape = Tape::new();
        let x = tape.constant(1, 3, vec![1.0, 3.0, 9.0]).unwrap();
        let load = graph.scatter_to_venues(VenueType::Household, &x).unwrap();
        assert_almost_eq!(load.get(0, 0), 2.0, 1e-12);
        // empty venue stays at zero
        assert_eq!(load.get(0, 1), 0.0);
    }

    #[test]
    fn duplicate_edges_count_once() {
        let mut graph = InteractionGraph::new(2, Reduction::Sum);
        graph
            .add_venue_type(VenueType::Company, 1, vec![(0, 0), (0, 0), (1, 0)])
            .unwrap();
        assert_eq!(graph.edge_count(VenueType::Company), Some(2));
        assert_eq!(graph.members_per_venue(VenueType::Company), Some(&[2][..]));
    }

    #[test]
    fn agent_in_two_venues_of_one_type_is_rejected() {
        let mut graph = InteractionGraph::new(2, Reduction::Sum);
        let result = graph.add_venue_type(VenueType::School, 2, vec![(0, 0), (0, 1)]);
        assert!(matches!(result, Err(SimError::ConfigurationError(_))));
    }

    #[test]
    fn out_of_range_edges_are_shape_mismatches() {
        let mut graph = InteractionGraph::new(2, Reduction::Sum);
        let result = graph.add_venue_type(VenueType::School, 1, vec![(2, 0)]);
        assert!(matches!(result, Err(SimError::ShapeMismatch(_))));
        let result = graph.add_venue_type(VenueType::School, 1, vec![(0, 1)]);
        assert!(matches!(result, Err(SimError::ShapeMismatch(_))));
    }

    #[test]
    fn unknown_venue_type_and_wrong_width() {
        let graph = two_schools();
        let tape = Tape::new();
        let x = tape.zeros(1, 5);
        assert!(matches!(
            graph.scatter_to_venues(VenueType::Leisure, &x),
            Err(SimError::ConfigurationError(_))
        ));
        let narrow = tape.zeros(1, 4);
        assert!(matches!(
            graph.scatter_to_venues(VenueType::School, &narrow),
            Err(SimError::ShapeMismatch(_))
        ));
        assert!(matches!(
            graph.gather_to_agents(VenueType::School, &narrow),
            Err(SimError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn empty_venue_type_produces_zero_load() {
        let mut graph = InteractionGraph::new(3, Reduction::Sum);
        graph
            .add_venue_type(VenueType::Leisure, 1, Vec::new())
            .unwrap();
        let tape = Tape::new();
        let x = tape.ones(2, 3);
        let load = graph.scatter_to_venues(VenueType::Leisure, &x).unwrap();
        assert_eq!(load.shape(), (2, 1));
        assert_eq!(load.values(), &[0.0, 0.0]);
    }
}
