//! Venue types and the per-type venue tables.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::error::SimError;

/// A category of place where agents meet. Each type carries its own transmission coefficient.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VenueType {
    Household,
    School,
    Company,
    Leisure,
    CareHome,
    University,
}

impl VenueType {
    /// Parses a venue type name, reporting unknown names as a configuration error.
    pub fn from_name(name: &str) -> Result<VenueType, SimError> {
        VenueType::from_str(name)
            .map_err(|_| SimError::ConfigurationError(format!("unknown venue type '{name}'")))
    }
}

/// The venues of one type: their ids and, optionally, a per-venue head count hint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VenueTable {
    pub ids: Vec<usize>,
    pub people: Vec<usize>,
}

impl VenueTable {
    /// A table of `n_venues` venues with ids `0..n_venues`.
    #[must_use]
    pub fn with_count(n_venues: usize) -> VenueTable {
        VenueTable {
            ids: (0..n_venues).collect(),
            people: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// All venue tables keyed by type, in a fixed iteration order.
pub type Venues = BTreeMap<VenueType, VenueTable>;

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn names_round_trip_through_parsing() {
        for venue_type in VenueType::iter() {
            let name: &str = venue_type.as_ref();
            assert_eq!(VenueType::from_name(name).unwrap(), venue_type);
            assert_eq!(venue_type.to_string(), name);
        }
        let name: &str = VenueType::CareHome.as_ref();
        assert_eq!(name, "care_home");
    }

    #[test]
    fn unknown_name_is_configuration_error() {
        assert!(matches!(
            VenueType::from_name("stadium"),
            Err(SimError::ConfigurationError(_))
        ));
    }

    #[test]
    fn table_with_count() {
        let table = VenueTable::with_count(3);
        assert_eq!(table.ids, vec![0, 1, 2]);
        assert_eq!(table.len(), 3);
        assert!(VenueTable::default().is_empty());
    }
}
