//! Named, independently seeded random number streams held by `Context`.
//!
//! Each stream is declared with `define_rng!` and seeded from the run's base seed plus a hash of
//! the stream name, so adding draws to one stream never shifts the draws of another. The
//! simulation uses one stream for seeding infections and another for the per-step Gumbel or
//! logistic noise.

mod context_ext;
mod macros;

use std::any::{Any, TypeId};
use std::cell::RefCell;

pub use context_ext::ContextRandomExt;

use crate::define_data_plugin;
use crate::HashMap;
use rand::SeedableRng;

pub trait RngId: Copy + Clone {
    type RngType: SeedableRng;
    fn get_name() -> &'static str;
}

struct RngHolder {
    rng: Box<dyn Any>,
}

struct RngData {
    base_seed: u64,
    rng_holders: RefCell<HashMap<TypeId, RngHolder>>,
}

// `rng_holders` sits in a RefCell so a stream can be advanced through `&Context`.
define_data_plugin!(
    RngPlugin,
    RngData,
    RngData {
        base_seed: 0,
        rng_holders: RefCell::new(HashMap::default()),
    }
);
