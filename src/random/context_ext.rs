use std::any::TypeId;
use std::cell::RefMut;

use log::trace;
use rand::SeedableRng;

use crate::context::Context;
use crate::hashing::hash_str;
use crate::random::{RngHolder, RngId, RngPlugin};

/// Gets the generator for `R`, creating it from the base seed on first use.
///
/// # Panics
///
/// Panics if `init_random` has not been called or the stream is already borrowed.
fn get_rng<R: RngId + 'static>(context: &Context) -> RefMut<R::RngType> {
    let data_container = context
        .get_data_container(RngPlugin)
        .expect("You must initialize the random number generator with a base seed");

    let rng_holders = data_container.rng_holders.borrow_mut();
    RefMut::map(rng_holders, |holders| {
        holders
            .entry(TypeId::of::<R>())
            .or_insert_with(|| {
                trace!(
                    "creating new RNG {} (seed={})",
                    R::get_name(),
                    data_container.base_seed
                );
                let seed_offset = hash_str(R::get_name());
                RngHolder {
                    rng: Box::new(R::RngType::seed_from_u64(
                        data_container.base_seed.wrapping_add(seed_offset),
                    )),
                }
            })
            .rng
            .downcast_mut::<R::RngType>()
            .expect("RNG holder has the wrong type")
    })
}

pub trait ContextRandomExt {
    /// Sets the base seed and discards any existing streams so they are re-seeded lazily.
    fn init_random(&mut self, base_seed: u64);

    /// Runs `sampler` against the stream named by `R`.
    ///
    /// # Panics
    ///
    /// Panics if `init_random` has not been called.
    fn sample<R: RngId + 'static, T>(
        &self,
        rng_id: R,
        sampler: impl FnOnce(&mut R::RngType) -> T,
    ) -> T;
}

impl ContextRandomExt for Context {
    fn init_random(&mut self, base_seed: u64) {
        trace!("initializing random module with seed {base_seed}");
        let data_container = self.get_data_container_mut(RngPlugin);
        data_container.base_seed = base_seed;
        data_container.rng_holders.borrow_mut().clear();
    }

    fn sample<R: RngId + 'static, T>(
        &self,
        _rng_id: R,
        sampler: impl FnOnce(&mut R::RngType) -> T,
    ) -> T {
        let mut rng = get_rng::<R>(self);
        sampler(&mut rng)
    }
}

#[cfg(test)]
mod test {
    use rand::RngCore;

    use crate::context::Context;
    use crate::define_rng;
    use crate::random::ContextRandomExt;

    define_rng!(FooRng);
    define_rng!(BarRng);

    #[test]
    fn streams_advance() {
        let mut context = Context::new();
        context.init_random(42);

        assert_ne!(
            context.sample(FooRng, RngCore::next_u64),
            context.sample(FooRng, RngCore::next_u64)
        );
    }

    #[test]
    fn streams_are_independent() {
        let mut context = Context::new();
        context.init_random(42);

        assert_ne!(
            context.sample(FooRng, RngCore::next_u64),
            context.sample(BarRng, RngCore::next_u64)
        );
    }

    #[test]
    fn reset_seed() {
        let mut context = Context::new();
        context.init_random(42);

        let run_0 = context.sample(FooRng, RngCore::next_u64);
        let run_1 = context.sample(FooRng, RngCore::next_u64);

        context.init_random(42);
        assert_eq!(run_0, context.sample(FooRng, RngCore::next_u64));
        assert_eq!(run_1, context.sample(FooRng, RngCore::next_u64));

        context.init_random(88);
        assert_ne!(run_0, context.sample(FooRng, RngCore::next_u64));
    }

    #[test]
    #[should_panic(expected = "You must initialize the random number generator")]
    fn sample_without_seed_panics() {
        let context = Context::new();
        context.sample(FooRng, RngCore::next_u64);
    }
}
