//! The `Context` drives a run: it owns the plan queue, the simulated clock and the data
//! containers that modules register through `define_data_plugin!`.
//!
//! Simulation state that must outlive a single callback (parameters, the running
//! `Simulation`, random number generators, report writers) lives in data plugins. Extension
//! traits such as `ContextParametersExt` or `ContextSimulationExt` provide typed access.

use std::any::{Any, TypeId};

use log::trace;

use crate::plan::Queue;
use crate::HashMap;

/// A type that supplies a data container held by `Context`.
pub trait DataPlugin: Any {
    type DataContainer;

    fn create_data_container() -> Self::DataContainer;
}

/// Defines a new data plugin type along with the initial value of its container.
#[macro_export]
macro_rules! define_data_plugin {
    ($plugin:ident, $data_container:ty, $default: expr) => {
        #[derive(Copy, Clone)]
        struct $plugin;

        impl $crate::context::DataPlugin for $plugin {
            type DataContainer = $data_container;

            fn create_data_container() -> Self::DataContainer {
                $default
            }
        }
    };
}
pub use define_data_plugin;

type Callback = dyn FnOnce(&mut Context);

pub struct Context {
    plan_queue: Queue<Box<Callback>>,
    data_plugins: HashMap<TypeId, Box<dyn Any>>,
    current_time: f64,
    shutdown_requested: bool,
}

impl Context {
    #[must_use]
    pub fn new() -> Context {
        Context {
            plan_queue: Queue::new(),
            data_plugins: HashMap::default(),
            current_time: 0.0,
            shutdown_requested: false,
        }
    }

    /// Schedules `callback` to run at `time`.
    ///
    /// # Panics
    ///
    /// Panics if `time` is not finite or lies in the past.
    pub fn add_plan(&mut self, time: f64, callback: impl FnOnce(&mut Context) + 'static) {
        assert!(
            time.is_finite() && time >= self.current_time,
            "Time is invalid"
        );
        self.plan_queue.add_plan(time, Box::new(callback));
    }

    /// Returns the container for `plugin`, creating it on first access.
    ///
    /// # Panics
    ///
    /// Panics if two plugins share a type id, which cannot happen for types defined with
    /// `define_data_plugin!`.
    pub fn get_data_container_mut<T: DataPlugin>(&mut self, _plugin: T) -> &mut T::DataContainer {
        self.data_plugins
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::create_data_container()))
            .downcast_mut::<T::DataContainer>()
            .expect("data plugin container has the wrong type")
    }

    /// Returns the container for `plugin`, or `None` if nothing has created it yet.
    #[must_use]
    pub fn get_data_container<T: DataPlugin>(&self, _plugin: T) -> Option<&T::DataContainer> {
        self.data_plugins
            .get(&TypeId::of::<T>())
            .and_then(|container| container.downcast_ref::<T::DataContainer>())
    }

    #[must_use]
    pub fn get_current_time(&self) -> f64 {
        self.current_time
    }

    /// Stops `execute` after the current callback returns. Pending plans are discarded.
    pub fn shutdown(&mut self) {
        trace!("shutdown requested at time {}", self.current_time);
        self.shutdown_requested = true;
    }

    /// Runs plans in time order until the queue is empty or `shutdown` is called.
    pub fn execute(&mut self) {
        trace!("entering event loop");
        loop {
            if self.shutdown_requested {
                self.plan_queue.clear();
                break;
            }

            match self.plan_queue.get_next_plan() {
                Some(plan) => {
                    self.current_time = plan.time;
                    (plan.data)(self);
                }
                None => break,
            }
        }
        self.shutdown_requested = false;
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
