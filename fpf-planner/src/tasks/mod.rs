//! Task queue surface
//!
//! Phases and batch jobs run as named tasks on an in-process broker. The
//! names in [`names`] are what other services enqueue.

pub mod beat;
pub mod broker;
pub mod dispatch;
pub mod handlers;
pub mod names;
pub mod registry;

pub use beat::{schedules, Beat, Schedule};
pub use broker::{Broker, BrokerError, LocalBroker, TaskRecord, TaskSignature, TaskStatus};
pub use dispatch::{canvas_steps, Capabilities, DispatchError, DispatchMode, Dispatched, Dispatcher, RunParams, Strategy};
pub use handlers::register_all;
pub use registry::{TaskContext, TaskHandler, TaskRegistry, WorkerContext};
