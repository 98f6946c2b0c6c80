//! Work deduplication
//!
//! Identical requests that miss the cache while a computation for the same
//! task description is already running are attached to that computation
//! instead of launching a second one. Its events are replayed to every
//! attached caller.
//!
//! Per key: no entry -> in flight -> retired on the terminal event. After
//! retirement the next request starts a fresh computation.

mod fanout;
mod registry;

pub use fanout::FanOut;
pub use registry::{InFlightTask, Registration, TaskRegistry};
