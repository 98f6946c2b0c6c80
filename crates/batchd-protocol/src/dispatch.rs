//! The work dispatch boundary.

use std::sync::Arc;

use crate::error::WorkError;
use crate::listener::ProgressListener;
use crate::task::Priority;

/// Sends a work packet to something that will execute it.
///
/// `submit` returns once the packet is accepted; the outcome arrives
/// asynchronously through `listener`.
pub trait WorkDispatcher<T>: Send + Sync {
    /// Queue `task` for execution.
    fn submit(
        &self,
        task: T,
        priority: Priority,
        listener: Arc<dyn ProgressListener>,
    ) -> Result<(), WorkError>;
}
