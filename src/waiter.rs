//! Completion of asynchronous control-plane operations.
//!
//! Every write to an instance returns a zonal operation.  The waiter polls
//! it at a fixed interval until it reports DONE.  There is deliberately no
//! deadline here: the resource manager's action timeout bounds the run.

use std::time::Duration;

use tracing::debug;

use crate::compute::types::Operation;
use crate::compute::ComputeApi;
use crate::errors::AgentError;

/// Interval between two status reads of the same operation.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Polls zonal operations until they finish.
pub struct OperationWaiter<'a> {
    compute: &'a dyn ComputeApi,
    interval: Duration,
}

impl<'a> OperationWaiter<'a> {
    pub fn new(compute: &'a dyn ComputeApi, interval: Duration) -> Self {
        Self { compute, interval }
    }

    /// Block until `operation` is DONE.
    ///
    /// A DONE operation that carries errors fails with
    /// [`AgentError::Operation`].
    pub async fn wait(
        &self,
        project: &str,
        zone: &str,
        operation: &Operation,
    ) -> Result<(), AgentError> {
        let mut polls = 0u32;
        loop {
            let current = self
                .compute
                .get_zone_operation(project, zone, &operation.name)
                .await?;
            polls += 1;

            if current.is_done() {
                if let Some(message) = current.error_message() {
                    return Err(AgentError::Operation {
                        name: current.name,
                        message,
                    });
                }
                debug!("Operation {} done after {} polls", current.name, polls);
                return Ok(());
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}
