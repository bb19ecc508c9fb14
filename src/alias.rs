//! Alias state of an instance's primary interface.
//!
//! Reads and writes go through the control plane, so they work for any
//! instance in the project, not only the local one.  Writes always replace
//! the whole alias list of nic0 and are guarded by the interface
//! fingerprint.

use tracing::{debug, info};

use crate::compute::types::{AliasAssignment, InstanceRef, NetworkInterface, NetworkInterfacePatch};
use crate::compute::{ComputeApi, PRIMARY_INTERFACE};
use crate::errors::AgentError;
use crate::waiter::OperationWaiter;

pub struct AliasRepository<'a> {
    compute: &'a dyn ComputeApi,
    waiter: OperationWaiter<'a>,
}

impl<'a> AliasRepository<'a> {
    pub fn new(compute: &'a dyn ComputeApi, waiter: OperationWaiter<'a>) -> Self {
        Self { compute, waiter }
    }

    async fn primary_interface(&self, instance: &InstanceRef) -> Result<NetworkInterface, AgentError> {
        let resource = self.compute.get_instance(instance).await?;
        resource
            .network_interfaces
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Provider {
                context: format!("get instance {}", instance.name),
                status: None,
                message: format!("{} has no network interfaces", instance.name),
            })
    }

    /// First alias range of the first interface, `None` when there is none.
    pub async fn get_alias(&self, instance: &InstanceRef) -> Result<Option<String>, AgentError> {
        let iface = self.primary_interface(instance).await?;
        Ok(iface
            .alias_ip_ranges
            .into_iter()
            .next()
            .map(|range| range.ip_cidr_range))
    }

    /// Replace the alias list of `instance` and wait for the change to land.
    ///
    /// `cidr: None` clears every alias. The fingerprint is read fresh for
    /// each call; a concurrent change between that read and the write makes
    /// the provider reject the update, which is returned as is.
    pub async fn set_alias(
        &self,
        instance: &InstanceRef,
        cidr: Option<&str>,
        range_name: Option<&str>,
    ) -> Result<(), AgentError> {
        let fingerprint = self
            .primary_interface(instance)
            .await?
            .fingerprint
            .ok_or_else(|| AgentError::Provider {
                context: format!("get instance {}", instance.name),
                status: None,
                message: format!("{} interface has no fingerprint", instance.name),
            })?;

        let assignment = AliasAssignment {
            cidr: cidr.map(str::to_string),
            range_name: range_name.map(str::to_string),
        };
        let patch = NetworkInterfacePatch {
            alias_ip_ranges: assignment.to_ranges(),
            fingerprint,
        };

        debug!(
            "Setting alias ranges of {} to {:?}",
            instance, patch.alias_ip_ranges
        );
        let operation = self
            .compute
            .update_network_interface(instance, PRIMARY_INTERFACE, patch)
            .await?;
        self.waiter
            .wait(&instance.project, &instance.zone, &operation)
            .await?;

        match cidr {
            Some(cidr) => info!("Attached {} to {}", cidr, instance.name),
            None => info!("Removed all alias IP addresses from {}", instance.name),
        }
        Ok(())
    }
}
