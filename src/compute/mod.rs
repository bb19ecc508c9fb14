//! Compute Engine control plane.
//!
//! The [`ComputeApi`] trait covers the handful of REST calls the agent
//! makes.  [`client::HttpComputeClient`] talks to the real API; the
//! test-only `memory` module keeps an in-process model of a project.
//! Paging over the aggregated instance listing is shared by both and lives
//! here.

pub mod auth;
pub mod client;
#[cfg(test)]
pub mod memory;
pub mod types;

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use crate::errors::AgentError;
use self::types::{AggregatedInstanceList, Instance, InstanceRef, NetworkInterfacePatch, Operation};

/// Interface every alias change is made on.
pub const PRIMARY_INTERFACE: &str = "nic0";

/// Control-plane calls used by the agent.
pub trait ComputeApi: Send + Sync {
    /// `instances.get`
    fn get_instance(
        &self,
        instance: &InstanceRef,
    ) -> Pin<Box<dyn Future<Output = Result<Instance, AgentError>> + Send + '_>>;

    /// `instances.updateNetworkInterface`; returns the operation handle.
    fn update_network_interface(
        &self,
        instance: &InstanceRef,
        interface: &str,
        patch: NetworkInterfacePatch,
    ) -> Pin<Box<dyn Future<Output = Result<Operation, AgentError>> + Send + '_>>;

    /// `zoneOperations.get`
    fn get_zone_operation(
        &self,
        project: &str,
        zone: &str,
        operation: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Operation, AgentError>> + Send + '_>>;

    /// One page of `instances.aggregatedList`.
    fn list_instances_page(
        &self,
        project: &str,
        filter: Option<&str>,
        page_token: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<AggregatedInstanceList, AgentError>> + Send + '_>>;
}

/// Name and zone of one enumerated instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedInstance {
    pub name: String,
    pub zone: String,
}

/// Walk every page of the aggregated listing, in provider order.
async fn for_each_instance<F>(
    api: &dyn ComputeApi,
    project: &str,
    filter: Option<&str>,
    mut visit: F,
) -> Result<(), AgentError>
where
    F: FnMut(&Instance) -> bool,
{
    let mut page_token: Option<String> = None;
    loop {
        let page = api
            .list_instances_page(project, filter, page_token.as_deref())
            .await?;
        for instance in page.instances() {
            if !visit(instance) {
                return Ok(());
            }
        }
        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => return Ok(()),
        }
    }
}

/// Every instance in `project` except `exclude`.
pub async fn list_all_instances(
    api: &dyn ComputeApi,
    project: &str,
    exclude: &str,
) -> Result<Vec<ListedInstance>, AgentError> {
    let mut found = Vec::new();
    for_each_instance(api, project, None, |instance| {
        if instance.name != exclude {
            found.push(ListedInstance {
                name: instance.name.clone(),
                zone: instance.zone_name().to_string(),
            });
        }
        true
    })
    .await?;
    debug!("Enumerated {} peer instances in {}", found.len(), project);
    Ok(found)
}

/// Zone of the instance called `name`.
pub async fn find_instance(
    api: &dyn ComputeApi,
    project: &str,
    name: &str,
) -> Result<String, AgentError> {
    let filter = format!("name=\"{name}\"");
    let mut zone = None;
    for_each_instance(api, project, Some(&filter), |instance| {
        if instance.name == name {
            zone = Some(instance.zone_name().to_string());
            return false;
        }
        true
    })
    .await?;
    zone.ok_or_else(|| AgentError::Provider {
        context: format!("find instance {name}"),
        status: None,
        message: format!("Unable to find instance {name}"),
    })
}
