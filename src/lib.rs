//! vipmove: floating alias IP resource agent for Compute Engine clusters.
//!
//! Moves a single alias IP range between the members of a cluster by
//! rewriting their network interfaces through the compute control plane.
//! A cluster resource manager drives it through the `start`, `stop` and
//! `monitor` verbs; each run observes the current state from scratch and
//! converges it.

use std::sync::Arc;
use std::time::Duration;

pub mod agent;
pub mod alias;
pub mod compute;
pub mod config;
pub mod errors;
#[cfg(test)]
mod loopback;
pub mod metadata;
pub mod protocol;
pub mod waiter;
pub mod xml;

use crate::alias::AliasRepository;
use crate::compute::client::HttpComputeClient;
use crate::compute::types::InstanceRef;
use crate::compute::ComputeApi;
use crate::config::Config;
use crate::errors::AgentError;
use crate::metadata::{HttpMetadataSource, LocalIdentity, MetadataReader, MetadataSource};
use crate::waiter::{OperationWaiter, DEFAULT_POLL_INTERVAL};

/// Everything one invocation needs, resolved once at start and passed by
/// reference to every component.
pub struct AgentContext {
    /// Resource parameters.
    pub config: Config,
    /// Name, zone and project of the instance this process runs on.
    pub identity: LocalIdentity,
    /// Local metadata server.
    pub metadata: MetadataReader,
    /// Authenticated control-plane handle.
    pub compute: Arc<dyn ComputeApi>,
    /// Interval between operation status reads.
    pub poll_interval: Duration,
}

impl AgentContext {
    /// Connect to the real metadata server and compute API.
    ///
    /// Credential and identity failures come back as configuration errors.
    pub async fn connect(config: Config) -> Result<Self, AgentError> {
        let compute = HttpComputeClient::connect(&config.credentials_path)?;
        let metadata = HttpMetadataSource::new()?;
        Self::with_backends(
            config,
            Arc::new(metadata),
            Arc::new(compute),
            DEFAULT_POLL_INTERVAL,
        )
        .await
    }

    /// Build a context over the given backends, resolving the local identity.
    pub async fn with_backends(
        config: Config,
        metadata: Arc<dyn MetadataSource>,
        compute: Arc<dyn ComputeApi>,
        poll_interval: Duration,
    ) -> Result<Self, AgentError> {
        let metadata = MetadataReader::new(metadata);
        let identity = metadata.identity().await?;
        Ok(Self {
            config,
            identity,
            metadata,
            compute,
            poll_interval,
        })
    }

    /// The local instance as a control-plane reference.
    pub fn local_instance(&self) -> InstanceRef {
        InstanceRef::new(
            &self.identity.project,
            &self.identity.zone,
            &self.identity.name,
        )
    }

    /// Alias repository over this context's control plane.
    pub fn aliases(&self) -> AliasRepository<'_> {
        let compute = self.compute.as_ref();
        AliasRepository::new(compute, OperationWaiter::new(compute, self.poll_interval))
    }
}
