//! Ownership transfer of the floating alias.
//!
//! No state survives between runs. Each action observes who holds the
//! alias right now and acts on that, so every action is idempotent and
//! safe to repeat after a crash.
//!
//! At most one instance is expected to hold the alias. `acquire` relies on
//! that: it releases the first peer found holding it and stops looking.
//! A second holder left behind by outside tampering is not cleaned up.

use tracing::info;

use crate::alias::AliasRepository;
use crate::compute::types::InstanceRef;
use crate::compute::{find_instance, list_all_instances};
use crate::errors::AgentError;
use crate::AgentContext;

/// A cluster member to inspect during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRef {
    pub name: String,
    /// Known when the peer came from a live listing.
    pub zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The local instance already held the alias; nothing was changed.
    AlreadyHeld,
    /// The alias was granted to the local instance.
    Acquired {
        /// Peer the alias was taken from, if any held it.
        released_from: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// The local instance did not hold the alias.
    NotHeld,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldState {
    Held,
    NotHeld,
}

/// Acquire / release / check for one alias on behalf of the local instance.
pub struct OwnershipTransfer<'a> {
    ctx: &'a AgentContext,
    aliases: AliasRepository<'a>,
    local: InstanceRef,
}

impl<'a> OwnershipTransfer<'a> {
    pub fn new(ctx: &'a AgentContext) -> Self {
        Self {
            ctx,
            aliases: ctx.aliases(),
            local: ctx.local_instance(),
        }
    }

    /// Make the local instance the only holder of `alias`.
    pub async fn acquire(
        &self,
        alias: &str,
        range_name: Option<&str>,
    ) -> Result<AcquireOutcome, AgentError> {
        let me = &self.local.name;
        let current = self.ctx.metadata.local_alias().await?;

        match current.as_deref() {
            Some(held) if held == alias => {
                info!("{} already has {} attached. No action required", me, alias);
                return Ok(AcquireOutcome::AlreadyHeld);
            }
            Some(other) => {
                info!("Removing {} from {}", other, me);
                self.aliases.set_alias(&self.local, None, None).await?;
            }
            None => {}
        }

        let released_from = self.release_from_peer(alias).await?;

        self.aliases
            .set_alias(&self.local, Some(alias), range_name)
            .await?;

        match self.ctx.metadata.local_alias().await? {
            Some(found) if found == alias => {
                info!("Finished adding {} to {}", alias, me);
                Ok(AcquireOutcome::Acquired { released_from })
            }
            Some(found) => Err(AgentError::AssignmentMismatch {
                instance: me.clone(),
                expected: alias.to_string(),
                found,
            }),
            None => Err(AgentError::AssignmentFailed {
                instance: me.clone(),
                alias: alias.to_string(),
            }),
        }
    }

    /// Peers to scan, in scan order, never including the local instance.
    pub async fn peers(&self) -> Result<Vec<PeerRef>, AgentError> {
        let me = &self.local.name;
        match &self.ctx.config.hostlist {
            Some(hosts) => Ok(hosts
                .iter()
                .filter(|host| *host != me)
                .map(|host| PeerRef {
                    name: host.clone(),
                    zone: None,
                })
                .collect()),
            None => {
                let listed =
                    list_all_instances(self.ctx.compute.as_ref(), &self.local.project, me)
                        .await?;
                Ok(listed
                    .into_iter()
                    .map(|i| PeerRef {
                        name: i.name,
                        zone: Some(i.zone),
                    })
                    .collect())
            }
        }
    }

    /// Strip `alias` from the first peer holding it. Peers are inspected
    /// one at a time; scanning stops at the first holder.
    async fn release_from_peer(&self, alias: &str) -> Result<Option<String>, AgentError> {
        let project = &self.local.project;
        for peer in self.peers().await? {
            let zone = match peer.zone {
                Some(zone) => zone,
                None => find_instance(self.ctx.compute.as_ref(), project, &peer.name).await?,
            };
            let instance = InstanceRef::new(project, zone, &peer.name);
            if self.aliases.get_alias(&instance).await?.as_deref() == Some(alias) {
                info!(
                    "{} is attached to {} - Removing all alias IP addresses from {}",
                    alias, peer.name, peer.name
                );
                self.aliases.set_alias(&instance, None, None).await?;
                return Ok(Some(peer.name));
            }
        }
        info!("No peer holds {}", alias);
        Ok(None)
    }

    /// Drop `alias` from the local instance if it holds it.
    pub async fn release(&self, alias: &str) -> Result<ReleaseOutcome, AgentError> {
        let current = self.ctx.metadata.local_alias().await?;
        if current.as_deref() == Some(alias) {
            info!("Removing {} from {}", alias, self.local.name);
            self.aliases.set_alias(&self.local, None, None).await?;
            return Ok(ReleaseOutcome::Released);
        }
        info!("{} does not hold {}; nothing to release", self.local.name, alias);
        Ok(ReleaseOutcome::NotHeld)
    }

    /// Whether the local instance holds `alias`. Read only.
    pub async fn check(&self, alias: &str) -> Result<HoldState, AgentError> {
        let current = self.ctx.metadata.local_alias().await?;
        if current.as_deref() == Some(alias) {
            info!("{} has the correct IP address attached", self.local.name);
            Ok(HoldState::Held)
        } else {
            Ok(HoldState::NotHeld)
        }
    }
}
