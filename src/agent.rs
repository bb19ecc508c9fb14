//! Verb dispatch.
//!
//! Maps the resource manager's verbs onto the ownership-transfer protocol
//! and every outcome onto an [`OcfStatus`].  Failures are logged here,
//! right before the status is handed back.

use std::borrow::Borrow;
use std::fmt;
use std::future::Future;
use std::str::FromStr;

use tracing::{error, info};

use crate::config::Config;
use crate::errors::{AgentError, OcfStatus};
use crate::protocol::{HoldState, OwnershipTransfer};
use crate::xml::render_metadata;
use crate::AgentContext;

/// Verbs the resource manager can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Monitor,
    Status,
    ValidateAll,
    MetaData,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Monitor => "monitor",
            Action::Status => "status",
            Action::ValidateAll => "validate-all",
            Action::MetaData => "meta-data",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Action::Start),
            "stop" => Ok(Action::Stop),
            "monitor" => Ok(Action::Monitor),
            "status" => Ok(Action::Status),
            "validate-all" => Ok(Action::ValidateAll),
            "meta-data" => Ok(Action::MetaData),
            other => Err(format!("no such function {other}")),
        }
    }
}

/// Run `action` against the real environment and return its exit status.
pub async fn run(action: Action) -> OcfStatus {
    dispatch(action, connect()).await
}

async fn connect() -> Result<AgentContext, AgentError> {
    AgentContext::connect(Config::from_env()?).await
}

/// Run `action` and map its outcome to an exit status.
///
/// `context` is only awaited by verbs that act on the alias, so
/// `meta-data` never resolves parameters, credentials or identity.
/// Failing to resolve them is a configuration error whatever the verb.
pub async fn dispatch<C>(
    action: Action,
    context: impl Future<Output = Result<C, AgentError>>,
) -> OcfStatus
where
    C: Borrow<AgentContext>,
{
    let result = match action {
        Action::MetaData => {
            println!("{}", render_metadata());
            Ok(OcfStatus::Success)
        }
        Action::ValidateAll => context.await.map(|ctx| {
            let ctx: &AgentContext = ctx.borrow();
            info!("Configuration valid for {}", ctx.identity.name);
            OcfStatus::Success
        }),
        Action::Start => {
            async {
                let ctx = context.await?;
                let ctx: &AgentContext = ctx.borrow();
                OwnershipTransfer::new(ctx)
                    .acquire(&ctx.config.alias_ip, ctx.config.alias_range_name.as_deref())
                    .await?;
                Ok::<_, AgentError>(OcfStatus::Success)
            }
            .await
        }
        Action::Stop => {
            async {
                let ctx = context.await?;
                let ctx: &AgentContext = ctx.borrow();
                OwnershipTransfer::new(ctx).release(&ctx.config.alias_ip).await?;
                Ok::<_, AgentError>(OcfStatus::Success)
            }
            .await
        }
        Action::Monitor | Action::Status => {
            async {
                let ctx = context.await?;
                let ctx: &AgentContext = ctx.borrow();
                let state = OwnershipTransfer::new(ctx).check(&ctx.config.alias_ip).await?;
                Ok::<_, AgentError>(match state {
                    HoldState::Held => OcfStatus::Success,
                    HoldState::NotHeld => OcfStatus::NotRunning,
                })
            }
            .await
        }
    };

    result.unwrap_or_else(|e| report(action, e))
}

fn report(action: Action, err: AgentError) -> OcfStatus {
    let status = err.status();
    error!("{} failed: {}", action, err);
    status
}
