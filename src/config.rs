//! Configuration for one agent invocation.
//!
//! The resource manager hands parameters to the agent through
//! `OCF_RESKEY_*` environment variables.  They are read exactly once at
//! process start into a [`Config`]; nothing is re-read afterwards.

use std::path::PathBuf;

use crate::errors::AgentError;

/// Target alias CIDR, e.g. `10.0.5.9/32`.
pub const ENV_ALIAS_IP: &str = "OCF_RESKEY_alias_ip";

/// Subnet secondary range the alias is drawn from.
pub const ENV_ALIAS_RANGE_NAME: &str = "OCF_RESKEY_alias_range_name";

/// Space-delimited list of cluster members.
pub const ENV_HOSTLIST: &str = "OCF_RESKEY_hostlist";

/// Log-forwarding toggle.
pub const ENV_STACKDRIVER_LOGGING: &str = "OCF_RESKEY_stackdriver_logging";

/// Name of the resource instance, attached to every log line.
pub const ENV_RESOURCE_INSTANCE: &str = "OCF_RESOURCE_INSTANCE";

/// Service account key override.
pub const ENV_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Service account key used when no override is set.
pub const DEFAULT_CREDENTIALS_PATH: &str = "/gcloud_service_account.json";

/// Resource parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Alias CIDR this resource owns.
    pub alias_ip: String,

    /// Optional subnet secondary range name passed through on grant.
    pub alias_range_name: Option<String>,

    /// Explicit peer list; `None` means enumerate the project.
    pub hostlist: Option<Vec<String>>,

    /// Path of the service account credential file.
    pub credentials_path: PathBuf,
}

/// Logging settings. Read separately from [`Config`] so that logging
/// comes up even when the resource parameters are unusable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Emit JSON lines for an external log forwarder instead of text.
    pub forward: bool,

    /// Resource instance name (`OCF_RESOURCE_INSTANCE`).
    pub resource_instance: Option<String>,
}

impl LoggingConfig {
    /// Read logging settings. Never fails: logging must come up before
    /// anything else can be reported.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));
        Self {
            forward: get(ENV_STACKDRIVER_LOGGING)
                .map(|v| parse_toggle(&v))
                .unwrap_or(false),
            resource_instance: get(ENV_RESOURCE_INSTANCE),
        }
    }

    /// Read logging settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl Config {
    /// Resolve the configuration through `lookup`.
    ///
    /// A missing or empty alias is a configuration error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AgentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));

        let alias_ip = get(ENV_ALIAS_IP)
            .ok_or_else(|| AgentError::Configuration("Missing alias_ip parameter".into()))?;

        let hostlist = get(ENV_HOSTLIST)
            .map(|raw| {
                raw.split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|hosts| !hosts.is_empty());

        let credentials_path = get(ENV_CREDENTIALS)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_PATH));

        Ok(Self {
            alias_ip,
            alias_range_name: get(ENV_ALIAS_RANGE_NAME),
            hostlist,
            credentials_path,
        })
    }

    /// Resolve the configuration from the process environment.
    pub fn from_env() -> Result<Self, AgentError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Boolean parameters are matched loosely: any value mentioning
/// yes, true or enabled turns the toggle on.
fn parse_toggle(value: &str) -> bool {
    let value = value.to_lowercase();
    ["yes", "true", "enabled"]
        .iter()
        .any(|word| value.contains(word))
}
