//! Agent error types and OCF exit statuses.
//!
//! Every failure the agent can hit maps onto one [`AgentError`] variant,
//! and every variant maps onto the exit status the resource manager
//! expects via [`AgentError::status`].

use std::process::ExitCode;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Exit statuses understood by the cluster resource manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcfStatus {
    Success,
    ErrGeneric,
    ErrUnimplemented,
    ErrConfigured,
    NotRunning,
}

impl OcfStatus {
    /// Numeric process exit code for this status.
    pub fn code(self) -> u8 {
        match self {
            OcfStatus::Success => 0,
            OcfStatus::ErrGeneric => 1,
            OcfStatus::ErrUnimplemented => 3,
            OcfStatus::ErrConfigured => 6,
            OcfStatus::NotRunning => 7,
        }
    }
}

impl From<OcfStatus> for ExitCode {
    fn from(status: OcfStatus) -> Self {
        ExitCode::from(status.code())
    }
}

/// Errors raised while resolving configuration or talking to the provider.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Missing parameter, unusable credentials, or unknown local identity.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A metadata or control-plane call failed after the transport completed
    /// (or the transport itself failed).
    #[error("{context}: {message}")]
    Provider {
        context: String,
        status: Option<u16>,
        message: String,
    },

    /// An asynchronous operation reached DONE carrying an error.
    #[error("operation {name} failed: {message}")]
    Operation { name: String, message: String },

    /// The local interface carries an alias, but not the one just written.
    #[error("{instance} has {found} attached but it isn't {expected}")]
    AssignmentMismatch {
        instance: String,
        expected: String,
        found: String,
    },

    /// The local interface carries no alias after the grant.
    #[error("failed to add IP address {alias} to {instance}")]
    AssignmentFailed { instance: String, alias: String },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AgentError {
    /// Build a `Provider` error from a non-success HTTP response body.
    ///
    /// Google APIs answer with `{"error":{"code":..,"message":..}}`; when the
    /// body parses that way its message is used, otherwise the raw body.
    pub fn from_response(context: &str, status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<ApiErrorResponse>(body)
            .ok()
            .and_then(|r| r.error)
            .and_then(|e| e.message)
            .unwrap_or_else(|| format!("HTTP {status} - {body}"));
        AgentError::Provider {
            context: context.to_string(),
            status: Some(status.as_u16()),
            message,
        }
    }

    /// Build a `Provider` error for a request that never got a response.
    pub fn transport(context: &str, err: impl std::fmt::Display) -> Self {
        AgentError::Provider {
            context: context.to_string(),
            status: None,
            message: err.to_string(),
        }
    }

    /// True when the provider rejected a write because its fingerprint was stale.
    pub fn is_precondition_failed(&self) -> bool {
        matches!(
            self,
            AgentError::Provider {
                status: Some(412),
                ..
            }
        )
    }

    /// The exit status this error should produce.
    pub fn status(&self) -> OcfStatus {
        match self {
            AgentError::Configuration(_) => OcfStatus::ErrConfigured,
            _ => OcfStatus::ErrGeneric,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[allow(dead_code)]
    code: Option<u16>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}
