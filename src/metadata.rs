//! Local instance metadata.
//!
//! Every Compute Engine instance can ask the metadata server who it is:
//! its name, zone, project and the alias ranges attached to its
//! interfaces.  [`MetadataSource`] abstracts the raw key lookup and
//! [`MetadataReader`] layers the typed accessors the agent needs on top.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use tracing::debug;

use crate::errors::AgentError;

/// Metadata server root.
pub const METADATA_SERVER: &str = "http://metadata.google.internal/computeMetadata/v1/";

/// Default budget for a single metadata request.
pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(60);

/// Raw key/value access to the metadata server.
pub trait MetadataSource: Send + Sync {
    /// Fetch `key` (relative to the metadata root) with optional query
    /// parameters. `timeout` defaults to [`DEFAULT_METADATA_TIMEOUT`].
    fn read(
        &self,
        key: &str,
        query: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, AgentError>> + Send + '_>>;
}

/// [`MetadataSource`] backed by the real metadata server.
pub struct HttpMetadataSource {
    client: reqwest::Client,
    base: String,
}

impl HttpMetadataSource {
    pub fn new() -> Result<Self, AgentError> {
        Self::with_base(METADATA_SERVER)
    }

    /// Point at a different metadata root (emulators).
    pub fn with_base(base: &str) -> Result<Self, AgentError> {
        // The metadata server is link-local; a configured proxy would only
        // swallow the request.
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| AgentError::Configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base: base.to_string(),
        })
    }
}

impl MetadataSource for HttpMetadataSource {
    fn read(
        &self,
        key: &str,
        query: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, AgentError>> + Send + '_>> {
        let url = format!("{}{}", self.base, key);
        let query: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let deadline = request_deadline(timeout);
        Box::pin(async move {
            let context = format!("metadata {url}");
            debug!("GET {}", url);
            let resp = self
                .client
                .get(&url)
                .header("Metadata-Flavor", "Google")
                .query(&query)
                .timeout(deadline)
                .send()
                .await
                .map_err(|e| AgentError::transport(&context, e))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(AgentError::from_response(&context, status, &body));
            }

            resp.bytes()
                .await
                .map_err(|e| AgentError::transport(&context, e))
        })
    }
}

/// Client-side deadline for a metadata request with server budget
/// `timeout`. The server enforces its own budget, so the client waits
/// 10% longer.
fn request_deadline(timeout: Option<Duration>) -> Duration {
    let budget = timeout.unwrap_or(DEFAULT_METADATA_TIMEOUT);
    budget + budget / 10
}

/// Who this process is running as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub name: String,
    pub zone: String,
    pub project: String,
}

/// One entry of the recursive `instance/network-interfaces` document.
#[derive(Debug, Deserialize)]
struct MetadataInterface {
    #[serde(default, rename = "ipAliases")]
    ip_aliases: Vec<String>,
}

/// Typed accessors over a [`MetadataSource`].
#[derive(Clone)]
pub struct MetadataReader {
    source: Arc<dyn MetadataSource>,
}

impl MetadataReader {
    pub fn new(source: Arc<dyn MetadataSource>) -> Self {
        Self { source }
    }

    async fn read_string(&self, key: &str) -> Result<String, AgentError> {
        let bytes = self.source.read(key, &[], None).await?;
        String::from_utf8(bytes.to_vec())
            .map(|s| s.trim().to_string())
            .map_err(|e| AgentError::Provider {
                context: format!("metadata {key}"),
                status: None,
                message: format!("response is not UTF-8: {e}"),
            })
    }

    pub async fn instance_name(&self) -> Result<String, AgentError> {
        self.read_string("instance/name").await
    }

    /// Zone name; the server answers `projects/<num>/zones/<zone>`.
    pub async fn zone(&self) -> Result<String, AgentError> {
        let raw = self.read_string("instance/zone").await?;
        Ok(last_segment(&raw).to_string())
    }

    pub async fn project_id(&self) -> Result<String, AgentError> {
        self.read_string("project/project-id").await
    }

    /// Resolve the local identity. Without it the agent cannot act, so any
    /// failure is reported as a configuration error.
    pub async fn identity(&self) -> Result<LocalIdentity, AgentError> {
        let name = self.instance_name().await.map_err(|e| {
            AgentError::Configuration(format!(
                "Couldn't get instance name, is this running inside GCE?: {e}"
            ))
        })?;
        let zone = self
            .zone()
            .await
            .map_err(|e| AgentError::Configuration(format!("Couldn't get instance zone: {e}")))?;
        let project = self
            .project_id()
            .await
            .map_err(|e| AgentError::Configuration(format!("Couldn't get project id: {e}")))?;
        Ok(LocalIdentity {
            name,
            zone,
            project,
        })
    }

    /// The alias attached to the first interface, as the instance itself sees it.
    ///
    /// `Ok(None)` covers both "no alias" and a document whose shape is not
    /// what we expect. A failed request is an error.
    pub async fn local_alias(&self) -> Result<Option<String>, AgentError> {
        let bytes = self
            .source
            .read("instance/network-interfaces/", &[("recursive", "true")], None)
            .await?;
        Ok(parse_interface_alias(&bytes))
    }
}

fn parse_interface_alias(document: &[u8]) -> Option<String> {
    match serde_json::from_slice::<Vec<MetadataInterface>>(document) {
        Ok(interfaces) => interfaces
            .into_iter()
            .next()
            .and_then(|iface| iface.ip_aliases.into_iter().next())
            .filter(|alias| !alias.is_empty()),
        Err(e) => {
            debug!("Unexpected network-interfaces document, treating as no alias: {}", e);
            None
        }
    }
}

/// Suffix after the last `/`, or the whole string.
pub fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
