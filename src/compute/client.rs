//! Compute Engine v1 REST client over `reqwest`.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::auth::{Credentials, TokenSource};
use super::types::{AggregatedInstanceList, Instance, InstanceRef, NetworkInterfacePatch, Operation};
use super::ComputeApi;
use crate::errors::AgentError;

/// Compute API base URL.
pub const COMPUTE_API_BASE: &str = "https://compute.googleapis.com/compute/v1";

/// Path-segment escaping: resource names keep their unreserved characters.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Per-request timeout for control-plane calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Authenticated compute API handle, built once per run.
pub struct HttpComputeClient {
    client: reqwest::Client,
    tokens: TokenSource,
    base: String,
}

impl HttpComputeClient {
    /// Build a client from the credential file at `credentials_path`.
    ///
    /// Fails with a configuration error when the file cannot be used.
    pub fn connect(credentials_path: &Path) -> Result<Self, AgentError> {
        let credentials = Credentials::from_file(credentials_path)?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AgentError::Configuration(format!("Failed to create HTTP client: {e}")))?;
        info!(
            "Compute API client initialized from {}",
            credentials_path.display()
        );
        Ok(Self::new(client, credentials))
    }

    fn new(client: reqwest::Client, credentials: Credentials) -> Self {
        Self {
            tokens: TokenSource::new(client.clone(), credentials),
            client,
            base: COMPUTE_API_BASE.to_string(),
        }
    }

    /// Send requests to `base` instead of the public endpoint (emulators).
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    async fn auth_headers(&self) -> Result<HeaderMap, AgentError> {
        let token = self.tokens.access_token().await?;
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| anyhow::anyhow!("Invalid auth header value: {e}"))?,
        );
        Ok(headers)
    }

    fn zone_url(&self, project: &str, zone: &str) -> String {
        format!(
            "{}/projects/{}/zones/{}",
            self.base,
            encode(project),
            encode(zone)
        )
    }

    fn instance_url(&self, instance: &InstanceRef) -> String {
        format!(
            "{}/instances/{}",
            self.zone_url(&instance.project, &instance.zone),
            encode(&instance.name)
        )
    }

    /// Send `request` and decode a JSON body, mapping failures to `Provider` errors.
    async fn send_json<T: DeserializeOwned>(
        &self,
        context: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, AgentError> {
        let resp = request
            .headers(self.auth_headers().await?)
            .send()
            .await
            .map_err(|e| AgentError::transport(context, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::from_response(context, status, &body));
        }

        resp.json::<T>()
            .await
            .map_err(|e| AgentError::transport(context, e))
    }
}

fn encode(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

impl ComputeApi for HttpComputeClient {
    fn get_instance(
        &self,
        instance: &InstanceRef,
    ) -> Pin<Box<dyn Future<Output = Result<Instance, AgentError>> + Send + '_>> {
        let url = self.instance_url(instance);
        let context = format!("get instance {}", instance.name);
        Box::pin(async move {
            debug!("GET {}", url);
            self.send_json(&context, self.client.get(&url)).await
        })
    }

    fn update_network_interface(
        &self,
        instance: &InstanceRef,
        interface: &str,
        patch: NetworkInterfacePatch,
    ) -> Pin<Box<dyn Future<Output = Result<Operation, AgentError>> + Send + '_>> {
        let url = format!("{}/updateNetworkInterface", self.instance_url(instance));
        let interface = interface.to_string();
        let context = format!("update network interface of {}", instance.name);
        Box::pin(async move {
            debug!("PATCH {} networkInterface={}", url, interface);
            let request = self
                .client
                .patch(&url)
                .query(&[("networkInterface", interface.as_str())])
                .json(&patch);
            self.send_json(&context, request).await
        })
    }

    fn get_zone_operation(
        &self,
        project: &str,
        zone: &str,
        operation: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Operation, AgentError>> + Send + '_>> {
        let url = format!(
            "{}/operations/{}",
            self.zone_url(project, zone),
            encode(operation)
        );
        let context = format!("get operation {operation}");
        Box::pin(async move { self.send_json(&context, self.client.get(&url)).await })
    }

    fn list_instances_page(
        &self,
        project: &str,
        filter: Option<&str>,
        page_token: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<AggregatedInstanceList, AgentError>> + Send + '_>>
    {
        let url = format!("{}/projects/{}/aggregated/instances", self.base, encode(project));
        let mut query: Vec<(&'static str, String)> = Vec::new();
        if let Some(filter) = filter {
            query.push(("filter", filter.to_string()));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        let context = format!("list instances in {project}");
        Box::pin(async move {
            debug!("GET {} {:?}", url, query);
            self.send_json(&context, self.client.get(&url).query(&query))
                .await
        })
    }
}
