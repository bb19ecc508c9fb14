//! OAuth2 access tokens for the compute API.
//!
//! Credentials come from a single JSON key file: a service account key
//! (exchanged through a signed JWT bearer assertion) or gcloud
//! `authorized_user` credentials (exchanged through their refresh token).
//! Tokens are cached until shortly before they expire.

use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Context;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AgentError;

/// Scope requested for every token.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for a signed assertion (the maximum Google accepts).
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Tokens are refreshed this long before they actually expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Parsed credential file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
}

impl Credentials {
    /// Load and validate a credential file.
    ///
    /// Anything wrong with the file is a configuration error: a missing
    /// file, bad JSON, an unsupported `type`, or a private key that does not
    /// parse as RSA PEM.
    pub fn from_file(path: &Path) -> Result<Self, AgentError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Configuration(format!(
                "Failed to read credentials file {}: {e}",
                path.display()
            ))
        })?;
        let creds: Credentials = serde_json::from_str(&contents).map_err(|e| {
            AgentError::Configuration(format!(
                "Failed to parse credentials file {}: {e}",
                path.display()
            ))
        })?;
        if let Credentials::ServiceAccount { private_key, .. } = &creds {
            EncodingKey::from_rsa_pem(private_key.as_bytes()).map_err(|e| {
                AgentError::Configuration(format!("Invalid service account private key: {e}"))
            })?;
        }
        Ok(creds)
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// Cached access token with expiry.
struct CachedToken {
    access_token: String,
    expiry: Instant,
}

/// Hands out bearer tokens for a set of [`Credentials`].
pub struct TokenSource {
    client: reqwest::Client,
    credentials: Credentials,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    pub fn new(client: reqwest::Client, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
            cache: Mutex::new(None),
        }
    }

    /// A valid access token, from cache when possible.
    pub async fn access_token(&self) -> Result<String, AgentError> {
        {
            let cache = self
                .cache
                .lock()
                .map_err(|_| anyhow::anyhow!("token cache mutex poisoned"))?;
            if let Some(ref cached) = *cache {
                if cached.expiry > Instant::now() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let fresh = self.fetch().await?;
        let expiry = Instant::now()
            + Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_MARGIN);

        let mut cache = self
            .cache
            .lock()
            .map_err(|_| anyhow::anyhow!("token cache mutex poisoned"))?;
        *cache = Some(CachedToken {
            access_token: fresh.access_token.clone(),
            expiry,
        });
        Ok(fresh.access_token)
    }

    async fn fetch(&self) -> Result<TokenResponse, AgentError> {
        match &self.credentials {
            Credentials::ServiceAccount {
                client_email,
                private_key,
                token_uri,
            } => {
                debug!("Requesting access token for {}", client_email);
                let assertion = sign_assertion(client_email, private_key, token_uri)?;
                self.exchange(
                    token_uri,
                    &[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())],
                )
                .await
            }
            Credentials::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
                token_uri,
            } => {
                debug!("Refreshing user access token");
                self.exchange(
                    token_uri,
                    &[
                        ("client_id", client_id.as_str()),
                        ("client_secret", client_secret.as_str()),
                        ("refresh_token", refresh_token.as_str()),
                        ("grant_type", "refresh_token"),
                    ],
                )
                .await
            }
        }
    }

    async fn exchange(
        &self,
        token_uri: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, AgentError> {
        let resp = self
            .client
            .post(token_uri)
            .form(form)
            .send()
            .await
            .map_err(|e| AgentError::transport("token request", e))?;

        let status = resp.status();
        if status.is_client_error() {
            // The token endpoint refusing us means the credentials are bad.
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::Configuration(format!(
                "Couldn't connect with google api: token request rejected ({status}): {body}"
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::from_response("token request", status, &body));
        }

        resp.json::<TokenResponse>()
            .await
            .map_err(|e| AgentError::transport("token response", e))
    }
}

fn sign_assertion(
    client_email: &str,
    private_key: &str,
    token_uri: &str,
) -> Result<String, AgentError> {
    let iat = chrono::Utc::now().timestamp();
    let claims = AssertionClaims {
        iss: client_email,
        scope: CLOUD_PLATFORM_SCOPE,
        aud: token_uri,
        iat,
        exp: iat + ASSERTION_LIFETIME_SECS,
    };
    let key = EncodingKey::from_rsa_pem(private_key.as_bytes())
        .context("parsing service account private key")?;
    let jwt = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
        .context("signing token assertion")?;
    Ok(jwt)
}
