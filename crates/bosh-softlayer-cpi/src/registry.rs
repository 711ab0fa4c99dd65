//! Registry client.
//!
//! The registry stores one agent settings document per VM at
//! `{endpoint}/instances/{vm_id}/settings`. Reads return the document as a JSON string inside
//! `{"settings": "...", "status": "ok"}`.

use crate::agent_env::AgentEnv;
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use softlayer_cpi_core::client::ClientConfig;
use softlayer_cpi_core::config::RegistryConfig;
use softlayer_cpi_core::{Error, Result};
use tracing::{debug, info};
use url::Url;

/// Reads and writes agent settings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch the settings of `instance_id`.
    async fn fetch(&self, instance_id: &str) -> Result<AgentEnv>;

    /// Replace the settings of `instance_id`.
    async fn update(&self, instance_id: &str, env: &AgentEnv) -> Result<()>;

    /// Remove the settings of `instance_id`; absent settings are not an error.
    async fn delete(&self, instance_id: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct SettingsResponse {
    settings: String,
    #[serde(default)]
    status: String,
}

/// [`RegistryClient`] over HTTP with basic auth.
#[derive(Clone)]
pub struct HttpRegistryClient {
    http: Client,
    endpoint: Url,
    user: String,
    password: SecretString,
}

impl std::fmt::Debug for HttpRegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRegistryClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl HttpRegistryClient {
    /// Create a client for the configured registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the endpoint is invalid or the HTTP client cannot be
    /// built.
    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        Self::with_http_config(config, ClientConfig::registry())
    }

    /// Create a client with explicit HTTP settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the endpoint is invalid or the HTTP client cannot be
    /// built.
    pub fn with_http_config(config: &RegistryConfig, http_config: ClientConfig) -> Result<Self> {
        let mut builder = ClientBuilder::new()
            .timeout(http_config.timeout)
            .pool_idle_timeout(http_config.pool_idle_timeout)
            .pool_max_idle_per_host(http_config.pool_max_idle_per_host);
        if !http_config.enable_compression {
            builder = builder.no_gzip();
        }
        let http = builder
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("Failed to build registry HTTP client: {err}"))
            })?;

        Ok(Self {
            http,
            endpoint: config.endpoint_url()?,
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    fn settings_url(&self, instance_id: &str) -> Result<Url> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!(
            "{base}/instances/{instance_id}/settings"
        ))?)
    }

    async fn failure(action: &str, instance_id: &str, response: reqwest::Response) -> Error {
        let status = response.status();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Error::ExternalServiceError {
            service: "registry".to_string(),
            message: format!("{action} settings for '{instance_id}' returned {status}: {text}"),
        }
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn fetch(&self, instance_id: &str) -> Result<AgentEnv> {
        let url = self.settings_url(instance_id)?;
        debug!(%url, "Fetching agent settings");

        let response = self
            .http
            .get(url)
            .basic_auth(&self.user, Some(self.password.expose_secret()))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::failure("Fetching", instance_id, response).await);
        }

        let body: SettingsResponse = response.json().await.map_err(|err| {
            Error::ParseError(format!("Unmarshalling registry response: {err}"))
        })?;
        debug!(status = %body.status, "Registry response");
        serde_json::from_str(&body.settings).map_err(|err| {
            Error::ParseError(format!("Unmarshalling agent settings for '{instance_id}': {err}"))
        })
    }

    async fn update(&self, instance_id: &str, env: &AgentEnv) -> Result<()> {
        let url = self.settings_url(instance_id)?;
        info!(%url, "Updating agent settings");

        let response = self
            .http
            .put(url)
            .basic_auth(&self.user, Some(self.password.expose_secret()))
            .json(env)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::failure("Updating", instance_id, response).await)
        }
    }

    async fn delete(&self, instance_id: &str) -> Result<()> {
        let url = self.settings_url(instance_id)?;
        info!(%url, "Deleting agent settings");

        let response = self
            .http
            .delete(url)
            .basic_auth(&self.user, Some(self.password.expose_secret()))
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(Self::failure("Deleting", instance_id, response).await),
        }
    }
}
