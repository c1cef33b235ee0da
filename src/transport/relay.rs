//! Connection descriptor sources

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{ConnectionDescriptor, DescriptorSource};
use crate::config::RelayConfig;
use crate::{Error, Result};

/// Relay token response body
#[derive(Deserialize)]
struct RelayTokenResponse {
    #[serde(rename = "Urls", default)]
    urls: Vec<String>,
    #[serde(rename = "Username", default)]
    username: String,
    #[serde(rename = "Password", default)]
    password: String,
}

/// Fetches short-lived relay credentials from the speech service
pub struct RelayTokenSource {
    client: reqwest::Client,
    url: String,
    subscription_key: SecretString,
}

impl RelayTokenSource {
    /// Create a source for an explicit token endpoint
    #[must_use]
    pub fn new(url: impl Into<String>, subscription_key: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            subscription_key,
        }
    }

    /// Create a source from relay configuration
    ///
    /// # Errors
    ///
    /// Returns error if no endpoint can be derived or the key is missing
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let url = config.token_url().ok_or_else(|| {
            Error::Config("relay token URL or speech region required".to_string())
        })?;
        let key = config
            .subscription_key
            .clone()
            .ok_or_else(|| Error::Config("speech subscription key required".to_string()))?;

        Ok(Self::new(url, key))
    }
}

#[async_trait]
impl DescriptorSource for RelayTokenSource {
    async fn fetch(&self) -> Result<ConnectionDescriptor> {
        let response = self
            .client
            .get(&self.url)
            .header(
                "Ocp-Apim-Subscription-Key",
                self.subscription_key.expose_secret(),
            )
            .send()
            .await
            .map_err(|e| Error::Descriptor(format!("relay token request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Descriptor(format!(
                "relay token endpoint returned {}",
                response.status()
            )));
        }

        let token: RelayTokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Descriptor(format!("invalid relay token: {e}")))?;

        if token.urls.is_empty() {
            return Err(Error::Descriptor("relay token lists no servers".to_string()));
        }

        tracing::debug!(relays = token.urls.len(), "relay token fetched");

        Ok(ConnectionDescriptor {
            relay_urls: token.urls,
            username: token.username,
            credential: SecretString::from(token.password),
        })
    }
}

impl std::fmt::Debug for RelayTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayTokenSource")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Static descriptor for local transports that need no relay
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopbackDescriptorSource;

#[async_trait]
impl DescriptorSource for LoopbackDescriptorSource {
    async fn fetch(&self) -> Result<ConnectionDescriptor> {
        Ok(ConnectionDescriptor {
            relay_urls: vec!["turn:127.0.0.1:3478".to_string()],
            username: "loopback".to_string(),
            credential: SecretString::from(String::new()),
        })
    }
}
