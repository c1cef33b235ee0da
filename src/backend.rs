//! Reasoning backend client
//!
//! The backend answers one question per request: `POST {"question": ...}`
//! returns `{"response": ...}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::{Error, Result};

/// Question-answering capability
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Ask a question and return the answer text
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or a non-success status
    async fn ask(&self, question: &str) -> Result<String>;
}

#[derive(Serialize)]
struct AskRequest<'a> {
    question: &'a str,
}

#[derive(Deserialize)]
struct AskResponse {
    #[serde(default)]
    response: String,
}

/// HTTP client for the ask endpoint
#[derive(Debug, Clone)]
pub struct AskClient {
    client: reqwest::Client,
    url: String,
}

impl AskClient {
    /// Create a client from backend configuration
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    /// Endpoint this client posts to
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Reasoner for AskClient {
    async fn ask(&self, question: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .json(&AskRequest { question })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "backend returned error");
            return Err(Error::Backend {
                status: status.as_u16(),
                body,
            });
        }

        let answer: AskResponse = response.json().await?;
        Ok(answer.response)
    }
}
