use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("response contained no text")]
    EmptyResponse,
}

impl GenerationError {
    fn is_retryable(&self) -> bool {
        match self {
            GenerationError::RateLimited(_) => true,
            GenerationError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// A text-generation backend
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<RequestContent>,
}

#[derive(Serialize)]
struct RequestContent {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<Part>,
}

pub struct GeminiGenerator {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
    retry_delay: Duration,
    rate_limit_delay: Duration,
}

impl GeminiGenerator {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key,
            model,
            endpoint: GEMINI_ENDPOINT.to_string(),
            retry_delay: Duration::from_secs(1),
            rate_limit_delay: Duration::from_secs(15),
        })
    }

    /// Point the generator at a different models endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Base delays before retrying a server error and a rate limit
    pub fn with_retry_delays(mut self, retry_delay: Duration, rate_limit_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self.rate_limit_delay = rate_limit_delay;
        self
    }

    async fn try_generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self
            .client
            .post(endpoint_url(&self.endpoint, &self.model, &self.api_key)?)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(GenerationError::RateLimited(body));
            }
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| GenerationError::Request(format!("invalid response: {}", e)))?;

        extract_text(parsed)
    }
}

fn endpoint_url(endpoint: &str, model: &str, api_key: &str) -> Result<Url, GenerationError> {
    Url::parse_with_params(
        &format!("{}/{}:generateContent", endpoint.trim_end_matches('/'), model),
        &[("key", api_key)],
    )
    .map_err(|e| GenerationError::Request(format!("invalid endpoint: {}", e)))
}

fn extract_text(response: GenerateResponse) -> Result<String, GenerationError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(text)
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_generate(prompt).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    // Longer backoff for rate limits
                    let backoff = if matches!(e, GenerationError::RateLimited(_)) {
                        self.rate_limit_delay.saturating_mul(attempt)
                    } else {
                        self.retry_delay.saturating_mul(2_u32.saturating_pow(attempt - 1))
                    };
                    tracing::warn!("generation attempt {} failed ({}), retrying in {:?}", attempt, e, backoff);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
