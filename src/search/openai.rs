//! OpenAI-compatible embeddings provider using the `/v1/embeddings` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

use super::embedding::EmbeddingProvider;
use crate::core::config::DEFAULT_BASE_URL;
use crate::error::ProviderError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: Secret<String>,
    endpoint: String,
    model: String,
    dims: usize,
}

fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn has_version_suffix(base_url: &str) -> bool {
    let Some(last_segment) = base_url.rsplit('/').next() else {
        return false;
    };
    let Some(rest) = last_segment.strip_prefix('v') else {
        return false;
    };
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
}

fn embeddings_endpoint(base_url: &str) -> String {
    let normalized = normalize_base_url(base_url);
    if normalized.ends_with("/embeddings") {
        return normalized;
    }
    if has_version_suffix(&normalized) {
        return format!("{normalized}/embeddings");
    }
    format!("{normalized}/v1/embeddings")
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, dims: usize) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: Secret::new(api_key),
            endpoint: embeddings_endpoint(DEFAULT_BASE_URL),
            model,
            dims,
        })
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.endpoint = embeddings_endpoint(url);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Map a non-success HTTP status onto the provider error taxonomy
fn classify_status(status: StatusCode, retry_after: Option<&str>, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Authentication(message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            retry_after: retry_after
                .and_then(|v| v.trim().parse::<f64>().ok())
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
        },
        s if s.is_server_error() => ProviderError::Network(format!("server returned {s}")),
        s => ProviderError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

/// Pull the single vector out of a response body and check its length
fn parse_embedding(body: &str, dims: usize) -> Result<Vec<f32>, ProviderError> {
    let response: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    let vector = response
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or_else(|| ProviderError::MalformedResponse("empty embedding response".into()))?;
    if vector.len() != dims {
        return Err(ProviderError::MalformedResponse(format!(
            "expected {dims} dimensions, got {}",
            vector.len()
        )));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(ProviderError::MalformedResponse(
            "embedding contains non-finite values".into(),
        ));
    }
    Ok(vector)
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn generate(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let req = EmbeddingRequest {
            model: &self.model,
            input: [text],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&req)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !status.is_success() {
            let err = classify_status(status, retry_after.as_deref(), &body);
            tracing::debug!(model = %self.model, %status, error = %err, "embedding request failed");
            return Err(err);
        }

        parse_embedding(&body, self.dims)
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}
