// Hosted multimodal model client (Gemini generateContent REST API)

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine};
use futures::future::BoxFuture;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::core::config::CloudConfig;
use crate::core::errors::{ProviderError, ProviderResult};
use crate::middleware::circuit_breaker::CircuitBreaker;
use crate::utils::image_ops::guess_mime_type;
use crate::utils::Metrics;

/// Fixed instruction sent with every image
pub const DESCRIPTION_PROMPT: &str = "Analyze this image for a Lost and Found system. \
Provide a concise but detailed description. Start with 'Identified as...'. Do not use markdown.";

/// Header carrying the credential, kept out of request URLs
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Wait applied before retrying a rate-limited or overloaded request
const OVERLOAD_BACKOFF: Duration = Duration::from_secs(10);

/// Free-text description of an image from a named hosted model.
pub trait DescriptionProvider: Send + Sync {
    fn generate_description<'a>(
        &'a self,
        image: &'a [u8],
        model: &'a str,
    ) -> BoxFuture<'a, ProviderResult<String>>;
}

/// `generateContent` body with one inline image part followed by the prompt.
pub fn build_request_body(image: &[u8], prompt: &str) -> serde_json::Value {
    serde_json::json!({
        "contents": [{
            "parts": [
                {
                    "inline_data": {
                        "mime_type": guess_mime_type(image),
                        "data": general_purpose::STANDARD.encode(image)
                    }
                },
                {"text": prompt}
            ]
        }]
    })
}

/// Text of the first candidate's parts, concatenated and trimmed.
pub fn extract_text(response: &serde_json::Value, model: &str) -> ProviderResult<String> {
    if let Some(error) = response.get("error") {
        return Err(ProviderError::InvalidResponse(error.to_string()));
    }

    let parts = response["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| {
            let reason = response["promptFeedback"]["blockReason"]
                .as_str()
                .or_else(|| response["candidates"][0]["finishReason"].as_str())
                .unwrap_or("missing candidates");
            ProviderError::InvalidResponse(format!("no content parts ({})", reason))
        })?;

    let text: String = parts
        .iter()
        .filter_map(|part| part["text"].as_str())
        .collect::<Vec<_>>()
        .join("");
    let text = text.trim();

    if text.is_empty() {
        return Err(ProviderError::EmptyResponse {
            model: model.to_string(),
        });
    }
    Ok(text.to_string())
}

/// Gemini REST client with retries and a circuit breaker
pub struct GeminiClient {
    api_key: String,
    api_base: String,
    max_retries: u32,
    http_client: reqwest::Client,
    circuit_breaker: CircuitBreaker,
    metrics: Metrics,
}

impl GeminiClient {
    pub fn new(
        cloud: &CloudConfig,
        api_key: String,
        circuit_breaker: Option<CircuitBreaker>,
        metrics: Metrics,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cloud.timeout_seconds))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            api_base: cloud.api_base.clone(),
            max_retries: cloud.max_retries,
            http_client,
            circuit_breaker: circuit_breaker.unwrap_or_default(),
            metrics,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.api_base, model)
    }

    /// Describe one image with one model.
    #[instrument(skip(self, image), fields(model = model, bytes = image.len()))]
    pub async fn describe(&self, image: &[u8], model: &str) -> ProviderResult<String> {
        let body = build_request_body(image, DESCRIPTION_PROMPT);
        self.generate(model, &body).await
    }

    /// Text-only request used to check that a model identifier is served.
    pub async fn probe(&self, model: &str) -> ProviderResult<String> {
        let body = serde_json::json!({
            "contents": [{"parts": [{"text": "Hello?"}]}]
        });
        self.generate(model, &body).await
    }

    async fn generate(&self, model: &str, body: &serde_json::Value) -> ProviderResult<String> {
        if !self.circuit_breaker.allow_request() {
            warn!("Circuit breaker is open, failing fast");
            return Err(ProviderError::CircuitOpen);
        }

        let guard = AttemptGuard {
            client: self,
            settled: false,
        };
        let url = self.endpoint(model);
        let result = self.send_with_retries(&url, body).await;
        guard.settle(result.is_ok());

        let response: serde_json::Value = serde_json::from_str(&result?)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        extract_text(&response, model)
    }

    fn record_breaker_failure(&self) {
        if self.circuit_breaker.record_failure() {
            warn!("Circuit breaker opened after repeated provider failures");
            self.metrics.record_circuit_breaker_trip();
        }
    }

    async fn send_with_retries(&self, url: &str, body: &serde_json::Value) -> ProviderResult<String> {
        let mut attempt = 0u32;
        loop {
            let result = self.send_once(url, body).await;
            let error = match result {
                Ok(text) => return Ok(text),
                Err(e) => e,
            };

            if attempt >= self.max_retries || !error.is_transient() {
                return Err(error);
            }

            let overloaded = matches!(
                error,
                ProviderError::Status { status: 429 | 503, .. }
            );
            let delay = if overloaded {
                OVERLOAD_BACKOFF
            } else {
                // Exponential backoff with jitter
                let base_delay = 2_u64.pow(attempt);
                let jitter = rand::random::<u64>() % 1000;
                Duration::from_millis(base_delay * 1000 + jitter)
            };

            debug!(
                "Provider request failed: {}. Retrying in {:?} ({}/{})",
                error,
                delay,
                attempt + 1,
                self.max_retries
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn send_once(&self, url: &str, body: &serde_json::Value) -> ProviderResult<String> {
        let response = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json")
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(response.text().await?)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Settles one attempt against the circuit breaker. An attempt dropped
/// before it finishes (a caller-side timeout) counts as a failure.
struct AttemptGuard<'a> {
    client: &'a GeminiClient,
    settled: bool,
}

impl AttemptGuard<'_> {
    fn settle(mut self, ok: bool) {
        self.settled = true;
        if ok {
            self.client.circuit_breaker.record_success();
        } else {
            self.client.record_breaker_failure();
        }
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!("Provider attempt abandoned before completion");
            self.client.record_breaker_failure();
        }
    }
}

impl DescriptionProvider for GeminiClient {
    fn generate_description<'a>(
        &'a self,
        image: &'a [u8],
        model: &'a str,
    ) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(self.describe(image, model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::utils::test_support::{encode_png, solid_image};

    #[test]
    fn test_request_body_shape() {
        let png = encode_png(&solid_image(2, 2, [1, 2, 3]));
        let body = build_request_body(&png, DESCRIPTION_PROMPT);

        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["inline_data"]["mime_type"], "image/png");
        assert_eq!(
            parts[0]["inline_data"]["data"],
            general_purpose::STANDARD.encode(&png)
        );
        assert_eq!(parts[1]["text"], DESCRIPTION_PROMPT);
        assert!(DESCRIPTION_PROMPT.contains("Start with 'Identified as...'"));
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response = serde_json::json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "  Identified as a red umbrella"},
                    {"text": " with a wooden handle.\n"}
                ]}
            }]
        });
        assert_eq!(
            extract_text(&response, "gemini-1.5-flash").unwrap(),
            "Identified as a red umbrella with a wooden handle."
        );
    }

    #[test]
    fn test_extract_text_rejects_empty_and_blocked() {
        let empty = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "   "}]}}]
        });
        assert!(matches!(
            extract_text(&empty, "m"),
            Err(ProviderError::EmptyResponse { .. })
        ));

        let blocked = serde_json::json!({"promptFeedback": {"blockReason": "SAFETY"}});
        match extract_text(&blocked, "m") {
            Err(ProviderError::InvalidResponse(msg)) => assert!(msg.contains("SAFETY")),
            other => panic!("unexpected: {:?}", other),
        }

        let error = serde_json::json!({"error": {"code": 404, "message": "model not found"}});
        assert!(matches!(
            extract_text(&error, "m"),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let cloud = CloudConfig {
            api_key: Some("test-key".to_string()),
            models: vec!["gemini-1.5-flash".to_string()],
            api_base: "http://127.0.0.1:9".to_string(),
            timeout_seconds: 1,
            max_retries: 0,
        };
        let breaker = CircuitBreaker::new();
        for _ in 0..5 {
            breaker.record_failure();
        }
        let client = GeminiClient::new(&cloud, "test-key".to_string(), Some(breaker), Metrics::new()).unwrap();

        assert!(matches!(
            client.describe(b"bytes", "gemini-1.5-flash").await,
            Err(ProviderError::CircuitOpen)
        ));
        assert!(client.endpoint("gemini-1.5-flash").ends_with("/models/gemini-1.5-flash:generateContent"));
    }

    #[tokio::test]
    async fn test_network_error_does_not_expose_key() {
        let cloud = CloudConfig {
            api_key: Some("SECRET-KEY".to_string()),
            models: vec!["gemini-1.5-flash".to_string()],
            api_base: "http://127.0.0.1:9".to_string(),
            timeout_seconds: 2,
            max_retries: 0,
        };
        let client = GeminiClient::new(&cloud, "SECRET-KEY".to_string(), None, Metrics::new()).unwrap();

        let error = client.describe(b"bytes", "gemini-1.5-flash").await.unwrap_err();
        assert!(matches!(error, ProviderError::Http(_)));
        let message = error.to_string();
        assert!(!message.contains("SECRET-KEY"), "{}", message);
        assert!(!message.contains("127.0.0.1:9"), "{}", message);
        assert!(!client.endpoint("gemini-1.5-flash").contains("SECRET-KEY"));
    }

    #[tokio::test]
    async fn test_abandoned_attempt_trips_breaker() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let cloud = CloudConfig {
            api_key: Some("test-key".to_string()),
            models: vec!["gemini-1.5-flash".to_string()],
            api_base: format!("http://{}", addr),
            timeout_seconds: 30,
            max_retries: 0,
        };
        let breaker = CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
        });
        let metrics = Metrics::new();
        let client = GeminiClient::new(&cloud, "test-key".to_string(), Some(breaker.clone()), metrics.clone()).unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_millis(200),
            client.describe(b"bytes", "gemini-1.5-flash"),
        )
        .await;
        assert!(outcome.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(metrics.snapshot().circuit_breaker_trips, 1);
    }
}
