//! Gemini `generateContent` REST client.

use std::time::Duration;

use async_trait::async_trait;
use kbforge_shared::{GeminiConfig, KbForgeError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{GenerationRequest, LanguageModel};

/// User-Agent string for Gemini requests.
const USER_AGENT: &str = concat!("kbforge/", env!("CARGO_PKG_VERSION"));

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KbForgeError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{model}:generateContent", self.base_url)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<PartOut<'a>>,
}

#[derive(Debug, Serialize)]
struct PartOut<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartIn>,
}

#[derive(Debug, Deserialize)]
struct PartIn {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    status: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate.
    fn into_text(self) -> Result<String> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(KbForgeError::Analysis(format!("prompt blocked: {reason}")));
        }

        let Some(candidate) = self.candidates.into_iter().next() else {
            return Err(KbForgeError::Analysis("model returned no candidates".into()));
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            let reason = candidate.finish_reason.as_deref().unwrap_or("unknown");
            return Err(KbForgeError::Analysis(format!(
                "model returned an empty response (finish reason: {reason})"
            )));
        }
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// LanguageModel
// ---------------------------------------------------------------------------

#[async_trait]
impl LanguageModel for GeminiClient {
    #[instrument(skip_all, fields(model = %request.model, prompt_chars = request.prompt.len()))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![PartOut {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            },
        };

        let started = std::time::Instant::now();
        let response = self
            .http
            .post(self.endpoint(&request.model))
            .header(API_KEY_HEADER, &request.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| KbForgeError::Analysis(format!("Gemini API call failed: {e}")))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| KbForgeError::Analysis(format!("failed to read Gemini response: {e}")))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorEnvelope>(&raw)
                .map(|env| match env.error.status {
                    Some(code) => format!("{code}: {}", env.error.message),
                    None => env.error.message,
                })
                .unwrap_or(raw);
            return Err(KbForgeError::Analysis(format!(
                "Gemini API call failed: HTTP {status}: {detail}"
            )));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&raw)
            .map_err(|e| KbForgeError::Analysis(format!("malformed Gemini response: {e}")))?;
        let text = parsed.into_text()?;

        debug!(
            chars = text.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generation complete"
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GeminiClient {
        let config = GeminiConfig {
            base_url: format!("{}/", server.uri()),
            timeout_secs: 5,
            ..GeminiConfig::default()
        };
        GeminiClient::new(&config).unwrap()
    }

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            api_key: "test-key".into(),
            model: "gemini-2.5-flash-lite".into(),
            prompt: prompt.into(),
            temperature: 0.7,
            max_output_tokens: 8000,
        }
    }

    #[tokio::test]
    async fn generate_returns_candidate_text() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash-lite:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": "Summarise"}]}],
                "generationConfig": {"maxOutputTokens": 8000}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": {"parts": [{"text": "### Corporate Jargon\n"}, {"text": "- synergy"}]},
                    "finishReason": "STOP"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server).generate(&request("Summarise")).await.unwrap();
        assert_eq!(text, "### Corporate Jargon\n- synergy");
    }

    #[tokio::test]
    async fn http_error_surfaces_api_message() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED"}
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).generate(&request("x")).await.unwrap_err();
        assert!(matches!(err, KbForgeError::Analysis(_)));
        let msg = err.to_string();
        assert!(msg.contains("429"));
        assert!(msg.contains("RESOURCE_EXHAUSTED: Quota exceeded"));
    }

    #[tokio::test]
    async fn empty_candidate_is_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"parts": []}, "finishReason": "SAFETY"}]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).generate(&request("x")).await.unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[tokio::test]
    async fn blocked_prompt_is_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "promptFeedback": {"blockReason": "OTHER"}
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).generate(&request("x")).await.unwrap_err();
        assert!(err.to_string().contains("prompt blocked: OTHER"));
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        let client = GeminiClient::new(&GeminiConfig {
            base_url: "https://example.test/".into(),
            ..GeminiConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.endpoint("gemini-1.5-pro"),
            "https://example.test/v1beta/models/gemini-1.5-pro:generateContent"
        );
    }
}
