use serde::{Deserialize, Serialize};

use crate::config::{resolve_api_key, CompletionConfig};
use crate::error::{CompletionError, CompletionErrorKind, Result};
use crate::model::Message;

/// Env var consulted when `completion.api_key` and `completion.env_var`
/// are both unset.
const DEFAULT_ENV_VAR: &str = "OPENAI_API_KEY";

/// Completion API request format. Carries role + content pairs only;
/// message ids, timestamps, and token metadata never go on the wire.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Completion API response format
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

/// A successful completion: the assistant text plus provider-reported usage.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub total_tokens: Option<u32>,
}

/// HTTP client for one OpenAI-compatible completion endpoint.
#[derive(Clone)]
pub struct CompletionClient {
    config: CompletionConfig,
    api_key: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionClient")
            .field("endpoint", &self.config.endpoint)
            .field("model", &self.config.model)
            .finish()
    }
}

impl CompletionClient {
    /// Create a client from configuration. Fails fast when no API key can
    /// be resolved.
    pub fn from_config(config: &CompletionConfig) -> Result<Self> {
        let api_key = resolve_api_key(config, DEFAULT_ENV_VAR)?;
        Ok(Self {
            config: config.clone(),
            api_key,
            client: reqwest::Client::new(),
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// POST the full ordered history to the completion endpoint and return
    /// the assistant reply. All failures come back as a classified
    /// [`CompletionError`]; nothing here panics or retries.
    pub async fn complete(
        &self,
        history: &[Message],
    ) -> std::result::Result<Completion, CompletionError> {
        let body = ChatCompletionRequest {
            model: &self.config.model,
            messages: history
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let resp = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                CompletionError::new(
                    CompletionErrorKind::Connectivity,
                    format!("completion request failed: {e}"),
                )
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| {
            CompletionError::new(
                CompletionErrorKind::Connectivity,
                format!("failed to read completion response: {e}"),
            )
        })?;

        if !status.is_success() {
            let kind = classify_status(status.as_u16(), &text);
            return Err(CompletionError::new(
                kind,
                format!("completion endpoint returned {status}: {text}"),
            ));
        }

        parse_completion(&text)
    }
}

/// Decode a successful response body, turning shape mismatches into
/// classified errors instead of panics.
fn parse_completion(body: &str) -> std::result::Result<Completion, CompletionError> {
    let resp: ChatCompletionResponse = serde_json::from_str(body).map_err(|e| {
        CompletionError::new(
            CompletionErrorKind::Unknown,
            format!("malformed completion payload: {e}"),
        )
    })?;

    let choice = resp.choices.into_iter().next().ok_or_else(|| {
        CompletionError::new(
            CompletionErrorKind::Unknown,
            "completion response has no choices",
        )
    })?;

    let content = choice.message.content.ok_or_else(|| {
        CompletionError::new(
            CompletionErrorKind::Unknown,
            "completion response missing message content",
        )
    })?;

    Ok(Completion {
        content,
        total_tokens: resp.usage.map(|u| u.total_tokens),
    })
}

/// Map a non-2xx status (plus response body, for 429 disambiguation) to an
/// error kind.
fn classify_status(status: u16, body: &str) -> CompletionErrorKind {
    match status {
        401 | 403 => CompletionErrorKind::Auth,
        402 => CompletionErrorKind::Quota,
        429 => {
            // Providers reuse 429 for both throttling and exhausted quota;
            // the body names the quota case.
            let body_lower = body.to_lowercase();
            if body_lower.contains("insufficient_quota") || body_lower.contains("quota") {
                CompletionErrorKind::Quota
            } else {
                CompletionErrorKind::RateLimit
            }
        }
        _ => CompletionErrorKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    #[test]
    fn test_from_config_with_key() {
        let config = CompletionConfig {
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        let client = CompletionClient::from_config(&config);
        assert!(client.is_ok());
    }

    #[test]
    fn test_from_config_without_key_errors() {
        let config = CompletionConfig {
            api_key: None,
            env_var: Some("HIWAR_COMPLETION_TEST_UNSET".into()),
            ..Default::default()
        };
        let result = CompletionClient::from_config(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key"));
    }

    #[test]
    fn test_wire_request_carries_role_and_content_only() {
        let history = vec![
            Message::new(Role::User, "hello").with_token_count(5),
            Message::new(Role::Assistant, "hi"),
        ];
        let body = ChatCompletionRequest {
            model: "gpt-4o-mini",
            messages: history
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            max_tokens: 64,
            temperature: 0.7,
        };
        let json = serde_json::to_string(&body).unwrap();

        assert!(json.contains("\"role\":\"user\""));
        assert!(json.contains("\"content\":\"hello\""));
        assert!(!json.contains("token_count"));
        assert!(!json.contains("created_at"));
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn test_parse_completion_with_usage() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": "Hello!"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 32, "total_tokens": 42}
        }"#;
        let completion = parse_completion(body).unwrap();
        assert_eq!(completion.content, "Hello!");
        assert_eq!(completion.total_tokens, Some(42));
    }

    #[test]
    fn test_parse_completion_without_usage() {
        let body = r#"{"choices": [{"message": {"content": "ok"}}]}"#;
        let completion = parse_completion(body).unwrap();
        assert_eq!(completion.content, "ok");
        assert_eq!(completion.total_tokens, None);
    }

    #[test]
    fn test_parse_completion_no_choices() {
        let body = r#"{"choices": []}"#;
        let err = parse_completion(body).unwrap_err();
        assert_eq!(err.kind, CompletionErrorKind::Unknown);
        assert!(err.detail.contains("no choices"));
    }

    #[test]
    fn test_parse_completion_missing_content() {
        let body = r#"{"choices": [{"message": {"role": "assistant"}}]}"#;
        let err = parse_completion(body).unwrap_err();
        assert_eq!(err.kind, CompletionErrorKind::Unknown);
        assert!(err.detail.contains("content"));
    }

    #[test]
    fn test_parse_completion_not_json() {
        let err = parse_completion("<html>upstream error</html>").unwrap_err();
        assert_eq!(err.kind, CompletionErrorKind::Unknown);
        assert!(err.detail.contains("malformed"));
    }

    #[test]
    fn test_classify_401_auth() {
        assert_eq!(classify_status(401, ""), CompletionErrorKind::Auth);
        assert_eq!(classify_status(403, ""), CompletionErrorKind::Auth);
    }

    #[test]
    fn test_classify_429_rate_limit() {
        assert_eq!(
            classify_status(429, r#"{"error": {"message": "slow down"}}"#),
            CompletionErrorKind::RateLimit
        );
    }

    #[test]
    fn test_classify_429_quota() {
        assert_eq!(
            classify_status(429, r#"{"error": {"code": "insufficient_quota"}}"#),
            CompletionErrorKind::Quota
        );
    }

    #[test]
    fn test_classify_402_quota() {
        assert_eq!(classify_status(402, ""), CompletionErrorKind::Quota);
    }

    #[test]
    fn test_classify_5xx_unknown() {
        assert_eq!(classify_status(500, ""), CompletionErrorKind::Unknown);
        assert_eq!(classify_status(503, ""), CompletionErrorKind::Unknown);
    }
}
