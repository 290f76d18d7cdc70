//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, Azure OpenAI (via proxy), Ollama, vLLM, Together AI,
//! and any endpoint exposing `/embeddings` and `/chat/completions`.
//!
//! One provider instance serves both roles the query pipeline needs:
//! - [`EmbeddingProvider`] via `POST {base}/embeddings`
//! - [`AnswerSynthesizer`] via `POST {base}/chat/completions`

use async_trait::async_trait;
use educore_config::{ProviderConfig, QueryConfig};
use educore_core::error::ProviderError;
use educore_core::provider::{AnswerSynthesizer, CompletionRequest, EmbeddingProvider};
use serde::Deserialize;
use tracing::{debug, warn};

/// Default system instruction sent with every completion.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are Educore Query Assistant. Be concise and cite sources when possible.";

/// An OpenAI-compatible embedding and chat-completion client.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    embedding_model: String,
    completion_model: String,
    system_prompt: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            embedding_model: "text-embedding-3-large".into(),
            completion_model: "gpt-4.1-mini".into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            client,
        })
    }

    /// Build from the `[provider]` and `[query]` config sections.
    pub fn from_config(provider: &ProviderConfig, query: &QueryConfig) -> Result<Self, ProviderError> {
        let api_key = provider.api_key.clone().ok_or_else(|| {
            ProviderError::NotConfigured(
                "no API key; set EDUCORE_API_KEY or provider.api_key".into(),
            )
        })?;

        Ok(Self::new("openai", &provider.api_url, api_key)?
            .with_models(&provider.embedding_model, &provider.completion_model)
            .with_system_prompt(&query.system_prompt))
    }

    pub fn with_models(
        mut self,
        embedding_model: impl Into<String>,
        completion_model: impl Into<String>,
    ) -> Self {
        self.embedding_model = embedding_model.into();
        self.completion_model = completion_model.into();
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// POST a JSON body and map non-success statuses to provider errors.
    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/{path}", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if !(200..300).contains(&status) {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": text,
            "encoding_format": "float",
        });

        debug!(provider = %self.name, model = %self.embedding_model, "Sending embedding request");

        let response = self.post_json("embeddings", &body).await?;
        let api_resp: EmbeddingApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("embedding response: {e}")))?;

        api_resp
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("no embedding in response".into()))
    }
}

#[async_trait]
impl AnswerSynthesizer for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": self.completion_model,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": request.prompt },
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": false,
        });

        debug!(provider = %self.name, model = %self.completion_model, "Sending completion request");

        let response = self.post_json("chat/completions", &body).await?;
        let api_response: ChatApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("completion response: {e}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".into()))?;

        Ok(choice.message.content.unwrap_or_default().trim().to_string())
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Deserialize)]
struct ChatApiResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(base_url: &str) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new("test", base_url, "sk-test").unwrap()
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let p = provider("https://api.example.com/v1/");
        assert_eq!(p.base_url, "https://api.example.com/v1");
    }

    #[test]
    fn from_config_requires_api_key() {
        let provider_cfg = ProviderConfig::default();
        let query_cfg = QueryConfig::default();
        let err = OpenAiCompatProvider::from_config(&provider_cfg, &query_cfg)
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn from_config_applies_models() {
        let provider_cfg = ProviderConfig {
            api_key: Some("sk".into()),
            embedding_model: "embed-x".into(),
            completion_model: "chat-y".into(),
            ..ProviderConfig::default()
        };
        let p = OpenAiCompatProvider::from_config(&provider_cfg, &QueryConfig::default()).unwrap();
        assert_eq!(p.embedding_model, "embed-x");
        assert_eq!(p.completion_model, "chat-y");
        assert!(p.system_prompt.starts_with("You are Educore Query Assistant"));
    }

    #[test]
    fn parse_chat_response() {
        let raw = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"Hi"}}]}"#;
        let parsed: ChatApiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Hi"));
    }

    async fn json_mock(
        server: &mut mockito::ServerGuard,
        path: &str,
        status: usize,
        body: &str,
    ) -> mockito::Mock {
        server
            .mock("POST", path)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn embed_reads_first_vector() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/embeddings")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJson(
                serde_json::json!({"model": "text-embedding-3-large", "input": "hello"}),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":[{"index":0,"embedding":[0.1,0.2,0.3]}],"model":"m"}"#)
            .create_async()
            .await;

        let embedding = provider(&server.url()).embed("hello").await.unwrap();
        assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn complete_returns_trimmed_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = json_mock(
            &mut server,
            "/chat/completions",
            200,
            r#"{"choices":[{"message":{"role":"assistant","content":"  Answer.\n"}}]}"#,
        )
        .await;

        let answer = provider(&server.url())
            .complete(CompletionRequest::new("prompt"))
            .await
            .unwrap();
        assert_eq!(answer, "Answer.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn status_codes_map_to_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/embeddings")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"input": "limited"})))
            .with_status(429)
            .with_header("retry-after", "7")
            .with_body("{}")
            .create_async()
            .await;
        server
            .mock("POST", "/embeddings")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"input": "denied"})))
            .with_status(401)
            .with_body("{}")
            .create_async()
            .await;
        json_mock(&mut server, "/chat/completions", 503, "overloaded").await;

        let p = provider(&server.url());
        let err = p.embed("limited").await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { retry_after_secs: 7 }));

        let err = p.embed("denied").await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));

        let err = p.complete(CompletionRequest::new("p")).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn empty_embedding_is_invalid() {
        let mut server = mockito::Server::new_async().await;
        json_mock(&mut server, "/embeddings", 200, r#"{"data":[]}"#).await;

        let err = provider(&server.url()).embed("x").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }
}
