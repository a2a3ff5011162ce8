//! Minimal chat-completion connector used by the planner and the final
//! answer synthesizer (spec §6 external interfaces).
//!
//! The mesh only needs a single request/response shape out of an LLM
//! provider: prompt in, text out. `LlmClient` abstracts that so the planner
//! and orchestrator can be tested against [`MockLlmClient`] without network
//! access.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Debug, Clone)]
pub enum LlmError {
    Http(String),
    Unavailable(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Http(msg) => write!(f, "LLM HTTP error: {}", msg),
            LlmError::Unavailable(msg) => write!(f, "LLM unavailable: {}", msg),
        }
    }
}

impl std::error::Error for LlmError {}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}

/// HTTP-backed [`LlmClient`] speaking an OpenAI-compatible chat completion API.
pub struct HttpLlmClient {
    endpoint: String,
    api_key: String,
    http: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionReply {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = ChatCompletionBody {
            model: &request.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(LlmError::Http(format!("status {}", resp.status())));
        }

        let parsed: ChatCompletionReply = resp
            .json()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Http("empty choices array".to_string()))?;

        Ok(ChatResponse { response: content })
    }
}

/// Scripted [`LlmClient`] for tests: returns canned responses in order, or an
/// error if the script is exhausted.
pub struct MockLlmClient {
    responses: tokio::sync::Mutex<std::collections::VecDeque<Result<String, String>>>,
}

impl MockLlmClient {
    pub fn new(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses: tokio::sync::Mutex::new(responses.into_iter().collect()),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut queue = self.responses.lock().await;
        match queue.pop_front() {
            Some(Ok(text)) => Ok(ChatResponse { response: text }),
            Some(Err(msg)) => Err(LlmError::Unavailable(msg)),
            None => Err(LlmError::Unavailable("mock script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_client_returns_scripted_responses_in_order() {
        let client = MockLlmClient::new(vec![Ok("first".to_string()), Ok("second".to_string())]);
        let req = ChatRequest {
            prompt: "hi".to_string(),
            model: "test-model".to_string(),
            temperature: 0.0,
            max_tokens: 10,
        };
        assert_eq!(client.complete(req.clone()).await.unwrap().response, "first");
        assert_eq!(client.complete(req).await.unwrap().response, "second");
    }
}
