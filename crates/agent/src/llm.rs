use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use trustline_core::config::{AppConfig, EmbeddingBackend, LlmConfig, LlmProvider};
use trustline_core::knowledge::{Embedder, EmbeddingError, HashingEmbedder};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One call to the text-generation service. The prompt already carries the
/// retrieved knowledge and the conversation window.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("text generation failed transiently: {0}")]
    Transient(String),
    #[error("text generation failed: {0}")]
    Fatal(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

fn http_client(timeout_secs: u64) -> Result<Client, LlmError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|error| LlmError::Fatal(format!("could not build http client: {error}")))
}

fn request_error(error: reqwest::Error) -> LlmError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        LlmError::Transient(error.to_string())
    } else {
        LlmError::Fatal(error.to_string())
    }
}

fn status_error(status: StatusCode, body: &str) -> LlmError {
    let message = format!("provider returned {status}: {}", body.chars().take(200).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        LlmError::Transient(message)
    } else {
        LlmError::Fatal(message)
    }
}

fn trimmed_base(base_url: Option<&str>, fallback: &str) -> String {
    base_url.unwrap_or(fallback).trim_end_matches('/').to_owned()
}

/// Chat-completions client for OpenAI and for servers speaking the same
/// protocol (Ollama exposes it under `/v1`).
pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

impl OpenAiCompatibleClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: trimmed_base(config.base_url.as_deref(), OPENAI_BASE_URL),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let body = json!({
            "model": self.model,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
        });

        let mut builder = self.client.post(format!("{}/v1/chat/completions", self.base_url));
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }
        let response = builder.json(&body).send().await.map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let payload: Value = response.json().await.map_err(request_error)?;
        let content = payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| LlmError::Fatal("response has no choices[0].message.content".to_owned()))?;
        debug!(event_name = "llm.completed", model = %self.model, chars = content.len(), "completion received");
        Ok(content.trim().to_owned())
    }
}

pub struct AnthropicClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: SecretString,
}

impl AnthropicClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| LlmError::Fatal("llm.api_key is required for anthropic".to_owned()))?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: trimmed_base(config.base_url.as_deref(), ANTHROPIC_BASE_URL),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let body = json!({
            "model": self.model,
            "system": request.system,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": [{ "role": "user", "content": request.prompt }],
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let payload: Value = response.json().await.map_err(request_error)?;
        let text: String = payload
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(LlmError::Fatal("response has no text content".to_owned()));
        }
        Ok(text.trim().to_owned())
    }
}

pub fn client_from_config(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    match config.provider {
        LlmProvider::OpenAi => {
            if config.api_key.is_none() {
                return Err(LlmError::Fatal("llm.api_key is required for openai".to_owned()));
            }
            Ok(Arc::new(OpenAiCompatibleClient::new(config)?))
        }
        LlmProvider::Ollama => Ok(Arc::new(OpenAiCompatibleClient::new(config)?)),
        LlmProvider::Anthropic => Ok(Arc::new(AnthropicClient::new(config)?)),
    }
}

/// Remote embeddings over the OpenAI `/v1/embeddings` protocol.
pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &LlmConfig, dimensions: usize) -> Result<Self, LlmError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: trimmed_base(config.base_url.as_deref(), OPENAI_BASE_URL),
            model: config.embedding_model.clone(),
            api_key: config.api_key.clone(),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .json(&json!({ "model": self.model, "input": texts }));
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }
        let response =
            builder.send().await.map_err(|error| EmbeddingError::Request(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(EmbeddingError::Request(format!("provider returned {status}")));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|error| EmbeddingError::InvalidResponse(error.to_string()))?;
        let data = payload
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| EmbeddingError::InvalidResponse("missing `data` array".to_owned()))?;
        if data.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "{} vectors for {} inputs",
                data.len(),
                texts.len()
            )));
        }

        data.iter()
            .map(|item| {
                let vector: Vec<f32> = item
                    .get("embedding")
                    .and_then(Value::as_array)
                    .ok_or_else(|| EmbeddingError::InvalidResponse("missing `embedding`".to_owned()))?
                    .iter()
                    .map(|value| value.as_f64().unwrap_or(0.0) as f32)
                    .collect();
                if vector.len() != self.dimensions {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: self.dimensions,
                        actual: vector.len(),
                    });
                }
                Ok(vector)
            })
            .collect()
    }
}

pub fn embedder_from_config(config: &AppConfig) -> Result<Arc<dyn Embedder>, LlmError> {
    match config.embedding.backend {
        EmbeddingBackend::Hashing => Ok(Arc::new(HashingEmbedder::new(config.embedding.dimensions))),
        EmbeddingBackend::Remote => {
            Ok(Arc::new(OpenAiEmbedder::new(&config.llm, config.embedding.dimensions)?))
        }
    }
}

/// Replays canned completions in order and records every request it saw.
#[derive(Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
}

impl ScriptedLlmClient {
    pub fn new(responses: impl IntoIterator<Item = Result<String, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn replying(texts: impl IntoIterator<Item = &'static str>) -> Self {
        Self::new(texts.into_iter().map(|text| Ok(text.to_owned())))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Fatal("script exhausted".to_owned())))
    }
}
