use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::config::{ApiFlavor, CompletionConfig};
use super::{wire, CompletionError};
use crate::messages::Message;

/// Everything one completion call needs, captured when the request is sent
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub config: CompletionConfig,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>, config: CompletionConfig) -> Self {
        Self { messages, config }
    }
}

/// Performs a single chat completion and returns the reply text
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, CompletionError>;
}

/// reqwest-backed transport.
///
/// The client (and its connection pool) is created once here and released
/// when the transport is dropped.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, CompletionError> {
        let client = Client::builder()
            .build()
            .map_err(|e| CompletionError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        request: &ChatRequest,
        builder: reqwest::RequestBuilder,
        body: &T,
    ) -> Result<String, CompletionError> {
        let response = builder
            .timeout(request.config.timeout())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(text)
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn complete(&self, request: &ChatRequest) -> Result<String, CompletionError> {
        let config = &request.config;

        match config.flavor {
            ApiFlavor::OpenAi => {
                let url = config.endpoint("chat/completions");
                debug!("POST {} (model {})", url, config.model);

                let mut builder = self.client.post(&url);
                if !config.api_key.is_empty() {
                    builder = builder.bearer_auth(&config.api_key);
                }

                let body = wire::encode_openai(
                    &config.model,
                    &request.messages,
                    config.temperature,
                    config.max_tokens,
                );
                let text = self.post_json(request, builder, &body).await?;
                wire::parse_openai(&text)
            }
            ApiFlavor::Gemini => {
                let url = config.endpoint(&wire::gemini_path(&config.model));
                debug!("POST {} (model {})", url, config.model);

                let builder = self
                    .client
                    .post(&url)
                    .query(&[("key", config.api_key.as_str())]);

                let body =
                    wire::encode_gemini(&request.messages, config.temperature, config.max_tokens);
                let text = self.post_json(request, builder, &body).await?;
                wire::parse_gemini(&text)
            }
        }
    }
}
