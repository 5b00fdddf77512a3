//! # API Module
//!
//! Capability seams for the external model provider and their OpenAI-compatible
//! implementation.
//!
//! The retrieval core never talks to a provider directly. It depends on two
//! traits:
//!
//! - [`EmbeddingProvider`]: text → embedding vector.
//! - [`GenerationProvider`]: (model, ordered role-tagged messages) → reply text.
//!
//! [`OpenAiProvider`] implements both against any endpoint that speaks the
//! OpenAI REST API (OpenAI itself, a local llama.cpp/vLLM server, ...).
//! Provider failures come back as [`DocentError::EmbeddingProvider`] or
//! [`DocentError::GenerationProvider`] and are never retried here.
//!
//! [`with_cancel`] bounds any provider call by a [`CancellationToken`] and an
//! optional deadline so that an abandoned request surfaces as
//! [`DocentError::Cancelled`] / [`DocentError::Timeout`] instead of a provider
//! error.
//!
//! # Example
//!
//! ```no_run
//! use docent::api::{EmbeddingProvider, OpenAiProvider};
//! use docent::config::DocentConfig;
//!
//! # async fn run(config: DocentConfig) -> Result<(), docent::error::DocentError> {
//! let provider = OpenAiProvider::new(&config)?;
//! let vector = provider.embed("What is in the handbook?").await?;
//! assert_eq!(vector.len(), config.embedding_dimension);
//! # Ok(()) }
//! ```

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
        CreateEmbeddingRequestArgs, Role,
    },
};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::DocentConfig;
use crate::error::{DocentError, Result};
use crate::retrieval::ChatMessage;

/// Maps text to an embedding of the index dimension.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Produces a reply for an ordered list of role-tagged messages.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, model: &str, messages: &[ChatMessage]) -> Result<String>;
}

/// OpenAI-compatible provider for both embeddings and chat completions.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    embedding_model: String,
}

impl OpenAiProvider {
    /// Build a provider from configuration.
    ///
    /// When `request_timeout_secs` is set the underlying HTTP client enforces it
    /// on every request.
    pub fn new(config: &DocentConfig) -> Result<Self> {
        Ok(Self {
            client: create_client(config)?,
            embedding_model: config.embedding_model.clone(),
        })
    }
}

/// Creates a new OpenAI API client from configuration.
fn create_client(config: &DocentConfig) -> Result<Client<OpenAIConfig>> {
    let openai_config = OpenAIConfig::new()
        .with_api_key(config.api_key.clone())
        .with_api_base(config.api_base.clone());
    debug!("Client created for {}", config.api_base);

    let client = Client::with_config(openai_config);
    match config.request_timeout_secs {
        Some(secs) => {
            let http_client = reqwest::Client::builder()
                .timeout(Duration::from_secs(secs))
                .build()
                .map_err(|e| DocentError::Config(format!("HTTP client: {e}")))?;
            Ok(client.with_http_client(http_client))
        }
        None => Ok(client),
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(self.embedding_model.clone())
            .input(text)
            .build()
            .map_err(DocentError::embedding)?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(DocentError::embedding)?;

        response
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| DocentError::embedding("embedding response contained no data"))
    }
}

#[async_trait]
impl GenerationProvider for OpenAiProvider {
    async fn generate(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(
                messages
                    .iter()
                    .map(to_request_message)
                    .collect::<Vec<_>>(),
            )
            .build()
            .map_err(DocentError::generation)?;

        debug!("Sending chat request with {} messages", messages.len());

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(DocentError::generation)?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| DocentError::generation("completion contained no message content"))
    }
}

/// Convert a [`ChatMessage`] into the request type `async-openai` expects.
///
/// Roles other than system and assistant are sent as user messages.
#[allow(deprecated)]
fn to_request_message(message: &ChatMessage) -> ChatCompletionRequestMessage {
    match message.role {
        Role::System => ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
            content: ChatCompletionRequestSystemMessageContent::Text(message.content.clone()),
            name: None,
        }),
        Role::Assistant => {
            ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                    message.content.clone(),
                )),
                name: None,
                refusal: None,
                audio: None,
                tool_calls: None,
                function_call: None,
            })
        }
        _ => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
            content: ChatCompletionRequestUserMessageContent::Text(message.content.clone()),
            name: None,
        }),
    }
}

/// Run a provider call under a cancellation token and optional deadline.
///
/// Cancellation wins over a result that arrives at the same time.
pub async fn with_cancel<T, F>(
    call: F,
    cancel: &CancellationToken,
    deadline: Option<Duration>,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(DocentError::Cancelled);
    }

    let bounded = async {
        match deadline {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| DocentError::Timeout {
                    millis: limit.as_millis() as u64,
                })?,
            None => call.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DocentError::Cancelled),
        result = bounded => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn setup() {
        let _ = tracing_subscriber::fmt::try_init();
    }

    fn mock_config(api_base: String) -> DocentConfig {
        DocentConfig {
            api_key: "mock_api_key".to_string(),
            api_base,
            embedding_dimension: 3,
            ..DocentConfig::default()
        }
    }

    struct SlowEmbedder;

    #[async_trait]
    impl EmbeddingProvider for SlowEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![0.0; 3])
        }
    }

    #[tokio::test]
    async fn test_create_client() {
        setup();
        let config = mock_config("http://mock.api.base".to_string());
        assert!(create_client(&config).is_ok(), "Failed to create client");
    }

    #[tokio::test]
    async fn test_embed_parses_response() {
        setup();
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(200).json_body(json!({
                    "object": "list",
                    "model": "text-embedding-3-small",
                    "data": [{"object": "embedding", "index": 0, "embedding": [0.25, 0.5, 0.75]}],
                    "usage": {"prompt_tokens": 3, "total_tokens": 3}
                }));
            })
            .await;

        let provider = OpenAiProvider::new(&mock_config(server.base_url())).unwrap();
        let vector = provider.embed("hello").await.unwrap();

        mock.assert_async().await;
        assert_eq!(vector, vec![0.25, 0.5, 0.75]);
    }

    #[tokio::test]
    async fn test_embed_failure_is_embedding_error() {
        setup();
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(400).json_body(json!({
                    "error": {
                        "message": "bad input",
                        "type": "invalid_request_error",
                        "param": null,
                        "code": null
                    }
                }));
            })
            .await;

        let provider = OpenAiProvider::new(&mock_config(server.base_url())).unwrap();
        let err = provider.embed("hello").await.unwrap_err();
        assert!(matches!(err, DocentError::EmbeddingProvider { .. }));
    }

    #[tokio::test]
    async fn test_generate_returns_first_choice() {
        setup();
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({
                    "id": "chatcmpl-1",
                    "object": "chat.completion",
                    "created": 1700000000,
                    "model": "gpt-4o-mini",
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": "Forty-two."},
                        "finish_reason": "stop",
                        "logprobs": null
                    }],
                    "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
                }));
            })
            .await;

        let provider = OpenAiProvider::new(&mock_config(server.base_url())).unwrap();
        let messages = vec![
            ChatMessage::system("You are terse."),
            ChatMessage::system("Here is some relevant context: \nDocument: 42"),
            ChatMessage::user("What is the answer?"),
        ];
        let reply = provider.generate("gpt-4o-mini", &messages).await.unwrap();

        mock.assert_async().await;
        assert_eq!(reply, "Forty-two.");
    }

    #[test]
    fn test_to_request_message_roles() {
        let system = to_request_message(&ChatMessage::system("s"));
        assert!(matches!(system, ChatCompletionRequestMessage::System(_)));
        let user = to_request_message(&ChatMessage::user("u"));
        assert!(matches!(user, ChatCompletionRequestMessage::User(_)));
        let assistant = to_request_message(&ChatMessage::assistant("a"));
        assert!(matches!(
            assistant,
            ChatCompletionRequestMessage::Assistant(_)
        ));
    }

    #[tokio::test]
    async fn test_with_cancel_reports_cancellation() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = with_cancel(SlowEmbedder.embed("x"), &cancel, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DocentError::Cancelled));
    }

    #[tokio::test]
    async fn test_with_cancel_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = with_cancel(async { Ok::<_, DocentError>(1) }, &cancel, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DocentError::Cancelled));
    }

    #[tokio::test]
    async fn test_with_cancel_deadline() {
        let cancel = CancellationToken::new();
        let err = with_cancel(
            SlowEmbedder.embed("x"),
            &cancel,
            Some(Duration::from_millis(20)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DocentError::Timeout { millis: 20 }));
    }

    #[tokio::test]
    async fn test_with_cancel_passes_result_through() {
        let cancel = CancellationToken::new();
        let value = with_cancel(
            async { Ok::<_, DocentError>(7) },
            &cancel,
            Some(Duration::from_secs(1)),
        )
        .await
        .unwrap();
        assert_eq!(value, 7);
    }
}
