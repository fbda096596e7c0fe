//! Language-model providers.
//!
//! The engine only needs two things from a provider: a single completion string,
//! or a stream of fragments that ends when the completion is done.

use crate::config::ProviderConfig;
use async_trait::async_trait;
use claude::{Claude, Message, Request, StreamEvent};
use futures::StreamExt;
use std::pin::Pin;
use std::time::Duration;
use tokio_stream::Stream;

/// Errors from a provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// The provider reported an error inside an open stream.
    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<claude::Error> for ProviderError {
    fn from(err: claude::Error) -> Self {
        match err {
            claude::Error::Api { status, message } => ProviderError::Api { status, message },
            claude::Error::Network(m) => ProviderError::Network(m),
            claude::Error::Parse(m) => ProviderError::Parse(m),
            claude::Error::Config(m) => ProviderError::Configuration(m),
        }
    }
}

/// One piece of a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// The model that is serving the request, as reported upstream.
    Model(String),
    Text(String),
}

/// Fragments of a streamed completion, in order.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<Fragment, ProviderError>> + Send>>;

/// A request for a completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_payload: String,
    pub temperature: f32,
}

/// A finished completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// Model that actually served the request.
    pub model: String,
}

/// Core trait for language-model providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a completion request and wait for the whole answer.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError>;

    /// Send a streaming completion request.
    ///
    /// The stream may lead with a [`Fragment::Model`] naming the served model.
    /// Dropping the returned stream must release the upstream connection.
    async fn stream(&self, request: CompletionRequest) -> Result<TextStream, ProviderError>;

    /// Provider name recorded in generation logs.
    fn name(&self) -> &str;

    /// Model requests are sent to.
    fn model(&self) -> &str;
}

/// Anthropic's Messages API via the `claude` client.
pub struct ClaudeProvider {
    client: Claude,
    max_tokens: usize,
}

impl ClaudeProvider {
    pub fn new(client: Claude, max_tokens: usize) -> Self {
        Self { client, max_tokens }
    }

    /// Build a provider from configuration.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .resolved_api_key()
            .ok_or_else(|| ProviderError::Configuration("API key not configured".into()))?;

        let mut client = Claude::new(api_key)?
            .with_model(&config.model)
            .with_timeout(Duration::from_secs(config.timeout_secs))?;
        if let Some(base_url) = &config.base_url {
            client = client.with_base_url(base_url);
        }
        Ok(Self::new(client, config.max_tokens))
    }

    fn build_request(&self, request: CompletionRequest) -> Request {
        Request::new(vec![Message::user(request.user_payload)])
            .with_system(request.system_prompt)
            .with_temperature(request.temperature)
            .with_max_tokens(self.max_tokens)
    }
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let response = self.client.complete(self.build_request(request)).await?;
        tracing::debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            stop_reason = ?response.stop_reason,
            "completion received"
        );
        Ok(Completion {
            text: response.text,
            model: response.model,
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<TextStream, ProviderError> {
        let events = self.client.stream(self.build_request(request)).await?;

        let text = events
            .take_while(|event| futures::future::ready(!matches!(event, Ok(StreamEvent::MessageStop))))
            .filter_map(|event| {
                futures::future::ready(match event {
                    Ok(StreamEvent::MessageStart { model, .. }) => Some(Ok(Fragment::Model(model))),
                    Ok(StreamEvent::TextDelta { text, .. }) => Some(Ok(Fragment::Text(text))),
                    Ok(StreamEvent::Error { message }) => Some(Err(ProviderError::Stream(message))),
                    Ok(_) => None,
                    Err(e) => Some(Err(e.into())),
                })
            });

        Ok(Box::pin(text))
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        self.client.model()
    }
}

/// Stands in when no provider could be configured; every request fails.
pub struct UnavailableProvider {
    reason: String,
}

impl UnavailableProvider {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for UnavailableProvider {
    async fn complete(&self, _request: CompletionRequest) -> Result<Completion, ProviderError> {
        Err(ProviderError::Configuration(self.reason.clone()))
    }

    async fn stream(&self, _request: CompletionRequest) -> Result<TextStream, ProviderError> {
        Err(ProviderError::Configuration(self.reason.clone()))
    }

    fn name(&self) -> &str {
        "unavailable"
    }

    fn model(&self) -> &str {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_key() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ANTHROPIC_API_KEY", "");
            let config = ProviderConfig {
                api_key: Some(String::new()),
                ..ProviderConfig::default()
            };
            assert!(matches!(
                ClaudeProvider::from_config(&config),
                Err(ProviderError::Configuration(_))
            ));
            Ok(())
        });
    }

    #[test]
    fn test_from_config_falls_back_to_environment_key() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ANTHROPIC_API_KEY", "env-key");
            let config = ProviderConfig {
                api_key: None,
                base_url: Some("http://localhost:1/v1".into()),
                ..ProviderConfig::default()
            };
            assert!(ClaudeProvider::from_config(&config).is_ok());
            Ok(())
        });
    }

    #[test]
    fn test_from_config_uses_model() {
        let config = ProviderConfig {
            api_key: Some("test-key".into()),
            model: "claude-test".into(),
            base_url: Some("http://localhost:1/v1".into()),
            ..ProviderConfig::default()
        };
        let provider = ClaudeProvider::from_config(&config).unwrap();
        assert_eq!(provider.model(), "claude-test");
        assert_eq!(provider.name(), "anthropic");
    }

    #[tokio::test]
    async fn test_unavailable_provider_reports_reason() {
        let provider = UnavailableProvider::new("API key not configured");
        let request = CompletionRequest {
            system_prompt: String::new(),
            user_payload: String::new(),
            temperature: 0.5,
        };
        let err = provider.complete(request).await.unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: API key not configured");
    }

    #[test]
    fn test_claude_errors_convert() {
        let err: ProviderError = claude::Error::Api {
            status: 500,
            message: "boom".into(),
        }
        .into();
        assert_eq!(err.to_string(), "API error (500): boom");
    }
}
