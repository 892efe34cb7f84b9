use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};

use crate::config::ProviderConfig;
use crate::error::Result;
use crate::types::*;

/// LLM client — multi-provider streaming.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ProviderConfig,
        params: GenerationParams,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;

    /// Run a request to completion and return the concatenated text.
    fn complete(
        &self,
        config: &ProviderConfig,
        params: GenerationParams,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<String>> {
        let config = config.clone();
        Box::pin(async move {
            let mut stream = self.chat_stream(&config, params, messages).await?;
            let mut text = String::new();
            while let Some(delta) = stream.next().await {
                if let StreamDelta::TextDelta(chunk) = delta? {
                    text.push_str(&chunk);
                }
            }
            Ok(text)
        })
    }
}
