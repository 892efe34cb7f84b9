use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use grove_core::config::ProviderConfig;
use grove_core::error::{GroveError, Result};
use grove_core::traits::LlmClient;
use grove_core::types::*;

use crate::streaming::{SseEvent, SseStream};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: Client,
    endpoint: String,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(http: Client, endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
}

#[derive(Serialize, Debug, PartialEq)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseData {
    MessageStart { message: MessageInfo },
    ContentBlockStart {},
    ContentBlockDelta { delta: DeltaInfo },
    ContentBlockStop {},
    MessageDelta {
        delta: MessageDeltaInfo,
        #[serde(default)]
        usage: Option<UsageInfo>,
    },
    MessageStop {},
    Ping {},
    Error { error: ApiError },
}

#[derive(Deserialize, Debug)]
struct MessageInfo {
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct UsageInfo {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DeltaInfo {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct MessageDeltaInfo {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

/// Split out the system prompt; Anthropic takes it as a top-level field.
/// Multiple system messages are joined.
fn convert_messages(messages: Vec<ChatMessage>) -> (Option<String>, Vec<ApiMessage>) {
    let mut system: Option<String> = None;
    let mut api_msgs = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => {
                system = Some(match system {
                    Some(prev) => format!("{}\n\n{}", prev, msg.content),
                    None => msg.content,
                });
            }
            Role::User => api_msgs.push(ApiMessage {
                role: "user",
                content: msg.content,
            }),
            Role::Assistant => api_msgs.push(ApiMessage {
                role: "assistant",
                content: msg.content,
            }),
        }
    }

    (system, api_msgs)
}

fn parse_sse_to_delta(event: SseEvent) -> Option<Result<StreamDelta>> {
    let data: SseData = match serde_json::from_str(&event.data) {
        Ok(data) => data,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse SSE data");
            return None;
        }
    };

    match data {
        SseData::MessageStart { message } => message.usage.map(|usage| {
            Ok(StreamDelta::Usage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
            })
        }),
        SseData::ContentBlockDelta { delta } => match delta {
            DeltaInfo::TextDelta { text } => Some(Ok(StreamDelta::TextDelta(text))),
            DeltaInfo::Other => None,
        },
        SseData::MessageDelta { delta, usage } => {
            if let Some(usage) = usage {
                debug!(output_tokens = usage.output_tokens, "Token usage");
            }
            let stop = match delta.stop_reason.as_deref() {
                Some("end_turn") => StopReason::EndTurn,
                Some("max_tokens") => StopReason::MaxTokens,
                Some("stop_sequence") => StopReason::StopSequence,
                _ => return None,
            };
            Some(Ok(StreamDelta::Stop(stop)))
        }
        SseData::Error { error } => Some(Err(GroveError::LlmStream(error.message))),
        SseData::ContentBlockStart {}
        | SseData::ContentBlockStop {}
        | SseData::MessageStop {}
        | SseData::Ping {} => None,
    }
}

impl LlmClient for AnthropicClient {
    fn chat_stream(
        &self,
        config: &ProviderConfig,
        params: GenerationParams,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let model = config.model.clone();

        Box::pin(async move {
            let (system, api_messages) = convert_messages(messages);
            let body = AnthropicRequest {
                model,
                max_tokens: params.max_tokens,
                temperature: (params.temperature > 0.0).then_some(params.temperature),
                messages: api_messages,
                system,
                stream: true,
            };

            debug!(endpoint = %self.endpoint, model = %body.model, "Sending messages request");
            let response = self
                .http
                .post(&self.endpoint)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| GroveError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown error".to_string());
                return Err(GroveError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let delta_stream = SseStream::new(response.bytes_stream()).filter_map(|event| async move {
                match event {
                    Ok(event) => parse_sse_to_delta(event),
                    Err(e) => Some(Err(e)),
                }
            });

            Ok(Box::pin(delta_stream) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event_type: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn test_system_prompt_lifted() {
        let (system, msgs) = convert_messages(vec![
            ChatMessage::system("a"),
            ChatMessage::system("b"),
            ChatMessage::user("q"),
        ]);
        assert_eq!(system.as_deref(), Some("a\n\nb"));
        assert_eq!(msgs, vec![ApiMessage { role: "user", content: "q".into() }]);
    }

    #[test]
    fn test_parse_text_delta() {
        let delta = parse_sse_to_delta(event(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#,
        ));
        assert!(matches!(delta, Some(Ok(StreamDelta::TextDelta(ref t))) if t == "hi"));
    }

    #[test]
    fn test_parse_stop_and_error() {
        let stop = parse_sse_to_delta(event(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":4}}"#,
        ));
        assert!(matches!(stop, Some(Ok(StreamDelta::Stop(StopReason::EndTurn)))));

        let err = parse_sse_to_delta(event(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        ));
        assert!(matches!(err, Some(Err(GroveError::LlmStream(ref m))) if m == "Overloaded"));
    }

    #[test]
    fn test_ignored_events() {
        assert!(parse_sse_to_delta(event(r#"{"type":"ping"}"#)).is_none());
        assert!(parse_sse_to_delta(event(r#"{"type":"message_stop"}"#)).is_none());
        assert!(parse_sse_to_delta(event(
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#
        ))
        .is_none());
    }
}
