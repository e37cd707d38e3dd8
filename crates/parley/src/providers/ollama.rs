use super::base::{ChatModel, ChatResponse, StreamEvent, StreamingChatModel, Usage};
use super::configs::OllamaProviderConfig;
use super::utils::{
    messages_to_openai_spec, openai_response_to_message, tools_to_openai_spec, usage_from_openai,
};
use crate::errors::ProviderError;
use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::sse::decode_stream;
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

pub const OLLAMA_HOST: &str = "http://localhost:11434";
pub const OLLAMA_MODEL: &str = "qwen3:0.6b";

const STREAM_BUFFER: usize = 100;

/// Client for the OpenAI-compatible chat completions API exposed by Ollama.
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone)]
pub struct OllamaProvider {
    client: Client,
    config: OllamaProviderConfig,
}

impl OllamaProvider {
    pub fn new(config: OllamaProviderConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OllamaProviderConfig {
        &self.config
    }

    fn url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        )
    }

    fn build_payload(&self, system: &str, messages: &[Message], tools: &[Tool]) -> Result<Value> {
        let mut messages_array = Vec::new();
        if !system.is_empty() {
            messages_array.push(json!({
                "role": "system",
                "content": system
            }));
        }
        messages_array.extend(messages_to_openai_spec(messages));

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_array
        });
        let object = payload.as_object_mut().unwrap();

        let tools_spec = tools_to_openai_spec(tools)?;
        if !tools_spec.is_empty() {
            object.insert("tools".to_string(), json!(tools_spec));
        }
        if let Some(temp) = self.config.temperature {
            object.insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = self.config.max_tokens {
            object.insert("max_tokens".to_string(), json!(tokens));
        }

        Ok(payload)
    }

    fn timeout_secs(&self) -> u64 {
        self.config.timeout.as_secs()
    }

    async fn post(&self, payload: Value) -> Result<Value, ProviderError> {
        if self.config.log_requests {
            debug!(url = %self.url(), %payload, "chat request");
        }

        let response = self
            .client
            .post(self.url())
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout_secs()))?;

        match response.status() {
            StatusCode::OK => {
                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| ProviderError::from_reqwest(e, self.timeout_secs()))?;
                if self.config.log_responses {
                    debug!(%body, "chat response");
                }
                Ok(body)
            }
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                Err(ProviderError::Server(status.as_u16()))
            }
            status => Err(ProviderError::Request {
                status: status.as_u16(),
                payload: payload.to_string(),
            }),
        }
    }

    /// Runs one streamed completion, pushing partials into `tx`. Returns the
    /// final response, or the error to report as the terminal event.
    async fn run_stream(
        &self,
        messages: Vec<Message>,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<ChatResponse, ProviderError> {
        let mut payload = self
            .build_payload("", &messages, &[])
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        payload["stream"] = json!(true);
        payload["stream_options"] = json!({"include_usage": true});

        if self.config.log_requests {
            debug!(url = %self.url(), %payload, "streaming chat request");
        }

        let response = self
            .client
            .post(self.url())
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout_secs()))?;

        let status = response.status();
        if status.as_u16() >= 500 || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::Server(status.as_u16()));
        }
        if !status.is_success() {
            return Err(ProviderError::Request {
                status: status.as_u16(),
                payload: payload.to_string(),
            });
        }

        let mut events = decode_stream(response.bytes_stream());
        let mut text = String::new();
        let mut finish_reason = None;
        let mut usage = Usage::default();

        while let Some(event) = events.next().await {
            let event = event.map_err(|e| ProviderError::from_reqwest(e, self.timeout_secs()))?;
            if event.data == "[DONE]" {
                return Ok(ChatResponse {
                    message: Message::assistant().with_text(text),
                    usage,
                    finish_reason,
                });
            }

            let chunk: Value = serde_json::from_str(&event.data).map_err(|e| {
                ProviderError::InvalidResponse(format!("Bad stream chunk {}: {}", event.data, e))
            })?;
            if self.config.log_responses {
                debug!(%chunk, "stream chunk");
            }
            if let Some(error) = chunk.get("error") {
                return Err(ProviderError::InvalidResponse(error.to_string()));
            }

            let choice = &chunk["choices"][0];
            if let Some(token) = choice["delta"]["content"].as_str() {
                if !token.is_empty() {
                    text.push_str(token);
                    if tx.send(StreamEvent::Partial(token.to_string())).await.is_err() {
                        // Receiver is gone, nobody is listening for the terminal event either
                        break;
                    }
                }
            }
            if let Some(reason) = choice["finish_reason"].as_str() {
                finish_reason = Some(reason.to_string());
            }
            if chunk.get("usage").is_some_and(|u| !u.is_null()) {
                usage = usage_from_openai(&chunk);
            }
        }

        if finish_reason.is_some() {
            Ok(ChatResponse {
                message: Message::assistant().with_text(text),
                usage,
                finish_reason,
            })
        } else {
            Err(ProviderError::InvalidResponse(
                "Stream ended before the model finished".to_string(),
            ))
        }
    }
}

#[async_trait]
impl ChatModel for OllamaProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let payload = self.build_payload(system, messages, tools)?;
        let response = self.post(payload).await?;

        let message = openai_response_to_message(&response)?;
        let usage = usage_from_openai(&response);

        Ok((message, usage))
    }
}

impl StreamingChatModel for OllamaProvider {
    fn stream(&self, messages: Vec<Message>) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let provider = self.clone();

        tokio::spawn(async move {
            let terminal = match provider.run_stream(messages, &tx).await {
                Ok(response) => StreamEvent::Complete(response),
                Err(e) => {
                    tracing::error!("Streaming chat failed: {}", e);
                    StreamEvent::Error(e.to_string())
                }
            };
            let _ = tx.send(terminal).await;
        });

        rx
    }
}
