use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::message::Message;
use crate::models::tool::Tool;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

impl std::ops::Add for Usage {
    type Output = Usage;

    /// Counts missing on both sides stay missing
    fn add(self, other: Usage) -> Usage {
        fn sum(a: Option<i32>, b: Option<i32>) -> Option<i32> {
            match (a, b) {
                (None, None) => None,
                (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
            }
        }
        Usage {
            input_tokens: sum(self.input_tokens, other.input_tokens),
            output_tokens: sum(self.output_tokens, other.output_tokens),
            total_tokens: sum(self.total_tokens, other.total_tokens),
        }
    }
}

/// The final result of a streamed generation
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub message: Message,
    pub usage: Usage,
    pub finish_reason: Option<String>,
}

/// What a streaming call emits. `Complete` and `Error` are terminal: exactly one
/// of them is sent, and nothing follows it.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Partial(String),
    Complete(ChatResponse),
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Partial(_))
    }
}

/// A chat model that answers in one blocking round trip
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate the next message given the system prompt, history and tools
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)>;

    /// Send a single user prompt and return the text of the answer
    async fn chat(&self, prompt: &str) -> Result<String> {
        let messages = vec![Message::user().with_text(prompt)];
        let (message, _) = self.complete("", &messages, &[]).await?;
        Ok(message.text())
    }
}

/// A chat model that delivers its answer token by token
pub trait StreamingChatModel: Send + Sync {
    /// Start a generation for the given history. The call returns immediately;
    /// a background task feeds the returned channel.
    fn stream(&self, messages: Vec<Message>) -> mpsc::Receiver<StreamEvent>;

    fn stream_prompt(&self, prompt: &str) -> mpsc::Receiver<StreamEvent> {
        self.stream(vec![Message::user().with_text(prompt)])
    }
}

/// Drain a stream, handing each partial to `on_partial`, and resolve to the
/// complete assistant message.
pub async fn stream_to_message<F>(
    mut rx: mpsc::Receiver<StreamEvent>,
    mut on_partial: F,
) -> Result<Message>
where
    F: FnMut(&str),
{
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Partial(token) => on_partial(&token),
            StreamEvent::Complete(response) => return Ok(response.message),
            StreamEvent::Error(e) => return Err(anyhow!(e)),
        }
    }
    Err(anyhow!("Stream closed before completion"))
}
