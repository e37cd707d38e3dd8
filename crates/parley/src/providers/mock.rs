use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{ChatModel, ChatResponse, StreamEvent, StreamingChatModel, Usage};

/// A mock provider that returns pre-configured responses for testing, and
/// records every history it was asked to complete.
#[derive(Clone, Default)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<Message>>>,
    pub requests: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn next_response(&self, messages: &[Message]) -> Message {
        self.requests.lock().unwrap().push(messages.to_vec());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            // Return empty response if no more pre-configured responses
            Message::assistant().with_text("")
        } else {
            responses.remove(0)
        }
    }
}

#[async_trait]
impl ChatModel for MockProvider {
    async fn complete(
        &self,
        _system: &str,
        messages: &[Message],
        _tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        Ok((self.next_response(messages), Usage::default()))
    }
}

impl StreamingChatModel for MockProvider {
    fn stream(&self, messages: Vec<Message>) -> mpsc::Receiver<StreamEvent> {
        let message = self.next_response(&messages);
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for word in message.text().split_inclusive(' ') {
                let _ = tx.send(StreamEvent::Partial(word.to_string())).await;
            }
            let _ = tx
                .send(StreamEvent::Complete(ChatResponse {
                    message,
                    usage: Usage::default(),
                    finish_reason: Some("stop".to_string()),
                }))
                .await;
        });
        rx
    }
}
