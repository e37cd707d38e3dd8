//! Bounded conversational memory.
//!
//! Both windows keep messages in insertion order, hold at most one system
//! message (always first), and evict the oldest non-system messages once the
//! window overflows. The newest message is never evicted, unless it is a tool
//! response whose request was just evicted.

use std::sync::Arc;

use crate::models::message::Message;
use crate::models::role::Role;
use crate::token_counter::TokenCountEstimator;

pub trait ChatMemory: Send + Sync {
    fn add(&mut self, message: Message);

    /// The messages currently in the window, system message first
    fn messages(&self) -> Vec<Message>;

    fn clear(&mut self);
}

/// Keeps the most recent `max_messages` messages
pub struct MessageWindowChatMemory {
    max_messages: usize,
    messages: Vec<Message>,
}

impl MessageWindowChatMemory {
    pub fn with_max_messages(max_messages: usize) -> Self {
        Self {
            max_messages,
            messages: Vec::new(),
        }
    }
}

impl ChatMemory for MessageWindowChatMemory {
    fn add(&mut self, message: Message) {
        if !push_message(&mut self.messages, message) {
            return;
        }
        let max = self.max_messages;
        evict_while(&mut self.messages, |messages| messages.len() > max);
    }

    fn messages(&self) -> Vec<Message> {
        self.messages.clone()
    }

    fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Keeps as many recent messages as fit in `max_tokens`
pub struct TokenWindowChatMemory {
    max_tokens: usize,
    estimator: Arc<dyn TokenCountEstimator>,
    messages: Vec<Message>,
}

impl TokenWindowChatMemory {
    pub fn with_max_tokens(max_tokens: usize, estimator: Arc<dyn TokenCountEstimator>) -> Self {
        Self {
            max_tokens,
            estimator,
            messages: Vec::new(),
        }
    }

    pub fn token_count(&self) -> usize {
        self.estimator.estimate_in_messages(&self.messages)
    }
}

impl ChatMemory for TokenWindowChatMemory {
    fn add(&mut self, message: Message) {
        if !push_message(&mut self.messages, message) {
            return;
        }
        let max = self.max_tokens;
        let estimator = self.estimator.clone();
        evict_while(&mut self.messages, |messages| {
            estimator.estimate_in_messages(messages) > max
        });
    }

    fn messages(&self) -> Vec<Message> {
        self.messages.clone()
    }

    fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Appends a message, replacing the system message if a new one arrives.
/// Returns false when the message was an exact repeat of the current system message.
fn push_message(messages: &mut Vec<Message>, message: Message) -> bool {
    if message.role == Role::System {
        if let Some(index) = messages.iter().position(|m| m.role == Role::System) {
            if messages[index].content == message.content {
                return false;
            }
            messages.remove(index);
        }
        messages.insert(0, message);
    } else {
        messages.push(message);
    }
    true
}

fn evict_while<F>(messages: &mut Vec<Message>, over_capacity: F)
where
    F: Fn(&[Message]) -> bool,
{
    while over_capacity(messages) {
        let newest = messages.len().saturating_sub(1);
        let Some(index) = messages[..newest]
            .iter()
            .position(|m| m.role != Role::System)
        else {
            break;
        };

        let evicted = messages.remove(index);
        // Tool responses are meaningless without the request that produced them,
        // even when the orphan is the newest message
        if evicted.has_tool_requests() {
            while index < messages.len() && messages[index].has_tool_responses() {
                messages.remove(index);
            }
        }
    }
}
