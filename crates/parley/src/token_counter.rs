use anyhow::{anyhow, Result};
use std::path::Path;
use tokenizers::tokenizer::Tokenizer;

use crate::models::message::{Message, MessageContent};

// Fixed costs the chat template adds around each message and before the reply
const TOKENS_PER_MESSAGE: usize = 3;
const TOKENS_FOR_REPLY: usize = 3;
const CHARS_PER_TOKEN: usize = 4;

/// Estimates how many tokens text and messages occupy in the model's context
pub trait TokenCountEstimator: Send + Sync {
    fn estimate_in_text(&self, text: &str) -> usize;

    fn estimate_in_message(&self, message: &Message) -> usize {
        let mut count = TOKENS_PER_MESSAGE;
        for content in &message.content {
            count += match content {
                MessageContent::Text(text) => self.estimate_in_text(&text.text),
                MessageContent::ToolRequest(request) => match &request.tool_call {
                    Ok(call) => {
                        self.estimate_in_text(&call.name)
                            + self.estimate_in_text(&call.arguments.to_string())
                    }
                    Err(e) => self.estimate_in_text(&e.to_string()),
                },
                MessageContent::ToolResponse(response) => match &response.tool_result {
                    Ok(contents) => contents
                        .iter()
                        .filter_map(|c| c.as_text())
                        .map(|t| self.estimate_in_text(t))
                        .sum(),
                    Err(e) => self.estimate_in_text(&e.to_string()),
                },
            };
        }
        count
    }

    fn estimate_in_messages(&self, messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|m| self.estimate_in_message(m))
            .sum::<usize>()
            + TOKENS_FOR_REPLY
    }
}

/// Counts tokens with a HuggingFace tokenizer definition (`tokenizer.json`)
pub struct TokenCounter {
    tokenizer: Tokenizer,
}

impl TokenCounter {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| anyhow!("Failed to load tokenizer {}: {}", path.display(), e))?;
        Ok(Self { tokenizer })
    }

    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Result<Self> {
        let tokenizer =
            Tokenizer::from_bytes(bytes).map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        Ok(Self { tokenizer })
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.len(),
            Err(e) => {
                tracing::warn!("Tokenizer failed, falling back to estimate: {}", e);
                HeuristicTokenEstimator.estimate_in_text(text)
            }
        }
    }
}

impl TokenCountEstimator for TokenCounter {
    fn estimate_in_text(&self, text: &str) -> usize {
        self.count_tokens(text)
    }
}

/// Roughly four characters per token, good enough for sizing a memory window
/// when no tokenizer file is available for the model.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenEstimator;

impl TokenCountEstimator for HeuristicTokenEstimator {
    fn estimate_in_text(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }
}
