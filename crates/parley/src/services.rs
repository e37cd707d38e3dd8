//! Structured calls built on a chat model: the prompt is rendered from a
//! bundled template and the reply is parsed into a typed result.

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;
use std::sync::Arc;

use crate::models::message::Message;
use crate::prompt_template::load_bundled_prompt;
use crate::providers::base::ChatModel;

lazy_static! {
    static ref BULLET_PREFIX: Regex = Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s*").unwrap();
}

pub struct TextUtils {
    provider: Arc<dyn ChatModel>,
}

impl TextUtils {
    pub fn new(provider: Arc<dyn ChatModel>) -> Self {
        Self { provider }
    }

    async fn ask(&self, system: &str, text: &str) -> Result<String> {
        let messages = vec![Message::user().with_text(text)];
        let (reply, _) = self.provider.complete(system, &messages, &[]).await?;
        Ok(reply.text())
    }

    pub async fn translate(&self, text: &str, language: &str) -> Result<String> {
        let system = load_bundled_prompt("translate.md", &json!({ "language": language }))?;
        Ok(self.ask(&system, text).await?.trim().to_string())
    }

    /// Summarize `text` as at most `n` bullet points, without their markers
    pub async fn summarize(&self, text: &str, n: usize) -> Result<Vec<String>> {
        let system = load_bundled_prompt("summarize.md", &json!({ "n": n }))?;
        let reply = self.ask(&system, text).await?;
        Ok(parse_bullets(&reply, n))
    }
}

fn parse_bullets(reply: &str, n: usize) -> Vec<String> {
    reply
        .lines()
        .map(|line| BULLET_PREFIX.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .take(n)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;

    #[tokio::test]
    async fn test_translate() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant().with_text("Ciao, come stai?\n")
        ]);
        let utils = TextUtils::new(Arc::new(provider.clone()));

        let translation = utils.translate("Hello, how are you?", "italian").await?;
        assert_eq!(translation, "Ciao, come stai?");

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0][0].text(), "Hello, how are you?");
        Ok(())
    }

    #[tokio::test]
    async fn test_summarize_strips_markers() -> Result<()> {
        let provider = MockProvider::new(vec![Message::assistant().with_text(
            "- AI simulates human intelligence\n\n* It learns and reasons\n3. It solves problems\n- extra",
        )]);
        let utils = TextUtils::new(Arc::new(provider));

        let bullets = utils.summarize("AI is ...", 3).await?;
        assert_eq!(
            bullets,
            vec![
                "AI simulates human intelligence",
                "It learns and reasons",
                "It solves problems"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_parse_bullets_plain_lines() {
        assert_eq!(parse_bullets("one\ntwo", 5), vec!["one", "two"]);
        assert!(parse_bullets("", 3).is_empty());
    }
}
