use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::{AgentError, AgentResult};
use crate::memory::ChatMemory;
use crate::models::content::Content;
use crate::models::message::{Message, ToolRequest};
use crate::models::tool::{Tool, ToolCall};
use crate::prompt_template::load_bundled_prompt;
use crate::providers::base::{ChatModel, Usage};
use crate::rag::ContentRetriever;
use crate::systems::System;

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;

const AUGMENTATION_HEADER: &str = "\n\nAnswer using the following information:\n";

#[derive(Clone, Debug, Serialize)]
struct SystemInfo {
    name: String,
    description: String,
    instructions: String,
}

impl SystemInfo {
    fn new(name: &str, description: &str, instructions: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            instructions: instructions.to_string(),
        }
    }
}

/// Agent integrates a chat model with the systems it can call, an optional
/// conversation memory and an optional retrieval source
pub struct Agent {
    systems: Vec<Box<dyn System>>,
    provider: Arc<dyn ChatModel>,
    memory: Option<Box<dyn ChatMemory>>,
    retriever: Option<Arc<dyn ContentRetriever>>,
    max_tool_rounds: usize,
    usage: Usage,
}

impl Agent {
    pub fn new(provider: Arc<dyn ChatModel>) -> Self {
        Self {
            systems: Vec::new(),
            provider,
            memory: None,
            retriever: None,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            usage: Usage::default(),
        }
    }

    pub fn add_system(&mut self, system: Box<dyn System>) {
        self.systems.push(system);
    }

    pub fn with_system(mut self, system: Box<dyn System>) -> Self {
        self.add_system(system);
        self
    }

    /// Keep the conversation across `chat` calls in `memory`
    pub fn with_memory(mut self, memory: Box<dyn ChatMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn ContentRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_max_tool_rounds(mut self, max_tool_rounds: usize) -> Self {
        self.max_tool_rounds = max_tool_rounds;
        self
    }

    /// Token usage accumulated over every completion this agent requested
    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    pub fn messages(&self) -> Vec<Message> {
        self.memory
            .as_ref()
            .map(|m| m.messages())
            .unwrap_or_default()
    }

    /// Get all tools from all systems with proper system prefixing
    fn get_prefixed_tools(&self) -> Vec<Tool> {
        let mut tools = Vec::new();
        for system in &self.systems {
            for tool in system.tools() {
                tools.push(Tool::new(
                    format!("{}__{}", system.name(), tool.name),
                    &tool.description,
                    tool.input_schema.clone(),
                ));
            }
        }
        tools
    }

    /// Find the appropriate system for a tool call based on the prefixed name
    fn get_system_for_tool(&self, prefixed_name: &str) -> Option<&dyn System> {
        let (system_name, _) = prefixed_name.split_once("__")?;
        self.systems
            .iter()
            .find(|sys| sys.name() == system_name)
            .map(|v| &**v)
    }

    async fn dispatch_tool_call(&self, tool_call: AgentResult<ToolCall>) -> AgentResult<Vec<Content>> {
        let call = tool_call?;
        let tool_name = call
            .name
            .split_once("__")
            .map(|(_, tool)| tool.to_string())
            .ok_or_else(|| AgentError::InvalidToolName(call.name.clone()))?;
        let system = self
            .get_system_for_tool(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;

        debug!(tool = %call.name, arguments = %call.arguments, "dispatching tool call");
        system.call(ToolCall::new(tool_name, call.arguments)).await
    }

    fn get_system_prompt(&self) -> AgentResult<String> {
        if self.systems.is_empty() {
            return Ok(String::new());
        }
        let systems_info: Vec<SystemInfo> = self
            .systems
            .iter()
            .map(|system| {
                SystemInfo::new(system.name(), system.description(), system.instructions())
            })
            .collect();

        let mut context = HashMap::new();
        context.insert("systems", systems_info);
        load_bundled_prompt("system.md", &context)
            .map_err(|e| AgentError::Internal(e.to_string()))
    }

    /// Append retrieved content to the question when a retriever is attached
    async fn augment(&self, question: &str) -> Result<String> {
        let Some(retriever) = &self.retriever else {
            return Ok(question.to_string());
        };
        let contents = retriever.retrieve(question).await?;
        if contents.is_empty() {
            return Ok(question.to_string());
        }
        let information = contents
            .iter()
            .map(|c| c.segment.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(format!("{}{}{}", question, AUGMENTATION_HEADER, information))
    }

    fn remember(&mut self, history: &mut Vec<Message>, message: Message) {
        match self.memory.as_mut() {
            Some(memory) => memory.add(message),
            None => history.push(message),
        }
    }

    fn conversation(&self, history: &[Message]) -> Vec<Message> {
        match &self.memory {
            Some(memory) => memory.messages(),
            None => history.to_vec(),
        }
    }

    /// Answer one question, calling tools until the model produces a reply
    /// without tool requests
    pub async fn chat(&mut self, question: &str) -> Result<String> {
        let user_text = self.augment(question).await?;
        let system_prompt = self.get_system_prompt()?;
        let tools = self.get_prefixed_tools();

        let mut history = Vec::new();
        self.remember(&mut history, Message::user().with_text(user_text));

        for round in 0..self.max_tool_rounds {
            let messages = self.conversation(&history);
            let (response, usage) = self
                .provider
                .complete(&system_prompt, &messages, &tools)
                .await?;
            self.usage = self.usage.clone() + usage;

            let tool_requests: Vec<ToolRequest> = response
                .content
                .iter()
                .filter_map(|content| content.as_tool_request())
                .cloned()
                .collect();
            self.remember(&mut history, response.clone());

            if tool_requests.is_empty() {
                info!(rounds = round + 1, "agent replied");
                return Ok(response.text());
            }

            // Dispatch every request of this round in parallel
            let futures: Vec<_> = tool_requests
                .iter()
                .map(|request| self.dispatch_tool_call(request.tool_call.clone()))
                .collect();
            let outputs = futures::future::join_all(futures).await;

            let mut message_tool_response = Message::user();
            for (request, output) in tool_requests.iter().zip(outputs.into_iter()) {
                if let Err(e) = &output {
                    debug!(id = %request.id, "tool call failed: {}", e);
                }
                message_tool_response =
                    message_tool_response.with_tool_response(request.id.clone(), output);
            }
            self.remember(&mut history, message_tool_response);
        }

        Err(anyhow!(
            "No final answer after {} tool rounds",
            self.max_tool_rounds
        ))
    }
}
