use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};

use crate::errors::AgentError;
use crate::models::content::Content;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};
use crate::providers::base::Usage;

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    static ref VALID_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Convert internal Message format to the OpenAI chat completions message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut converted = json!({
            "role": message.role
        });

        let mut output = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        converted["content"] = json!(text.text);
                    }
                }
                MessageContent::ToolRequest(request) => match &request.tool_call {
                    Ok(tool_call) => {
                        let sanitized_name = sanitize_function_name(&tool_call.name);
                        let tool_calls = converted
                            .as_object_mut()
                            .unwrap()
                            .entry("tool_calls")
                            .or_insert(json!([]));

                        tool_calls.as_array_mut().unwrap().push(json!({
                            "id": request.id,
                            "type": "function",
                            "function": {
                                "name": sanitized_name,
                                "arguments": tool_call.arguments.to_string(),
                            }
                        }));
                    }
                    Err(e) => {
                        output.push(json!({
                            "role": "tool",
                            "content": format!("Error: {}", e),
                            "tool_call_id": request.id
                        }));
                    }
                },
                MessageContent::ToolResponse(response) => {
                    match &response.tool_result {
                        Ok(contents) => {
                            let mut texts = Vec::new();
                            let mut image_messages = Vec::new();

                            for content in contents {
                                match content {
                                    Content::Text(text) => texts.push(text.text.clone()),
                                    Content::Image(image) => {
                                        texts.push("This tool result included an image that is uploaded in the next message.".to_string());
                                        image_messages.push(json!({
                                            "role": "user",
                                            "content": [{
                                                "type": "image_url",
                                                "image_url": {
                                                    "url": format!("data:{};base64,{}", image.mime_type, image.data)
                                                }
                                            }]
                                        }));
                                    }
                                }
                            }

                            output.push(json!({
                                "role": "tool",
                                "content": texts.join("\n"),
                                "tool_call_id": response.id
                            }));
                            output.extend(image_messages);
                        }
                        Err(e) => {
                            // A tool result error is shown as output so the model can interpret the error message
                            output.push(json!({
                                "role": "tool",
                                "content": format!("The tool call returned the following error:\n{}", e),
                                "tool_call_id": response.id
                            }));
                        }
                    }
                }
            }
        }

        if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
            output.insert(0, converted);
        }
        messages_spec.extend(output);
    }

    messages_spec
}

/// Convert internal Tool format to the OpenAI tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

/// Convert an OpenAI chat completions response to internal Message format
pub fn openai_response_to_message(response: &Value) -> Result<Message> {
    let original = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| anyhow!("No message in response: {}", response))?;
    let mut message = Message::assistant();

    if let Some(text) = original.get("content").and_then(|t| t.as_str()) {
        message = message.with_text(text);
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(|t| t.as_array()) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().unwrap_or_default().to_string();
            let function_name = tool_call["function"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let arguments = parse_arguments(&tool_call["function"]["arguments"]);

            if !is_valid_function_name(&function_name) {
                let error = AgentError::ToolNotFound(format!(
                    "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
                    function_name
                ));
                message = message.with_tool_request(id, Err(error));
            } else {
                match arguments {
                    Ok(params) => {
                        message =
                            message.with_tool_request(id, Ok(ToolCall::new(&function_name, params)));
                    }
                    Err(e) => {
                        let error = AgentError::InvalidParameters(format!(
                            "Could not interpret tool use parameters for id {}: {}",
                            id, e
                        ));
                        message = message.with_tool_request(id, Err(error));
                    }
                }
            }
        }
    }

    Ok(message)
}

// Ollama sends arguments as a JSON string like OpenAI, but some versions send an object
fn parse_arguments(arguments: &Value) -> Result<Value, serde_json::Error> {
    match arguments {
        Value::String(raw) if raw.trim().is_empty() => Ok(json!({})),
        Value::String(raw) => serde_json::from_str(raw),
        Value::Null => Ok(json!({})),
        other => Ok(other.clone()),
    }
}

pub fn usage_from_openai(data: &Value) -> Usage {
    let Some(usage) = data.get("usage").filter(|u| !u.is_null()) else {
        return Usage::default();
    };

    let input_tokens = usage
        .get("prompt_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32);

    let output_tokens = usage
        .get("completion_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32);

    let total_tokens = usage
        .get("total_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32)
        .or_else(|| match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        });

    Usage::new(input_tokens, output_tokens, total_tokens)
}

fn sanitize_function_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").to_string()
}

fn is_valid_function_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPENAI_TOOL_USE_RESPONSE: &str = r#"{
        "choices": [{
            "role": "assistant",
            "message": {
                "tool_calls": [{
                    "id": "1",
                    "function": {
                        "name": "example_fn",
                        "arguments": "{\"param\": \"value\"}"
                    }
                }]
            }
        }],
        "usage": {
            "prompt_tokens": 10,
            "completion_tokens": 25
        }
    }"#;

    #[test]
    fn test_messages_to_openai_spec() {
        let messages = vec![
            Message::system().with_text("Be brief"),
            Message::user().with_text("Hello"),
        ];
        let spec = messages_to_openai_spec(&messages);

        assert_eq!(spec.len(), 2);
        assert_eq!(spec[0]["role"], "system");
        assert_eq!(spec[0]["content"], "Be brief");
        assert_eq!(spec[1]["role"], "user");
        assert_eq!(spec[1]["content"], "Hello");
    }

    #[test]
    fn test_tool_round_trip_spec() {
        let messages = vec![
            Message::assistant().with_tool_request(
                "call_1",
                Ok(ToolCall::new("calculator__add", json!({"a": 5, "b": 12}))),
            ),
            Message::user().with_tool_response("call_1", Ok(vec![Content::text("17")])),
            Message::user().with_tool_response(
                "call_2",
                Err(AgentError::ExecutionError("division by zero".into())),
            ),
        ];
        let spec = messages_to_openai_spec(&messages);

        assert_eq!(spec.len(), 3);
        assert_eq!(spec[0]["tool_calls"][0]["function"]["name"], "calculator__add");
        assert_eq!(
            spec[0]["tool_calls"][0]["function"]["arguments"],
            "{\"a\":5,\"b\":12}"
        );
        assert_eq!(spec[1]["role"], "tool");
        assert_eq!(spec[1]["content"], "17");
        assert_eq!(spec[1]["tool_call_id"], "call_1");
        assert!(spec[2]["content"]
            .as_str()
            .unwrap()
            .contains("division by zero"));
    }

    #[test]
    fn test_tools_to_openai_spec_rejects_duplicates() {
        let tool = Tool::new("test_tool", "A test tool", json!({"type": "object"}));
        let spec = tools_to_openai_spec(&[tool.clone()]).unwrap();
        assert_eq!(spec[0]["function"]["name"], "test_tool");
        assert_eq!(spec[0]["function"]["parameters"]["type"], "object");

        let result = tools_to_openai_spec(&[tool.clone(), tool]);
        assert!(result.is_err());
    }

    #[test]
    fn test_openai_response_to_message_tool_use() -> Result<()> {
        let response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE)?;
        let message = openai_response_to_message(&response)?;

        let requests = message.tool_requests();
        assert_eq!(requests.len(), 1);
        let tool_call = requests[0].tool_call.as_ref().unwrap();
        assert_eq!(tool_call.name, "example_fn");
        assert_eq!(tool_call.arguments, json!({"param": "value"}));

        let usage = usage_from_openai(&response);
        assert_eq!(usage.total_tokens, Some(35));
        Ok(())
    }

    #[test]
    fn test_openai_response_to_message_invalid_func_name() -> Result<()> {
        let mut response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE)?;
        response["choices"][0]["message"]["tool_calls"][0]["function"]["name"] =
            json!("invalid fn");
        let message = openai_response_to_message(&response)?;

        let requests = message.tool_requests();
        assert!(matches!(
            requests[0].tool_call,
            Err(AgentError::ToolNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_openai_response_to_message_json_decode_error() -> Result<()> {
        let mut response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE)?;
        response["choices"][0]["message"]["tool_calls"][0]["function"]["arguments"] =
            json!("invalid json {");
        let message = openai_response_to_message(&response)?;

        let requests = message.tool_requests();
        assert!(matches!(
            requests[0].tool_call,
            Err(AgentError::InvalidParameters(_))
        ));
        Ok(())
    }

    #[test]
    fn test_object_arguments_are_accepted() -> Result<()> {
        let mut response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE)?;
        response["choices"][0]["message"]["tool_calls"][0]["function"]["arguments"] =
            json!({"param": 3});
        let message = openai_response_to_message(&response)?;
        let call = message.tool_requests()[0].tool_call.clone().unwrap();
        assert_eq!(call.arguments, json!({"param": 3}));
        Ok(())
    }

    #[test]
    fn test_missing_choices_is_an_error() {
        assert!(openai_response_to_message(&json!({"error": "nope"})).is_err());
        assert_eq!(usage_from_openai(&json!({})), Usage::default());
    }
}
