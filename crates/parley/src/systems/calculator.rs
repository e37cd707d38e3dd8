use async_trait::async_trait;
use serde_json::{json, Value};

use super::System;
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

/// In-process arithmetic tools
pub struct CalculatorSystem {
    tools: Vec<Tool>,
}

impl Default for CalculatorSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl CalculatorSystem {
    pub fn new() -> Self {
        let string_length = Tool::new(
            "string_length",
            "Calculates the length of a string",
            json!({
                "type": "object",
                "required": ["s"],
                "properties": {
                    "s": {"type": "string", "description": "The string to measure."}
                }
            }),
        );

        let add = Tool::new(
            "add",
            "Calculates the sum of two numbers",
            json!({
                "type": "object",
                "required": ["a", "b"],
                "properties": {
                    "a": {"type": "number"},
                    "b": {"type": "number"}
                }
            }),
        );

        let sqrt = Tool::new(
            "sqrt",
            "Calculates the square root of a number",
            json!({
                "type": "object",
                "required": ["x"],
                "properties": {
                    "x": {"type": "number"}
                }
            }),
        );

        Self {
            tools: vec![string_length, add, sqrt],
        }
    }

    fn string_length(&self, params: &Value) -> AgentResult<Value> {
        let s = params
            .get("s")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::InvalidParameters("'s' must be a string".into()))?;
        tracing::info!("Called string_length with s='{}'", s);
        Ok(json!(s.chars().count()))
    }

    fn add(&self, params: &Value) -> AgentResult<Value> {
        let a = number(params, "a")?;
        let b = number(params, "b")?;
        tracing::info!("Called add with a={}, b={}", a, b);
        Ok(json!(a + b))
    }

    fn sqrt(&self, params: &Value) -> AgentResult<Value> {
        let x = number(params, "x")?;
        if x < 0.0 {
            return Err(AgentError::ExecutionError(format!(
                "Cannot take the square root of negative number {}",
                x
            )));
        }
        tracing::info!("Called sqrt with x={}", x);
        Ok(json!(x.sqrt()))
    }
}

// Models often quote numbers, so accept "5" as well as 5
fn number(params: &Value, key: &str) -> AgentResult<f64> {
    let value = params
        .get(key)
        .ok_or_else(|| AgentError::InvalidParameters(format!("Missing parameter '{}'", key)))?;
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| AgentError::InvalidParameters(format!("'{}' must be a number", key)))
}

// Integral results print without a trailing ".0"
fn format_number(value: &Value) -> String {
    match value.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        _ => value.to_string(),
    }
}

#[async_trait]
impl System for CalculatorSystem {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Exact arithmetic and string measurement"
    }

    fn instructions(&self) -> &str {
        "Use these tools instead of doing arithmetic or counting characters yourself."
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        let result = match tool_call.name.as_str() {
            "string_length" => self.string_length(&tool_call.arguments),
            "add" => self.add(&tool_call.arguments),
            "sqrt" => self.sqrt(&tool_call.arguments),
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }?;
        Ok(vec![Content::text(format_number(&result))])
    }
}
