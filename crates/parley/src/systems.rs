mod calculator;
mod mcp;
mod system;

pub use calculator::CalculatorSystem;
pub use mcp::McpSystem;
pub use system::System;
