//! These models represent the objects passed around between endpoints, the agent
//! and the model runtime.
//!
//! There are a few related formats we need to interact with:
//! - openai-compatible messages/tools, sent from the agent to the runtime
//! - mcp tool definitions and results, exchanged with remote tool servers
//! - chat memory, which stores the conversation between turns
//!
//! We always immediately convert those data models into the internal structs
//! using to/from helpers, so the internal models are not an exact match to any
//! of these formats.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
