pub mod agent;
pub mod embeddings;
pub mod errors;
pub mod mcp;
pub mod memory;
pub mod models;
pub mod prompt_template;
pub mod providers;
pub mod rag;
pub mod services;
pub mod sse;
pub mod systems;
pub mod token_counter;
