//! LLM integration module.
//!
//! Provides an OpenAI-compatible client for the automated judge call and
//! the prompts that request the judge schema.

mod client;
mod prompts;

pub use client::{Completion, LlmClient, Message, Role, Usage};
pub use prompts::{DEFAULT_BATCH_SIZE, Prompts};
