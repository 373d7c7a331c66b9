//! OpenAI-compatible chat-completions provider
//!
//! Works against api.openai.com and any server speaking the same protocol
//! (local inference servers, proxies).

pub mod client;
pub mod completion;
pub mod types;

pub use client::OpenAiClient;
pub use completion::OpenAiCompatibleProvider;
