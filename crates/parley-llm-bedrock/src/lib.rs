//! # parley-llm-bedrock
//!
//! AWS Bedrock adapter over the official AWS SDK.
//!
//! - Chat through `Converse` / `ConverseStream`, with model-requested tool
//!   calls run through the request's [`ToolExecutor`](parley_llm::ToolExecutor)
//!   and sent back as `toolResult` blocks, up to a bounded number of rounds
//! - Titan and Cohere embeddings through `InvokeModel`
//! - Daily costs per model family from Cost Explorer

#![deny(unsafe_code)]

pub mod convert;
mod converse;
pub mod provider;
pub mod types;

pub use provider::BedrockAdapter;
pub use types::BedrockConfig;
