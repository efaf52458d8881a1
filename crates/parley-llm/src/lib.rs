//! # parley-llm
//!
//! Provider adapter contract and shared streaming utilities.
//!
//! Defines the [`ProviderAdapter`] trait every inference backend implements:
//! - Four-event stream contract (`Start`, `Progress*`, then `Complete` or `Err`)
//! - SSE decoding over `eventsource-stream` with an idle timeout
//! - Fixed-delay rate-limit retry before the first yielded event
//! - API error body parsing and context-too-large detection
//! - Tolerant tool-call argument parsing
//! - [`ToolExecutor`] seam through which adapters run tool calls mid-stream,
//!   and the shared announce/run/report sequence of one tool round
//! - A scripted `MockAdapter` behind the `test-support` feature

#![deny(unsafe_code)]

pub mod error_parsing;
pub mod provider;
pub mod retry;
pub mod sse;
pub mod stream_pipeline;
pub mod tool_parsing;
pub mod tool_round;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use provider::{
    CompletionRequest, CostEntry, EmbeddingsRequest, EmbeddingsResponse, ProviderAdapter,
    ProviderError, ProviderEventStream, ProviderInfo, ProviderResult, ToolExecutor,
    UsageCostInfo,
};
