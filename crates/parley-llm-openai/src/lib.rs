//! # parley-llm-openai
//!
//! Adapters over the OpenAI wire protocols.
//!
//! - [`OpenAiAdapter`]: the OpenAI API. Chat models are routed by ID to chat
//!   completions or to the Responses API, which runs as a cancellable
//!   background job.
//! - [`CustomRestAdapter`]: any OpenAI-compatible endpoint named in a model's
//!   custom settings, speaking the protocol those settings choose.
//! - [`YandexAdapter`]: Yandex Foundation Models through their
//!   OpenAI-compatible completions endpoint, plus native embeddings.
//!
//! Both flavors run model-requested tool calls through the request's
//! [`ToolExecutor`](parley_llm::ToolExecutor) and re-issue the request with
//! the results, up to a bounded number of rounds.

#![deny(unsafe_code)]

mod client;
mod completions;
pub mod custom_rest;
pub mod message_converter;
pub mod protocol;
pub mod provider;
mod responses;
pub mod types;
pub mod yandex;

pub use client::OpenAiClient;
pub use custom_rest::CustomRestAdapter;
pub use protocol::OpenAiProtocol;
pub use provider::OpenAiAdapter;
pub use types::{ApiFlavor, OpenAiConfig};
pub use yandex::{YandexAdapter, YandexConfig};
