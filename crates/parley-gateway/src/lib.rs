//! # parley-gateway
//!
//! One entry point in front of every provider adapter.
//!
//! - [`ProviderKind`]: closed set of provider IDs, resolved once per request
//! - Allow-list from settings, with `*` enabling every known provider
//! - [`collapse_history`]: ordering and same-role merging before dispatch
//! - Generation defaults (temperature 0.7, max tokens 2048, top-p 0.9)
//! - Routing of cancellation, catalogs, costs, embeddings and provider status
//!
//! Adapters are built per caller through an [`AdapterFactory`], since
//! credentials travel with each request.

#![deny(unsafe_code)]

pub mod collapse;
pub mod errors;
pub mod factory;
pub mod gateway;
pub mod kind;

pub use collapse::collapse_history;
pub use errors::{GatewayError, GatewayResult};
pub use factory::{AdapterFactory, DefaultAdapterFactory};
pub use gateway::{Gateway, GenerationDefaults};
pub use kind::ProviderKind;
