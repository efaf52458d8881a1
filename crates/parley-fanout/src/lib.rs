//! # parley-fanout
//!
//! Cross-instance delivery of chat and document events.
//!
//! - [`FanOut`] writes message snapshots to the shared cache, then publishes
//!   a pointer. Without a working substrate it delivers to the local hub.
//! - [`SubscriberBridge`] resolves pointers on every instance and feeds the
//!   instance's [`LocalHub`].
//! - [`LocalSubstrate`] is the in-process [`Substrate`].

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod hub;
pub mod local;
pub mod publisher;
pub mod subscriber;
pub mod substrate;

pub use errors::{FanOutError, FanOutResult};
pub use events::{ChatEvent, DocumentStatus, MessagePointer, MessageSnapshot};
pub use hub::LocalHub;
pub use local::LocalSubstrate;
pub use publisher::FanOut;
pub use subscriber::SubscriberBridge;
pub use substrate::{Substrate, SubstrateStream};
