//! # parley-runtime
//!
//! Message lifecycle for chats: user turns in, assistant turns out.
//!
//! The [`Orchestrator`] validates each operation, persists turns through an
//! [`EntityRepository`], runs generation in the background and broadcasts
//! every snapshot through the fan-out. Answers come either straight from the
//! model (streamed and throttled) or from documents via a retrieval loop
//! that shrinks its chunk budget when the provider rejects oversized
//! requests.
//!
//! Persistence, file storage and chunk search are collaborator traits;
//! [`memory`] holds in-process implementations.

#![deny(unsafe_code)]

pub mod answer;
pub mod cancellation;
pub mod collaborators;
pub mod errors;
pub mod memory;
pub mod orchestrator;
pub mod prompts;

pub use cancellation::CancellationRegistry;
pub use collaborators::{
    ChatFile, ChunkQuery, ChunkSearch, DeletedMessage, DocumentChunk, EntityRepository, ImageInput, RequestContext,
    StorageService,
};
pub use errors::{RuntimeError, RuntimeResult, ValidationError};
pub use memory::{InMemoryChunkSearch, InMemoryRepository, InMemoryStorage};
pub use orchestrator::{CreateMessageInput, Orchestrator, OrchestratorParts, RuntimeSettings};
