//! Message lifecycle orchestration.
//!
//! Every operation validates and persists synchronously, then hands the
//! answer generation to a background task on the orchestrator's
//! [`TaskTracker`]. Callers get the user turn (or the reset assistant turn)
//! back immediately and follow progress through the fan-out.
//!
//! ```text
//! create/edit/switch/branch ──► persist ──► spawn ─┬─► generation (stream | complete)
//!                                                  └─► retrieval (RAG retry loop)
//!                                                           │
//!                                   flush ◄── progress ◄────┘
//!                                     │
//!                                     └──► save + publish_chat_message
//! ```

mod generation;
mod retrieval;
mod title;

use std::fmt::Write as _;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use parley_core::{Chat, ChatId, ContentPart, DocumentId, Message, MessageId, MessageRole, Model, StreamStatus};
use parley_fanout::FanOut;
use parley_gateway::Gateway;
use parley_settings::{AiSettings, ParleySettings, RagSettings, StreamingSettings};
use parley_tools::ToolRegistry;
use serde::Deserialize;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::cancellation::CancellationRegistry;
use crate::collaborators::{
    ChatFile, ChunkSearch, DeletedMessage, EntityRepository, ImageInput, RequestContext, StorageService,
};
use crate::errors::{RuntimeError, RuntimeResult, ValidationError};

pub use title::fallback_title;

/// Content of a completed turn whose model returned nothing.
pub const NO_RESPONSE: &str = "_No response_";
/// Content of a turn cancelled before any text arrived.
pub const CANCELLED: &str = "_Cancelled_";

/// Runtime-relevant slice of the settings.
#[derive(Clone, Debug, Default)]
pub struct RuntimeSettings {
    /// Generation defaults and context limits.
    pub ai: AiSettings,
    /// Broadcast throttle.
    pub streaming: StreamingSettings,
    /// Retrieval retry policy.
    pub rag: RagSettings,
}

impl From<&ParleySettings> for RuntimeSettings {
    fn from(settings: &ParleySettings) -> Self {
        Self {
            ai: settings.ai.clone(),
            streaming: settings.streaming.clone(),
            rag: settings.rag.clone(),
        }
    }
}

/// Collaborators an [`Orchestrator`] is assembled from.
pub struct OrchestratorParts {
    /// Chats, messages, models, files.
    pub repository: Arc<dyn EntityRepository>,
    /// Uploaded images.
    pub storage: Arc<dyn StorageService>,
    /// Document chunk retrieval.
    pub chunks: Arc<dyn ChunkSearch>,
    /// Provider routing.
    pub gateway: Gateway,
    /// Per-request tool sets.
    pub tools: ToolRegistry,
    /// Snapshot broadcast.
    pub fanout: FanOut,
    /// Cancelled turns.
    pub cancellations: Arc<CancellationRegistry>,
    /// Defaults and limits.
    pub settings: RuntimeSettings,
}

/// Input of [`Orchestrator::create_message`].
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateMessageInput {
    /// Target chat.
    pub chat_id: Option<ChatId>,
    /// User text.
    pub content: String,
    /// Attached images.
    pub images: Vec<ImageInput>,
    /// Documents to answer from. Non-empty selects the RAG path.
    pub document_ids: Vec<DocumentId>,
}

/// Work handed to the generation task.
pub(crate) struct Turn {
    chat: Chat,
    model: Model,
    context: RequestContext,
    /// Context window, ending with the user turn being answered.
    history: Vec<Message>,
    assistant: Message,
}

/// Work handed to the retrieval task.
pub(crate) struct RagTurn {
    chat: Chat,
    model: Model,
    context: RequestContext,
    question: String,
    document_ids: Vec<DocumentId>,
    user_turn: Message,
    assistant: Message,
}

struct Inner {
    repository: Arc<dyn EntityRepository>,
    storage: Arc<dyn StorageService>,
    chunks: Arc<dyn ChunkSearch>,
    gateway: Gateway,
    tools: ToolRegistry,
    fanout: FanOut,
    cancellations: Arc<CancellationRegistry>,
    settings: RuntimeSettings,
    tasks: TaskTracker,
}

/// Drives turns through their lifecycle.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Assemble from collaborators.
    pub fn new(parts: OrchestratorParts) -> Self {
        Self {
            inner: Arc::new(Inner {
                repository: parts.repository,
                storage: parts.storage,
                chunks: parts.chunks,
                gateway: parts.gateway,
                tools: parts.tools,
                fanout: parts.fanout,
                cancellations: parts.cancellations,
                settings: parts.settings,
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Snapshot broadcast used by this orchestrator.
    pub fn fanout(&self) -> &FanOut {
        &self.inner.fanout
    }

    /// Cancelled-turn registry.
    pub fn cancellations(&self) -> &Arc<CancellationRegistry> {
        &self.inner.cancellations
    }

    /// Number of generation tasks still running.
    pub fn pending(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Wait until every spawned generation has finished.
    pub async fn idle(&self) {
        let _ = self.inner.tasks.close();
        self.inner.tasks.wait().await;
        let _ = self.inner.tasks.reopen();
    }

    fn repo(&self) -> &dyn EntityRepository {
        self.inner.repository.as_ref()
    }

    fn settings(&self) -> &RuntimeSettings {
        &self.inner.settings
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Open an empty chat. A given model must be in the catalog.
    #[instrument(skip_all, fields(model = ?model_id))]
    pub async fn create_chat(&self, model_id: Option<String>) -> RuntimeResult<Chat> {
        if let Some(id) = &model_id {
            let _ = self.model(id).await?;
        }
        let chat = Chat::new(model_id);
        self.repo().save_chat(&chat).await?;
        info!(chat_id = %chat.id, "chat created");
        Ok(chat)
    }

    /// Persist a user turn and start answering it.
    ///
    /// Returns the user turn. With document IDs the answer comes from the
    /// retrieval path, otherwise from the model directly.
    #[instrument(skip_all, fields(chat_id = ?input.chat_id))]
    pub async fn create_message(&self, input: CreateMessageInput, ctx: &RequestContext) -> RuntimeResult<Message> {
        let chat_id = input.chat_id.clone().ok_or(ValidationError::ChatIdRequired)?;
        let chat = self.repo().chat(&chat_id).await?.ok_or(ValidationError::ChatNotFound)?;
        let model = self.chat_model(&chat, ctx).await?;

        let mut user = Message::new(chat.id.clone(), MessageRole::User, input.content.clone())
            .with_model(model.model_id.clone(), model.name.clone());
        if !input.document_ids.is_empty() {
            user.metadata_mut().document_ids.clone_from(&input.document_ids);
        }
        self.persist(&chat.id, self.repo().save_message(&user).await).await?;

        if !input.images.is_empty() {
            if let Err(e) = self.attach_images(&chat, &mut user, &input.images).await {
                error!(message_id = %user.id, error = %e, "image upload failed");
                self.discard(&user).await;
                self.inner.fanout.publish_chat_error(&chat.id, &e.to_string()).await;
                return Err(e);
            }
            self.persist(&chat.id, self.repo().save_message(&user).await).await?;
        }
        self.inner.fanout.publish_chat_message(&chat, &user, false).await;

        let assistant = Message::new(chat.id.clone(), MessageRole::Assistant, "")
            .with_model(model.model_id.clone(), model.name.clone());
        self.persist(&chat.id, self.repo().save_message(&assistant).await).await?;
        info!(message_id = %user.id, answer_id = %assistant.id, model = %model.model_id, "user turn created");

        if input.document_ids.is_empty() {
            let limit = self.settings().ai.context_messages_limit;
            let mut history = self.repo().context_messages(&chat.id, Some(&user), limit).await?;
            history.push(user.clone());
            self.spawn_generation(Turn {
                chat,
                model,
                context: ctx.clone(),
                history,
                assistant,
            });
        } else {
            self.spawn_retrieval(RagTurn {
                chat,
                model,
                context: ctx.clone(),
                question: input.content,
                document_ids: input.document_ids,
                user_turn: user.clone(),
                assistant,
            });
        }
        Ok(user)
    }

    /// Replace a user turn's text and regenerate the answer.
    ///
    /// Later turns are deleted except the first assistant turn, which is
    /// reset and reused for the new answer.
    #[instrument(skip_all, fields(message_id = %message_id))]
    pub async fn edit_message(&self, message_id: &MessageId, content: &str, ctx: &RequestContext) -> RuntimeResult<Message> {
        let (mut original, chat) = self.load(message_id).await?;
        if original.role != MessageRole::User {
            return Err(ValidationError::EditNonUserMessage.into());
        }
        let model = self.chat_model(&chat, ctx).await?;

        let following = self.repo().messages_after(&original).await?;
        let reused = following.iter().find(|m| m.role == MessageRole::Assistant).cloned();
        let doomed: Vec<MessageId> = following
            .iter()
            .filter(|m| reused.as_ref().is_none_or(|r| r.id != m.id))
            .map(|m| m.id.clone())
            .collect();
        let document_ids = reused
            .as_ref()
            .map(|r| r.document_ids().to_vec())
            .filter(|ids| !ids.is_empty())
            .unwrap_or_else(|| original.document_ids().to_vec());

        // The edited turn loses its images along with the later turns.
        let cleanup: Vec<MessageId> = std::iter::once(original.id.clone())
            .chain(following.iter().map(|m| m.id.clone()))
            .collect();
        self.remove_files(&cleanup).await;
        if !doomed.is_empty() {
            self.repo().delete_messages(&doomed).await?;
        }

        original.content = content.trim().to_owned();
        original.json_content = None;
        original.updated_at = Utc::now();
        self.persist(&chat.id, self.repo().save_message(&original).await).await?;
        self.inner.fanout.publish_chat_message(&chat, &original, false).await;

        let assistant = match reused {
            Some(turn) => reset(turn, &model),
            None => Message::new(chat.id.clone(), MessageRole::Assistant, "")
                .with_model(model.model_id.clone(), model.name.clone()),
        };
        self.persist(&chat.id, self.repo().save_message(&assistant).await).await?;
        info!(deleted = doomed.len(), answer_id = %assistant.id, "user turn edited");

        if document_ids.is_empty() {
            let limit = self.settings().ai.context_messages_limit;
            let mut history = self.repo().context_messages(&chat.id, Some(&original), limit).await?;
            history.push(original.clone());
            self.spawn_generation(Turn {
                chat,
                model,
                context: ctx.clone(),
                history,
                assistant,
            });
        } else {
            self.spawn_retrieval(RagTurn {
                chat,
                model,
                context: ctx.clone(),
                question: original.content.clone(),
                document_ids,
                user_turn: original.clone(),
                assistant,
            });
        }
        Ok(original)
    }

    /// Regenerate an assistant turn with another model.
    #[instrument(skip_all, fields(message_id = %message_id, model = %model_id))]
    pub async fn switch_model(&self, message_id: &MessageId, model_id: &str, ctx: &RequestContext) -> RuntimeResult<Message> {
        let (turn, chat) = self.load(message_id).await?;
        if turn.role == MessageRole::User {
            return Err(ValidationError::SwitchUserMessage.into());
        }
        let model = self.model(model_id).await?;

        let limit = self.settings().ai.context_messages_limit;
        let history = self.repo().context_messages(&chat.id, Some(&turn), limit).await?;
        let last_user = history.iter().rev().find(|m| m.role == MessageRole::User).cloned();
        let document_ids = last_user
            .as_ref()
            .map(|u| u.document_ids().to_vec())
            .filter(|ids| !ids.is_empty())
            .unwrap_or_else(|| turn.document_ids().to_vec());

        self.remove_files(std::slice::from_ref(&turn.id)).await;
        let assistant = reset(turn, &model);
        self.persist(&chat.id, self.repo().save_message(&assistant).await).await?;
        self.inner.fanout.publish_chat_message(&chat, &assistant, true).await;

        match last_user {
            Some(user_turn) if !document_ids.is_empty() => self.spawn_retrieval(RagTurn {
                chat,
                model,
                context: ctx.clone(),
                question: user_turn.content.clone(),
                document_ids,
                user_turn,
                assistant: assistant.clone(),
            }),
            _ => self.spawn_generation(Turn {
                chat,
                model,
                context: ctx.clone(),
                history,
                assistant: assistant.clone(),
            }),
        }
        Ok(assistant)
    }

    /// Answer the same context with another model as a branch turn.
    ///
    /// The branch links to `message_id` and never enters later contexts.
    #[instrument(skip_all, fields(message_id = %message_id, model = %model_id))]
    pub async fn call_other_model(
        &self,
        message_id: &MessageId,
        model_id: &str,
        ctx: &RequestContext,
    ) -> RuntimeResult<Message> {
        let (original, chat) = self.load(message_id).await?;
        if original.role == MessageRole::User {
            return Err(ValidationError::BranchFromUserMessage.into());
        }
        let model = self.model(model_id).await?;

        let limit = self.settings().ai.context_messages_limit;
        let history = self.repo().context_messages(&chat.id, Some(&original), limit).await?;

        let mut branch = Message::new(chat.id.clone(), MessageRole::Assistant, "")
            .with_model(model.model_id.clone(), model.name.clone());
        branch.linked_to_message_id = Some(original.id.clone());
        self.persist(&chat.id, self.repo().save_message(&branch).await).await?;
        info!(branch_id = %branch.id, "branch turn created");

        self.spawn_generation(Turn {
            chat,
            model,
            context: ctx.clone(),
            history,
            assistant: branch.clone(),
        });
        Ok(branch)
    }

    /// Stop a turn's generation.
    ///
    /// A local generation is flagged so it stops at its next event. One on
    /// another instance stops when the `cancelled` snapshot reaches it. The
    /// backend job is stopped when a request ID is known. Terminal turns are
    /// returned unchanged.
    #[instrument(skip_all, fields(message_id = %message_id))]
    pub async fn cancel_message(
        &self,
        message_id: &MessageId,
        request_id: Option<String>,
        ctx: &RequestContext,
    ) -> RuntimeResult<Message> {
        let (mut message, chat) = self.load(message_id).await?;
        if message.is_terminal() {
            debug!(status = ?message.status, "turn already terminal");
            return Ok(message);
        }
        if !self.inner.cancellations.cancel(&message.id) {
            debug!("no local generation, relying on the broadcast snapshot");
        }

        let request_id = request_id.or_else(|| message.metadata.as_ref().and_then(|m| m.request_id.clone()));
        if let (Some(request_id), Some(model_id)) = (request_id, message.model_id.clone()) {
            match self.model(&model_id).await {
                Ok(model) => {
                    if let Err(e) = self.inner.gateway.stop_request(&model, &ctx.connection, &request_id).await {
                        warn!(request_id, error = %e, "backend request not stopped");
                    }
                }
                Err(e) => warn!(model = %model_id, error = %e, "cannot stop backend request"),
            }
        }

        message.status = Some(StreamStatus::Cancelled);
        message.updated_at = Utc::now();
        self.repo().save_message(&message).await?;
        self.inner.fanout.publish_chat_message(&chat, &message, false).await;
        info!("turn cancelled");
        Ok(message)
    }

    /// Delete a turn.
    ///
    /// With `delete_following` every later non-branch turn goes too.
    /// Otherwise deleting a user turn also removes the next system or error
    /// turn. Uploaded files of deleted turns are removed from storage.
    #[instrument(skip_all, fields(message_id = %message_id, delete_following = delete_following))]
    pub async fn delete_message(&self, message_id: &MessageId, delete_following: bool) -> RuntimeResult<Vec<DeletedMessage>> {
        let message = self
            .repo()
            .message(message_id)
            .await?
            .ok_or(ValidationError::MessageNotFound)?;

        let extra = if delete_following {
            self.repo().messages_after(&message).await?
        } else if message.role == MessageRole::User {
            self.repo()
                .next_message_with_role(&message, &[MessageRole::System, MessageRole::Error])
                .await?
                .into_iter()
                .collect()
        } else {
            Vec::new()
        };

        let deleted: Vec<DeletedMessage> = std::iter::once(&message)
            .chain(extra.iter())
            .map(|m| DeletedMessage {
                id: m.id.clone(),
                linked_to_message_id: m.linked_to_message_id.clone(),
            })
            .collect();
        let ids: Vec<MessageId> = deleted.iter().map(|d| d.id.clone()).collect();
        self.remove_files(&ids).await;
        self.repo().delete_messages(&ids).await?;
        info!(deleted = ids.len(), "turns deleted");
        Ok(deleted)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn spawn_generation(&self, turn: Turn) {
        self.inner.cancellations.track(&turn.assistant.id);
        let this = self.clone();
        let _ = self.inner.tasks.spawn(async move { this.generate(turn).await });
    }

    fn spawn_retrieval(&self, turn: RagTurn) {
        self.inner.cancellations.track(&turn.assistant.id);
        let this = self.clone();
        let _ = self.inner.tasks.spawn(async move { this.answer_from_documents(turn).await });
    }

    async fn load(&self, id: &MessageId) -> RuntimeResult<(Message, Chat)> {
        let message = self.repo().message(id).await?.ok_or(ValidationError::MessageNotFound)?;
        let chat = self
            .repo()
            .chat(&message.chat_id)
            .await?
            .ok_or(ValidationError::ChatNotFound)?;
        Ok((message, chat))
    }

    async fn model(&self, model_id: &str) -> RuntimeResult<Model> {
        Ok(self.repo().model(model_id).await?.ok_or(ValidationError::ModelNotFound)?)
    }

    /// Chat model, then the caller's default, then the configured default.
    async fn chat_model(&self, chat: &Chat, ctx: &RequestContext) -> RuntimeResult<Model> {
        let model_id = chat
            .model_id
            .clone()
            .or_else(|| ctx.default_model_id.clone())
            .or_else(|| self.settings().ai.default_model_id.clone())
            .ok_or(ValidationError::ModelUndefined)?;
        self.model(&model_id).await
    }

    /// Report a persistence failure to the chat's subscribers.
    async fn persist<T>(&self, chat_id: &ChatId, result: RuntimeResult<T>) -> RuntimeResult<T> {
        if let Err(e) = &result {
            error!(chat_id = %chat_id, error = %e, "persistence failed");
            self.inner.fanout.publish_chat_error(chat_id, &e.to_string()).await;
        }
        result
    }

    async fn attach_images(&self, chat: &Chat, user: &mut Message, images: &[ImageInput]) -> RuntimeResult<()> {
        let mut parts = Vec::with_capacity(images.len() + 1);
        let mut content = user.content.clone();
        if !content.is_empty() {
            parts.push(ContentPart::text(content.clone()));
            content.push_str("\n\n");
        }
        let stamp = Utc::now().timestamp_millis();
        for (index, image) in images.iter().enumerate() {
            let bytes = decode_image(&image.bytes_base64)?;
            let name = format!("{stamp}-{index}.{}", extension(&image.mime_type));
            let file_name = self
                .inner
                .storage
                .upload(&chat.id, &user.id, &name, &image.mime_type, bytes)
                .await?;
            self.repo()
                .save_file(&ChatFile {
                    id: format!("{}-{index}", user.id),
                    chat_id: chat.id.clone(),
                    message_id: user.id.clone(),
                    file_name: file_name.clone(),
                    upload_name: image.file_name.clone(),
                    mime_type: Some(image.mime_type.clone()),
                })
                .await?;
            let url = self.inner.storage.file_url(&file_name);
            let _ = write!(content, " ![Uploaded Image]({url})");
            parts.push(ContentPart::Image {
                file_name: Some(file_name),
                mime_type: Some(image.mime_type.clone()),
                content: None,
                url: Some(url),
            });
        }
        debug!(images = images.len(), "images attached");
        user.content = content;
        user.json_content = Some(parts);
        Ok(())
    }

    /// Remove a user turn whose creation failed half-way.
    async fn discard(&self, user: &Message) {
        let ids = std::slice::from_ref(&user.id);
        self.remove_files(ids).await;
        if let Err(e) = self.repo().delete_messages(ids).await {
            warn!(message_id = %user.id, error = %e, "failed to discard user turn");
        }
    }

    /// Delete file records and stored objects for these turns. Storage
    /// failures are logged.
    async fn remove_files(&self, message_ids: &[MessageId]) {
        if message_ids.is_empty() {
            return;
        }
        let files = match self.repo().message_files(message_ids).await {
            Ok(files) if files.is_empty() => return,
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "failed to list message files");
                return;
            }
        };
        let ids: Vec<String> = files.iter().map(|f| f.id.clone()).collect();
        let names: Vec<String> = files.into_iter().map(|f| f.file_name).collect();
        if let Err(e) = self.repo().delete_files(&ids).await {
            warn!(error = %e, "failed to delete file records");
        }
        if let Err(e) = self.inner.storage.delete_files(&names).await {
            warn!(error = %e, files = names.len(), "failed to delete stored files");
        }
    }
}

/// Clear an assistant turn for regeneration by `model`.
fn reset(mut turn: Message, model: &Model) -> Message {
    turn.role = MessageRole::Assistant;
    turn.content.clear();
    turn.json_content = None;
    turn.metadata = None;
    turn.status = None;
    turn.status_info = None;
    turn.model_id = Some(model.model_id.clone());
    turn.model_name = Some(model.name.clone());
    turn.updated_at = Utc::now();
    turn
}

fn decode_image(data: &str) -> RuntimeResult<Vec<u8>> {
    let payload = data.split_once(";base64,").map_or(data, |(_, b64)| b64);
    STANDARD
        .decode(payload.trim())
        .map_err(|e| RuntimeError::Storage(format!("invalid image data: {e}")))
}

fn extension(mime_type: &str) -> &str {
    mime_type.split_once('/').map_or("bin", |(_, ext)| ext)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod test_support {
    use parley_core::{ConnectionParams, ModelType};
    use parley_fanout::{ChatEvent, LocalHub};
    use parley_gateway::{AdapterFactory, GatewayResult, GenerationDefaults, ProviderKind};
    use parley_llm::ProviderAdapter;
    use parley_llm::mock::MockAdapter;
    use parley_settings::{FanoutSettings, ProviderSettings};
    use parley_tools::mcp::McpCatalog;
    use tokio::sync::broadcast;

    use super::*;
    use crate::collaborators::DocumentChunk;
    use crate::memory::{InMemoryChunkSearch, InMemoryRepository, InMemoryStorage};

    /// Hands the same mock to every provider.
    struct FixedFactory(Arc<MockAdapter>);

    impl AdapterFactory for FixedFactory {
        fn create(
            &self,
            _kind: &ProviderKind,
            _model: Option<&Model>,
            _connection: &ConnectionParams,
        ) -> GatewayResult<Arc<dyn ProviderAdapter>> {
            Ok(Arc::clone(&self.0) as Arc<dyn ProviderAdapter>)
        }
    }

    pub struct Harness {
        pub orchestrator: Orchestrator,
        pub repo: Arc<InMemoryRepository>,
        pub storage: Arc<InMemoryStorage>,
        pub chunks: Arc<InMemoryChunkSearch>,
        pub adapter: Arc<MockAdapter>,
        pub events: broadcast::Receiver<ChatEvent>,
        pub chat: Chat,
    }

    pub fn chat_model() -> Model {
        Model::chat("gpt-test", "GPT Test", "OPEN_AI")
    }

    pub fn other_model() -> Model {
        Model::chat("gpt-other", "GPT Other", "OPEN_AI")
    }

    pub fn blocking_model() -> Model {
        Model {
            streaming: false,
            ..Model::chat("gpt-sync", "GPT Sync", "OPEN_AI")
        }
    }

    pub fn embedding_model() -> Model {
        Model {
            model_type: ModelType::Embedding,
            streaming: false,
            ..Model::chat("embed-test", "Embed Test", "OPEN_AI")
        }
    }

    impl Harness {
        pub fn new(adapter: MockAdapter) -> Self {
            Self::build(adapter, Vec::new(), RuntimeSettings::default())
        }

        pub fn with_chunks(adapter: MockAdapter, chunks: Vec<DocumentChunk>) -> Self {
            Self::build(adapter, chunks, RuntimeSettings::default())
        }

        pub fn build(adapter: MockAdapter, chunks: Vec<DocumentChunk>, settings: RuntimeSettings) -> Self {
            let adapter = Arc::new(adapter);
            let repo = Arc::new(InMemoryRepository::new().with_models([
                chat_model(),
                other_model(),
                blocking_model(),
                embedding_model(),
            ]));
            let storage = Arc::new(InMemoryStorage::default());
            let chunks = Arc::new(InMemoryChunkSearch::new(chunks));
            let hub = LocalHub::new(1024);
            let events = hub.subscribe_chats();
            let gateway = Gateway::with_factory(
                ProviderSettings {
                    enabled: vec!["*".into()],
                    ..ProviderSettings::default()
                },
                GenerationDefaults::default(),
                Arc::new(FixedFactory(Arc::clone(&adapter))),
            );
            let chat = Chat::new(Some(chat_model().model_id));
            repo.insert_chat(chat.clone());
            let orchestrator = Orchestrator::new(OrchestratorParts {
                repository: Arc::clone(&repo) as Arc<dyn EntityRepository>,
                storage: Arc::clone(&storage) as Arc<dyn StorageService>,
                chunks: Arc::clone(&chunks) as Arc<dyn ChunkSearch>,
                gateway,
                tools: ToolRegistry::new(Arc::new(McpCatalog::new(reqwest::Client::new()))),
                fanout: FanOut::local(hub, FanoutSettings::default()),
                cancellations: Arc::new(CancellationRegistry::new()),
                settings,
            });
            Self {
                orchestrator,
                repo,
                storage,
                chunks,
                adapter,
                events,
                chat,
            }
        }

        pub fn ctx(&self) -> RequestContext {
            RequestContext::default()
        }

        pub async fn ask(&self, content: &str) -> Message {
            let input = CreateMessageInput {
                chat_id: Some(self.chat.id.clone()),
                content: content.into(),
                ..CreateMessageInput::default()
            };
            self.orchestrator.create_message(input, &self.ctx()).await.unwrap()
        }

        /// Messages of the harness chat in creation order.
        pub fn messages(&self) -> Vec<Message> {
            self.repo.chat_messages(&self.chat.id)
        }

        pub fn message(&self, id: &MessageId) -> Message {
            self.messages().into_iter().find(|m| &m.id == id).unwrap()
        }

        pub fn answer_to(&self, user: &Message) -> Message {
            self.messages()
                .into_iter()
                .find(|m| m.role != MessageRole::User && m.created_at >= user.created_at && m.id != user.id)
                .unwrap()
        }

        /// Snapshots broadcast so far for `id`, as `(streaming, message)`.
        pub fn snapshots(&mut self, id: &MessageId) -> Vec<(bool, Message)> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                if let ChatEvent::Message { message, streaming, .. } = event {
                    if &message.id == id {
                        out.push((streaming, *message));
                    }
                }
            }
            out
        }

        pub fn errors(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                if let ChatEvent::Error { error, .. } = event {
                    out.push(error);
                }
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use base64::Engine as _;
    use parley_core::MessageBody;
    use parley_llm::mock::MockAdapter;

    use super::test_support::*;
    use super::*;

    fn scripted() -> MockAdapter {
        MockAdapter::new("OPEN_AI").with_default_completion("Greeting")
    }

    // ── create ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn new_chats_are_pristine_and_checked() {
        let h = Harness::new(scripted());
        let chat = h.orchestrator.create_chat(Some("gpt-other".into())).await.unwrap();
        let stored = h.repo.chat_snapshot(&chat.id).unwrap();
        assert!(stored.is_pristine);
        assert_eq!(stored.model_id.as_deref(), Some("gpt-other"));

        let err = h.orchestrator.create_chat(Some("nope".into())).await.unwrap_err();
        assert_matches!(err, RuntimeError::Validation(ValidationError::ModelNotFound));
    }

    #[tokio::test]
    async fn create_requires_chat_id() {
        let h = Harness::new(scripted());
        let err = h
            .orchestrator
            .create_message(CreateMessageInput::default(), &h.ctx())
            .await
            .unwrap_err();
        assert_matches!(err, RuntimeError::Validation(ValidationError::ChatIdRequired));
        assert_eq!(err.to_string(), "Chat ID is required");
    }

    #[tokio::test]
    async fn create_rejects_unknown_chat() {
        let h = Harness::new(scripted());
        let input = CreateMessageInput {
            chat_id: Some(ChatId::from("missing")),
            ..CreateMessageInput::default()
        };
        let err = h.orchestrator.create_message(input, &h.ctx()).await.unwrap_err();
        assert_matches!(err, RuntimeError::Validation(ValidationError::ChatNotFound));
    }

    #[tokio::test]
    async fn create_without_any_model_is_rejected() {
        let h = Harness::new(scripted());
        let chat = Chat::new(None);
        h.repo.insert_chat(chat.clone());
        let input = CreateMessageInput {
            chat_id: Some(chat.id.clone()),
            content: "hi".into(),
            ..CreateMessageInput::default()
        };
        let err = h.orchestrator.create_message(input, &h.ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "Model must be defined for the chat or user");
        assert!(h.repo.chat_messages(&chat.id).is_empty());
    }

    #[tokio::test]
    async fn create_falls_back_to_caller_default_model() {
        let h = Harness::new(scripted());
        h.adapter.push_tokens(&["ok"]);
        let chat = Chat::new(None);
        h.repo.insert_chat(chat.clone());
        let ctx = RequestContext {
            default_model_id: Some(other_model().model_id),
            ..RequestContext::default()
        };
        let input = CreateMessageInput {
            chat_id: Some(chat.id.clone()),
            content: "hi".into(),
            ..CreateMessageInput::default()
        };
        let user = h.orchestrator.create_message(input, &ctx).await.unwrap();
        h.orchestrator.idle().await;
        assert_eq!(user.model_id.as_deref(), Some("gpt-other"));
    }

    #[tokio::test]
    async fn create_rejects_unknown_model() {
        let h = Harness::new(scripted());
        let chat = Chat::new(Some("nope".into()));
        h.repo.insert_chat(chat.clone());
        let input = CreateMessageInput {
            chat_id: Some(chat.id.clone()),
            ..CreateMessageInput::default()
        };
        let err = h.orchestrator.create_message(input, &h.ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "Model not found or not accessible");
    }

    #[tokio::test]
    async fn create_answers_and_titles_the_chat() {
        let h = Harness::new(MockAdapter::new("OPEN_AI").with_default_completion("\"Simple Arithmetic\""));
        h.adapter.push_tokens(&["4"]);

        let user = h.ask("2+2=").await;
        assert_eq!(user.role, MessageRole::User);
        h.orchestrator.idle().await;

        let answer = h.answer_to(&user);
        assert_eq!(answer.content, "4");
        assert_eq!(answer.status, Some(StreamStatus::Completed));
        let chat = h.repo.chat_snapshot(&h.chat.id).unwrap();
        assert_eq!(chat.title.as_deref(), Some("Simple Arithmetic"));
        assert!(!chat.is_pristine);
    }

    #[tokio::test]
    async fn create_uploads_images() {
        let h = Harness::new(scripted());
        h.adapter.push_tokens(&["a cat"]);
        let input = CreateMessageInput {
            chat_id: Some(h.chat.id.clone()),
            content: "what is this".into(),
            images: vec![ImageInput {
                file_name: Some("cat.png".into()),
                mime_type: "image/png".into(),
                bytes_base64: format!("data:image/png;base64,{}", STANDARD.encode(b"PNG")),
            }],
            ..CreateMessageInput::default()
        };
        let user = h.orchestrator.create_message(input, &h.ctx()).await.unwrap();
        h.orchestrator.idle().await;

        assert_eq!(h.storage.len(), 1);
        assert!(user.content.starts_with("what is this\n\n ![Uploaded Image](/files/"));
        let parts = user.json_content.unwrap();
        assert_eq!(parts[0], ContentPart::text("what is this"));
        assert_matches!(&parts[1], ContentPart::Image { url: Some(url), .. } if url.starts_with("/files/"));
        let files = h.repo.files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].upload_name.as_deref(), Some("cat.png"));
        assert_eq!(h.storage.object(&files[0].file_name).as_deref(), Some(b"PNG".as_slice()));
    }

    #[tokio::test]
    async fn failed_upload_discards_the_user_turn() {
        let mut h = Harness::new(scripted());
        let input = CreateMessageInput {
            chat_id: Some(h.chat.id.clone()),
            content: "look".into(),
            images: vec![ImageInput {
                file_name: None,
                mime_type: "image/png".into(),
                bytes_base64: "%%% not base64".into(),
            }],
            ..CreateMessageInput::default()
        };
        let err = h.orchestrator.create_message(input, &h.ctx()).await.unwrap_err();
        assert_matches!(err, RuntimeError::Storage(_));
        h.orchestrator.idle().await;
        assert!(h.messages().is_empty());
        assert!(h.adapter.calls().is_empty());
        assert_eq!(h.errors().len(), 1);
    }

    // ── edit ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn edit_rejects_assistant_turns() {
        let h = Harness::new(scripted());
        h.adapter.push_tokens(&["x"]);
        let user = h.ask("q").await;
        h.orchestrator.idle().await;
        let answer = h.answer_to(&user);
        let err = h
            .orchestrator
            .edit_message(&answer.id, "new", &h.ctx())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Only user messages can be edited");
    }

    #[tokio::test]
    async fn edit_reuses_the_answer_turn_and_drops_the_rest() {
        let h = Harness::new(scripted());
        h.adapter.push_tokens(&["first"]);
        h.adapter.push_tokens(&["second"]);
        h.adapter.push_tokens(&["edited answer"]);
        let first = h.ask("one").await;
        h.orchestrator.idle().await;
        let answer = h.answer_to(&first);
        let _second = h.ask("two").await;
        h.orchestrator.idle().await;
        assert_eq!(h.messages().len(), 4);

        let edited = h
            .orchestrator
            .edit_message(&first.id, "  one, edited  ", &h.ctx())
            .await
            .unwrap();
        h.orchestrator.idle().await;

        assert_eq!(edited.content, "one, edited");
        let messages = h.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].id, answer.id);
        assert_eq!(messages[1].content, "edited answer");
        let last_call = h.adapter.calls().pop().unwrap();
        assert_eq!(last_call.history.len(), 1);
    }

    // ── switch ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn switch_rejects_user_turns() {
        let h = Harness::new(scripted());
        h.adapter.push_tokens(&["x"]);
        let user = h.ask("q").await;
        h.orchestrator.idle().await;
        let err = h
            .orchestrator
            .switch_model(&user.id, "gpt-other", &h.ctx())
            .await
            .unwrap_err();
        assert_matches!(err, RuntimeError::Validation(ValidationError::SwitchUserMessage));
    }

    #[tokio::test]
    async fn switch_regenerates_with_the_new_model() {
        let h = Harness::new(scripted());
        h.adapter.push_tokens(&["from test"]);
        h.adapter.push_tokens(&["from other"]);
        let user = h.ask("q").await;
        h.orchestrator.idle().await;
        let answer = h.answer_to(&user);

        let reset = h
            .orchestrator
            .switch_model(&answer.id, "gpt-other", &h.ctx())
            .await
            .unwrap();
        assert_eq!(reset.content, "");
        assert_eq!(reset.status, None);
        h.orchestrator.idle().await;

        let switched = h.message(&answer.id);
        assert_eq!(switched.content, "from other");
        assert_eq!(switched.model_name.as_deref(), Some("GPT Other"));
        assert_eq!(h.adapter.calls().last().unwrap().request.model_id, "gpt-other");
    }

    #[tokio::test]
    async fn switch_to_unknown_model_fails() {
        let h = Harness::new(scripted());
        h.adapter.push_tokens(&["x"]);
        let user = h.ask("q").await;
        h.orchestrator.idle().await;
        let answer = h.answer_to(&user);
        let err = h
            .orchestrator
            .switch_model(&answer.id, "missing", &h.ctx())
            .await
            .unwrap_err();
        assert_matches!(err, RuntimeError::Validation(ValidationError::ModelNotFound));
    }

    // ── branch ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn branch_links_to_the_original_and_stays_out_of_context() {
        let h = Harness::new(scripted());
        h.adapter.push_tokens(&["main"]);
        h.adapter.push_tokens(&["alternative"]);
        h.adapter.push_tokens(&["next"]);
        let user = h.ask("q").await;
        h.orchestrator.idle().await;
        let answer = h.answer_to(&user);

        let err = h
            .orchestrator
            .call_other_model(&user.id, "gpt-other", &h.ctx())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "User messages cannot be used for calling others");

        let branch = h
            .orchestrator
            .call_other_model(&answer.id, "gpt-other", &h.ctx())
            .await
            .unwrap();
        h.orchestrator.idle().await;
        let branch = h.message(&branch.id);
        assert_eq!(branch.linked_to_message_id.as_ref(), Some(&answer.id));
        assert_eq!(branch.content, "alternative");

        let _ = h.ask("follow-up").await;
        h.orchestrator.idle().await;
        let calls = h.adapter.calls();
        let history = &calls.last().unwrap().history;
        assert!(history.iter().all(|m| m.body != MessageBody::from("alternative")));
    }

    // ── cancel ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn cancel_stops_the_backend_request() {
        let h = Harness::new(scripted().with_cancellation());
        let user = h.ask("q").await;
        h.orchestrator.idle().await;
        let mut answer = h.answer_to(&user);
        answer.status = Some(StreamStatus::InProgress);
        answer.metadata_mut().request_id = Some("resp_1".into());
        h.repo.insert_message(answer.clone());

        let cancelled = h
            .orchestrator
            .cancel_message(&answer.id, None, &h.ctx())
            .await
            .unwrap();
        assert_eq!(cancelled.status, Some(StreamStatus::Cancelled));
        assert_eq!(h.adapter.stopped_requests(), vec!["resp_1".to_owned()]);
        assert!(h.orchestrator.cancellations().is_empty());
    }

    #[tokio::test]
    async fn cancel_leaves_terminal_turns_alone() {
        let h = Harness::new(scripted());
        h.adapter.push_tokens(&["done"]);
        let user = h.ask("q").await;
        h.orchestrator.idle().await;
        let answer = h.answer_to(&user);
        let out = h
            .orchestrator
            .cancel_message(&answer.id, Some("r".into()), &h.ctx())
            .await
            .unwrap();
        assert_eq!(out.status, Some(StreamStatus::Completed));
        assert!(h.orchestrator.cancellations().is_empty());
    }

    #[tokio::test]
    async fn editing_drops_the_turns_own_images() {
        let h = Harness::new(scripted());
        h.adapter.push_tokens(&["a cat"]);
        h.adapter.push_tokens(&["a dog"]);
        let input = CreateMessageInput {
            chat_id: Some(h.chat.id.clone()),
            content: "what is this?".into(),
            images: vec![ImageInput {
                file_name: None,
                mime_type: "image/png".into(),
                bytes_base64: STANDARD.encode(b"PNG"),
            }],
            ..CreateMessageInput::default()
        };
        let user = h.orchestrator.create_message(input, &h.ctx()).await.unwrap();
        h.orchestrator.idle().await;
        assert_eq!(h.storage.len(), 1);

        let edited = h.orchestrator.edit_message(&user.id, "and now?", &h.ctx()).await.unwrap();
        h.orchestrator.idle().await;

        assert!(edited.json_content.is_none());
        assert!(h.storage.is_empty());
        assert!(h.repo.message_files(std::slice::from_ref(&user.id)).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn switching_a_cancelled_turn_answers_again() {
        let h = Harness::new(scripted().with_event_delay(std::time::Duration::from_millis(10)));
        let shutdown = tokio_util::sync::CancellationToken::new();
        let learner = h
            .orchestrator
            .cancellations()
            .learn_from(h.orchestrator.fanout().hub(), shutdown.clone());
        h.adapter.push_tokens(&["never", " shown"]);
        h.adapter.push_tokens(&["fresh"]);

        let user = h.ask("q").await;
        let answer = h.answer_to(&user);
        let _ = h.orchestrator.cancel_message(&answer.id, None, &h.ctx()).await.unwrap();
        h.orchestrator.idle().await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.message(&answer.id).status, Some(StreamStatus::Cancelled));
        assert!(h.orchestrator.cancellations().is_empty());

        let _ = h.orchestrator.switch_model(&answer.id, "gpt-other", &h.ctx()).await.unwrap();
        h.orchestrator.idle().await;

        let regenerated = h.message(&answer.id);
        assert_eq!(regenerated.status, Some(StreamStatus::Completed));
        assert_eq!(regenerated.content, "fresh");
        assert!(h.orchestrator.cancellations().is_empty());
        shutdown.cancel();
        learner.await.unwrap();
    }

    // ── delete ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn delete_following_removes_later_turns() {
        let h = Harness::new(scripted());
        h.adapter.push_tokens(&["a"]);
        h.adapter.push_tokens(&["b"]);
        let first = h.ask("one").await;
        h.orchestrator.idle().await;
        let _ = h.ask("two").await;
        h.orchestrator.idle().await;

        let deleted = h.orchestrator.delete_message(&first.id, true).await.unwrap();
        assert_eq!(deleted.len(), 4);
        assert!(h.messages().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_user_turn_takes_its_error_turn() {
        let h = Harness::new(scripted());
        // No scripted stream: the answer ends as an error turn.
        let user = h.ask("q").await;
        h.orchestrator.idle().await;
        assert_eq!(h.answer_to(&user).role, MessageRole::Error);

        let deleted = h.orchestrator.delete_message(&user.id, false).await.unwrap();
        assert_eq!(deleted.len(), 2);
        assert!(h.messages().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_turn_removes_its_files() {
        let h = Harness::new(scripted());
        h.adapter.push_tokens(&["ok"]);
        let input = CreateMessageInput {
            chat_id: Some(h.chat.id.clone()),
            images: vec![ImageInput {
                file_name: None,
                mime_type: "image/jpeg".into(),
                bytes_base64: STANDARD.encode(b"JPG"),
            }],
            ..CreateMessageInput::default()
        };
        let user = h.orchestrator.create_message(input, &h.ctx()).await.unwrap();
        h.orchestrator.idle().await;
        assert_eq!(h.storage.len(), 1);

        let _ = h.orchestrator.delete_message(&user.id, false).await.unwrap();
        assert!(h.storage.is_empty());
        assert!(h.repo.files().is_empty());
    }

    #[tokio::test]
    async fn delete_unknown_message() {
        let h = Harness::new(scripted());
        let err = h
            .orchestrator
            .delete_message(&MessageId::from("nope"), false)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Message not found");
    }

    #[test]
    fn image_extension_from_mime_type() {
        assert_eq!(extension("image/png"), "png");
        assert_eq!(extension("weird"), "bin");
    }
}
