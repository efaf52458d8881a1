//! Orchestrator over in-memory collaborators and a scripted adapter.

use std::sync::Arc;

use axum::Router;
use parley_core::{Chat, ConnectionParams, Message, MessageRole, Model};
use parley_fanout::{FanOut, LocalHub};
use parley_gateway::{AdapterFactory, Gateway, GatewayResult, GenerationDefaults, ProviderKind};
use parley_llm::ProviderAdapter;
use parley_llm::mock::MockAdapter;
use parley_runtime::{
    CancellationRegistry, ChunkSearch, CreateMessageInput, EntityRepository, InMemoryChunkSearch, InMemoryRepository,
    InMemoryStorage, Orchestrator, OrchestratorParts, RequestContext, RuntimeSettings, StorageService,
};
use parley_settings::{FanoutSettings, ProviderSettings, ServerSettings};
use parley_tools::ToolRegistry;
use parley_tools::mcp::McpCatalog;

use crate::ParleyServer;

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
    pub adapter: Arc<MockAdapter>,
    pub chat: Chat,
}

impl Harness {
    pub fn new(adapter: MockAdapter) -> Self {
        let adapter = Arc::new(adapter);
        let repo = Arc::new(InMemoryRepository::new().with_models([
            Model::chat("gpt-test", "GPT Test", "OPEN_AI"),
            Model::chat("gpt-other", "GPT Other", "OPEN_AI"),
        ]));
        let gateway = Gateway::with_factory(
            ProviderSettings {
                enabled: vec!["*".into()],
                ..ProviderSettings::default()
            },
            GenerationDefaults::default(),
            Arc::new(FixedFactory(Arc::clone(&adapter))),
        );
        let chat = Chat::new(Some("gpt-test".into()));
        repo.insert_chat(chat.clone());
        let orchestrator = Orchestrator::new(OrchestratorParts {
            repository: Arc::clone(&repo) as Arc<dyn EntityRepository>,
            storage: Arc::new(InMemoryStorage::default()) as Arc<dyn StorageService>,
            chunks: Arc::new(InMemoryChunkSearch::new(Vec::new())) as Arc<dyn ChunkSearch>,
            gateway,
            tools: ToolRegistry::new(Arc::new(McpCatalog::new(reqwest::Client::new()))),
            fanout: FanOut::local(LocalHub::new(64), FanoutSettings::default()),
            cancellations: Arc::new(CancellationRegistry::new()),
            settings: RuntimeSettings::default(),
        });
        Self {
            orchestrator,
            repo,
            adapter,
            chat,
        }
    }

    pub fn router(&self) -> Router {
        ParleyServer::new(ServerSettings::default(), self.orchestrator.clone()).router()
    }

    pub async fn ask(&self, content: &str) -> Message {
        let input = CreateMessageInput {
            chat_id: Some(self.chat.id.clone()),
            content: content.into(),
            ..CreateMessageInput::default()
        };
        self.orchestrator
            .create_message(input, &RequestContext::default())
            .await
            .unwrap()
    }

    pub fn answer_to(&self, user: &Message) -> Message {
        self.repo
            .chat_messages(&self.chat.id)
            .into_iter()
            .find(|m| m.role != MessageRole::User && m.id != user.id)
            .unwrap()
    }
}
