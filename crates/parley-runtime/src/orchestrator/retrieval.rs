//! Answering from documents.
//!
//! Chunks are retrieved, packed into a JSON-contract prompt and sent as a
//! single non-streaming request. When the provider rejects the request as
//! too large, the chunk limit is halved and full-page loading is turned off
//! until the limit reaches the configured floor.

use parley_core::{MessageBody, MessageRole, ModelFeature, ModelMessage, ModelResponse, StreamStatus};
use parley_llm::CompletionRequest;
use parley_llm::error_parsing::is_context_too_large_message;
use tracing::{debug, instrument, warn};

use super::generation::Outcome;
use super::{Orchestrator, RagTurn};
use crate::answer::parse_rag_answer;
use crate::collaborators::{ChunkQuery, DocumentChunk};
use crate::errors::{RuntimeError, RuntimeResult};
use crate::prompts;

fn is_oversized(err: &RuntimeError) -> bool {
    err.is_context_too_large() || is_context_too_large_message(&err.to_string())
}

impl Orchestrator {
    #[instrument(skip_all, fields(chat_id = %turn.chat.id, message_id = %turn.assistant.id, documents = turn.document_ids.len()))]
    pub(super) async fn answer_from_documents(&self, mut turn: RagTurn) {
        let rag = self.settings().rag.clone();
        let mut query = ChunkQuery {
            limit: rag.query_chunks_limit,
            load_full_page: rag.load_full_pages,
        };

        // `None` once a cancellation is observed: nothing more is dispatched.
        let attempt = loop {
            if self.inner.cancellations.is_cancelled(&turn.assistant.id) {
                debug!(limit = query.limit, "cancellation observed, retrieval stopped");
                break None;
            }
            let mut searching = turn.assistant.clone();
            searching.status = Some(StreamStatus::RagSearch);
            self.inner.fanout.publish_chat_message(&turn.chat, &searching, true).await;

            match self.ask_documents(&turn, query).await {
                Ok(found) => break Some(Ok(found)),
                Err(e) if is_oversized(&e) => {
                    query.limit /= 2;
                    query.load_full_page = false;
                    if query.limit <= rag.floor {
                        break Some(Err(e));
                    }
                    warn!(limit = query.limit, error = %e, "request too large, retrying with fewer chunks");
                }
                Err(e) => break Some(Err(e)),
            }
        };

        let outcome = match attempt.map(|a| a.and_then(|(response, chunks)| interpret(&turn, response, &chunks))) {
            None => Outcome::Cancelled { partial: String::new() },
            Some(Ok(outcome)) => outcome,
            Some(Err(e)) => Outcome::Failed(e.to_string()),
        };
        self.finish(&mut turn.chat, &turn.model, &turn.context, &turn.question, turn.assistant, outcome)
            .await;
    }

    /// One retrieval plus model round.
    async fn ask_documents(&self, turn: &RagTurn, query: ChunkQuery) -> RuntimeResult<(ModelResponse, Vec<DocumentChunk>)> {
        let chunks = self
            .inner
            .chunks
            .find_chunks(&turn.document_ids, &turn.question, query, &turn.context.connection)
            .await?;
        debug!(chunks = chunks.len(), limit = query.limit, full_pages = query.load_full_page, "chunks retrieved");

        let prompt = prompts::rag_request(&chunks, &turn.question);
        let settings = self.chat_settings(&turn.chat);
        let reasoning = turn.model.has_feature(ModelFeature::Reasoning);
        let request = CompletionRequest {
            model_id: turn.model.model_id.clone(),
            system_prompt: Some(prompt.system_prompt),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            top_p: settings.top_p,
            thinking: settings.thinking.filter(|_| reasoning),
            thinking_budget: settings.thinking_budget.filter(|_| reasoning),
            trace_id: Some(turn.assistant.id.to_string()),
            ..CompletionRequest::default()
        };
        let history = vec![ModelMessage {
            role: MessageRole::User,
            body: MessageBody::Text(prompt.user_input),
            timestamp: Some(turn.user_turn.created_at),
        }];
        let response = self
            .inner
            .gateway
            .complete_chat(&turn.model, &turn.context.connection, request, history)
            .await?;
        Ok((response, chunks))
    }
}

/// Turn the model's JSON reply into the answered outcome.
fn interpret(turn: &RagTurn, response: ModelResponse, chunks: &[DocumentChunk]) -> RuntimeResult<Outcome> {
    let answer = parse_rag_answer(&response.content).map_err(|e| RuntimeError::InvalidAnswer(e.to_string()))?;
    let mut metadata = response.metadata;
    metadata.document_ids.clone_from(&turn.document_ids);
    metadata.analysis.clone_from(&answer.step_by_step_analysis);
    metadata.relevant_chunks = answer.relevant_chunks(chunks);
    Ok(Outcome::Answered {
        content: answer.content(&response.content),
        metadata,
    })
}
