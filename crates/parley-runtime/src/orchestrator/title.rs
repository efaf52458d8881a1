//! Chat title synthesis after the first answer.

use chrono::Utc;
use parley_core::{Chat, MessageRole, Model, ModelMessage, ModelType};
use parley_llm::CompletionRequest;
use tracing::{debug, warn};

use super::Orchestrator;
use crate::collaborators::RequestContext;
use crate::prompts;

/// Title of a chat whose first question was empty.
pub const NEW_CHAT: &str = "New Chat";

const FALLBACK_CHARS: usize = 25;

/// Title derived from the question when the model gives none.
pub fn fallback_title(question: &str) -> String {
    let question = question.trim();
    if question.is_empty() {
        return NEW_CHAT.to_owned();
    }
    let mut title: String = question.chars().take(FALLBACK_CHARS).collect();
    if question.chars().count() > FALLBACK_CHARS {
        title.push_str("...");
    }
    title
}

fn clean_title(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix(['"', '\'']).unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix(['"', '\'']).unwrap_or(trimmed);
    trimmed.trim().to_owned()
}

impl Orchestrator {
    /// Model for titles: the answering model when it is a chat model,
    /// otherwise the caller's or the configured default chat model.
    async fn title_model(&self, model: &Model, ctx: &RequestContext) -> Option<Model> {
        if model.model_type == ModelType::Chat {
            return Some(model.clone());
        }
        let default_id = ctx
            .default_model_id
            .clone()
            .or_else(|| self.settings().ai.default_model_id.clone())?;
        match self.repo().model(&default_id).await {
            Ok(found) => found.filter(|m| m.model_type == ModelType::Chat),
            Err(e) => {
                warn!(model = %default_id, error = %e, "failed to load title model");
                None
            }
        }
    }

    async fn suggest_title(&self, model: &Model, ctx: &RequestContext, question: &str, answer: &str) -> String {
        let ai = &self.settings().ai;
        let request = CompletionRequest {
            model_id: model.model_id.clone(),
            temperature: Some(ai.summarizing_temperature),
            max_tokens: Some(ai.title_max_tokens),
            ..CompletionRequest::default()
        };
        let prompt = ModelMessage::new(MessageRole::User, prompts::chat_title(question, answer));
        match self
            .inner
            .gateway
            .complete_chat(model, &ctx.connection, request, vec![prompt])
            .await
        {
            Ok(response) => {
                let title = clean_title(&response.content);
                if title.is_empty() { fallback_title(question) } else { title }
            }
            Err(e) => {
                warn!(error = %e, "title synthesis failed");
                fallback_title(question)
            }
        }
    }

    /// Give an untitled or pristine chat a title and mark it used.
    pub(super) async fn ensure_title(
        &self,
        chat: &mut Chat,
        model: &Model,
        ctx: &RequestContext,
        question: &str,
        answer: &str,
    ) {
        let Some(title_model) = self.title_model(model, ctx).await else {
            debug!("no chat model for titles");
            return;
        };
        let title = self.suggest_title(&title_model, ctx, question, answer).await;
        debug!(title, "chat titled");
        chat.title = Some(title);
        chat.is_pristine = false;
        chat.updated_at = Utc::now();
        if let Err(e) = self.repo().save_chat(chat).await {
            warn!(chat_id = %chat.id, error = %e, "failed to save chat title");
        }
    }
}

#[cfg(test)]
mod tests {
    use parley_llm::ProviderError;
    use parley_llm::mock::MockAdapter;

    use super::super::test_support::*;
    use super::*;

    #[test]
    fn fallback_truncates_long_questions() {
        assert_eq!(fallback_title("short"), "short");
        assert_eq!(
            fallback_title("What is the airspeed velocity of an unladen swallow?"),
            "What is the airspeed velo..."
        );
        assert_eq!(fallback_title("   "), NEW_CHAT);
    }

    #[test]
    fn quotes_are_stripped() {
        assert_eq!(clean_title("\"Travel Plans\""), "Travel Plans");
        assert_eq!(clean_title("'Budget'\n"), "Budget");
        assert_eq!(clean_title("Plain"), "Plain");
    }

    #[tokio::test]
    async fn failed_synthesis_uses_the_question() {
        let h = Harness::new(MockAdapter::new("OPEN_AI"));
        h.adapter.push_completion(Err(ProviderError::other("down")));
        let mut chat = h.chat.clone();
        h.orchestrator
            .ensure_title(&mut chat, &chat_model(), &h.ctx(), "Where is Lisbon?", "Portugal")
            .await;
        assert_eq!(chat.title.as_deref(), Some("Where is Lisbon?"));
        assert!(!chat.is_pristine);
        assert_eq!(h.repo.chat_snapshot(&chat.id).unwrap().title.as_deref(), Some("Where is Lisbon?"));
    }

    #[tokio::test]
    async fn title_request_uses_summarizing_settings() {
        let h = Harness::new(MockAdapter::new("OPEN_AI").with_default_completion("Lisbon"));
        let mut chat = h.chat.clone();
        h.orchestrator
            .ensure_title(&mut chat, &chat_model(), &h.ctx(), "Where is Lisbon?", "Portugal")
            .await;
        let calls = h.adapter.calls();
        let call = &calls[0];
        assert_eq!(call.request.temperature, Some(0.25));
        assert_eq!(call.request.max_tokens, Some(10));
        assert!(!call.streaming);
    }

    #[tokio::test]
    async fn non_chat_model_borrows_the_default() {
        let h = Harness::new(MockAdapter::new("OPEN_AI").with_default_completion("Vectors"));
        let ctx = RequestContext {
            default_model_id: Some(other_model().model_id),
            ..RequestContext::default()
        };
        let found = h.orchestrator.title_model(&embedding_model(), &ctx).await;
        assert_eq!(found.map(|m| m.model_id), Some(other_model().model_id));
        assert!(h.orchestrator.title_model(&embedding_model(), &h.ctx()).await.is_none());
    }
}
