//! JSON operations on messages.
//!
//! Every handler returns as soon as the orchestrator has persisted the
//! initial turns; progress arrives over the chat's WebSocket.

use axum::Json;
use axum::extract::{Path, Query, State};
use parley_core::{Chat, ChatId, Message, MessageId};
use parley_runtime::{CreateMessageInput, DeletedMessage};
use serde::Deserialize;
use tracing::debug;

use crate::context::Caller;
use crate::error::ApiError;
use crate::health::{self, HealthResponse};
use crate::server::AppState;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Body of `POST /api/chats`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewChat {
    /// Model answering in the chat; the caller's default applies when absent.
    pub model_id: Option<String>,
}

/// Body of `PUT /api/messages/{id}`.
#[derive(Debug, Deserialize)]
pub struct EditBody {
    /// New user text.
    pub content: String,
}

/// Body of the switch and call-other operations.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelChoice {
    /// Catalog ID of the model to answer with.
    pub model_id: String,
}

/// Query of `POST /api/messages/{id}/cancel`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CancelParams {
    /// Backend request to stop, when the client knows it.
    pub request_id: Option<String>,
}

/// Query of `DELETE /api/messages/{id}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteParams {
    /// Also delete every later turn of the chat.
    pub delete_following: bool,
}

/// GET /health
pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.connections.count(),
        state.orchestrator.pending(),
    ))
}

/// POST /api/chats
pub(crate) async fn create_chat(State(state): State<AppState>, Json(body): Json<NewChat>) -> ApiResult<Chat> {
    Ok(Json(state.orchestrator.create_chat(body.model_id).await?))
}

/// POST /api/chats/{chat_id}/messages
pub(crate) async fn create_message(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Caller(ctx): Caller,
    Json(mut input): Json<CreateMessageInput>,
) -> ApiResult<Message> {
    input.chat_id = Some(chat_id);
    debug!(images = input.images.len(), documents = input.document_ids.len(), "create message");
    Ok(Json(state.orchestrator.create_message(input, &ctx).await?))
}

/// PUT /api/messages/{id}
pub(crate) async fn edit_message(
    State(state): State<AppState>,
    Path(id): Path<MessageId>,
    Caller(ctx): Caller,
    Json(body): Json<EditBody>,
) -> ApiResult<Message> {
    Ok(Json(state.orchestrator.edit_message(&id, &body.content, &ctx).await?))
}

/// POST /api/messages/{id}/switch
pub(crate) async fn switch_model(
    State(state): State<AppState>,
    Path(id): Path<MessageId>,
    Caller(ctx): Caller,
    Json(body): Json<ModelChoice>,
) -> ApiResult<Message> {
    Ok(Json(state.orchestrator.switch_model(&id, &body.model_id, &ctx).await?))
}

/// POST /api/messages/{id}/call-other
pub(crate) async fn call_other_model(
    State(state): State<AppState>,
    Path(id): Path<MessageId>,
    Caller(ctx): Caller,
    Json(body): Json<ModelChoice>,
) -> ApiResult<Message> {
    Ok(Json(state.orchestrator.call_other_model(&id, &body.model_id, &ctx).await?))
}

/// POST /api/messages/{id}/cancel
pub(crate) async fn cancel_message(
    State(state): State<AppState>,
    Path(id): Path<MessageId>,
    Query(params): Query<CancelParams>,
    Caller(ctx): Caller,
) -> ApiResult<Message> {
    Ok(Json(state.orchestrator.cancel_message(&id, params.request_id, &ctx).await?))
}

/// DELETE /api/messages/{id}
pub(crate) async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<MessageId>,
    Query(params): Query<DeleteParams>,
) -> ApiResult<Vec<DeletedMessage>> {
    Ok(Json(state.orchestrator.delete_message(&id, params.delete_following).await?))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use parley_core::{MessageRole, StreamStatus};
    use parley_llm::mock::MockAdapter;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::test_support::Harness;

    async fn call(h: &Harness, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = h.router().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_counters() {
        let h = Harness::new(MockAdapter::new("OPEN_AI"));
        let (status, body) = call(&h, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["pendingGenerations"], 0);
    }

    #[tokio::test]
    async fn create_returns_the_user_turn_and_answers() {
        let h = Harness::new(MockAdapter::new("OPEN_AI").with_default_completion("Arithmetic"));
        h.adapter.push_tokens(&["4"]);

        let uri = format!("/api/chats/{}/messages", h.chat.id);
        let (status, body) = call(&h, Method::POST, &uri, Some(json!({ "content": "2+2=" }))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "user");
        assert_eq!(body["content"], "2+2=");
        assert_eq!(body["chatId"], h.chat.id.as_str());

        h.orchestrator.idle().await;
        let messages = h.repo.chat_messages(&h.chat.id);
        let answer = messages.iter().find(|m| m.role == MessageRole::Assistant).unwrap();
        assert_eq!(answer.content, "4");
        assert_eq!(answer.status, Some(StreamStatus::Completed));
    }

    #[tokio::test]
    async fn chats_are_created_then_used() {
        let h = Harness::new(MockAdapter::new("OPEN_AI").with_default_completion("Title"));
        h.adapter.push_tokens(&["hello"]);
        let (status, chat) = call(&h, Method::POST, "/api/chats", Some(json!({ "modelId": "gpt-other" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(chat["isPristine"], true);

        let uri = format!("/api/chats/{}/messages", chat["id"].as_str().unwrap());
        let (status, body) = call(&h, Method::POST, &uri, Some(json!({ "content": "hi" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["modelId"], "gpt-other");
        h.orchestrator.idle().await;
    }

    #[tokio::test]
    async fn unknown_chat_is_not_found() {
        let h = Harness::new(MockAdapter::new("OPEN_AI"));
        let (status, body) = call(&h, Method::POST, "/api/chats/missing/messages", Some(json!({ "content": "hi" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Chat not found");
        assert_eq!(body["category"], "validation");
    }

    #[tokio::test]
    async fn editing_an_answer_is_rejected() {
        let h = Harness::new(MockAdapter::new("OPEN_AI").with_default_completion("Title"));
        h.adapter.push_tokens(&["hello"]);
        let user = h.ask("hi").await;
        h.orchestrator.idle().await;
        let answer = h.answer_to(&user);

        let (status, body) = call(
            &h,
            Method::PUT,
            &format!("/api/messages/{}", answer.id),
            Some(json!({ "content": "rewritten" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Only user messages can be edited");
    }

    #[tokio::test]
    async fn switching_to_an_unknown_model_is_not_found() {
        let h = Harness::new(MockAdapter::new("OPEN_AI").with_default_completion("Title"));
        h.adapter.push_tokens(&["hello"]);
        let user = h.ask("hi").await;
        h.orchestrator.idle().await;
        let answer = h.answer_to(&user);

        let uri = format!("/api/messages/{}/switch", answer.id);
        let (status, _) = call(&h, Method::POST, &uri, Some(json!({ "modelId": "nope" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn call_other_creates_a_linked_branch() {
        let h = Harness::new(MockAdapter::new("OPEN_AI").with_default_completion("Title"));
        h.adapter.push_tokens(&["first"]);
        h.adapter.push_tokens(&["second"]);
        let user = h.ask("hi").await;
        h.orchestrator.idle().await;
        let answer = h.answer_to(&user);

        let uri = format!("/api/messages/{}/call-other", answer.id);
        let (status, body) = call(&h, Method::POST, &uri, Some(json!({ "modelId": "gpt-other" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["linkedToMessageId"], answer.id.as_str());
        assert_eq!(body["modelId"], "gpt-other");
        h.orchestrator.idle().await;
    }

    #[tokio::test]
    async fn cancelling_a_finished_turn_returns_it_unchanged() {
        let h = Harness::new(MockAdapter::new("OPEN_AI").with_default_completion("Title"));
        h.adapter.push_tokens(&["done"]);
        let user = h.ask("hi").await;
        h.orchestrator.idle().await;
        let answer = h.answer_to(&user);

        let uri = format!("/api/messages/{}/cancel?requestId=resp_1", answer.id);
        let (status, body) = call(&h, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["content"], "done");
        assert!(h.adapter.stopped_requests().is_empty());
    }

    #[tokio::test]
    async fn delete_following_removes_later_turns() {
        let h = Harness::new(MockAdapter::new("OPEN_AI").with_default_completion("Title"));
        h.adapter.push_tokens(&["answer"]);
        let user = h.ask("hi").await;
        h.orchestrator.idle().await;

        let uri = format!("/api/messages/{}?deleteFollowing=true", user.id);
        let (status, body) = call(&h, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let deleted = body.as_array().unwrap();
        assert_eq!(deleted.len(), 2);
        assert_eq!(deleted[0]["id"], user.id.as_str());
        assert!(h.repo.chat_messages(&h.chat.id).is_empty());
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let h = Harness::new(MockAdapter::new("OPEN_AI"));
        let (status, _) = call(&h, Method::GET, "/api/nothing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
