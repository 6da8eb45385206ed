use super::generation::{self, ChunkMeta, GenerationScope};
use super::requests::ChatCompletionRequest;
use super::responses::{APIError, ChatCompletionResponse, ChatResponder, ModelCard, ModelList};
use super::streaming::Streamer;
use super::utils::get_created_time_secs;
use super::OpenAIServerData;
use crate::scheduler::SchedulerError;
use axum::extract::State;
use axum::http::{self, Method};
use axum::response::sse::KeepAlive;
use axum::routing::{get, post};
use axum::{response::Sse, Json, Router};
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;
use utoipa::OpenApi;
use uuid::Uuid;

#[derive(OpenApi)]
#[openapi(paths(list_models, chat_completions))]
pub struct ApiDoc;

pub fn router(data: Arc<OpenAIServerData>) -> Router {
    let cors_layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_origin(AllowOrigin::any());

    Router::new()
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(cors_layer)
        .with_state(data)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    get,
    tag = "vllm-router",
    path = "/v1/models",
    responses((status = 200, description = "Registered models"))
)]
pub async fn list_models(State(data): State<Arc<OpenAIServerData>>) -> Json<ModelList> {
    data.scheduler.log_status();
    let cards = data
        .scheduler
        .model_names()
        .iter()
        .map(|model| ModelCard::new(model.clone(), data.owned_by.clone()))
        .collect();
    Json(ModelList::new(cards))
}

#[utoipa::path(
    post,
    tag = "vllm-router",
    path = "/v1/chat/completions",
    request_body(content = inline(serde_json::Value), description = "Chat completion request"),
    responses(
        (status = 200, description = "Chat completion, or an SSE stream of chunks"),
        (status = 404, description = "Model not found"),
        (status = 422, description = "Invalid sampling parameters")
    )
)]
pub async fn chat_completions(
    State(data): State<Arc<OpenAIServerData>>,
    request: Json<ChatCompletionRequest>,
) -> ChatResponder {
    chat_completions_with_data(data, request.0).await
}

pub async fn chat_completions_with_data(
    data: Arc<OpenAIServerData>,
    request: ChatCompletionRequest,
) -> ChatResponder {
    let params = match request.sampling_params() {
        Ok(params) => params,
        Err(e) => return ChatResponder::ValidationError(e),
    };

    let request_id = format!("chatcmpl-{}", Uuid::new_v4());
    let scope = match GenerationScope::admit(&data.scheduler, &request_id, &request.model) {
        Ok(scope) => scope,
        Err(e @ SchedulerError::ModelNotFound(_)) => {
            return ChatResponder::NotFound(APIError::from(e))
        }
        Err(e @ SchedulerError::DuplicateRequest(_)) => {
            return ChatResponder::Conflict(APIError::from(e))
        }
    };
    let created = get_created_time_secs();
    info!(
        "Request {} admitted: model={}, stream={}, n={}, max_tokens={}",
        request_id,
        request.model,
        request.is_stream(),
        params.n,
        params.max_tokens
    );

    if request.is_stream() {
        let (tx, rx) = flume::unbounded();
        let (hangup, watch) = oneshot::channel();
        let meta = ChunkMeta {
            id: request_id,
            model: request.model,
            created,
        };
        tokio::spawn(generation::stream(
            scope,
            request.messages,
            params,
            meta,
            tx,
            watch,
        ));
        ChatResponder::Streamer(
            Sse::new(Streamer::new(rx, hangup)).keep_alive(
                KeepAlive::new()
                    .interval(data.keep_alive)
                    .text("keep-alive-text"),
            ),
        )
    } else {
        let outputs = generation::complete(scope, request.messages, params).await;
        ChatResponder::Completion(ChatCompletionResponse::new(
            request_id,
            request.model,
            created,
            outputs,
        ))
    }
}
