//! Chat API handlers.
//!
//! `POST /api/chat` streams the reply as plain text: each provider fragment
//! becomes one body chunk, in upstream order. Failures before the first
//! fragment never reach the client (the pipeline falls back); a failure after
//! it aborts the body. A client that disconnects drops the body stream,
//! which cancels the provider session.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;
use futures::Stream;
use kateno_core::chat::ChatRequest;
use kateno_core::error::{ChatError, ProviderError};
use kateno_core::message::ConversationId;
use kateno_core::provider::ProviderDescriptor;
use kateno_core::store::{ConversationStore, Exchange, StoredMessage};
use kateno_pipeline::ChatStream;
use kateno_security::validate_and_sanitize;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{ApiError, SharedState, error_response};

pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";
pub const PROVIDER_HEADER: &str = "x-provider";

/// POST /api/chat
pub async fn chat_handler(
    State(state): State<SharedState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(error = %rejection, "Rejected chat request body");
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
            }
            return error_response(StatusCode::BAD_REQUEST, "Invalid request format");
        }
    };

    let request = match validate_and_sanitize(request) {
        Ok(request) => request,
        Err(e) => return ApiError(ChatError::Validation(e.to_string())).into_response(),
    };

    let stream = match state.pipeline.route(&request, CancellationToken::new()).await {
        Ok(stream) => stream,
        Err(e) => return ApiError(e).into_response(),
    };

    info!(
        provider = %stream.provider(),
        conversation = %stream.conversation_id(),
        messages = request.messages.len(),
        "Chat stream started"
    );

    let conversation_id = HeaderValue::from_str(stream.conversation_id().as_str()).ok();
    let provider = HeaderValue::from_str(stream.provider()).ok();

    let mut response = Response::new(Body::from_stream(reply_body(stream, state.store.clone())));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    if let Some(value) = conversation_id {
        headers.insert(CONVERSATION_ID_HEADER, value);
    }
    if let Some(value) = provider {
        headers.insert(PROVIDER_HEADER, value);
    }
    response
}

/// Adapt a `ChatStream` into body chunks, persisting the exchange once the
/// reply completes normally.
fn reply_body(
    stream: ChatStream,
    store: Arc<dyn ConversationStore>,
) -> impl Stream<Item = Result<Bytes, ProviderError>> + Send + 'static {
    futures::stream::unfold(Some(stream), move |state| {
        let store = store.clone();
        async move {
            let mut stream = state?;
            match stream.next_fragment().await {
                Some(Ok(fragment)) => Some((Ok(Bytes::from(fragment)), Some(stream))),
                Some(Err(e)) => {
                    warn!(provider = %stream.provider(), error = %e, "Reply stream failed after first byte");
                    Some((Err(e), None))
                }
                None => {
                    if let Some(exchange) = stream.exchange() {
                        tokio::spawn(persist(store, exchange));
                    }
                    None
                }
            }
        }
    })
}

async fn persist(store: Arc<dyn ConversationStore>, exchange: Exchange) {
    let conversation = exchange.conversation_id.clone();
    if let Err(e) = store.save_exchange(exchange).await {
        warn!(conversation = %conversation, error = %e, "Failed to persist exchange");
    }
}

#[derive(Serialize)]
pub struct ProvidersResponse {
    pub active: String,
    pub providers: Vec<ProviderDescriptor>,
}

/// GET /api/providers
pub async fn providers_handler(State(state): State<SharedState>) -> Json<ProvidersResponse> {
    let registry = state.pipeline.registry();
    Json(ProvidersResponse {
        active: registry.active().name().to_string(),
        providers: registry.descriptors(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub conversation_id: String,
    pub messages: Vec<StoredMessage>,
}

/// GET /api/conversations/{id}
pub async fn conversation_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationResponse>, Response> {
    let conversation_id = ConversationId::from(id.as_str());
    let messages = state.store.messages(&conversation_id).await.map_err(|e| {
        warn!(conversation = %conversation_id, error = %e, "Failed to load conversation");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load conversation")
    })?;

    if messages.is_empty() {
        return Err(error_response(StatusCode::NOT_FOUND, "Conversation not found"));
    }

    Ok(Json(ConversationResponse {
        conversation_id: id,
        messages,
    }))
}
