use crate::application::mapper::IdMapper;
use crate::domain::mapping::Action;
use crate::domain::protocol::{AckResponse, CallbackEnvelope};
use crate::error::MapperError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::error;

/// Routes the authority posts its callbacks to, under `prefix`.
pub fn router(mapper: Arc<IdMapper>, prefix: &str) -> Router {
    let prefix = prefix.trim_end_matches('/');
    Router::new()
        .route(&format!("{prefix}/mapper/on-resolve"), post(on_resolve))
        .route(&format!("{prefix}/mapper/on-link"), post(on_link))
        .route(&format!("{prefix}/mapper/on-update"), post(on_update))
        .with_state(mapper)
}

/// Serves the callback routes until the listener fails.
pub async fn serve(listener: TcpListener, mapper: Arc<IdMapper>, prefix: String) -> std::io::Result<()> {
    axum::serve(listener, router(mapper, &prefix)).await
}

async fn on_resolve(
    State(mapper): State<Arc<IdMapper>>,
    Json(envelope): Json<CallbackEnvelope>,
) -> Result<Json<AckResponse>, CallbackError> {
    handle(mapper, Action::Resolve, envelope).await
}

async fn on_link(
    State(mapper): State<Arc<IdMapper>>,
    Json(envelope): Json<CallbackEnvelope>,
) -> Result<Json<AckResponse>, CallbackError> {
    handle(mapper, Action::Link, envelope).await
}

async fn on_update(
    State(mapper): State<Arc<IdMapper>>,
    Json(envelope): Json<CallbackEnvelope>,
) -> Result<Json<AckResponse>, CallbackError> {
    handle(mapper, Action::Update, envelope).await
}

async fn handle(
    mapper: Arc<IdMapper>,
    action: Action,
    envelope: CallbackEnvelope,
) -> Result<Json<AckResponse>, CallbackError> {
    let reply = mapper.on_callback(action, &envelope).await.map_err(|e| {
        error!(txn_id = %envelope.message.transaction_id, %action, error = %e, "Callback processing failed");
        CallbackError(e)
    })?;
    Ok(Json(reply))
}

/// Internal failure while applying a callback, answered with an `ERR` ack.
pub struct CallbackError(MapperError);

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        let code = match &self.0 {
            MapperError::CompletionNotRegistered { .. } => "rjct.callback.not_registered",
            _ => "rjct.internal.error",
        };
        let body = AckResponse::err(code, &self.0.to_string());
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}
