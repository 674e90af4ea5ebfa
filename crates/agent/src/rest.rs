// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent local REST API (§6): HTTPS on the module-API listener, HTTP Basic
//! auth with `user=moduleID` checked against the per-module `AuthStore`.
//! `/endpoint`, `/controller/push`, `/webhook` under `/api/v1`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine;
use dmzero_core::{CoreError, ErrorKind, ModuleId, WebhookEvent, SERVICE_P2P};
use dmzero_wire::agent_rpc::{AgentCall, AgentReply};
use dmzero_wire::rest::{
    ControllerPushRequest, DeleteByIdQuery, EndpointListResponse, ErrorBody, PushEndpointQuery, RegisterAgentWebhookRequest,
    AgentWebhookSummary,
};
use dmzero_wire::{read_message, write_message};
use dmzero_gateways::overlay::OverlayGateway;

use crate::state::AgentState;

pub fn router(state: Arc<AgentState>, overlay: Arc<dyn OverlayGateway>) -> Router {
    let module_state = Arc::new(ModuleRestState { state, overlay });
    Router::new()
        .route("/api/v1/endpoint", get(list_endpoints))
        .route("/api/v1/endpoint/push", axum::routing::post(push_to_endpoint))
        .route("/api/v1/controller/push", axum::routing::post(push_to_controller))
        .route("/api/v1/webhook", get(list_webhooks).post(register_webhook).delete(delete_webhook))
        .route_layer(middleware::from_fn_with_state(module_state.clone(), require_module_auth))
        .with_state(module_state)
}

struct ModuleRestState {
    state: Arc<AgentState>,
    overlay: Arc<dyn OverlayGateway>,
}

/// The calling module's own id, set by [`require_module_auth`] once Basic
/// auth succeeds, so handlers never re-parse the header.
#[derive(Clone, Copy)]
struct CallerModuleId(ModuleId);

async fn require_module_auth(
    State(state): State<Arc<ModuleRestState>>,
    headers: HeaderMap,
    mut request: axum::extract::Request,
    next: Next,
) -> Response {
    match check_module_auth(&state.state, &headers) {
        Ok(module_id) => {
            request.extensions_mut().insert(CallerModuleId(module_id));
            next.run(request).await
        }
        Err(error) => api_error(error).into_response(),
    }
}

fn check_module_auth(state: &AgentState, headers: &HeaderMap) -> Result<ModuleId, CoreError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CoreError::unauthenticated("missing Authorization header"))?;
    let encoded = header.strip_prefix("Basic ").ok_or_else(|| CoreError::unauthenticated("expected HTTP Basic authentication"))?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| CoreError::unauthenticated("malformed basic auth payload"))?;
    let decoded = String::from_utf8(decoded).map_err(|_| CoreError::unauthenticated("malformed basic auth payload"))?;
    let (user, pass) = decoded.split_once(':').ok_or_else(|| CoreError::unauthenticated("malformed basic auth payload"))?;
    let module_id: ModuleId = user.parse().map_err(|_| CoreError::unauthenticated("bad credentials"))?;
    if state.auth.validate(user, pass) {
        Ok(module_id)
    } else {
        Err(CoreError::unauthenticated("bad credentials"))
    }
}

fn api_error(error: CoreError) -> (StatusCode, Json<ErrorBody>) {
    let status = match error.kind {
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::NotAllowed => StatusCode::FORBIDDEN,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorBody { kind: error.kind.to_string(), message: error.message }))
}

// ---- /endpoint ----

async fn list_endpoints(State(state): State<Arc<ModuleRestState>>) -> Result<Json<EndpointListResponse>, (StatusCode, Json<ErrorBody>)> {
    let self_identity = state.overlay.get_current_identity();
    let identities = state
        .overlay
        .get_service_terminators(SERVICE_P2P)
        .await
        .map_err(api_error)?
        .into_iter()
        .filter(|id| *id != self_identity)
        .collect();
    Ok(Json(EndpointListResponse { identities }))
}

async fn push_to_endpoint(
    State(state): State<Arc<ModuleRestState>>,
    axum::Extension(CallerModuleId(module_id)): axum::Extension<CallerModuleId>,
    Query(query): Query<PushEndpointQuery>,
    body: Bytes,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    share_push_data(&state.overlay, &query.id, module_id, body.to_vec()).await.map_err(api_error)?;
    Ok(StatusCode::OK)
}

/// Dials the peer's `service-p2p` terminator directly, mirroring
/// `peer_ping::ping_one` (§4.6 `/endpoint/push`).
async fn share_push_data(overlay: &Arc<dyn OverlayGateway>, peer_identity: &str, sender_module_id: ModuleId, data: Vec<u8>) -> Result<(), CoreError> {
    let mut conn = overlay.dial(SERVICE_P2P, Some(peer_identity)).await?;
    write_message(&mut conn.stream, &AgentCall::SharePushData { receiver_module_id: sender_module_id.to_string(), data })
        .await
        .map_err(|e| CoreError::unavailable("failed to write share push data").with_source(e))?;
    let reply: AgentReply = read_message(&mut conn.stream)
        .await
        .map_err(|e| CoreError::unavailable("failed to read share push data reply").with_source(e))?;
    match reply {
        AgentReply::Ack => Ok(()),
        AgentReply::Error { kind, message } => Err(CoreError::internal(format!("{kind}: {message}"))),
        other => Err(CoreError::internal(format!("unexpected reply: {other:?}"))),
    }
}

// ---- /controller/push ----

async fn push_to_controller(
    State(state): State<Arc<ModuleRestState>>,
    axum::Extension(CallerModuleId(module_id)): axum::Extension<CallerModuleId>,
    Json(request): Json<ControllerPushRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let data = base64::engine::general_purpose::STANDARD
        .decode(&request.blob)
        .map_err(|e| api_error(CoreError::invalid_argument("malformed base64 payload").with_source(e)))?;
    state.state.controller.push_data(module_id, request.receiver_id, data).await.map_err(api_error)?;
    Ok(StatusCode::OK)
}

// ---- /webhook ----

fn webhook_summary(webhook: &dmzero_core::AgentWebhook) -> AgentWebhookSummary {
    AgentWebhookSummary {
        id: webhook.id.to_string(),
        source_module_id: webhook.source_module_id.to_string(),
        url_path: webhook.url_path.clone(),
        event: webhook.event,
    }
}

async fn list_webhooks(
    State(state): State<Arc<ModuleRestState>>,
    axum::Extension(CallerModuleId(module_id)): axum::Extension<CallerModuleId>,
) -> Json<Vec<AgentWebhookSummary>> {
    Json(state.state.webhooks.list_for_module(module_id).iter().map(webhook_summary).collect())
}

async fn register_webhook(
    State(state): State<Arc<ModuleRestState>>,
    axum::Extension(CallerModuleId(module_id)): axum::Extension<CallerModuleId>,
    Json(request): Json<RegisterAgentWebhookRequest>,
) -> Result<Json<AgentWebhookSummary>, (StatusCode, Json<ErrorBody>)> {
    let instance = state.state.modules.get(module_id).map_err(api_error)?;
    let webhook = state.state.webhooks.register(module_id, request.url_path, instance.local_port, request.event);
    Ok(Json(webhook_summary(&webhook)))
}

async fn delete_webhook(
    State(state): State<Arc<ModuleRestState>>,
    axum::Extension(CallerModuleId(module_id)): axum::Extension<CallerModuleId>,
    Query(query): Query<DeleteByIdQuery>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let id = query.id.parse().map_err(|_| api_error(CoreError::invalid_argument(format!("malformed id: {}", query.id))))?;
    let owned = state.state.webhooks.list_for_module(module_id).iter().any(|w| w.id == id);
    if !owned {
        return Err(api_error(CoreError::not_found(format!("no such webhook: {id}"))));
    }
    state.state.webhooks.remove(id).map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmzero_core::AuthStore;
    use dmzero_gateways::overlay::{OverlayDirectory, TcpOverlayGateway};
    use dmzero_gateways::runtime::{FakeRuntimeGateway, RuntimeGateway};

    use crate::controller_conn::ControllerConn;
    use crate::images::LocalImageRegistry;
    use crate::module_manager::ModuleManager;
    use crate::webhook_dispatch::AgentWebhookDispatcher;
    use crate::webhooks::AgentWebhookRegistry;

    fn module_rest_state() -> Arc<ModuleRestState> {
        let runtime: Arc<dyn RuntimeGateway> = Arc::new(FakeRuntimeGateway::new());
        let auth = Arc::new(AuthStore::new());
        let modules = Arc::new(ModuleManager::new(runtime.clone(), auth.clone()));
        let images = Arc::new(LocalImageRegistry::new());
        let webhooks = Arc::new(AgentWebhookRegistry::new());
        let webhook_dispatcher = Arc::new(AgentWebhookDispatcher::new(webhooks.clone()));
        let overlay: Arc<dyn OverlayGateway> = Arc::new(TcpOverlayGateway::new(OverlayDirectory::new(), "127.0.0.1"));
        let controller = Arc::new(ControllerConn::new(overlay.clone()));
        let state = Arc::new(AgentState::new(
            runtime,
            auth,
            modules,
            images,
            webhooks,
            webhook_dispatcher,
            controller,
            "https://127.0.0.1:4499/api/v1".into(),
            "cert".into(),
        ));
        Arc::new(ModuleRestState { state, overlay })
    }

    #[test]
    fn module_auth_accepts_valid_credentials_and_rejects_bad_ones() {
        let rest_state = module_rest_state();
        let module_id = ModuleId::new();
        rest_state.state.auth.add(module_id.to_string(), "pw");

        let mut headers = HeaderMap::new();
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{module_id}:pw"));
        headers.insert(axum::http::header::AUTHORIZATION, format!("Basic {encoded}").parse().unwrap());
        assert_eq!(check_module_auth(&rest_state.state, &headers).unwrap(), module_id);

        let bad_encoded = base64::engine::general_purpose::STANDARD.encode(format!("{module_id}:wrong"));
        let mut bad_headers = HeaderMap::new();
        bad_headers.insert(axum::http::header::AUTHORIZATION, format!("Basic {bad_encoded}").parse().unwrap());
        assert!(check_module_auth(&rest_state.state, &bad_headers).is_err());
    }
}
