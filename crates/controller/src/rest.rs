// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Controller REST API (§6): HTTP Basic auth against static operator
//! credentials, JSON bodies, `/agent`, `/module`, `/image`, `/webhook`
//! under `/api/v1`.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use dmzero_core::{AgentId, CoreError, ErrorKind, ImageId, ModuleId};
use dmzero_wire::rest::{
    AgentDetail, AgentSummary, ControllerWebhookSummary, CreateAgentRequest, CreateModuleRequest, DeleteByIdQuery,
    EnrollmentResponse, ErrorBody, ImageSummary, ModuleSummary, RegisterControllerWebhookRequest, SendDataRequest,
    UpdateAgentRequest, UpdateModuleRequest,
};

use crate::config::Credentials;
use crate::enrollment::{AgentView, EnrollmentCoordinator};
use crate::propagation::PropagationEngine;
use crate::registry::{ImageRegistry, ModuleRegistry, WebhookRegistry};

/// Multipart image uploads are capped at 5 GiB (§6).
const MAX_IMAGE_UPLOAD_BYTES: usize = 5 * 1024 * 1024 * 1024;

pub struct ControllerRestState {
    pub credentials: Credentials,
    pub enrollment: Arc<EnrollmentCoordinator>,
    pub propagation: Arc<PropagationEngine>,
    pub images: Arc<ImageRegistry>,
    pub modules: Arc<ModuleRegistry>,
    pub webhooks: Arc<WebhookRegistry>,
}

pub fn router(state: Arc<ControllerRestState>) -> Router {
    Router::new()
        .route("/api/v1/agent", post(create_agent).get(list_agents))
        .route("/api/v1/agent/:id", get(get_agent).patch(update_agent).delete(delete_agent))
        .route(
            "/api/v1/agent/:id/enrollment",
            get(get_enrollment).post(create_enrollment).delete(delete_enrollment),
        )
        .route("/api/v1/module", post(create_module).get(list_modules))
        .route("/api/v1/module/:id", get(get_module).patch(update_module).delete(delete_module))
        .route("/api/v1/module/:id/start", post(start_module))
        .route("/api/v1/module/:id/stop", post(stop_module))
        .route("/api/v1/module/:id/send", post(send_data))
        .route("/api/v1/image", post(upload_image).get(list_images))
        .route("/api/v1/image/:id", get(get_image).delete(delete_image))
        .route("/api/v1/webhook", get(list_webhooks).post(register_webhook).delete(delete_webhook))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_basic_auth))
        .with_state(state)
}

async fn require_basic_auth(
    State(state): State<Arc<ControllerRestState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    match check_basic_auth(&state.credentials, &headers) {
        Ok(()) => next.run(request).await,
        Err(error) => api_error(error).into_response(),
    }
}

fn check_basic_auth(credentials: &Credentials, headers: &HeaderMap) -> Result<(), CoreError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CoreError::unauthenticated("missing Authorization header"))?;
    let encoded = header
        .strip_prefix("Basic ")
        .ok_or_else(|| CoreError::unauthenticated("expected HTTP Basic authentication"))?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| CoreError::unauthenticated("malformed basic auth payload"))?;
    let decoded = String::from_utf8(decoded).map_err(|_| CoreError::unauthenticated("malformed basic auth payload"))?;
    let (user, pass) = decoded.split_once(':').ok_or_else(|| CoreError::unauthenticated("malformed basic auth payload"))?;
    match credentials.get(user) {
        Some(expected) if expected == pass => Ok(()),
        _ => Err(CoreError::unauthenticated("bad credentials")),
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

fn parse_id<T: std::str::FromStr>(raw: &str) -> Result<T, CoreError> {
    raw.parse().map_err(|_| CoreError::invalid_argument(format!("malformed id: {raw}")))
}

fn agent_detail(view: AgentView) -> AgentDetail {
    AgentDetail {
        id: view.id.to_string(),
        name: view.name,
        configuration: view.configuration,
        is_enrolled: view.is_enrolled,
        is_online: view.is_online,
        present_images: view.present_images,
        present_modules: view.present_modules,
    }
}

// ---- /agent ----

async fn create_agent(
    State(state): State<Arc<ControllerRestState>>,
    Json(request): Json<CreateAgentRequest>,
) -> Result<Json<AgentSummary>, (StatusCode, Json<ErrorBody>)> {
    let entry = state.enrollment.create_agent(request.name);
    entry.set_configuration(request.configuration);
    Ok(Json(AgentSummary { id: entry.id().to_string(), name: entry.name() }))
}

async fn list_agents(State(state): State<Arc<ControllerRestState>>) -> Json<Vec<AgentDetail>> {
    Json(state.enrollment.list_views().await.into_iter().map(agent_detail).collect())
}

async fn get_agent(
    State(state): State<Arc<ControllerRestState>>,
    Path(id): Path<String>,
) -> Result<Json<AgentDetail>, (StatusCode, Json<ErrorBody>)> {
    let id: AgentId = parse_id(&id).map_err(api_error)?;
    state.enrollment.view(id).await.map(agent_detail).map(Json).map_err(api_error)
}

async fn update_agent(
    State(state): State<Arc<ControllerRestState>>,
    Path(id): Path<String>,
    Json(request): Json<UpdateAgentRequest>,
) -> Result<Json<AgentDetail>, (StatusCode, Json<ErrorBody>)> {
    let agent_id: AgentId = parse_id(&id).map_err(api_error)?;
    if let Some(name) = request.name {
        state.enrollment.rename_agent(agent_id, name).map_err(api_error)?;
    }
    if let Some(configuration) = request.configuration {
        state.propagation.update_agent_configuration(agent_id, configuration).await.map_err(api_error)?;
    }
    let view = state.enrollment.view(agent_id).await.map_err(api_error)?;
    Ok(Json(agent_detail(view)))
}

async fn delete_agent(
    State(state): State<Arc<ControllerRestState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let id: AgentId = parse_id(&id).map_err(api_error)?;
    state.enrollment.delete_agent(id).await.map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_enrollment(
    State(state): State<Arc<ControllerRestState>>,
    Path(id): Path<String>,
) -> Result<Json<AgentDetail>, (StatusCode, Json<ErrorBody>)> {
    let id: AgentId = parse_id(&id).map_err(api_error)?;
    state.enrollment.view(id).await.map(agent_detail).map(Json).map_err(api_error)
}

async fn create_enrollment(
    State(state): State<Arc<ControllerRestState>>,
    Path(id): Path<String>,
) -> Result<Json<EnrollmentResponse>, (StatusCode, Json<ErrorBody>)> {
    let id: AgentId = parse_id(&id).map_err(api_error)?;
    let jwt = state.enrollment.create_enrollment(id).await.map_err(api_error)?;
    let expires_at_unix = std::time::SystemTime::now()
        .checked_add(dmzero_core::ENROLLMENT_TOKEN_VALIDITY)
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or_default();
    Ok(Json(EnrollmentResponse { jwt, expires_at_unix }))
}

async fn delete_enrollment(
    State(state): State<Arc<ControllerRestState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let id: AgentId = parse_id(&id).map_err(api_error)?;
    state.enrollment.delete_enrollment(id).await.map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- /module ----

fn module_summary(module: &crate::registry::ModuleEntry) -> ModuleSummary {
    let snapshot = module.snapshot();
    ModuleSummary {
        id: snapshot.id.to_string(),
        name: snapshot.name,
        image_id: snapshot.image_id.to_string(),
        configuration: snapshot.configuration,
        is_running: snapshot.is_running,
    }
}

async fn create_module(
    State(state): State<Arc<ControllerRestState>>,
    Json(request): Json<CreateModuleRequest>,
) -> Result<Json<ModuleSummary>, (StatusCode, Json<ErrorBody>)> {
    let image_id: ImageId = parse_id(&request.image_id).map_err(api_error)?;
    state.images.get(image_id).map_err(api_error)?;
    let module = state.modules.create(request.name, image_id);
    module.set_configuration(request.configuration);
    Ok(Json(module_summary(&module)))
}

async fn list_modules(State(state): State<Arc<ControllerRestState>>) -> Json<Vec<ModuleSummary>> {
    Json(state.modules.list().iter().map(|m| module_summary(m)).collect())
}

async fn get_module(
    State(state): State<Arc<ControllerRestState>>,
    Path(id): Path<String>,
) -> Result<Json<ModuleSummary>, (StatusCode, Json<ErrorBody>)> {
    let id: ModuleId = parse_id(&id).map_err(api_error)?;
    state.modules.get(id).map(|m| module_summary(&m)).map(Json).map_err(api_error)
}

async fn update_module(
    State(state): State<Arc<ControllerRestState>>,
    Path(id): Path<String>,
    Json(request): Json<UpdateModuleRequest>,
) -> Result<Json<ModuleSummary>, (StatusCode, Json<ErrorBody>)> {
    let id: ModuleId = parse_id(&id).map_err(api_error)?;
    let module = state.modules.get(id).map_err(api_error)?;
    if let Some(name) = request.name {
        module.set_name(name);
    }
    if let Some(image_id) = request.image_id {
        let image_id: ImageId = parse_id(&image_id).map_err(api_error)?;
        state.images.get(image_id).map_err(api_error)?;
        module.set_image_id(image_id);
    }
    if let Some(configuration) = request.configuration {
        module.set_configuration(configuration);
    }
    Ok(Json(module_summary(&module)))
}

/// Deletion is forbidden while the module is running (§3).
async fn delete_module(
    State(state): State<Arc<ControllerRestState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let id: ModuleId = parse_id(&id).map_err(api_error)?;
    let module = state.modules.get(id).map_err(api_error)?;
    if module.is_running() {
        return Err(api_error(CoreError::not_allowed(format!("module {id} is running"))));
    }
    state.modules.remove(id).map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_module(
    State(state): State<Arc<ControllerRestState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let id: ModuleId = parse_id(&id).map_err(api_error)?;
    state.propagation.start_module(id).await.map_err(api_error)?;
    Ok(StatusCode::OK)
}

async fn stop_module(
    State(state): State<Arc<ControllerRestState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let id: ModuleId = parse_id(&id).map_err(api_error)?;
    state.propagation.stop_module(id).await.map_err(api_error)?;
    Ok(StatusCode::OK)
}

async fn send_data(
    State(state): State<Arc<ControllerRestState>>,
    Path(id): Path<String>,
    Json(request): Json<SendDataRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let id: ModuleId = parse_id(&id).map_err(api_error)?;
    let data = base64::engine::general_purpose::STANDARD
        .decode(&request.data)
        .map_err(|e| api_error(CoreError::invalid_argument("malformed base64 payload").with_source(e)))?;
    state.propagation.send_data(id, data).await.map_err(api_error)?;
    Ok(StatusCode::OK)
}

// ---- /image ----

async fn upload_image(
    State(state): State<Arc<ControllerRestState>>,
    mut multipart: Multipart,
) -> Result<Json<ImageSummary>, (StatusCode, Json<ErrorBody>)> {
    let mut name: Option<String> = None;
    let mut file: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        api_error(CoreError::invalid_argument("malformed multipart body").with_source(e))
    })? {
        match field.name() {
            Some("name") => {
                name = Some(field.text().await.map_err(|e| api_error(CoreError::invalid_argument("malformed name field").with_source(e)))?);
            }
            Some("file") => {
                let bytes = field.bytes().await.map_err(|e| api_error(CoreError::invalid_argument("malformed file field").with_source(e)))?;
                if bytes.len() > MAX_IMAGE_UPLOAD_BYTES {
                    return Err(api_error(CoreError::invalid_argument("image exceeds the 5 GiB upload limit")));
                }
                file = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    let name = name.ok_or_else(|| api_error(CoreError::invalid_argument("missing name field")))?;
    let file = file.ok_or_else(|| api_error(CoreError::invalid_argument("missing file field")))?;

    let record = state.propagation.upload_image(name, file).await;
    Ok(Json(ImageSummary { id: record.meta.id.to_string(), name: record.meta.name.clone(), size: record.meta.size }))
}

async fn list_images(State(state): State<Arc<ControllerRestState>>) -> Json<Vec<ImageSummary>> {
    Json(
        state
            .images
            .list()
            .iter()
            .map(|r| ImageSummary { id: r.meta.id.to_string(), name: r.meta.name.clone(), size: r.meta.size })
            .collect(),
    )
}

async fn get_image(
    State(state): State<Arc<ControllerRestState>>,
    Path(id): Path<String>,
) -> Result<Json<ImageSummary>, (StatusCode, Json<ErrorBody>)> {
    let id: ImageId = parse_id(&id).map_err(api_error)?;
    state
        .images
        .get(id)
        .map(|r| ImageSummary { id: r.meta.id.to_string(), name: r.meta.name.clone(), size: r.meta.size })
        .map(Json)
        .map_err(api_error)
}

async fn delete_image(
    State(state): State<Arc<ControllerRestState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let id: ImageId = parse_id(&id).map_err(api_error)?;
    state.propagation.delete_image(id).await.map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- /webhook ----

async fn register_webhook(
    State(state): State<Arc<ControllerRestState>>,
    Json(request): Json<RegisterControllerWebhookRequest>,
) -> Result<Json<ControllerWebhookSummary>, (StatusCode, Json<ErrorBody>)> {
    let module_id: ModuleId = parse_id(&request.module_id).map_err(api_error)?;
    state.modules.get(module_id).map_err(api_error)?;
    let webhook = state.webhooks.register(module_id, request.url);
    Ok(Json(ControllerWebhookSummary { id: webhook.id.to_string(), module_id: webhook.module_id.to_string(), url: webhook.url }))
}

async fn list_webhooks(State(state): State<Arc<ControllerRestState>>) -> Json<Vec<ControllerWebhookSummary>> {
    Json(
        state
            .webhooks
            .list()
            .into_iter()
            .map(|w| ControllerWebhookSummary { id: w.id.to_string(), module_id: w.module_id.to_string(), url: w.url })
            .collect(),
    )
}

async fn delete_webhook(
    State(state): State<Arc<ControllerRestState>>,
    Query(query): Query<DeleteByIdQuery>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let id = parse_id(&query.id).map_err(api_error)?;
    state.webhooks.remove(id).map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}
