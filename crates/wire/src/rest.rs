// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DTOs for the Controller REST API and the Agent local REST API (§6).

use dmzero_core::WebhookEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---- Controller REST: /agent ----

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    #[serde(default)]
    pub configuration: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAgentRequest {
    pub name: Option<String>,
    pub configuration: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentDetail {
    pub id: String,
    pub name: String,
    pub configuration: BTreeMap<String, String>,
    pub is_enrolled: bool,
    pub is_online: bool,
    pub present_images: BTreeMap<String, String>,
    pub present_modules: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentResponse {
    pub jwt: String,
    pub expires_at_unix: u64,
}

// ---- Controller REST: /module ----

#[derive(Debug, Clone, Deserialize)]
pub struct CreateModuleRequest {
    pub name: String,
    pub image_id: String,
    #[serde(default)]
    pub configuration: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateModuleRequest {
    pub name: Option<String>,
    pub image_id: Option<String>,
    pub configuration: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleSummary {
    pub id: String,
    pub name: String,
    pub image_id: String,
    pub configuration: BTreeMap<String, String>,
    pub is_running: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendDataRequest {
    /// Raw bytes, base64-encoded on the wire.
    pub data: String,
}

// ---- Controller REST: /image ----

#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    pub id: String,
    pub name: String,
    pub size: usize,
}

// ---- Controller REST + Agent REST: /webhook ----

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterControllerWebhookRequest {
    pub module_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterAgentWebhookRequest {
    pub url_path: String,
    pub event: WebhookEvent,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookSummary {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerWebhookSummary {
    pub id: String,
    pub module_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentWebhookSummary {
    pub id: String,
    pub source_module_id: String,
    pub url_path: String,
    pub event: WebhookEvent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteByIdQuery {
    pub id: String,
}

// ---- Agent local REST: /endpoint, /controller ----

#[derive(Debug, Clone, Serialize)]
pub struct EndpointListResponse {
    pub identities: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushEndpointQuery {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerPushRequest {
    pub receiver_id: String,
    /// Raw bytes, base64-encoded on the wire.
    pub blob: String,
}

// ---- Webhook dispatch payload shapes (§4.7) ----

#[derive(Debug, Clone, Serialize)]
pub struct ControllerWebhookPayload {
    pub module_id: String,
    pub blob: String,
    pub receiver: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentWebhookPayload {
    pub source_endpoint_id: String,
    pub blob: String,
}

// ---- Generic error body ----

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}
