// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Webhook data model for both sides of the fabric (§3, §4.7).

use crate::define_id;
use crate::module::ModuleId;

define_id! {
    /// Shared id type for both controller- and agent-side webhook registrations.
    pub struct WebhookId;
}

/// Event kind an agent-side webhook subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookEvent {
    /// Data arriving from the controller via `SendData`.
    ControllerData,
    /// Data arriving from a peer agent's module via the p2p share path.
    EndpointData,
}

/// Controller-side webhook: external URL subscribed to a module's data.
#[derive(Debug, Clone)]
pub struct ControllerWebhook {
    pub id: WebhookId,
    pub module_id: ModuleId,
    pub url: String,
}

/// Agent-side webhook: a module's own HTTP path, reachable on its
/// `local_port`, subscribed to one event kind.
#[derive(Debug, Clone)]
pub struct AgentWebhook {
    pub id: WebhookId,
    pub source_module_id: ModuleId,
    pub url_path: String,
    pub port: u16,
    pub event: WebhookEvent,
}
