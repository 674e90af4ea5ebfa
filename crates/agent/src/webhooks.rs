// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent half of C7's registration surface: a module registers its own
//! path and port against the event it wants to receive (§4.7).

use dmzero_core::{AgentWebhook, CoreError, ModuleId, WebhookEvent, WebhookId};
use indexmap::IndexMap;
use parking_lot::RwLock;

#[derive(Default)]
pub struct AgentWebhookRegistry {
    webhooks: RwLock<IndexMap<WebhookId, AgentWebhook>>,
}

impl AgentWebhookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, source_module_id: ModuleId, url_path: impl Into<String>, port: u16, event: WebhookEvent) -> AgentWebhook {
        let webhook = AgentWebhook { id: WebhookId::new(), source_module_id, url_path: url_path.into(), port, event };
        self.webhooks.write().insert(webhook.id, webhook.clone());
        webhook
    }

    pub fn list(&self) -> Vec<AgentWebhook> {
        self.webhooks.read().values().cloned().collect()
    }

    pub fn list_for_module(&self, module_id: ModuleId) -> Vec<AgentWebhook> {
        self.webhooks.read().values().filter(|w| w.source_module_id == module_id).cloned().collect()
    }

    /// Webhooks owned by `module_id` subscribed to `event`, the lookup
    /// used when a controller-originated `PushData` arrives addressed to
    /// that exact module (§4.6 Share receiver).
    pub fn list_matching(&self, module_id: ModuleId, event: WebhookEvent) -> Vec<AgentWebhook> {
        self.webhooks.read().values().filter(|w| w.source_module_id == module_id && w.event == event).cloned().collect()
    }

    /// Every webhook subscribed to `event` regardless of owner, used for
    /// peer-to-peer share: the sending agent's local REST has no way to
    /// address one specific module on the peer, so delivery fans out to
    /// every module on this agent listening for that event.
    pub fn list_by_event(&self, event: WebhookEvent) -> Vec<AgentWebhook> {
        self.webhooks.read().values().filter(|w| w.event == event).cloned().collect()
    }

    pub fn remove(&self, id: WebhookId) -> Result<(), CoreError> {
        self.webhooks
            .write()
            .shift_remove(&id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found(format!("no such webhook: {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_matching_filters_by_module_and_event() {
        let registry = AgentWebhookRegistry::new();
        let module_a = ModuleId::new();
        let module_b = ModuleId::new();
        registry.register(module_a, "/hooks/controller", 33000, WebhookEvent::ControllerData);
        registry.register(module_a, "/hooks/peer", 33000, WebhookEvent::EndpointData);
        registry.register(module_b, "/hooks/controller", 33001, WebhookEvent::ControllerData);

        assert_eq!(registry.list_matching(module_a, WebhookEvent::ControllerData).len(), 1);
        assert_eq!(registry.list_for_module(module_a).len(), 2);
        assert_eq!(registry.list().len(), 3);
        assert_eq!(registry.list_by_event(WebhookEvent::ControllerData).len(), 2);
    }

    #[test]
    fn remove_unknown_id_errors() {
        let registry = AgentWebhookRegistry::new();
        assert!(registry.remove(WebhookId::new()).is_err());
    }
}
