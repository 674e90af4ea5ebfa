// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared agent-process state: the registries, the module manager, and the
//! agent's own configuration snapshot, bundled so the RPC servers and the
//! local REST API can all reach them without threading arguments through
//! every handler (§4.6).

use std::collections::BTreeMap;
use std::sync::Arc;

use dmzero_core::AuthStore;
use dmzero_gateways::runtime::RuntimeGateway;
use parking_lot::RwLock;

use crate::controller_conn::ControllerConn;
use crate::images::LocalImageRegistry;
use crate::module_manager::ModuleManager;
use crate::webhook_dispatch::AgentWebhookDispatcher;
use crate::webhooks::AgentWebhookRegistry;

pub struct AgentState {
    pub runtime: Arc<dyn RuntimeGateway>,
    pub auth: Arc<AuthStore>,
    pub modules: Arc<ModuleManager>,
    pub images: Arc<LocalImageRegistry>,
    pub webhooks: Arc<AgentWebhookRegistry>,
    pub webhook_dispatcher: Arc<AgentWebhookDispatcher>,
    pub controller: Arc<ControllerConn>,
    /// The agent's most recently pulled configuration (§4.6
    /// `ConfigurationService.UpdateConfiguration`), kept separately from
    /// any one module's own configuration (§9 Open Question 1: never
    /// written back into by `EffectiveEnv::compute`).
    configuration: RwLock<BTreeMap<String, String>>,
    /// The single module-API listener address shared by every module on
    /// this agent, computed once at boot.
    pub api_base_url: String,
    pub cert_base64: String,
}

impl AgentState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runtime: Arc<dyn RuntimeGateway>,
        auth: Arc<AuthStore>,
        modules: Arc<ModuleManager>,
        images: Arc<LocalImageRegistry>,
        webhooks: Arc<AgentWebhookRegistry>,
        webhook_dispatcher: Arc<AgentWebhookDispatcher>,
        controller: Arc<ControllerConn>,
        api_base_url: String,
        cert_base64: String,
    ) -> Self {
        Self {
            runtime,
            auth,
            modules,
            images,
            webhooks,
            webhook_dispatcher,
            controller,
            configuration: RwLock::new(BTreeMap::new()),
            api_base_url,
            cert_base64,
        }
    }

    pub fn configuration(&self) -> BTreeMap<String, String> {
        self.configuration.read().clone()
    }

    pub fn set_configuration(&self, configuration: BTreeMap<String, String>) {
        *self.configuration.write() = configuration;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmzero_gateways::overlay::{OverlayDirectory, TcpOverlayGateway};
    use dmzero_gateways::runtime::FakeRuntimeGateway;

    fn state() -> AgentState {
        let runtime: Arc<dyn RuntimeGateway> = Arc::new(FakeRuntimeGateway::new());
        let auth = Arc::new(AuthStore::new());
        let modules = Arc::new(ModuleManager::new(runtime.clone(), auth.clone()));
        let images = Arc::new(LocalImageRegistry::new());
        let webhooks = Arc::new(AgentWebhookRegistry::new());
        let webhook_dispatcher = Arc::new(AgentWebhookDispatcher::new(webhooks.clone()));
        let overlay = Arc::new(TcpOverlayGateway::new(OverlayDirectory::new(), "127.0.0.1"));
        let controller = Arc::new(ControllerConn::new(overlay));
        AgentState::new(runtime, auth, modules, images, webhooks, webhook_dispatcher, controller, "https://127.0.0.1:4499/api/v1".into(), "cert".into())
    }

    #[test]
    fn configuration_round_trips_without_touching_module_configs() {
        let state = state();
        assert!(state.configuration().is_empty());
        let mut next = BTreeMap::new();
        next.insert("FOO".to_string(), "bar".to_string());
        state.set_configuration(next.clone());
        assert_eq!(state.configuration(), next);
    }
}
