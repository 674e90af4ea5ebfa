// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Module manager: launches and stops containers through C2, assigning
//! each module a local port from a rolling counter and a fresh
//! `AuthStore` credential before the container starts (§4.6).

use std::collections::BTreeMap;
use std::sync::Arc;

use dmzero_core::{
    AuthStore, CoreError, EffectiveEnv, ModuleId, ModuleInstance, MODULE_PORT_RANGE_MAX, MODULE_PORT_RANGE_MIN,
};
use dmzero_gateways::runtime::{RunContainerSpec, RuntimeGateway};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

pub struct ModuleManager {
    runtime: Arc<dyn RuntimeGateway>,
    auth: Arc<AuthStore>,
    instances: RwLock<IndexMap<ModuleId, ModuleInstance>>,
    /// Rolling counter over [`MODULE_PORT_RANGE_MIN`, `MODULE_PORT_RANGE_MAX`],
    /// wrapping at the top of the range; availability is re-probed under
    /// this same lock (§5 "race window accepted").
    next_port: Mutex<u16>,
}

impl ModuleManager {
    pub fn new(runtime: Arc<dyn RuntimeGateway>, auth: Arc<AuthStore>) -> Self {
        Self { runtime, auth, instances: RwLock::new(IndexMap::new()), next_port: Mutex::new(MODULE_PORT_RANGE_MIN) }
    }

    fn pick_local_port(&self) -> Result<u16, CoreError> {
        let mut next = self.next_port.lock();
        let span = MODULE_PORT_RANGE_MAX - MODULE_PORT_RANGE_MIN + 1;
        for _ in 0..span {
            let candidate = *next;
            *next = if candidate >= MODULE_PORT_RANGE_MAX { MODULE_PORT_RANGE_MIN } else { candidate + 1 };
            if std::net::TcpListener::bind(("127.0.0.1", candidate)).is_ok() {
                return Ok(candidate);
            }
        }
        Err(CoreError::unavailable("no module port available in [33000,33999]"))
    }

    pub fn get(&self, module_id: ModuleId) -> Result<ModuleInstance, CoreError> {
        self.instances
            .read()
            .get(&module_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("no such module instance: {module_id}")))
    }

    pub fn list(&self) -> Vec<ModuleInstance> {
        self.instances.read().values().cloned().collect()
    }

    /// `api_base_url` is the agent's single module-API listener address
    /// (§4.6 boot step 1), shared by every module; `local_port` (the
    /// rolling-assigned port below) is the per-module `MODULE_GIVEN_PORT`.
    pub async fn start(
        &self,
        module_id: ModuleId,
        image_reference: String,
        module_config: BTreeMap<String, String>,
        agent_config: BTreeMap<String, String>,
        api_base_url: &str,
        cert_base64: &str,
    ) -> Result<(), CoreError> {
        if self.instances.read().contains_key(&module_id) {
            return Err(CoreError::conflict(format!("module {module_id} is already running")));
        }

        let local_port = self.pick_local_port()?;
        let password = Uuid::new_v4().to_string();
        self.auth.add(module_id.to_string(), &password);

        let env = EffectiveEnv::compute(&agent_config, &module_config, api_base_url, &module_id, &password, cert_base64, local_port);
        let spec = RunContainerSpec {
            image_reference: image_reference.clone(),
            env: env.as_map().clone(),
            container_name: format!("dmzero-module-{module_id}"),
        };

        let container_id = match self.runtime.run_container(spec).await {
            Ok(id) => id,
            Err(error) => {
                self.auth.remove(&module_id.to_string());
                return Err(error);
            }
        };

        let instance = ModuleInstance {
            id: module_id,
            image_ref: image_reference,
            container_id,
            configuration: module_config,
            local_port,
        };
        self.instances.write().insert(module_id, instance);
        Ok(())
    }

    pub async fn stop(&self, module_id: ModuleId) -> Result<(), CoreError> {
        let instance = self.get(module_id)?;
        self.runtime.stop_container(&instance.container_id).await?;
        self.runtime.remove_container(&instance.container_id).await?;
        self.instances.write().shift_remove(&module_id);
        self.auth.remove(&module_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmzero_gateways::runtime::FakeRuntimeGateway;

    fn manager() -> (ModuleManager, Arc<FakeRuntimeGateway>, Arc<AuthStore>) {
        let runtime = Arc::new(FakeRuntimeGateway::new());
        let auth = Arc::new(AuthStore::new());
        (ModuleManager::new(runtime.clone(), auth.clone()), runtime, auth)
    }

    #[tokio::test]
    async fn start_assigns_a_port_and_populates_auth_store_before_run() {
        let (manager, runtime, auth) = manager();
        let module_id = ModuleId::new();
        manager
            .start(module_id, "worker:latest".to_string(), BTreeMap::new(), BTreeMap::new(), "https://127.0.0.1:4499/api/v1", "Y2VydA==")
            .await
            .unwrap();

        let instance = manager.get(module_id).unwrap();
        assert!((MODULE_PORT_RANGE_MIN..=MODULE_PORT_RANGE_MAX).contains(&instance.local_port));
        assert_eq!(runtime.containers().len(), 1);
        assert!(!auth.validate(&module_id.to_string(), "wrong password"));
    }

    #[tokio::test]
    async fn starting_an_already_running_module_conflicts() {
        let (manager, _runtime, _auth) = manager();
        let module_id = ModuleId::new();
        manager
            .start(module_id, "worker:latest".to_string(), BTreeMap::new(), BTreeMap::new(), "https://127.0.0.1:4499/api/v1", "cert")
            .await
            .unwrap();
        let err = manager
            .start(module_id, "worker:latest".to_string(), BTreeMap::new(), BTreeMap::new(), "https://127.0.0.1:4499/api/v1", "cert")
            .await
            .unwrap_err();
        assert_eq!(err.kind, dmzero_core::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn stop_removes_instance_and_auth_credential() {
        let (manager, _runtime, auth) = manager();
        let module_id = ModuleId::new();
        manager
            .start(module_id, "worker:latest".to_string(), BTreeMap::new(), BTreeMap::new(), "https://127.0.0.1:4499/api/v1", "cert")
            .await
            .unwrap();
        manager.stop(module_id).await.unwrap();
        assert!(manager.get(module_id).is_err());
        assert!(!auth.validate(&module_id.to_string(), "anything"));
    }

    #[tokio::test]
    async fn failed_run_rolls_back_the_auth_credential() {
        let (manager, runtime, auth) = manager();
        *runtime.fail_run.lock() = Some("simulated failure".to_string());
        let module_id = ModuleId::new();
        let err = manager
            .start(module_id, "worker:latest".to_string(), BTreeMap::new(), BTreeMap::new(), "https://127.0.0.1:4499/api/v1", "cert")
            .await
            .unwrap_err();
        assert_eq!(err.kind, dmzero_core::ErrorKind::Internal);
        assert!(!auth.validate(&module_id.to_string(), "anything"));
    }
}
