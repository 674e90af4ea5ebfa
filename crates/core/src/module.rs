// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Module data model: controller-side catalog entry and agent-side running
//! instance (§3), plus the effective-env computation used at launch (§4.6).

use std::collections::BTreeMap;

use crate::define_id;
use crate::image::ImageId;

define_id! {
    /// Module id, stable across the fleet (catalog id == instance id).
    pub struct ModuleId;
}

/// Lowest local port an agent will ever assign to a module.
pub const MODULE_PORT_RANGE_MIN: u16 = 33000;
/// Highest local port an agent will ever assign to a module; the rolling
/// port counter wraps back to [`MODULE_PORT_RANGE_MIN`] after this.
pub const MODULE_PORT_RANGE_MAX: u16 = 33999;

/// Controller-side catalog entry.
#[derive(Debug, Clone)]
pub struct ModuleCatalogEntry {
    pub id: ModuleId,
    pub name: String,
    pub image_id: ImageId,
    pub configuration: BTreeMap<String, String>,
    pub is_running: bool,
}

impl ModuleCatalogEntry {
    pub fn new(name: impl Into<String>, image_id: ImageId) -> Self {
        Self {
            id: ModuleId::new(),
            name: name.into(),
            image_id,
            configuration: BTreeMap::new(),
            is_running: false,
        }
    }
}

/// Agent-side running instance.
#[derive(Debug, Clone)]
pub struct ModuleInstance {
    pub id: ModuleId,
    pub image_ref: String,
    pub container_id: String,
    pub configuration: BTreeMap<String, String>,
    pub local_port: u16,
}

/// The five fixed environment variables injected into every module
/// container, in the exact order the original assigns them (§4.6, §8
/// Invariant 6).
pub const MODULE_ENV_API_BASE_URL: &str = "MODULE_API_BASE_URL";
pub const MODULE_ENV_USERNAME: &str = "MODULE_API_BASEAUTH_USER";
pub const MODULE_ENV_PASSWORD: &str = "MODULE_API_BASEAUTH_PASS";
pub const MODULE_ENV_CERTIFICATE: &str = "MODULE_API_CERTIFICATE";
pub const MODULE_ENV_GIVEN_PORT: &str = "MODULE_GIVEN_PORT";

/// The environment actually presented to a module container: agent
/// configuration overridden by module configuration, plus the five fixed
/// variables appended last (and always winning for those five keys).
///
/// Computed fresh per launch; never written back into the agent's stored
/// configuration (§9 Open Question resolution — the original leaks module
/// keys into the shared agent config map in place, which is not
/// reproduced here).
pub struct EffectiveEnv(BTreeMap<String, String>);

impl EffectiveEnv {
    pub fn compute(
        agent_config: &BTreeMap<String, String>,
        module_config: &BTreeMap<String, String>,
        api_base_url: &str,
        module_id: &ModuleId,
        module_password: &str,
        cert_base64: &str,
        given_port: u16,
    ) -> Self {
        let mut env = agent_config.clone();
        for (k, v) in module_config {
            env.insert(k.clone(), v.clone());
        }
        env.insert(MODULE_ENV_API_BASE_URL.to_string(), api_base_url.to_string());
        env.insert(MODULE_ENV_USERNAME.to_string(), module_id.to_string());
        env.insert(MODULE_ENV_PASSWORD.to_string(), module_password.to_string());
        env.insert(MODULE_ENV_CERTIFICATE.to_string(), cert_base64.to_string());
        env.insert(MODULE_ENV_GIVEN_PORT.to_string(), given_port.to_string());
        Self(env)
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// Render as `K=V` entries, the shape Docker's `Config.Env` expects.
    pub fn to_env_list(&self) -> Vec<String> {
        self.0.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_keys_override_agent_keys_and_fixed_vars_are_present() {
        let mut agent_config = BTreeMap::new();
        agent_config.insert("FOO".to_string(), "agent-value".to_string());
        agent_config.insert("SHARED".to_string(), "agent-wins-nothing".to_string());

        let mut module_config = BTreeMap::new();
        module_config.insert("SHARED".to_string(), "module-value".to_string());

        let module_id = ModuleId::new();
        let env = EffectiveEnv::compute(
            &agent_config,
            &module_config,
            "https://127.0.0.1:4499/api/v1",
            &module_id,
            "pw",
            "Y2VydA==",
            33000,
        );

        assert_eq!(env.as_map().get("FOO"), Some(&"agent-value".to_string()));
        assert_eq!(env.as_map().get("SHARED"), Some(&"module-value".to_string()));
        assert_eq!(
            env.as_map().get(MODULE_ENV_USERNAME),
            Some(&module_id.to_string())
        );
        assert_eq!(env.as_map().get(MODULE_ENV_GIVEN_PORT), Some(&"33000".to_string()));
        assert_eq!(env.as_map().len(), 7);
    }

    #[test]
    fn fixed_vars_always_win_even_if_user_set_same_key() {
        let mut agent_config = BTreeMap::new();
        agent_config.insert(MODULE_ENV_GIVEN_PORT.to_string(), "1".to_string());
        let module_config = BTreeMap::new();
        let module_id = ModuleId::new();

        let env = EffectiveEnv::compute(
            &agent_config,
            &module_config,
            "base",
            &module_id,
            "pw",
            "cert",
            33005,
        );
        assert_eq!(env.as_map().get(MODULE_ENV_GIVEN_PORT), Some(&"33005".to_string()));
    }
}
