// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C3 Controller Registry: the in-memory source of truth for agents,
//! images, modules and controller-side webhooks (§3, §4.3).
//!
//! Each registry guards its index with one lock and hands out `Arc`s to
//! per-entity state so readers of one entity never block on another.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use dmzero_core::{Agent, AgentId, Clock, ControllerWebhook, CoreError, Diagnostics, Image, ImageId, ModuleCatalogEntry, ModuleId, WebhookId, DIAGNOSTICS_FRESHNESS};
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::agent_conn::AgentConn;

/// Per-agent mutable state. The data fields, the diagnostics stamp, and the
/// outbound connection handle each get their own lock so a diagnostics
/// update never blocks a configuration read (§9 cyclic reference note:
/// `conn` is cleared whenever `identity_id` changes or the agent is
/// removed, since a stale connection must never be dialed again).
pub struct AgentEntry {
    data: RwLock<Agent>,
    diagnostics: RwLock<Option<(Instant, Diagnostics)>>,
    conn: RwLock<Option<Arc<AgentConn>>>,
}

impl AgentEntry {
    fn new(agent: Agent) -> Self {
        Self { data: RwLock::new(agent), diagnostics: RwLock::new(None), conn: RwLock::new(None) }
    }

    pub fn id(&self) -> AgentId {
        self.data.read().id
    }

    pub fn snapshot(&self) -> Agent {
        self.data.read().clone()
    }

    pub fn name(&self) -> String {
        self.data.read().name.clone()
    }

    pub fn configuration(&self) -> BTreeMap<String, String> {
        self.data.read().configuration.clone()
    }

    pub fn identity_id(&self) -> Option<String> {
        self.data.read().identity_id.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.data.write().name = name.into();
    }

    pub fn set_configuration(&self, configuration: BTreeMap<String, String>) {
        self.data.write().configuration = configuration;
    }

    /// Binds the identity assigned at enrollment. A rebind (identity
    /// changing) invalidates any outstanding connection handle.
    pub fn set_identity_id(&self, identity_id: Option<String>) {
        self.data.write().identity_id = identity_id;
        *self.conn.write() = None;
    }

    pub fn connection(&self) -> Option<Arc<AgentConn>> {
        self.conn.read().clone()
    }

    pub fn set_connection(&self, conn: Arc<AgentConn>) {
        *self.conn.write() = Some(conn);
    }

    pub fn clear_connection(&self) {
        *self.conn.write() = None;
    }

    /// Whether an overlay identity has been bound to this catalog entry.
    /// This is a local-state check only — it does not confirm the overlay
    /// has issued an API session, so callers rendering `isEnrolled` to an
    /// operator must query [`dmzero_gateways::overlay::OverlayGateway::get_identity_detail`]
    /// instead (§4.4).
    pub fn has_identity_bound(&self) -> bool {
        self.identity_id().is_some()
    }

    pub fn record_diagnostics(&self, clock: &dyn Clock, diagnostics: Diagnostics) {
        *self.diagnostics.write() = Some((clock.now(), diagnostics));
    }

    /// `isOnline` per §3: a diagnostics stamp younger than
    /// [`DIAGNOSTICS_FRESHNESS`].
    pub fn is_online(&self, clock: &dyn Clock) -> bool {
        self.diagnostics.read().as_ref().is_some_and(|(at, _)| clock.now().duration_since(*at) < DIAGNOSTICS_FRESHNESS)
    }

    pub fn diagnostics_if_online(&self, clock: &dyn Clock) -> Option<Diagnostics> {
        let guard = self.diagnostics.read();
        let (at, diagnostics) = guard.as_ref()?;
        if clock.now().duration_since(*at) < DIAGNOSTICS_FRESHNESS {
            Some(diagnostics.clone())
        } else {
            None
        }
    }
}

#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<IndexMap<AgentId, Arc<AgentEntry>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, name: impl Into<String>) -> Arc<AgentEntry> {
        let entry = Arc::new(AgentEntry::new(Agent::new(name)));
        self.agents.write().insert(entry.id(), entry.clone());
        entry
    }

    pub fn get(&self, id: AgentId) -> Result<Arc<AgentEntry>, CoreError> {
        self.agents
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("no such agent: {id}")))
    }

    pub fn get_by_identity_id(&self, identity_id: &str) -> Result<Arc<AgentEntry>, CoreError> {
        self.agents
            .read()
            .values()
            .find(|entry| entry.identity_id().as_deref() == Some(identity_id))
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("no agent bound to identity {identity_id}")))
    }

    pub fn list(&self) -> Vec<Arc<AgentEntry>> {
        self.agents.read().values().cloned().collect()
    }

    /// Removes an agent from the catalog. Callers must close any live
    /// connection before calling this (§4.3 deletion ordering); this only
    /// drops the registry's own handle.
    pub fn remove(&self, id: AgentId) -> Result<(), CoreError> {
        let entry = self.get(id)?;
        entry.clear_connection();
        self.agents.write().shift_remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub struct ImageRegistry {
    images: RwLock<IndexMap<ImageId, Arc<ImageRecord>>>,
}

/// An image's metadata and its payload, stored together since the payload
/// never changes after upload (§4.1 Non-goal: no image replace/update).
pub struct ImageRecord {
    pub meta: Image,
    pub blob: Vec<u8>,
}

impl ImageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, name: impl Into<String>, blob: Vec<u8>) -> Arc<ImageRecord> {
        let id = ImageId::new();
        let record = Arc::new(ImageRecord { meta: Image::new(id, name, blob.len()), blob });
        self.images.write().insert(id, record.clone());
        record
    }

    pub fn get(&self, id: ImageId) -> Result<Arc<ImageRecord>, CoreError> {
        self.images
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("no such image: {id}")))
    }

    pub fn list(&self) -> Vec<Arc<ImageRecord>> {
        self.images.read().values().cloned().collect()
    }

    pub fn remove(&self, id: ImageId) -> Result<(), CoreError> {
        self.images
            .write()
            .shift_remove(&id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found(format!("no such image: {id}")))
    }
}

/// Per-module mutable state, behind a single lock: a module runs
/// broadcast-wide on every connected agent rather than at a single
/// placement (§4.5), so there is no per-agent handle to protect separately
/// from the rest of the catalog fields.
pub struct ModuleEntry {
    data: RwLock<ModuleCatalogEntry>,
}

impl ModuleEntry {
    fn new(entry: ModuleCatalogEntry) -> Self {
        Self { data: RwLock::new(entry) }
    }

    pub fn id(&self) -> ModuleId {
        self.data.read().id
    }

    pub fn snapshot(&self) -> ModuleCatalogEntry {
        self.data.read().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.data.write().name = name.into();
    }

    pub fn set_image_id(&self, image_id: ImageId) {
        self.data.write().image_id = image_id;
    }

    pub fn set_configuration(&self, configuration: BTreeMap<String, String>) {
        self.data.write().configuration = configuration;
    }

    pub fn is_running(&self) -> bool {
        self.data.read().is_running
    }

    pub fn set_is_running(&self, is_running: bool) {
        self.data.write().is_running = is_running;
    }
}

#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<IndexMap<ModuleId, Arc<ModuleEntry>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, name: impl Into<String>, image_id: ImageId) -> Arc<ModuleEntry> {
        let entry = Arc::new(ModuleEntry::new(ModuleCatalogEntry::new(name, image_id)));
        self.modules.write().insert(entry.id(), entry.clone());
        entry
    }

    pub fn get(&self, id: ModuleId) -> Result<Arc<ModuleEntry>, CoreError> {
        self.modules
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("no such module: {id}")))
    }

    pub fn list(&self) -> Vec<Arc<ModuleEntry>> {
        self.modules.read().values().cloned().collect()
    }

    pub fn list_by_image(&self, image_id: ImageId) -> Vec<Arc<ModuleEntry>> {
        self.modules.read().values().filter(|m| m.snapshot().image_id == image_id).cloned().collect()
    }

    pub fn remove(&self, id: ModuleId) -> Result<(), CoreError> {
        self.modules
            .write()
            .shift_remove(&id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found(format!("no such module: {id}")))
    }
}

#[derive(Default)]
pub struct WebhookRegistry {
    webhooks: RwLock<IndexMap<WebhookId, ControllerWebhook>>,
}

impl WebhookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, module_id: ModuleId, url: impl Into<String>) -> ControllerWebhook {
        let webhook = ControllerWebhook { id: WebhookId::new(), module_id, url: url.into() };
        self.webhooks.write().insert(webhook.id, webhook.clone());
        webhook
    }

    pub fn get(&self, id: WebhookId) -> Result<ControllerWebhook, CoreError> {
        self.webhooks
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("no such webhook: {id}")))
    }

    pub fn list(&self) -> Vec<ControllerWebhook> {
        self.webhooks.read().values().cloned().collect()
    }

    pub fn list_for_module(&self, module_id: ModuleId) -> Vec<ControllerWebhook> {
        self.webhooks.read().values().filter(|w| w.module_id == module_id).cloned().collect()
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
    use dmzero_core::SystemClock;

    #[test]
    fn agent_registry_round_trips_and_removes() {
        let registry = AgentRegistry::new();
        let entry = registry.create("edge-1");
        assert_eq!(registry.get(entry.id()).unwrap().name(), "edge-1");
        registry.remove(entry.id()).unwrap();
        assert!(registry.get(entry.id()).is_err());
    }

    #[test]
    fn identity_rebind_clears_connection_handle() {
        let registry = AgentRegistry::new();
        let entry = registry.create("edge-1");
        entry.set_identity_id(Some("id-1".to_string()));
        assert!(entry.connection().is_none());
    }

    #[test]
    fn diagnostics_go_stale_after_freshness_window() {
        let clock = dmzero_core::FakeClock::new();
        let registry = AgentRegistry::new();
        let entry = registry.create("edge-1");
        assert!(!entry.is_online(&clock));
        entry.record_diagnostics(&clock, Diagnostics::default());
        assert!(entry.is_online(&clock));
        clock.advance(DIAGNOSTICS_FRESHNESS);
        assert!(!entry.is_online(&clock));
    }

    #[test]
    fn image_registry_stores_blob_alongside_metadata() {
        let registry = ImageRegistry::new();
        let record = registry.create("worker:latest", vec![1, 2, 3]);
        assert_eq!(registry.get(record.meta.id).unwrap().blob, vec![1, 2, 3]);
        registry.remove(record.meta.id).unwrap();
        assert!(registry.get(record.meta.id).is_err());
    }

    #[test]
    fn module_registry_tracks_is_running_flag() {
        let images = ImageRegistry::new();
        let image = images.create("worker:latest", vec![]);
        let modules = ModuleRegistry::new();
        let module = modules.create("worker-1", image.meta.id);

        assert!(!module.is_running());
        module.set_is_running(true);
        assert!(module.snapshot().is_running);

        module.set_is_running(false);
        assert!(!module.snapshot().is_running);
    }

    #[test]
    fn webhook_registry_filters_by_module() {
        let registry = WebhookRegistry::new();
        let module_a = ModuleId::new();
        let module_b = ModuleId::new();
        registry.register(module_a, "https://a.example/hook");
        registry.register(module_b, "https://b.example/hook");
        assert_eq!(registry.list_for_module(module_a).len(), 1);
        assert_eq!(registry.list().len(), 2);
    }

    #[allow(dead_code)]
    fn assert_clock_object_safe(_: &dyn Clock) {}

    #[test]
    fn system_clock_is_usable_as_trait_object() {
        let clock = SystemClock;
        assert_clock_object_safe(&clock);
    }
}
