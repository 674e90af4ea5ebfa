// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C5 Propagation Engine (§4.5): push-side fan-out to every connected
//! agent, plus the pull-side Setup Service and Receive Service handlers
//! served to agents over the overlay.

use std::collections::BTreeMap;
use std::sync::Arc;

use dmzero_core::{AgentId, CoreError, ImageId, ModuleId};
use tracing::{info, warn};

use crate::agent_conn::AgentConn;
use crate::registry::{AgentEntry, AgentRegistry, ImageRecord, ImageRegistry, ModuleRegistry};
use crate::webhook_dispatch::ControllerWebhookDispatcher;

pub struct PropagationEngine {
    agents: Arc<AgentRegistry>,
    images: Arc<ImageRegistry>,
    modules: Arc<ModuleRegistry>,
    webhooks: Arc<ControllerWebhookDispatcher>,
}

impl PropagationEngine {
    pub fn new(
        agents: Arc<AgentRegistry>,
        images: Arc<ImageRegistry>,
        modules: Arc<ModuleRegistry>,
        webhooks: Arc<ControllerWebhookDispatcher>,
    ) -> Self {
        Self { agents, images, modules, webhooks }
    }

    fn connected(&self) -> Vec<(Arc<AgentEntry>, Arc<AgentConn>)> {
        self.agents.list().into_iter().filter_map(|entry| entry.connection().map(|conn| (entry, conn))).collect()
    }

    /// Lazily establishes the controller's outbound handle to an agent the
    /// first time it phones home (§4.5 "an agent is only reachable after
    /// it has phoned home at least once").
    pub fn note_phonehome_connection(&self, agent_id: AgentId, overlay: &Arc<dyn dmzero_gateways::overlay::OverlayGateway>) -> Result<(), CoreError> {
        let entry = self.agents.get(agent_id)?;
        if entry.connection().is_some() {
            return Ok(());
        }
        let identity_id = entry
            .identity_id()
            .ok_or_else(|| CoreError::internal(format!("agent {agent_id} phoned home without a bound identity")))?;
        entry.set_connection(Arc::new(AgentConn::new(overlay.clone(), identity_id)));
        Ok(())
    }

    /// Catalog insertion happens before fan-out, so an agent that arrives
    /// mid-upload picks the image up via pull instead (§4.5).
    pub async fn upload_image(&self, name: impl Into<String>, blob: Vec<u8>) -> Arc<ImageRecord> {
        let record = self.images.create(name, blob);

        let tasks = self.connected().into_iter().map(|(entry, conn)| {
            let record = record.clone();
            async move {
                if let Err(error) = conn.push_image(&record.meta.id.to_string(), &record.meta.name, &record.blob).await
                {
                    warn!(agent_id = %entry.id(), %error, "failed to push image to agent");
                }
            }
        });
        futures_util::future::join_all(tasks).await;

        record
    }

    pub async fn delete_image(&self, image_id: ImageId) -> Result<(), CoreError> {
        if !self.modules.list_by_image(image_id).is_empty() {
            return Err(CoreError::not_allowed(format!("image {image_id} is referenced by one or more modules")));
        }

        for (entry, conn) in self.connected() {
            if let Err(error) = conn.remove_image(&image_id.to_string()).await {
                warn!(agent_id = %entry.id(), %error, "failed to remove image on agent");
            }
        }

        self.images.remove(image_id)
    }

    pub async fn update_agent_configuration(
        &self,
        agent_id: AgentId,
        configuration: BTreeMap<String, String>,
    ) -> Result<(), CoreError> {
        let entry = self.agents.get(agent_id)?;
        if let Some(conn) = entry.connection() {
            if let Err(error) = conn.update_configuration(configuration.clone()).await {
                warn!(agent_id = %agent_id, %error, "failed to push configuration to agent");
            }
        }
        entry.set_configuration(configuration);
        Ok(())
    }

    pub async fn start_module(&self, module_id: ModuleId) -> Result<(), CoreError> {
        let module = self.modules.get(module_id)?;
        let snapshot = module.snapshot();

        for (entry, conn) in self.connected() {
            if let Err(error) =
                conn.start_module(&module_id.to_string(), &snapshot.image_id.to_string(), snapshot.configuration.clone()).await
            {
                warn!(agent_id = %entry.id(), module_id = %module_id, %error, "failed to start module on agent");
            }
        }

        module.set_is_running(true);
        Ok(())
    }

    pub async fn stop_module(&self, module_id: ModuleId) -> Result<(), CoreError> {
        let module = self.modules.get(module_id)?;

        for (entry, conn) in self.connected() {
            if let Err(error) = conn.stop_module(&module_id.to_string()).await {
                warn!(agent_id = %entry.id(), module_id = %module_id, %error, "failed to stop module on agent");
            }
        }

        module.set_is_running(false);
        Ok(())
    }

    /// `SendData(moduleID, bytes)`: broadcast to every connected agent, each
    /// of which dispatches locally to that module's `CONTROLLER_DATA`
    /// webhooks (§4.5, §4.7).
    pub async fn send_data(&self, module_id: ModuleId, data: Vec<u8>) -> Result<(), CoreError> {
        self.modules.get(module_id)?;

        let tasks = self.connected().into_iter().map(|(entry, conn)| {
            let data = data.clone();
            let module_id = module_id.to_string();
            async move {
                if let Err(error) = conn.push_data(&module_id, data).await {
                    warn!(agent_id = %entry.id(), %error, "failed to send data to agent");
                }
            }
        });
        futures_util::future::join_all(tasks).await;
        Ok(())
    }

    // ---- Pull side: Setup Service, consumed by a just-online agent ----

    pub fn configuration_for(&self, agent_id: AgentId) -> Result<BTreeMap<String, String>, CoreError> {
        Ok(self.agents.get(agent_id)?.configuration())
    }

    pub fn all_images(&self) -> Vec<Arc<ImageRecord>> {
        self.images.list()
    }

    /// Snapshot of every module with `isRunning = true`, as the agent boot
    /// sequence expects it (§4.6 step 4).
    pub fn running_modules(&self) -> Vec<(ModuleId, ImageId, BTreeMap<String, String>)> {
        self.modules
            .list()
            .into_iter()
            .map(|m| m.snapshot())
            .filter(|m| m.is_running)
            .map(|m| (m.id, m.image_id, m.configuration))
            .collect()
    }

    // ---- Receive Service: module -> controller ----

    /// `ReceiveService.PushData(sender, receiver, data)`: looks up
    /// controller webhooks for the sending module and dispatches via C7
    /// (§4.5).
    pub async fn receive_push_data(
        &self,
        sender_module_id: ModuleId,
        receiver: String,
        data: Vec<u8>,
    ) -> Result<(), CoreError> {
        info!(module_id = %sender_module_id, "received module push, dispatching to controller webhooks");
        self.webhooks.dispatch(sender_module_id, receiver, data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmzero_gateways::overlay::{OverlayDirectory, OverlayGateway, TcpOverlayGateway};
    use std::time::SystemTime;

    fn engine() -> (PropagationEngine, Arc<AgentRegistry>, Arc<ImageRegistry>, Arc<ModuleRegistry>) {
        let agents = Arc::new(AgentRegistry::new());
        let images = Arc::new(ImageRegistry::new());
        let modules = Arc::new(ModuleRegistry::new());
        let webhooks = Arc::new(ControllerWebhookDispatcher::new(Arc::new(crate::registry::WebhookRegistry::new())));
        (
            PropagationEngine::new(agents.clone(), images.clone(), modules.clone(), webhooks),
            agents,
            images,
            modules,
        )
    }

    #[tokio::test]
    async fn delete_image_is_not_allowed_while_referenced() {
        let (engine, _agents, images, modules) = engine();
        let image = images.create("worker:latest", vec![1]);
        modules.create("worker-1", image.meta.id);

        let err = engine.delete_image(image.meta.id).await.unwrap_err();
        assert_eq!(err.kind, dmzero_core::ErrorKind::NotAllowed);
    }

    #[tokio::test]
    async fn delete_image_succeeds_once_unreferenced() {
        let (engine, _agents, images, _modules) = engine();
        let image = images.create("worker:latest", vec![1]);
        engine.delete_image(image.meta.id).await.unwrap();
        assert!(images.get(image.meta.id).is_err());
    }

    #[tokio::test]
    async fn start_module_flips_is_running_even_with_no_connected_agents() {
        let (engine, _agents, images, modules) = engine();
        let image = images.create("worker:latest", vec![]);
        let module = modules.create("worker-1", image.meta.id);

        engine.start_module(module.id()).await.unwrap();
        assert!(module.snapshot().is_running);

        engine.stop_module(module.id()).await.unwrap();
        assert!(!module.snapshot().is_running);
    }

    #[tokio::test]
    async fn upload_image_fans_out_to_connected_agents() {
        let (engine, agents, _images, _modules) = engine();
        let directory = OverlayDirectory::new();
        let overlay: Arc<dyn OverlayGateway> = Arc::new(TcpOverlayGateway::new(directory.clone(), "127.0.0.1"));
        let agent_overlay: Arc<dyn OverlayGateway> = Arc::new(TcpOverlayGateway::new(directory, "127.0.0.1"));

        let identity_id = overlay.create_identity("edge-1", false, &[]).await.unwrap();
        let enrollment_id = overlay
            .create_enrollment(&identity_id, SystemTime::now() + std::time::Duration::from_secs(60))
            .await
            .unwrap();
        let token = overlay.get_enrollment_token(&enrollment_id).await.unwrap();
        agent_overlay.enroll_from_token(&token.jwt, "ECDSA").await.unwrap();

        let listener = agent_overlay
            .listen(dmzero_core::SERVICE_AGENT, dmzero_gateways::overlay::ListenOpts { bind_using_edge_identity: true })
            .await
            .unwrap();
        let accept_task = tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            loop {
                match dmzero_wire::read_message::<_, dmzero_wire::agent_rpc::AgentCall>(&mut conn.stream).await {
                    Ok(dmzero_wire::agent_rpc::AgentCall::PushImageChunk { content, .. }) => buf.extend(content),
                    Ok(dmzero_wire::agent_rpc::AgentCall::PushImageEnd) => break,
                    _ => break,
                }
            }
            dmzero_wire::write_message(&mut conn.stream, &dmzero_wire::agent_rpc::AgentReply::Ack).await.unwrap();
            buf
        });

        let entry = agents.create("edge-1");
        entry.set_identity_id(Some(identity_id.clone()));
        entry.set_connection(Arc::new(AgentConn::new(overlay, identity_id)));

        let record = engine.upload_image("worker:latest", vec![9; 4096]).await;

        let received = accept_task.await.unwrap();
        assert_eq!(received.len(), record.blob.len());
    }
}
