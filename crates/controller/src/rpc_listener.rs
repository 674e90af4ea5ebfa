// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Overlay-side RPC server the controller runs on `service-controller`:
//! accepts connections from agents, authenticates the caller from the
//! overlay peer address (§4.1), and dispatches `ControllerCall` variants to
//! C4/C5 (`PhonehomeService`, `SetupService`, `ReceiveService`, §6).

use std::sync::Arc;

use dmzero_core::{parse_overlay_address, CoreError, Diagnostics, ModuleId, SERVICE_CONTROLLER};
use dmzero_gateways::overlay::{ListenOpts, OverlayConn, OverlayGateway};
use dmzero_wire::controller_rpc::{ControllerCall, ControllerReply, ImageInfo, ModuleInfo};
use dmzero_wire::{read_message, write_message};
use tracing::warn;

use crate::enrollment::EnrollmentCoordinator;
use crate::propagation::PropagationEngine;
use crate::registry::AgentRegistry;

pub struct ControllerRpcListener {
    overlay: Arc<dyn OverlayGateway>,
    agents: Arc<AgentRegistry>,
    enrollment: Arc<EnrollmentCoordinator>,
    propagation: Arc<PropagationEngine>,
}

impl ControllerRpcListener {
    pub fn new(
        overlay: Arc<dyn OverlayGateway>,
        agents: Arc<AgentRegistry>,
        enrollment: Arc<EnrollmentCoordinator>,
        propagation: Arc<PropagationEngine>,
    ) -> Self {
        Self { overlay, agents, enrollment, propagation }
    }

    /// Binds `service-controller` under the controller's reserved identity
    /// and serves connections until the listener errors out.
    pub async fn run(self: Arc<Self>) -> Result<(), CoreError> {
        let listener = self
            .overlay
            .listen(SERVICE_CONTROLLER, ListenOpts { bind_using_edge_identity: true })
            .await?;
        loop {
            let conn = listener.accept().await?;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(error) = this.serve_one(conn).await {
                    warn!(%error, "controller rpc connection ended with an error");
                }
            });
        }
    }

    async fn serve_one(&self, mut conn: OverlayConn) -> Result<(), CoreError> {
        let parsed = parse_overlay_address(&conn.peer_address)
            .map_err(|e| CoreError::invalid_argument("malformed overlay peer address").with_source(e))?;
        let caller_identity = parsed.source_identity;

        let call: ControllerCall = read_message(&mut conn.stream)
            .await
            .map_err(|e| CoreError::unavailable("failed to read controller call").with_source(e))?;

        match call {
            ControllerCall::Phonehome { images, modules } => {
                self.handle_phonehome(&caller_identity, images, modules).await?;
                write_message(&mut conn.stream, &ControllerReply::Ack).await.ok();
            }
            ControllerCall::ConfigurationRequest => {
                let reply = match self.handle_configuration_request(&caller_identity) {
                    Ok(configuration) => ControllerReply::Configuration { configuration },
                    Err(error) => error_reply(&error),
                };
                write_message(&mut conn.stream, &reply).await.ok();
            }
            ControllerCall::ImageRequest => {
                self.handle_image_request(&mut conn).await?;
            }
            ControllerCall::ModuleRequest => {
                self.handle_module_request(&mut conn).await?;
            }
            ControllerCall::PushData { sender_module_id, receiver_module_id, data } => {
                let reply = match self.handle_push_data(&sender_module_id, receiver_module_id, data).await {
                    Ok(()) => ControllerReply::Ack,
                    Err(error) => error_reply(&error),
                };
                write_message(&mut conn.stream, &reply).await.ok();
            }
        }

        Ok(())
    }

    async fn handle_phonehome(
        &self,
        caller_identity: &str,
        images: std::collections::BTreeMap<String, ImageInfo>,
        modules: std::collections::BTreeMap<String, ModuleInfo>,
    ) -> Result<(), CoreError> {
        let entry = self.agents.get_by_identity_id(caller_identity)?;
        self.propagation.note_phonehome_connection(entry.id(), &self.overlay)?;

        let diagnostics = Diagnostics {
            present_images: images.into_values().map(|info| (info.id, info.name)).collect(),
            present_modules: modules.into_keys().map(|id| (id.clone(), id)).collect(),
        };
        self.enrollment.record_phonehome(entry.id(), diagnostics)?;
        Ok(())
    }

    fn handle_configuration_request(&self, caller_identity: &str) -> Result<std::collections::BTreeMap<String, String>, CoreError> {
        let entry = self.agents.get_by_identity_id(caller_identity)?;
        self.propagation.configuration_for(entry.id())
    }

    async fn handle_image_request(&self, conn: &mut OverlayConn) -> Result<(), CoreError> {
        for record in self.propagation.all_images() {
            for chunk in record.blob.chunks(dmzero_core::IMAGE_STREAM_CHUNK_SIZE) {
                let frame = ControllerReply::ImageChunk {
                    id: record.meta.id.to_string(),
                    name: record.meta.name.clone(),
                    content: chunk.to_vec(),
                };
                write_message(&mut conn.stream, &frame)
                    .await
                    .map_err(|e| CoreError::unavailable("failed to write image chunk").with_source(e))?;
            }
        }
        write_message(&mut conn.stream, &ControllerReply::StreamEnd)
            .await
            .map_err(|e| CoreError::unavailable("failed to write image stream end").with_source(e))
    }

    async fn handle_module_request(&self, conn: &mut OverlayConn) -> Result<(), CoreError> {
        for (module_id, image_id, env) in self.propagation.running_modules() {
            let frame = ControllerReply::ModuleChunk { module_id: module_id.to_string(), image_id: image_id.to_string(), env };
            write_message(&mut conn.stream, &frame)
                .await
                .map_err(|e| CoreError::unavailable("failed to write module chunk").with_source(e))?;
        }
        write_message(&mut conn.stream, &ControllerReply::StreamEnd)
            .await
            .map_err(|e| CoreError::unavailable("failed to write module stream end").with_source(e))
    }

    async fn handle_push_data(&self, sender_module_id: &str, receiver_module_id: String, data: Vec<u8>) -> Result<(), CoreError> {
        let sender: ModuleId = sender_module_id
            .parse()
            .map_err(|_| CoreError::invalid_argument("malformed sender module id"))?;
        self.propagation.receive_push_data(sender, receiver_module_id, data).await
    }
}

fn error_reply(error: &CoreError) -> ControllerReply {
    ControllerReply::Error { kind: error.kind.to_string(), message: error.message.clone() }
}
