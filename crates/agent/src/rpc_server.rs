// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Overlay-side RPC servers the agent runs: `service-agent` (Configuration/
//! Image/Module/Share RPC from the controller) and `service-p2p` (Ping and
//! Share RPC from peer agents) (§4.6, §6). Both surfaces dispatch the same
//! `AgentCall` enum; `Surface` restricts which variants each one accepts.

use std::sync::Arc;

use dmzero_core::{
    parse_overlay_address, CoreError, ImageId, ModuleId, WebhookEvent, RESERVED_IDENTITY_CONTROLLER, SERVICE_AGENT,
    SERVICE_P2P,
};
use dmzero_gateways::overlay::{ListenOpts, OverlayConn, OverlayGateway};
use dmzero_gateways::runtime::RuntimeGateway;
use dmzero_wire::agent_rpc::{AgentCall, AgentReply};
use dmzero_wire::{read_message, write_message};
use tracing::warn;

use crate::state::AgentState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Surface {
    Agent,
    P2p,
}

impl Surface {
    fn allows(self, call: &AgentCall) -> bool {
        match (self, call) {
            (Surface::P2p, AgentCall::Ping) => true,
            (Surface::P2p, AgentCall::SharePushData { .. }) => true,
            (Surface::Agent, AgentCall::SharePushData { .. }) => true,
            (Surface::Agent, _) => !matches!(call, AgentCall::Ping),
            (Surface::P2p, _) => false,
        }
    }
}

pub struct AgentRpcServer {
    overlay: Arc<dyn OverlayGateway>,
    state: Arc<AgentState>,
}

impl AgentRpcServer {
    pub fn new(overlay: Arc<dyn OverlayGateway>, state: Arc<AgentState>) -> Self {
        Self { overlay, state }
    }

    pub async fn run_agent_service(self: Arc<Self>) -> Result<(), CoreError> {
        self.run(SERVICE_AGENT, Surface::Agent).await
    }

    pub async fn run_p2p_service(self: Arc<Self>) -> Result<(), CoreError> {
        self.run(SERVICE_P2P, Surface::P2p).await
    }

    async fn run(self: Arc<Self>, service_name: &str, surface: Surface) -> Result<(), CoreError> {
        let listener = self.overlay.listen(service_name, ListenOpts { bind_using_edge_identity: true }).await?;
        loop {
            let conn = listener.accept().await?;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(error) = this.serve_one(conn, surface).await {
                    warn!(%error, ?surface, "agent rpc connection ended with an error");
                }
            });
        }
    }

    async fn serve_one(&self, mut conn: OverlayConn, surface: Surface) -> Result<(), CoreError> {
        let parsed = parse_overlay_address(&conn.peer_address)
            .map_err(|e| CoreError::invalid_argument("malformed overlay peer address").with_source(e))?;
        let caller_identity = parsed.source_identity;

        let call: AgentCall = read_message(&mut conn.stream)
            .await
            .map_err(|e| CoreError::unavailable("failed to read agent call").with_source(e))?;

        if !surface.allows(&call) {
            write_message(&mut conn.stream, &error_reply(&CoreError::not_allowed("call not permitted on this service")))
                .await
                .ok();
            return Ok(());
        }

        match call {
            AgentCall::UpdateConfiguration { configuration } => {
                self.state.set_configuration(configuration);
                write_message(&mut conn.stream, &AgentReply::Ack).await.ok();
            }
            AgentCall::CheckImage { id } => {
                let exists = id.parse::<ImageId>().map(|id| self.state.images.contains(id)).unwrap_or(false);
                write_message(&mut conn.stream, &AgentReply::CheckImageResult { exists }).await.ok();
            }
            AgentCall::GetImage { id } => {
                self.handle_get_image(&mut conn, &id).await?;
            }
            AgentCall::PushImageChunk { id, name, content } => {
                self.handle_push_image(&mut conn, id, name, content).await?;
            }
            AgentCall::PushImageEnd => {
                write_message(&mut conn.stream, &error_reply(&CoreError::invalid_argument("PushImageEnd without a preceding chunk")))
                    .await
                    .ok();
            }
            AgentCall::RemoveImage { id } => {
                let reply = self.handle_remove_image(&id).await;
                write_message(&mut conn.stream, &reply).await.ok();
            }
            AgentCall::StartModule { id, image_id, env } => {
                let reply = self.handle_start_module(&id, &image_id, env).await;
                write_message(&mut conn.stream, &reply).await.ok();
            }
            AgentCall::StopModule { id } => {
                let reply = self.handle_stop_module(&id).await;
                write_message(&mut conn.stream, &reply).await.ok();
            }
            AgentCall::SharePushData { receiver_module_id, data } => {
                let reply = self.handle_share_push_data(surface, &caller_identity, &receiver_module_id, data).await;
                write_message(&mut conn.stream, &reply).await.ok();
            }
            AgentCall::Ping => {
                write_message(&mut conn.stream, &AgentReply::Ack).await.ok();
            }
        }

        Ok(())
    }

    async fn handle_get_image(&self, conn: &mut OverlayConn, id: &str) -> Result<(), CoreError> {
        let image_id: ImageId = match id.parse() {
            Ok(id) => id,
            Err(_) => {
                write_message(&mut conn.stream, &error_reply(&CoreError::invalid_argument("malformed image id"))).await.ok();
                return Ok(());
            }
        };
        let record = match self.state.images.get(image_id) {
            Ok(record) => record,
            Err(error) => {
                write_message(&mut conn.stream, &error_reply(&error)).await.ok();
                return Ok(());
            }
        };

        for chunk in record.blob.chunks(dmzero_core::IMAGE_STREAM_CHUNK_SIZE) {
            write_message(&mut conn.stream, &AgentReply::ImageChunk { content: chunk.to_vec() })
                .await
                .map_err(|e| CoreError::unavailable("failed to write image chunk").with_source(e))?;
        }
        write_message(&mut conn.stream, &AgentReply::StreamEnd)
            .await
            .map_err(|e| CoreError::unavailable("failed to write image stream end").with_source(e))
    }

    async fn handle_push_image(&self, conn: &mut OverlayConn, id: String, name: String, first_chunk: Vec<u8>) -> Result<(), CoreError> {
        let mut blob = first_chunk;
        loop {
            let frame: AgentCall = read_message(&mut conn.stream)
                .await
                .map_err(|e| CoreError::unavailable("failed to read image stream frame").with_source(e))?;
            match frame {
                AgentCall::PushImageChunk { id: frame_id, content, .. } if frame_id == id => blob.extend(content),
                AgentCall::PushImageEnd => break,
                _ => {
                    write_message(&mut conn.stream, &error_reply(&CoreError::invalid_argument("unexpected frame during PushImage")))
                        .await
                        .ok();
                    return Ok(());
                }
            }
        }

        let reply = match id.parse::<ImageId>() {
            Ok(image_id) => match self.state.runtime.load_image(&blob).await {
                Ok(reference) => {
                    self.state.images.insert(image_id, name, reference, blob);
                    AgentReply::Ack
                }
                Err(error) => error_reply(&error),
            },
            Err(_) => error_reply(&CoreError::invalid_argument("malformed image id")),
        };
        write_message(&mut conn.stream, &reply).await.ok();
        Ok(())
    }

    async fn handle_remove_image(&self, id: &str) -> AgentReply {
        let Ok(image_id) = id.parse::<ImageId>() else {
            return error_reply(&CoreError::invalid_argument("malformed image id"));
        };
        let Some(record) = self.state.images.remove(image_id) else {
            return error_reply(&CoreError::not_found(format!("no such image: {image_id}")));
        };
        match self.state.runtime.remove_image(&record.reference).await {
            Ok(()) => AgentReply::Ack,
            Err(error) => error_reply(&error),
        }
    }

    async fn handle_start_module(&self, id: &str, image_id: &str, env: std::collections::BTreeMap<String, String>) -> AgentReply {
        let Ok(module_id) = id.parse::<ModuleId>() else {
            return error_reply(&CoreError::invalid_argument("malformed module id"));
        };
        let Ok(image_id) = image_id.parse::<ImageId>() else {
            return error_reply(&CoreError::invalid_argument("malformed image id"));
        };
        let image = match self.state.images.get(image_id) {
            Ok(image) => image,
            Err(error) => return error_reply(&error),
        };
        match self
            .state
            .modules
            .start(module_id, image.reference.clone(), env, self.state.configuration(), &self.state.api_base_url, &self.state.cert_base64)
            .await
        {
            Ok(()) => AgentReply::Ack,
            Err(error) => error_reply(&error),
        }
    }

    async fn handle_stop_module(&self, id: &str) -> AgentReply {
        let Ok(module_id) = id.parse::<ModuleId>() else {
            return error_reply(&CoreError::invalid_argument("malformed module id"));
        };
        match self.state.modules.stop(module_id).await {
            Ok(()) => AgentReply::Ack,
            Err(error) => error_reply(&error),
        }
    }

    /// Share receiver (§4.6): on the agent-service surface the controller
    /// always names an exact target module (`SendData`, broadcast to
    /// every connected agent, delivered only where that module lives). On
    /// the p2p surface the sender's local REST has no way to address a
    /// specific module on this agent (§6 `/endpoint/push` takes only a
    /// peer identity), so delivery fans out to every `ENDPOINT_DATA`
    /// webhook this agent hosts.
    async fn handle_share_push_data(&self, surface: Surface, caller_identity: &str, receiver_module_id: &str, data: Vec<u8>) -> AgentReply {
        match surface {
            Surface::Agent => {
                let Ok(module_id) = receiver_module_id.parse::<ModuleId>() else {
                    return error_reply(&CoreError::invalid_argument("malformed receiver module id"));
                };
                let event = if caller_identity == RESERVED_IDENTITY_CONTROLLER { WebhookEvent::ControllerData } else { WebhookEvent::EndpointData };
                match self.state.webhook_dispatcher.dispatch(Some(module_id), event, caller_identity, data).await {
                    Ok(()) => AgentReply::Ack,
                    Err(error) => error_reply(&error),
                }
            }
            Surface::P2p => match self.state.webhook_dispatcher.dispatch(None, WebhookEvent::EndpointData, caller_identity, data).await {
                Ok(()) => AgentReply::Ack,
                Err(error) => error_reply(&error),
            },
        }
    }
}

fn error_reply(error: &CoreError) -> AgentReply {
    AgentReply::Error { kind: error.kind.to_string(), message: error.message.clone() }
}
