// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The controller's live outbound connection to one agent's `service-agent`
//! listener, and the typed calls derived from it (§9 cyclic reference
//! note: the registry owns this handle; call sites borrow a fresh dial per
//! RPC rather than holding a long-lived client stub, since the overlay
//! connection itself is the only long-lived resource worth caching here —
//! dialing per call keeps cancellation simple (§5) at the cost of a little
//! latency, acceptable for a control-plane fan-out path).

use dmzero_core::{CoreError, IMAGE_STREAM_CHUNK_SIZE, SERVICE_AGENT};
use dmzero_gateways::overlay::OverlayGateway;
use dmzero_wire::agent_rpc::{AgentCall, AgentReply};
use dmzero_wire::{read_message, write_message};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A validated outbound path to one agent. Constructing one does not dial;
/// each call dials fresh against the agent's bound identity.
pub struct AgentConn {
    overlay: Arc<dyn OverlayGateway>,
    identity_id: String,
}

impl AgentConn {
    pub fn new(overlay: Arc<dyn OverlayGateway>, identity_id: String) -> Self {
        Self { overlay, identity_id }
    }

    pub fn identity_id(&self) -> &str {
        &self.identity_id
    }

    async fn unary(&self, call: AgentCall) -> Result<AgentReply, CoreError> {
        let mut conn = self.overlay.dial(SERVICE_AGENT, Some(&self.identity_id)).await?;
        write_message(&mut conn.stream, &call)
            .await
            .map_err(|e| CoreError::unavailable("failed to write agent call").with_source(e))?;
        let reply: AgentReply = read_message(&mut conn.stream)
            .await
            .map_err(|e| CoreError::unavailable("failed to read agent reply").with_source(e))?;
        as_result(reply)
    }

    pub async fn update_configuration(&self, configuration: BTreeMap<String, String>) -> Result<(), CoreError> {
        self.unary(AgentCall::UpdateConfiguration { configuration }).await.map(|_| ())
    }

    pub async fn check_image(&self, id: &str) -> Result<bool, CoreError> {
        match self.unary(AgentCall::CheckImage { id: id.to_string() }).await? {
            AgentReply::CheckImageResult { exists } => Ok(exists),
            other => Err(unexpected_reply(other)),
        }
    }

    pub async fn remove_image(&self, id: &str) -> Result<(), CoreError> {
        self.unary(AgentCall::RemoveImage { id: id.to_string() }).await.map(|_| ())
    }

    /// Client-streaming `PushImage`: one concurrent task per agent (§4.5)
    /// calls this for the image just uploaded.
    pub async fn push_image(&self, id: &str, name: &str, content: &[u8]) -> Result<(), CoreError> {
        let mut conn = self.overlay.dial(SERVICE_AGENT, Some(&self.identity_id)).await?;
        for chunk in content.chunks(IMAGE_STREAM_CHUNK_SIZE) {
            write_message(
                &mut conn.stream,
                &AgentCall::PushImageChunk { id: id.to_string(), name: name.to_string(), content: chunk.to_vec() },
            )
            .await
            .map_err(|e| CoreError::unavailable("failed to write image chunk").with_source(e))?;
        }
        write_message(&mut conn.stream, &AgentCall::PushImageEnd)
            .await
            .map_err(|e| CoreError::unavailable("failed to write image stream end").with_source(e))?;
        let reply: AgentReply = read_message(&mut conn.stream)
            .await
            .map_err(|e| CoreError::unavailable("failed to read push-image ack").with_source(e))?;
        as_result(reply).map(|_| ())
    }

    pub async fn start_module(
        &self,
        id: &str,
        image_id: &str,
        env: BTreeMap<String, String>,
    ) -> Result<(), CoreError> {
        self.unary(AgentCall::StartModule { id: id.to_string(), image_id: image_id.to_string(), env })
            .await
            .map(|_| ())
    }

    pub async fn stop_module(&self, id: &str) -> Result<(), CoreError> {
        self.unary(AgentCall::StopModule { id: id.to_string() }).await.map(|_| ())
    }

    /// `ShareService.PushData` used for `SendData(moduleID, bytes)` fan-out.
    pub async fn push_data(&self, receiver_module_id: &str, data: Vec<u8>) -> Result<(), CoreError> {
        self.unary(AgentCall::SharePushData { receiver_module_id: receiver_module_id.to_string(), data })
            .await
            .map(|_| ())
    }
}

fn as_result(reply: AgentReply) -> Result<AgentReply, CoreError> {
    match reply {
        AgentReply::Error { kind, message } => Err(CoreError::internal(format!("{kind}: {message}"))),
        other => Ok(other),
    }
}

fn unexpected_reply(reply: AgentReply) -> CoreError {
    CoreError::internal(format!("unexpected agent reply: {reply:?}"))
}
