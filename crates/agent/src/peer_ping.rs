// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Peer ping (§4.6): enumerates `service-p2p` terminators, dials every
//! peer but itself with a 1s deadline, and calls `Ping`. Used only as
//! liveness evidence on the peer side — failures are logged, never fatal,
//! and do not feed into any agent's `isOnline` (§9 Open Question 2, kept
//! as specified).

use std::sync::Arc;
use std::time::Duration;

use dmzero_core::{CoreError, SERVICE_P2P};
use dmzero_gateways::overlay::OverlayGateway;
use dmzero_wire::agent_rpc::{AgentCall, AgentReply};
use dmzero_wire::{read_message, write_message};
use tracing::warn;

const PING_DEADLINE: Duration = Duration::from_secs(1);

pub async fn ping_all_peers(overlay: &Arc<dyn OverlayGateway>) {
    let self_identity = overlay.get_current_identity();
    let peers = match overlay.get_service_terminators(SERVICE_P2P).await {
        Ok(peers) => peers,
        Err(error) => {
            warn!(%error, "failed to enumerate p2p terminators");
            return;
        }
    };

    for peer in peers.into_iter().filter(|p| *p != self_identity) {
        match tokio::time::timeout(PING_DEADLINE, ping_one(overlay, &peer)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(%peer, %error, "peer ping failed"),
            Err(_) => warn!(%peer, "peer ping timed out"),
        }
    }
}

async fn ping_one(overlay: &Arc<dyn OverlayGateway>, peer: &str) -> Result<(), CoreError> {
    let mut conn = overlay.dial(SERVICE_P2P, Some(peer)).await?;
    write_message(&mut conn.stream, &AgentCall::Ping)
        .await
        .map_err(|e| CoreError::unavailable("failed to write ping").with_source(e))?;
    let reply: AgentReply = read_message(&mut conn.stream)
        .await
        .map_err(|e| CoreError::unavailable("failed to read ping reply").with_source(e))?;
    match reply {
        AgentReply::Ack => Ok(()),
        other => Err(CoreError::internal(format!("unexpected ping reply: {other:?}"))),
    }
}
