// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Messages for the RPC surface each agent serves, to the controller
//! (`ConfigurationService`, `ImageService`, `ModuleService`, `ShareService`)
//! and to peer agents (`PingService`, `ShareService`) (§6).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "call")]
pub enum AgentCall {
    UpdateConfiguration { configuration: BTreeMap<String, String> },
    CheckImage { id: String },
    GetImage { id: String },
    /// One chunk of a client-streamed `PushImage` call; a call is a
    /// sequence of `PushImageChunk` frames for the same `id` followed by
    /// `PushImageEnd`.
    PushImageChunk { id: String, name: String, content: Vec<u8> },
    PushImageEnd,
    RemoveImage { id: String },
    StartModule { id: String, image_id: String, env: BTreeMap<String, String> },
    StopModule { id: String },
    /// `ShareService.PushData`, reachable both from the controller
    /// (relaying `SendData`) and from a peer agent.
    SharePushData { receiver_module_id: String, data: Vec<u8> },
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "frame")]
pub enum AgentReply {
    Ack,
    CheckImageResult { exists: bool },
    ImageChunk { content: Vec<u8> },
    StreamEnd,
    Error { kind: String, message: String },
}
