// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Messages for the RPC surface the controller serves to agents over the
//! overlay: `PhonehomeService`, `SetupService`, `ReceiveService` (§6).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One call on the controller-served surface. The caller's identity is
/// never carried in the payload — it is derived by the controller from the
/// overlay connection's peer address (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "call")]
pub enum ControllerCall {
    Phonehome { images: BTreeMap<String, ImageInfo>, modules: BTreeMap<String, ModuleInfo> },
    ConfigurationRequest,
    ImageRequest,
    ModuleRequest,
    /// `ReceiveService.PushData`: a module on the calling agent is sending
    /// data up to the controller.
    PushData { sender_module_id: String, receiver_module_id: String, data: Vec<u8> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageInfo {
    pub id: String,
    pub name: String,
    pub size: usize,
}

/// `Status` is carried for forward compatibility but is always `Unknown` —
/// the original source never populates anything else (§9 Open Question 4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleInfo {
    pub id: String,
    pub status: ModuleStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ModuleStatus {
    Unknown,
}

/// One frame of a response on the controller-served surface. Unary calls
/// (`Phonehome`, `ConfigurationRequest`, `PushData`) send exactly one
/// `Result`-carrying frame; `ImageRequest` and `ModuleRequest` send zero or
/// more item frames followed by `StreamEnd`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "frame")]
pub enum ControllerReply {
    Ack,
    Configuration { configuration: BTreeMap<String, String> },
    ImageChunk { id: String, name: String, content: Vec<u8> },
    ModuleChunk { module_id: String, image_id: String, env: BTreeMap<String, String> },
    StreamEnd,
    Error { kind: String, message: String },
}
