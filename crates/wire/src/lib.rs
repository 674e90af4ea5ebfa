// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire format for the two overlay-brokered RPC surfaces (§6) plus the DTOs
//! for the Controller and Agent REST APIs.
//!
//! Transport framing: 4-byte big-endian length prefix + JSON payload, one
//! message per frame. A "call" is one overlay connection carrying one or
//! more request frames followed by one or more response frames; streaming
//! RPCs (`ImageRequest`, `PushImage`) are modeled as a sequence of frames
//! terminated by an explicit `*End` variant rather than connection close,
//! so cancellation (§5) can be observed mid-stream.

mod framing;

pub mod agent_rpc;
pub mod controller_rpc;
pub mod rest;

pub use framing::{read_message, write_message, FramingError};
