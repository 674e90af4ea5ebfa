// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Controller-side Agent catalog entry (§3).

use std::collections::BTreeMap;

use crate::define_id;

define_id! {
    /// Stable catalog identifier for an Agent, assigned at catalog insert.
    pub struct AgentId;
}

/// Diagnostics reported by an agent's most recent phonehome. The controller
/// registry stamps this with the instant it arrived to derive freshness
/// (`isOnline`); the stamp itself is registry state, not part of this plain
/// payload.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub present_images: BTreeMap<String, String>,
    pub present_modules: BTreeMap<String, String>,
}

/// The plain data snapshot of an Agent; owning structures (the controller
/// registry) additionally guard the outbound connection handle, which is
/// not a plain-data concept and lives alongside this struct rather than in
/// it (§9 cyclic reference note).
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub configuration: BTreeMap<String, String>,
    pub identity_id: Option<String>,
}

impl Agent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { id: AgentId::new(), name: name.into(), configuration: BTreeMap::new(), identity_id: None }
    }
}
