// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent process inputs (§6 "Process inputs"): unlike the controller, these
//! arrive as CLI flags rather than environment variables, so the struct
//! here is a plain value the `dmzero-cli` binary's `clap` parser fills in
//! rather than something this crate reads from the environment itself.

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// One-time enrollment token (§4.6 boot step 1).
    pub jwt: String,
    /// Key algorithm requested for the overlay identity. Defaults to
    /// `RSA` per the process inputs table; the overlay gateway's identity
    /// enrollment accepts the string but the reference implementation's
    /// key material is opaque to this crate either way.
    pub key_alg: String,
}

impl AgentConfig {
    pub fn new(jwt: impl Into<String>, key_alg: impl Into<String>) -> Self {
        Self { jwt: jwt.into(), key_alg: key_alg.into() }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { jwt: String::new(), key_alg: "RSA".to_string() }
    }
}
