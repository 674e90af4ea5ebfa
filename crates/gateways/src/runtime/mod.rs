// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime Gateway capability (C2, §4.2): load/inspect/run/stop/remove for
//! container images.

mod bollard_gw;
mod fake;

pub use bollard_gw::BollardRuntimeGateway;
pub use fake::FakeRuntimeGateway;

use async_trait::async_trait;
use dmzero_core::CoreError;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct RunContainerSpec {
    pub image_reference: String,
    pub env: BTreeMap<String, String>,
    pub container_name: String,
}

#[async_trait]
pub trait RuntimeGateway: Send + Sync + 'static {
    /// Loads an image blob and returns the runtime-assigned reference
    /// (parsed from the runtime's `Loaded image: <ref>` output).
    async fn load_image(&self, blob: &[u8]) -> Result<String, CoreError>;

    /// The image's default `Cmd`, used unmodified when running a container
    /// from it (§4.6 module launch does not override the entrypoint).
    async fn inspect_image_default_cmd(&self, reference: &str) -> Result<Vec<String>, CoreError>;

    /// Starts a container in host-network mode. On failure, any
    /// partially-created container is removed before the error returns.
    async fn run_container(&self, spec: RunContainerSpec) -> Result<String, CoreError>;

    async fn stop_container(&self, container_id: &str) -> Result<(), CoreError>;

    async fn remove_container(&self, container_id: &str) -> Result<(), CoreError>;

    async fn remove_image(&self, reference: &str) -> Result<(), CoreError>;
}
