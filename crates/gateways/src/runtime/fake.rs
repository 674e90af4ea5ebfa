// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory `RuntimeGateway` double, for component tests that exercise
//! module launch/stop without a Docker daemon.

use async_trait::async_trait;
use dmzero_core::CoreError;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use super::{RunContainerSpec, RuntimeGateway};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub spec: RunContainerSpec,
    pub running: bool,
}

#[derive(Default)]
pub struct FakeRuntimeGateway {
    images: Mutex<HashMap<String, Vec<String>>>, // reference -> default cmd
    containers: Mutex<HashMap<String, FakeContainer>>,
    /// If set, `run_container` fails with this message instead of succeeding.
    pub fail_run: Mutex<Option<String>>,
}

impl FakeRuntimeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.containers.lock().values().cloned().collect()
    }

    pub fn set_default_cmd(&self, reference: &str, cmd: Vec<String>) {
        self.images.lock().insert(reference.to_string(), cmd);
    }
}

#[async_trait]
impl RuntimeGateway for FakeRuntimeGateway {
    async fn load_image(&self, _blob: &[u8]) -> Result<String, CoreError> {
        let reference = format!("fake-image:{}", Uuid::new_v4());
        self.images.lock().insert(reference.clone(), Vec::new());
        Ok(reference)
    }

    async fn inspect_image_default_cmd(&self, reference: &str) -> Result<Vec<String>, CoreError> {
        self.images
            .lock()
            .get(reference)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("no such image: {reference}")))
    }

    async fn run_container(&self, spec: RunContainerSpec) -> Result<String, CoreError> {
        if let Some(message) = self.fail_run.lock().clone() {
            return Err(CoreError::internal(message));
        }
        let container_id = format!("fake-container:{}", Uuid::new_v4());
        self.containers.lock().insert(container_id.clone(), FakeContainer { spec, running: true });
        Ok(container_id)
    }

    async fn stop_container(&self, container_id: &str) -> Result<(), CoreError> {
        let mut containers = self.containers.lock();
        let container = containers
            .get_mut(container_id)
            .ok_or_else(|| CoreError::not_found("no such container"))?;
        container.running = false;
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), CoreError> {
        self.containers.lock().remove(container_id);
        Ok(())
    }

    async fn remove_image(&self, reference: &str) -> Result<(), CoreError> {
        self.images.lock().remove(reference);
        Ok(())
    }
}
