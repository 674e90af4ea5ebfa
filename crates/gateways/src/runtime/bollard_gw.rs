// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Docker-backed `RuntimeGateway`, using `bollard` against the local
//! Docker Engine API over the unix socket.

use async_trait::async_trait;
use bollard::container::{Config, CreateContainerOptions, RemoveContainerOptions, StopContainerOptions};
use bollard::image::{CreateImageOptions, RemoveImageOptions};
use bollard::Docker;
use dmzero_core::CoreError;
use futures_util::stream::StreamExt;
use tracing::{info, warn};

use super::{RunContainerSpec, RuntimeGateway};

pub struct BollardRuntimeGateway {
    docker: Docker,
}

impl BollardRuntimeGateway {
    pub fn connect_with_defaults() -> Result<Self, CoreError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| CoreError::unavailable("failed to connect to docker daemon").with_source(e))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl RuntimeGateway for BollardRuntimeGateway {
    async fn load_image(&self, blob: &[u8]) -> Result<String, CoreError> {
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions { from_src: "-", ..Default::default() }),
            Some(bytes::Bytes::copy_from_slice(blob)),
            None,
        );

        let mut reference = None;
        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| CoreError::internal("docker load failed").with_source(e))?;
            if let Some(status) = info.status {
                if let Some(rest) = status.strip_prefix("Loaded image: ") {
                    reference = Some(rest.trim().to_string());
                }
                info!(%status, "docker load progress");
            }
        }

        reference.ok_or_else(|| CoreError::internal("docker load did not report a loaded image reference"))
    }

    async fn inspect_image_default_cmd(&self, reference: &str) -> Result<Vec<String>, CoreError> {
        let detail = self
            .docker
            .inspect_image(reference)
            .await
            .map_err(|e| CoreError::internal(format!("failed to inspect image {reference}")).with_source(e))?;

        Ok(detail.config.and_then(|c| c.cmd).unwrap_or_default())
    }

    async fn run_container(&self, spec: RunContainerSpec) -> Result<String, CoreError> {
        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let cmd = self.inspect_image_default_cmd(&spec.image_reference).await?;

        let config = Config {
            image: Some(spec.image_reference.clone()),
            env: Some(env),
            cmd: Some(cmd),
            host_config: Some(bollard::models::HostConfig {
                network_mode: Some("host".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions { name: spec.container_name.clone(), ..Default::default() }),
                config,
            )
            .await
            .map_err(|e| CoreError::internal("failed to create container").with_source(e))?;

        if let Err(start_err) = self.docker.start_container::<String>(&created.id, None).await {
            if let Err(cleanup_err) = self
                .docker
                .remove_container(&created.id, Some(RemoveContainerOptions { force: true, ..Default::default() }))
                .await
            {
                warn!(container_id = %created.id, error = %cleanup_err, "failed to remove partially-created container");
            }
            return Err(CoreError::internal("failed to start container").with_source(start_err));
        }

        Ok(created.id)
    }

    async fn stop_container(&self, container_id: &str) -> Result<(), CoreError> {
        self.docker
            .stop_container(container_id, Some(StopContainerOptions { t: 10 }))
            .await
            .map_err(|e| CoreError::internal("failed to stop container").with_source(e))
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), CoreError> {
        self.docker
            .remove_container(container_id, Some(RemoveContainerOptions { force: true, ..Default::default() }))
            .await
            .map_err(|e| CoreError::internal("failed to remove container").with_source(e))
    }

    async fn remove_image(&self, reference: &str) -> Result<(), CoreError> {
        self.docker
            .remove_image(reference, Some(RemoveImageOptions { force: true, ..Default::default() }), None)
            .await
            .map(|_| ())
            .map_err(|e| CoreError::internal("failed to remove image").with_source(e))
    }
}
