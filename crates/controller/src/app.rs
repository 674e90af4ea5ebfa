// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `ControllerApp`: the process-wide object that owns every registry and
//! server, with an explicit Setup → Run → Stop → Clean lifecycle (§9
//! Design Note — global state is acceptable only inside an application
//! object, never as free-floating statics).

use std::sync::Arc;
use std::time::Duration;

use dmzero_core::{Clock, CoreError, SystemClock};
use dmzero_gateways::overlay::OverlayGateway;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ControllerConfig;
use crate::enrollment::EnrollmentCoordinator;
use crate::propagation::PropagationEngine;
use crate::registry::{AgentRegistry, ImageRegistry, ModuleRegistry, WebhookRegistry};
use crate::rest::{self, ControllerRestState};
use crate::rpc_listener::ControllerRpcListener;
use crate::webhook_dispatch::ControllerWebhookDispatcher;

/// Grace period before a hard exit on shutdown (§5).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Controller-side TCP bind addresses (§6 "Process inputs").
const REST_BIND_ADDR: &str = "0.0.0.0:6969";
const METRICS_BIND_ADDR: &str = "0.0.0.0:9090";

pub struct ControllerAppConfig {
    pub process: ControllerConfig,
    pub overlay: Arc<dyn OverlayGateway>,
}

pub struct ControllerApp {
    overlay: Arc<dyn OverlayGateway>,
    agents: Arc<AgentRegistry>,
    enrollment: Arc<EnrollmentCoordinator>,
    propagation: Arc<PropagationEngine>,
    images: Arc<ImageRegistry>,
    modules: Arc<ModuleRegistry>,
    webhooks: Arc<WebhookRegistry>,
    process: ControllerConfig,
    shutdown: CancellationToken,
}

impl ControllerApp {
    /// Setup: wires every registry and component together. No I/O happens
    /// here beyond what constructing the overlay gateway handle requires.
    pub fn setup(config: ControllerAppConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let agents = Arc::new(AgentRegistry::new());
        let images = Arc::new(ImageRegistry::new());
        let modules = Arc::new(ModuleRegistry::new());
        let webhooks = Arc::new(WebhookRegistry::new());

        let enrollment = Arc::new(EnrollmentCoordinator::new(config.overlay.clone(), agents.clone(), clock));
        let webhook_dispatcher = Arc::new(ControllerWebhookDispatcher::new(webhooks.clone()));
        let propagation = Arc::new(PropagationEngine::new(agents.clone(), images.clone(), modules.clone(), webhook_dispatcher));

        Self {
            overlay: config.overlay,
            agents,
            enrollment,
            propagation,
            images,
            modules,
            webhooks,
            process: config.process,
            shutdown: CancellationToken::new(),
        }
    }

    /// Run: binds the overlay RPC listener, the REST API, and the metrics
    /// endpoint, and drives them until `stop()` is called or one exits.
    pub async fn run(&self) -> Result<(), CoreError> {
        let rpc_listener = Arc::new(ControllerRpcListener::new(
            self.overlay.clone(),
            self.agents.clone(),
            self.enrollment.clone(),
            self.propagation.clone(),
        ));
        let rpc_task = tokio::spawn(rpc_listener.run());

        let rest_state = Arc::new(ControllerRestState {
            credentials: self.process.credentials.clone(),
            enrollment: self.enrollment.clone(),
            propagation: self.propagation.clone(),
            images: self.images.clone(),
            modules: self.modules.clone(),
            webhooks: self.webhooks.clone(),
        });
        let rest_router = rest::router(rest_state).layer(tower_http::trace::TraceLayer::new_for_http());
        let rest_listener = TcpListener::bind(REST_BIND_ADDR)
            .await
            .map_err(|e| CoreError::unavailable("failed to bind controller REST API").with_source(e))?;
        info!(addr = REST_BIND_ADDR, "controller REST API listening");
        let rest_shutdown = self.shutdown.clone();
        let rest_task = tokio::spawn(async move {
            axum::serve(rest_listener, rest_router)
                .with_graceful_shutdown(async move { rest_shutdown.cancelled().await })
                .await
        });

        let metrics_router = crate::metrics::router(self.agents.clone(), self.images.clone(), self.modules.clone(), self.webhooks.clone());
        let metrics_listener = TcpListener::bind(METRICS_BIND_ADDR)
            .await
            .map_err(|e| CoreError::unavailable("failed to bind metrics endpoint").with_source(e))?;
        info!(addr = METRICS_BIND_ADDR, "metrics endpoint listening");
        let metrics_shutdown = self.shutdown.clone();
        let metrics_task = tokio::spawn(async move {
            axum::serve(metrics_listener, metrics_router)
                .with_graceful_shutdown(async move { metrics_shutdown.cancelled().await })
                .await
        });

        tokio::select! {
            result = rpc_task => {
                if let Ok(Err(error)) = result {
                    error!(%error, "controller rpc listener exited");
                }
            }
            _ = self.shutdown.cancelled() => {}
        }

        rest_task.await.ok();
        metrics_task.await.ok();
        Ok(())
    }

    /// Stop: signals every server to begin graceful shutdown, with a hard
    /// deadline (§5) so a wedged listener cannot block process exit.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        info!("shutdown grace period elapsed, proceeding with process exit");
    }

    /// Clean: releases in-memory state. With no persistent storage (§1
    /// Non-goal), this is a no-op beyond dropping the registries with the
    /// app object itself.
    pub fn clean(self) {}
}
