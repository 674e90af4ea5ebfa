// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `AgentApp`: the process-wide object driving one agent's boot sequence
//! (§4.6), with the same Setup → Run → Stop → Clean lifecycle as the
//! controller.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use dmzero_core::{generate_self_signed_cert, AuthStore, CoreError, ServingCert};
use dmzero_gateways::overlay::OverlayGateway;
use dmzero_gateways::runtime::RuntimeGateway;
use dmzero_wire::controller_rpc::{ImageInfo, ModuleInfo, ModuleStatus};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::AgentConfig;
use crate::controller_conn::ControllerConn;
use crate::images::LocalImageRegistry;
use crate::module_manager::ModuleManager;
use crate::rest;
use crate::rpc_server::AgentRpcServer;
use crate::state::AgentState;
use crate::webhook_dispatch::AgentWebhookDispatcher;
use crate::webhooks::AgentWebhookRegistry;

/// Grace period before a hard exit on shutdown (§5).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Delay between boot and the first configuration/image/module pull, giving
/// the overlay terminators time to register (§4.6 boot step 4).
const BOOT_PULL_DELAY: Duration = Duration::from_secs(2);
const PHONEHOME_INTERVAL: Duration = Duration::from_secs(10);
const PEER_PING_INTERVAL: Duration = Duration::from_secs(60);
/// Lowest port the module-API listener will ever bind (§4.6 boot step 1).
/// There is no upper bound, matching the original's unbounded
/// `FirstAvailablePort` scan — a busy low range simply costs a few extra
/// probes, never a hard failure.
const MODULE_API_PORT_MIN: u16 = 4499;

pub struct AgentAppConfig {
    pub config: AgentConfig,
    pub overlay: Arc<dyn OverlayGateway>,
    pub runtime: Arc<dyn RuntimeGateway>,
}

pub struct AgentApp {
    overlay: Arc<dyn OverlayGateway>,
    config: AgentConfig,
    state: Arc<AgentState>,
    module_api_port: u16,
    serving_cert: ServingCert,
    shutdown: CancellationToken,
}

impl AgentApp {
    /// Setup: boot step 1 (§4.6) — picks the module-API port and generates
    /// the serving cert — plus wiring every registry together. No network
    /// I/O beyond the synchronous bind probe happens here.
    pub fn setup(config: AgentAppConfig) -> Result<Self, CoreError> {
        if config.config.jwt.is_empty() {
            return Err(CoreError::invalid_argument("agent requires a non-empty enrollment JWT"));
        }

        let module_api_port = pick_module_api_port()?;
        let serving_cert = generate_self_signed_cert("127.0.0.1", 365)?;
        let api_base_url = format!("https://127.0.0.1:{module_api_port}/api/v1");
        let cert_base64 = serving_cert.cert_base64();

        let auth = Arc::new(AuthStore::new());
        let modules = Arc::new(ModuleManager::new(config.runtime.clone(), auth.clone()));
        let images = Arc::new(LocalImageRegistry::new());
        let webhooks = Arc::new(AgentWebhookRegistry::new());
        let webhook_dispatcher = Arc::new(AgentWebhookDispatcher::new(webhooks.clone()));
        let controller = Arc::new(ControllerConn::new(config.overlay.clone()));

        let state = Arc::new(AgentState::new(
            config.runtime,
            auth,
            modules,
            images,
            webhooks,
            webhook_dispatcher,
            controller,
            api_base_url,
            cert_base64,
        ));

        Ok(Self {
            overlay: config.overlay,
            config: config.config,
            state,
            module_api_port,
            serving_cert,
            shutdown: CancellationToken::new(),
        })
    }

    /// Run: boot steps 2-5 (§4.6) — enroll, start the three servers, pull
    /// state from the controller, then drive the periodic loops until
    /// `stop()` is called or the rpc servers exit.
    pub async fn run(&self) -> Result<(), CoreError> {
        let identity = self.overlay.enroll_from_token(&self.config.jwt, &self.config.key_alg).await?;
        self.overlay.authenticate(&identity).await?;
        info!(identity = %identity.identity_name, "agent enrolled onto overlay");

        let rpc_server = Arc::new(AgentRpcServer::new(self.overlay.clone(), self.state.clone()));
        let agent_service = tokio::spawn(rpc_server.clone().run_agent_service());
        let p2p_service = tokio::spawn(rpc_server.run_p2p_service());

        let http_handle = Handle::new();
        let http_task = tokio::spawn(self.serve_module_api(http_handle.clone()));

        tokio::time::sleep(BOOT_PULL_DELAY).await;
        if let Err(error) = self.pull_initial_state().await {
            error!(%error, "failed to pull initial state from controller");
        }

        let phonehome_task = tokio::spawn(phonehome_loop(self.state.clone(), self.shutdown.clone()));
        let ping_task = tokio::spawn(peer_ping_loop(self.overlay.clone(), self.shutdown.clone()));

        tokio::select! {
            result = agent_service => {
                if let Ok(Err(error)) = result {
                    error!(%error, "agent rpc service exited");
                }
            }
            result = p2p_service => {
                if let Ok(Err(error)) = result {
                    error!(%error, "p2p rpc service exited");
                }
            }
            _ = self.shutdown.cancelled() => {}
        }

        http_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        http_task.await.ok();
        phonehome_task.await.ok();
        ping_task.await.ok();
        Ok(())
    }

    async fn serve_module_api(&self, handle: Handle) -> Result<(), CoreError> {
        let tls = RustlsConfig::from_pem(self.serving_cert.cert_pem.clone().into_bytes(), self.serving_cert.key_pem.clone().into_bytes())
            .await
            .map_err(|e| CoreError::internal("failed to build TLS config for module API").with_source(e))?;
        let addr: SocketAddr = format!("0.0.0.0:{}", self.module_api_port)
            .parse()
            .map_err(|e| CoreError::internal("invalid module API bind address").with_source(e))?;
        let router = rest::router(self.state.clone(), self.overlay.clone()).layer(tower_http::trace::TraceLayer::new_for_http());
        info!(addr = %addr, "agent module API listening");
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(router.into_make_service())
            .await
            .map_err(|e| CoreError::unavailable("module API server exited").with_source(e))
    }

    /// Pull configuration, then images, then running modules, starting each
    /// through the module manager (§4.6 boot step 4).
    async fn pull_initial_state(&self) -> Result<(), CoreError> {
        let configuration = self.state.controller.configuration_request().await?;
        self.state.set_configuration(configuration);

        for pulled in self.state.controller.image_request().await? {
            match self.state.runtime.load_image(&pulled.blob).await {
                Ok(reference) => {
                    self.state.images.insert(pulled.info.id.parse().map_err(|_| CoreError::invalid_argument("malformed pulled image id"))?, pulled.info.name, reference, pulled.blob);
                }
                Err(error) => warn!(%error, image_id = %pulled.info.id, "failed to load pulled image"),
            }
        }

        for pulled in self.state.controller.module_request().await? {
            let Ok(image) = self.state.images.get(pulled.image_id) else {
                warn!(module_id = %pulled.module_id, image_id = %pulled.image_id, "pulled module references an image never received, skipping");
                continue;
            };
            let agent_config = self.state.configuration();
            if let Err(error) = self
                .state
                .modules
                .start(pulled.module_id, image.reference.clone(), pulled.env, agent_config, &self.state.api_base_url, &self.state.cert_base64)
                .await
            {
                warn!(%error, module_id = %pulled.module_id, "failed to start pulled module");
            }
        }
        Ok(())
    }

    /// Stop: signal the rpc servers and periodic loops to exit, with a hard
    /// deadline (§5) so a wedged listener cannot block process exit.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        info!("shutdown grace period elapsed, proceeding with process exit");
    }

    /// Clean: no persistent storage (§1 Non-goal), so this is a no-op
    /// beyond dropping state with the app object itself.
    pub fn clean(self) {}
}

fn pick_module_api_port() -> Result<u16, CoreError> {
    for candidate in MODULE_API_PORT_MIN..=u16::MAX {
        if std::net::TcpListener::bind(("0.0.0.0", candidate)).is_ok() {
            return Ok(candidate);
        }
    }
    Err(CoreError::unavailable(format!("no module API port available at or above {MODULE_API_PORT_MIN}")))
}

async fn phonehome_loop(state: Arc<AgentState>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(PHONEHOME_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let images: BTreeMap<String, ImageInfo> = state
                    .images
                    .list()
                    .into_iter()
                    .map(|i| (i.id.to_string(), ImageInfo { id: i.id.to_string(), name: i.name.clone(), size: i.size }))
                    .collect();
                let modules: BTreeMap<String, ModuleInfo> = state
                    .modules
                    .list()
                    .into_iter()
                    .map(|m| (m.id.to_string(), ModuleInfo { id: m.id.to_string(), status: ModuleStatus::Unknown }))
                    .collect();
                if let Err(error) = state.controller.phonehome(images, modules).await {
                    warn!(%error, "phonehome failed, will retry next tick");
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

async fn peer_ping_loop(overlay: Arc<dyn OverlayGateway>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(PEER_PING_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => crate::peer_ping::ping_all_peers(&overlay).await,
            _ = shutdown.cancelled() => break,
        }
    }
}
