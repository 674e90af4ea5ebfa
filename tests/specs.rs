// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-crate scenario coverage: wires real controller and agent
//! components together over the reference overlay (§4-§6) rather than
//! exercising any one registry in isolation, the way the in-crate unit
//! tests already do.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dmzero_agent::controller_conn::ControllerConn;
use dmzero_agent::module_manager::ModuleManager;
use dmzero_agent::rpc_server::AgentRpcServer;
use dmzero_agent::state::AgentState;
use dmzero_agent::webhook_dispatch::AgentWebhookDispatcher;
use dmzero_agent::webhooks::AgentWebhookRegistry;
use dmzero_agent::images::LocalImageRegistry;

use dmzero_controller::agent_conn::AgentConn;
use dmzero_controller::enrollment::EnrollmentCoordinator;
use dmzero_controller::propagation::PropagationEngine;
use dmzero_controller::registry::{AgentRegistry, ImageRegistry, ModuleRegistry, WebhookRegistry};
use dmzero_controller::rpc_listener::ControllerRpcListener;
use dmzero_controller::webhook_dispatch::ControllerWebhookDispatcher;

use dmzero_core::{AuthStore, Clock, ErrorKind, FakeClock, WebhookEvent, DIAGNOSTICS_FRESHNESS};
use dmzero_gateways::overlay::{OverlayDirectory, OverlayGateway, TcpOverlayGateway};
use dmzero_gateways::runtime::{FakeRuntimeGateway, RuntimeGateway};

/// Everything the controller side needs, wired the way `ControllerApp::setup`
/// wires it, minus the REST/metrics HTTP servers this suite never drives.
struct Controller {
    overlay: Arc<dyn OverlayGateway>,
    agents: Arc<AgentRegistry>,
    images: Arc<ImageRegistry>,
    modules: Arc<ModuleRegistry>,
    webhooks: Arc<WebhookRegistry>,
    enrollment: Arc<EnrollmentCoordinator>,
    propagation: Arc<PropagationEngine>,
    clock: Arc<FakeClock>,
}

fn controller(directory: Arc<OverlayDirectory>) -> Controller {
    let overlay: Arc<dyn OverlayGateway> = Arc::new(TcpOverlayGateway::new(directory, "127.0.0.1"));
    let agents = Arc::new(AgentRegistry::new());
    let images = Arc::new(ImageRegistry::new());
    let modules = Arc::new(ModuleRegistry::new());
    let webhooks = Arc::new(WebhookRegistry::new());
    let clock = Arc::new(FakeClock::new());

    let enrollment = Arc::new(EnrollmentCoordinator::new(overlay.clone(), agents.clone(), clock.clone() as Arc<dyn Clock>));
    let webhook_dispatcher = Arc::new(ControllerWebhookDispatcher::new(webhooks.clone()));
    let propagation = Arc::new(PropagationEngine::new(agents.clone(), images.clone(), modules.clone(), webhook_dispatcher));

    Controller { overlay, agents, images, modules, webhooks, enrollment, propagation, clock }
}

/// Spawns the controller's overlay RPC listener and gives it a moment to
/// bind before the caller starts dialing it.
async fn serve_controller(ctrl: &Controller) {
    let listener = Arc::new(ControllerRpcListener::new(
        ctrl.overlay.clone(),
        ctrl.agents.clone(),
        ctrl.enrollment.clone(),
        ctrl.propagation.clone(),
    ));
    tokio::spawn(listener.run());
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// One enrolled-and-listening agent process, backed by a fake runtime so
/// no container engine is required to exercise the module lifecycle.
struct Agent {
    overlay: Arc<dyn OverlayGateway>,
    state: Arc<AgentState>,
    runtime: Arc<FakeRuntimeGateway>,
}

fn agent_state(overlay: Arc<dyn OverlayGateway>) -> (Arc<AgentState>, Arc<FakeRuntimeGateway>) {
    let runtime = Arc::new(FakeRuntimeGateway::new());
    let runtime_gw: Arc<dyn RuntimeGateway> = runtime.clone();
    let auth = Arc::new(AuthStore::new());
    let modules = Arc::new(ModuleManager::new(runtime_gw.clone(), auth.clone()));
    let images = Arc::new(LocalImageRegistry::new());
    let webhooks = Arc::new(AgentWebhookRegistry::new());
    let webhook_dispatcher = Arc::new(AgentWebhookDispatcher::new(webhooks.clone()));
    let controller_conn = Arc::new(ControllerConn::new(overlay.clone()));
    let state = Arc::new(AgentState::new(
        runtime_gw,
        auth,
        modules,
        images,
        webhooks,
        webhook_dispatcher,
        controller_conn,
        "https://127.0.0.1:4499/api/v1".to_string(),
        "Y2VydA==".to_string(),
    ));
    (state, runtime)
}

/// Enrolls a fresh agent onto `ctrl`, serves its RPC surfaces, and phones
/// home once so the controller's connection handle to it is established
/// (§4.5 "an agent is only reachable after it has phoned home at least
/// once").
async fn join_agent(ctrl: &Controller, directory: Arc<OverlayDirectory>, name: &str) -> Agent {
    let entry = ctrl.enrollment.create_agent(name);
    let jwt = ctrl.enrollment.create_enrollment(entry.id()).await.unwrap();

    let overlay: Arc<dyn OverlayGateway> = Arc::new(TcpOverlayGateway::new(directory, "127.0.0.1"));
    let identity = overlay.enroll_from_token(&jwt, "ECDSA").await.unwrap();
    overlay.authenticate(&identity).await.unwrap();

    let (state, runtime) = agent_state(overlay.clone());
    let rpc_server = Arc::new(AgentRpcServer::new(overlay.clone(), state.clone()));
    tokio::spawn(rpc_server.clone().run_agent_service());
    tokio::spawn(rpc_server.run_p2p_service());
    tokio::time::sleep(Duration::from_millis(20)).await;

    state.controller.phonehome(BTreeMap::new(), BTreeMap::new()).await.unwrap();
    let view = ctrl.enrollment.view(entry.id()).await.unwrap();
    assert!(view.is_online);
    assert!(view.is_enrolled);

    Agent { overlay, state, runtime }
}

// ---- Scenario 1 + property 8: happy-path module lifecycle, image bytes
// round-trip exactly through the chunked stream even when the final chunk
// is smaller than a full frame. ----
#[tokio::test]
async fn happy_path_module_lifecycle_round_trips_image_bytes_and_starts_the_container() {
    let directory = OverlayDirectory::new();
    let ctrl = controller(directory.clone());
    serve_controller(&ctrl).await;

    let blob: Vec<u8> = (0..(1024 * 3 + 17)).map(|i| (i % 251) as u8).collect();
    let record = ctrl.propagation.upload_image("worker:latest", blob.clone()).await;
    let module = ctrl.modules.create("worker-1", record.meta.id);

    let agent = join_agent(&ctrl, directory, "edge-1").await;

    for pulled in agent.state.controller.image_request().await.unwrap() {
        assert_eq!(pulled.blob, blob);
        let reference = agent.state.runtime.load_image(&pulled.blob).await.unwrap();
        agent.state.images.insert(pulled.info.id.parse().unwrap(), pulled.info.name, reference, pulled.blob);
    }
    assert!(agent.state.images.contains(record.meta.id));

    ctrl.propagation.start_module(module.id()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(module.snapshot().is_running);
    assert_eq!(agent.runtime.containers().len(), 1);

    ctrl.propagation.stop_module(module.id()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!module.snapshot().is_running);
}

// ---- Scenario 2: an agent that joins after configuration, an image, and a
// running module already exist pulls all three during boot. ----
#[tokio::test]
async fn late_joining_agent_pulls_configuration_images_and_running_modules() {
    let directory = OverlayDirectory::new();
    let ctrl = controller(directory.clone());
    serve_controller(&ctrl).await;

    let record = ctrl.propagation.upload_image("worker:latest", vec![7; 42]).await;
    let module = ctrl.modules.create("worker-1", record.meta.id);
    ctrl.propagation.start_module(module.id()).await.unwrap();

    let entry = ctrl.enrollment.create_agent("edge-late");
    let mut configuration = BTreeMap::new();
    configuration.insert("REGION".to_string(), "eu-west".to_string());
    entry.set_configuration(configuration.clone());

    let jwt = ctrl.enrollment.create_enrollment(entry.id()).await.unwrap();
    let overlay: Arc<dyn OverlayGateway> = Arc::new(TcpOverlayGateway::new(directory, "127.0.0.1"));
    let identity = overlay.enroll_from_token(&jwt, "ECDSA").await.unwrap();
    overlay.authenticate(&identity).await.unwrap();
    let (state, _runtime) = agent_state(overlay.clone());

    assert_eq!(state.controller.configuration_request().await.unwrap(), configuration);

    let pulled_images = state.controller.image_request().await.unwrap();
    assert_eq!(pulled_images.len(), 1);
    assert_eq!(pulled_images[0].blob, vec![7; 42]);

    let pulled_modules = state.controller.module_request().await.unwrap();
    assert_eq!(pulled_modules.len(), 1);
    assert_eq!(pulled_modules[0].module_id, module.id());
    assert_eq!(pulled_modules[0].image_id, record.meta.id);
}

// ---- Scenario 3 + property 5 (N=0 and N>=1-all-unreachable cases): a
// module-to-module share over the p2p surface, dispatched through the real
// overlay wire protocol rather than calling the dispatcher directly. ----
#[tokio::test]
async fn peer_to_peer_share_acks_with_no_subscribers_and_errors_when_unreachable() {
    let directory = OverlayDirectory::new();
    let sender_overlay: Arc<dyn OverlayGateway> = Arc::new(TcpOverlayGateway::new(directory.clone(), "127.0.0.1"));
    let receiver_overlay: Arc<dyn OverlayGateway> = Arc::new(TcpOverlayGateway::new(directory, "127.0.0.1"));

    // Both sides just need a bound identity on the shared directory; no
    // controller is involved in a pure peer-to-peer share.
    sender_overlay.enroll_from_token(&issue_standalone_token(&sender_overlay, "sender").await, "ECDSA").await.unwrap();
    let receiver_token = issue_standalone_token(&receiver_overlay, "receiver").await;
    let receiver_identity = receiver_overlay.enroll_from_token(&receiver_token, "ECDSA").await.unwrap();

    let (receiver_state, _runtime) = agent_state(receiver_overlay.clone());
    let receiver_rpc = Arc::new(AgentRpcServer::new(receiver_overlay.clone(), receiver_state.clone()));
    tokio::spawn(receiver_rpc.run_p2p_service());
    tokio::time::sleep(Duration::from_millis(20)).await;

    let module_id = dmzero_core::ModuleId::new();

    // Zero subscribers: the share still succeeds.
    let mut conn = sender_overlay.dial(dmzero_core::SERVICE_P2P, Some(&receiver_identity.identity_name)).await.unwrap();
    dmzero_wire::write_message(&mut conn.stream, &dmzero_wire::agent_rpc::AgentCall::SharePushData {
        receiver_module_id: module_id.to_string(),
        data: vec![9, 9, 9],
    })
    .await
    .unwrap();
    let reply: dmzero_wire::agent_rpc::AgentReply = dmzero_wire::read_message(&mut conn.stream).await.unwrap();
    assert!(matches!(reply, dmzero_wire::agent_rpc::AgentReply::Ack));

    // A subscriber registered against an unreachable port: the share is
    // rejected with the dispatcher's failure surfaced back to the sender.
    receiver_state.webhooks.register(module_id, "/hooks/peer", 1, WebhookEvent::EndpointData);
    let mut conn = sender_overlay.dial(dmzero_core::SERVICE_P2P, Some(&receiver_identity.identity_name)).await.unwrap();
    dmzero_wire::write_message(&mut conn.stream, &dmzero_wire::agent_rpc::AgentCall::SharePushData {
        receiver_module_id: module_id.to_string(),
        data: vec![9, 9, 9],
    })
    .await
    .unwrap();
    let reply: dmzero_wire::agent_rpc::AgentReply = dmzero_wire::read_message(&mut conn.stream).await.unwrap();
    assert!(matches!(reply, dmzero_wire::agent_rpc::AgentReply::Error { .. }));
}

async fn issue_standalone_token(overlay: &Arc<dyn OverlayGateway>, name: &str) -> String {
    let identity_id = overlay.create_identity(name, false, &[]).await.unwrap();
    let enrollment_id = overlay.create_enrollment(&identity_id, std::time::SystemTime::now() + Duration::from_secs(60)).await.unwrap();
    overlay.get_enrollment_token(&enrollment_id).await.unwrap().jwt
}

// ---- Scenario 4 + property 5: the controller->module path (`SendData`),
// driven over the real agent-service surface. ----
#[tokio::test]
async fn controller_send_data_reaches_the_module_and_failed_dispatch_is_visible_to_the_caller() {
    let directory = OverlayDirectory::new();
    let ctrl = controller(directory.clone());
    serve_controller(&ctrl).await;

    let record = ctrl.propagation.upload_image("worker:latest", vec![1]).await;
    let module = ctrl.modules.create("worker-1", record.meta.id);

    let agent = join_agent(&ctrl, directory, "edge-1").await;
    for pulled in agent.state.controller.image_request().await.unwrap() {
        let reference = agent.state.runtime.load_image(&pulled.blob).await.unwrap();
        agent.state.images.insert(pulled.info.id.parse().unwrap(), pulled.info.name, reference, pulled.blob);
    }
    ctrl.propagation.start_module(module.id()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let entry = ctrl.agents.get_by_identity_id(&agent.overlay.get_current_identity()).unwrap();
    let conn = Arc::new(AgentConn::new(ctrl.overlay.clone(), entry.identity_id().unwrap()));

    // No CONTROLLER_DATA webhook registered on the agent yet: a zero
    // subscriber dispatch is still a success.
    conn.push_data(&module.id().to_string(), vec![1, 2, 3]).await.unwrap();

    // Once one is registered against an unreachable port, the failure
    // propagates all the way back through `AgentConn::push_data`.
    agent.state.webhooks.register(module.id(), "/hooks/controller", 1, WebhookEvent::ControllerData);
    let err = conn.push_data(&module.id().to_string(), vec![1, 2, 3]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Internal);
}

// ---- Scenario 5: delete-while-referenced for both images and modules. ----
#[tokio::test]
async fn delete_guards_reject_a_referenced_image_and_a_running_module() {
    let directory = OverlayDirectory::new();
    let ctrl = controller(directory);

    let record = ctrl.propagation.upload_image("worker:latest", vec![1]).await;
    let module = ctrl.modules.create("worker-1", record.meta.id);

    let err = ctrl.propagation.delete_image(record.meta.id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotAllowed);

    ctrl.propagation.start_module(module.id()).await.unwrap();
    assert!(!module_delete_allowed(&ctrl.modules, module.id()));

    ctrl.propagation.stop_module(module.id()).await.unwrap();
    assert!(module_delete_allowed(&ctrl.modules, module.id()));
    ctrl.modules.remove(module.id()).unwrap();

    ctrl.propagation.delete_image(record.meta.id).await.unwrap();
    assert!(ctrl.images.get(record.meta.id).is_err());
}

/// Mirrors the REST layer's own `DeleteModule` guard (§4.3): not allowed
/// while `isRunning`.
fn module_delete_allowed(modules: &ModuleRegistry, id: dmzero_core::ModuleId) -> bool {
    !modules.get(id).unwrap().snapshot().is_running
}

// ---- Scenario 6 + property 1: diagnostics freshness with explicit
// t0 / t0+10s / t0+16s timing, driven through a real phonehome RPC. ----
#[tokio::test]
async fn agent_goes_offline_exactly_when_its_phonehome_goes_stale() {
    let directory = OverlayDirectory::new();
    let ctrl = controller(directory.clone());
    serve_controller(&ctrl).await;

    let agent = join_agent(&ctrl, directory, "edge-1").await;
    let entry = ctrl.agents.get_by_identity_id(&agent.overlay.get_current_identity()).unwrap();
    assert!(ctrl.enrollment.view(entry.id()).await.unwrap().is_online);

    ctrl.clock.advance(Duration::from_secs(10));
    agent.state.controller.phonehome(BTreeMap::new(), BTreeMap::new()).await.unwrap();
    assert!(ctrl.enrollment.view(entry.id()).await.unwrap().is_online);

    ctrl.clock.advance(DIAGNOSTICS_FRESHNESS + Duration::from_secs(1));
    assert!(!ctrl.enrollment.view(entry.id()).await.unwrap().is_online);
}

// ---- Property 7: module-local ports are unique across concurrently
// started modules on the same agent. ----
#[tokio::test]
async fn module_local_ports_stay_unique_under_concurrent_starts() {
    let runtime: Arc<dyn RuntimeGateway> = Arc::new(FakeRuntimeGateway::new());
    let auth = Arc::new(AuthStore::new());
    let manager = Arc::new(ModuleManager::new(runtime, auth));

    let module_ids: Vec<_> = (0..8).map(|_| dmzero_core::ModuleId::new()).collect();
    let starts = module_ids.iter().copied().map(|module_id| {
        let manager = manager.clone();
        async move {
            manager
                .start(module_id, "worker:latest".to_string(), BTreeMap::new(), BTreeMap::new(), "https://127.0.0.1:4499/api/v1", "Y2VydA==")
                .await
                .unwrap();
        }
    });
    futures_util::future::join_all(starts).await;

    let ports: Vec<u16> = module_ids.iter().map(|id| manager.get(*id).unwrap().local_port).collect();
    let mut unique = ports.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), ports.len(), "expected every concurrently started module to get a distinct port");
    for port in ports {
        assert!((dmzero_core::MODULE_PORT_RANGE_MIN..=dmzero_core::MODULE_PORT_RANGE_MAX).contains(&port));
    }
}

// ---- Property: identityID absent <=> not enrolled and no live connection. ----
#[tokio::test]
async fn agent_without_a_bound_identity_is_neither_enrolled_nor_connectable() {
    let directory = OverlayDirectory::new();
    let ctrl = controller(directory);
    let entry = ctrl.enrollment.create_agent("edge-1");
    assert!(!ctrl.enrollment.view(entry.id()).await.unwrap().is_enrolled);

    let err = ctrl.propagation.note_phonehome_connection(entry.id(), &ctrl.overlay).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Internal);
}
