// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal Prometheus-exposition `/metrics` endpoint. Metrics content
//! itself is out of scope (§1); this exists only so the ambient
//! observability surface the controller binds alongside its REST API is
//! present, per the teacher's own metrics endpoint.

use axum::routing::get;
use axum::Router;
use std::sync::Arc;

use crate::registry::{AgentRegistry, ImageRegistry, ModuleRegistry, WebhookRegistry};

#[derive(Clone)]
struct MetricsState {
    agents: Arc<AgentRegistry>,
    images: Arc<ImageRegistry>,
    modules: Arc<ModuleRegistry>,
    webhooks: Arc<WebhookRegistry>,
}

pub fn router(agents: Arc<AgentRegistry>, images: Arc<ImageRegistry>, modules: Arc<ModuleRegistry>, webhooks: Arc<WebhookRegistry>) -> Router {
    let state = MetricsState { agents, images, modules, webhooks };
    Router::new().route("/metrics", get(move || render(state.clone())))
}

async fn render(state: MetricsState) -> String {
    let agents = state.agents.list();
    let agents_total = agents.len();
    let agents_online = agents.iter().filter(|a| a.is_online(&dmzero_core::SystemClock)).count();
    let modules_total = state.modules.list().len();
    let images_total = state.images.list().len();
    let webhooks_total = state.webhooks.list().len();

    format!(
        "# HELP dmzero_agents_total Agents currently catalogued.\n\
         # TYPE dmzero_agents_total gauge\n\
         dmzero_agents_total {agents_total}\n\
         # HELP dmzero_agents_online Agents with a fresh phonehome.\n\
         # TYPE dmzero_agents_online gauge\n\
         dmzero_agents_online {agents_online}\n\
         # HELP dmzero_modules_total Modules currently catalogued.\n\
         # TYPE dmzero_modules_total gauge\n\
         dmzero_modules_total {modules_total}\n\
         # HELP dmzero_images_total Images currently catalogued.\n\
         # TYPE dmzero_images_total gauge\n\
         dmzero_images_total {images_total}\n\
         # HELP dmzero_webhooks_total Controller webhook subscriptions currently registered.\n\
         # TYPE dmzero_webhooks_total gauge\n\
         dmzero_webhooks_total {webhooks_total}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn render_counts_every_catalog() {
        let agents = Arc::new(AgentRegistry::new());
        agents.create("edge-1");
        let images = Arc::new(ImageRegistry::new());
        let record = images.create("worker:latest", vec![1, 2, 3]);
        let modules = Arc::new(ModuleRegistry::new());
        let module = modules.create("worker-1", record.meta.id);
        let webhooks = Arc::new(WebhookRegistry::new());
        webhooks.register(module.id(), "/hooks/built");

        let body = render(MetricsState { agents, images, modules, webhooks }).await;
        assert!(body.contains("dmzero_agents_total 1"));
        assert!(body.contains("dmzero_agents_online 0"));
        assert!(body.contains("dmzero_images_total 1"));
        assert!(body.contains("dmzero_modules_total 1"));
        assert!(body.contains("dmzero_webhooks_total 1"));
    }
}
