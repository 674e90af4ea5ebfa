// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent half of C7 Webhook Fabric (§4.7): dispatches a `PushData` arriving
//! for one module to every one of that module's own registered paths for
//! the matching event, with the same any-one-200-succeeds / zero-
//! subscribers-success delivery policy as the controller side.

use std::sync::Arc;

use base64::Engine;
use dmzero_core::{CoreError, ModuleId, WebhookEvent};
use dmzero_wire::rest::AgentWebhookPayload;
use tracing::{info, warn};

use crate::webhooks::AgentWebhookRegistry;

pub struct AgentWebhookDispatcher {
    webhooks: Arc<AgentWebhookRegistry>,
    client: reqwest::Client,
}

impl AgentWebhookDispatcher {
    pub fn new(webhooks: Arc<AgentWebhookRegistry>) -> Self {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap_or_default();
        Self { webhooks, client }
    }

    /// `target` is the exact module the data was addressed to when known
    /// (controller `SendData`); `None` broadcasts to every webhook
    /// subscribed to `event` regardless of owner, which is all a
    /// peer-to-peer share can address since its REST call carries no
    /// module id (§4.6 Share receiver, §6 `/endpoint/push`).
    /// `source_endpoint_id` is the peer/controller identity it arrived from.
    pub async fn dispatch(
        &self,
        target: Option<ModuleId>,
        event: WebhookEvent,
        source_endpoint_id: &str,
        data: Vec<u8>,
    ) -> Result<(), CoreError> {
        let subscribers = match target {
            Some(module_id) => self.webhooks.list_matching(module_id, event),
            None => self.webhooks.list_by_event(event),
        };
        if subscribers.is_empty() {
            info!(?target, ?event, "no module webhooks subscribed, skipping dispatch");
            return Ok(());
        }

        let payload = AgentWebhookPayload {
            source_endpoint_id: source_endpoint_id.to_string(),
            blob: base64::engine::general_purpose::STANDARD.encode(&data),
        };

        let results = futures_util::future::join_all(subscribers.iter().map(|webhook| {
            let client = self.client.clone();
            let url = format!("https://127.0.0.1:{}{}", webhook.port, webhook.url_path);
            let payload = payload.clone();
            async move {
                match client.post(&url).json(&payload).send().await {
                    Ok(resp) if resp.status().as_u16() == 200 => true,
                    Ok(resp) => {
                        warn!(%url, status = %resp.status(), "module webhook recipient did not return 200");
                        false
                    }
                    Err(error) => {
                        warn!(%url, %error, "module webhook POST failed");
                        false
                    }
                }
            }
        }))
        .await;

        if results.into_iter().any(|ok| ok) {
            Ok(())
        } else {
            Err(CoreError::unavailable("no module webhook recipient reached"))
        }
    }
}
