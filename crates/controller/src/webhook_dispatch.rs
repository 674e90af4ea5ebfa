// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Controller half of C7 Webhook Fabric (§4.7): fans a module's pushed
//! payload out to every external URL subscribed to that module, succeeding
//! if at least one recipient answers 200.

use base64::Engine;
use dmzero_core::{CoreError, ModuleId};
use dmzero_wire::rest::ControllerWebhookPayload;
use std::sync::Arc;
use tracing::{info, warn};

use crate::registry::WebhookRegistry;

pub struct ControllerWebhookDispatcher {
    webhooks: Arc<WebhookRegistry>,
    client: reqwest::Client,
}

impl ControllerWebhookDispatcher {
    pub fn new(webhooks: Arc<WebhookRegistry>) -> Self {
        Self { webhooks, client: reqwest::Client::new() }
    }

    /// `sender_module_id` is whose webhooks are matched; `receiver` is
    /// passed through into the payload unchanged (§4.5 Receive Service).
    pub async fn dispatch(&self, sender_module_id: ModuleId, receiver: String, data: Vec<u8>) -> Result<(), CoreError> {
        let subscribers = self.webhooks.list_for_module(sender_module_id);
        if subscribers.is_empty() {
            info!(module_id = %sender_module_id, "no controller webhooks subscribed, skipping dispatch");
            return Ok(());
        }

        let payload = ControllerWebhookPayload {
            module_id: sender_module_id.to_string(),
            blob: base64::engine::general_purpose::STANDARD.encode(&data),
            receiver,
        };

        let results = futures_util::future::join_all(subscribers.iter().map(|webhook| {
            let client = self.client.clone();
            let url = webhook.url.clone();
            let payload = payload.clone();
            async move {
                match client.post(&url).json(&payload).send().await {
                    Ok(resp) if resp.status().as_u16() == 200 => true,
                    Ok(resp) => {
                        warn!(%url, status = %resp.status(), "webhook recipient did not return 200");
                        false
                    }
                    Err(error) => {
                        warn!(%url, %error, "webhook POST failed");
                        false
                    }
                }
            }
        }))
        .await;

        if results.into_iter().any(|ok| ok) {
            Ok(())
        } else {
            Err(CoreError::unavailable(format!("no controller webhook recipient for module {sender_module_id} reached")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_subscribers_is_a_successful_noop() {
        let webhooks = Arc::new(WebhookRegistry::new());
        let dispatcher = ControllerWebhookDispatcher::new(webhooks);
        dispatcher.dispatch(ModuleId::new(), "controller".to_string(), vec![1]).await.unwrap();
    }

    #[tokio::test]
    async fn fails_when_no_subscriber_is_reachable() {
        let webhooks = Arc::new(WebhookRegistry::new());
        let module_id = ModuleId::new();
        webhooks.register(module_id, "http://127.0.0.1:1/unreachable");
        let dispatcher = ControllerWebhookDispatcher::new(webhooks);
        let err = dispatcher.dispatch(module_id, "controller".to_string(), vec![1]).await.unwrap_err();
        assert_eq!(err.kind, dmzero_core::ErrorKind::Unavailable);
    }
}
