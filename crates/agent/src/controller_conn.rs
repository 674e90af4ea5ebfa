// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent's outbound connection to the controller's `service-controller`
//! listener: phonehome, the Setup Service pull calls, and the Receive
//! Service push used to relay a module's data up to the controller (§4.5,
//! §4.6, §6).

use std::collections::BTreeMap;
use std::sync::Arc;

use dmzero_core::{CoreError, ImageId, ModuleId, SERVICE_CONTROLLER};
use dmzero_gateways::overlay::OverlayGateway;
use dmzero_wire::controller_rpc::{ControllerCall, ControllerReply, ImageInfo, ModuleInfo};
use dmzero_wire::{read_message, write_message};

/// One pulled image: metadata plus its full blob, reassembled from the
/// chunked stream frames (§6 "Image stream framing").
pub struct PulledImage {
    pub info: ImageInfo,
    pub blob: Vec<u8>,
}

pub struct PulledModule {
    pub module_id: ModuleId,
    pub image_id: ImageId,
    pub env: BTreeMap<String, String>,
}

pub struct ControllerConn {
    overlay: Arc<dyn OverlayGateway>,
}

impl ControllerConn {
    pub fn new(overlay: Arc<dyn OverlayGateway>) -> Self {
        Self { overlay }
    }

    async fn dial(&self) -> Result<dmzero_gateways::overlay::OverlayConn, CoreError> {
        self.overlay.dial(SERVICE_CONTROLLER, None).await
    }

    pub async fn phonehome(
        &self,
        images: BTreeMap<String, ImageInfo>,
        modules: BTreeMap<String, ModuleInfo>,
    ) -> Result<(), CoreError> {
        let mut conn = self.dial().await?;
        write_message(&mut conn.stream, &ControllerCall::Phonehome { images, modules })
            .await
            .map_err(|e| CoreError::unavailable("failed to write phonehome call").with_source(e))?;
        let reply: ControllerReply = read_message(&mut conn.stream)
            .await
            .map_err(|e| CoreError::unavailable("failed to read phonehome reply").with_source(e))?;
        as_ack(reply)
    }

    pub async fn configuration_request(&self) -> Result<BTreeMap<String, String>, CoreError> {
        let mut conn = self.dial().await?;
        write_message(&mut conn.stream, &ControllerCall::ConfigurationRequest)
            .await
            .map_err(|e| CoreError::unavailable("failed to write configuration request").with_source(e))?;
        let reply: ControllerReply = read_message(&mut conn.stream)
            .await
            .map_err(|e| CoreError::unavailable("failed to read configuration reply").with_source(e))?;
        match reply {
            ControllerReply::Configuration { configuration } => Ok(configuration),
            ControllerReply::Error { kind, message } => Err(CoreError::internal(format!("{kind}: {message}"))),
            other => Err(unexpected_reply(other)),
        }
    }

    /// Pulls every catalogued image, reassembling each from its chunk
    /// stream (§6 framing: same `id` shares an image, `StreamEnd` closes
    /// the last one).
    pub async fn image_request(&self) -> Result<Vec<PulledImage>, CoreError> {
        let mut conn = self.dial().await?;
        write_message(&mut conn.stream, &ControllerCall::ImageRequest)
            .await
            .map_err(|e| CoreError::unavailable("failed to write image request").with_source(e))?;

        let mut images = Vec::new();
        let mut current: Option<PulledImage> = None;
        loop {
            let frame: ControllerReply = read_message(&mut conn.stream)
                .await
                .map_err(|e| CoreError::unavailable("failed to read image stream frame").with_source(e))?;
            match frame {
                ControllerReply::ImageChunk { id, name, content } => {
                    match current.as_mut() {
                        Some(image) if image.info.id == id => image.blob.extend(content),
                        _ => {
                            if let Some(done) = current.take() {
                                images.push(done);
                            }
                            current = Some(PulledImage { info: ImageInfo { id, name, size: content.len() }, blob: content });
                        }
                    }
                }
                ControllerReply::StreamEnd => {
                    if let Some(done) = current.take() {
                        images.push(done);
                    }
                    break;
                }
                ControllerReply::Error { kind, message } => return Err(CoreError::internal(format!("{kind}: {message}"))),
                other => return Err(unexpected_reply(other)),
            }
        }
        for image in &mut images {
            image.info.size = image.blob.len();
        }
        Ok(images)
    }

    pub async fn module_request(&self) -> Result<Vec<PulledModule>, CoreError> {
        let mut conn = self.dial().await?;
        write_message(&mut conn.stream, &ControllerCall::ModuleRequest)
            .await
            .map_err(|e| CoreError::unavailable("failed to write module request").with_source(e))?;

        let mut modules = Vec::new();
        loop {
            let frame: ControllerReply = read_message(&mut conn.stream)
                .await
                .map_err(|e| CoreError::unavailable("failed to read module stream frame").with_source(e))?;
            match frame {
                ControllerReply::ModuleChunk { module_id, image_id, env } => {
                    let module_id: ModuleId =
                        module_id.parse().map_err(|_| CoreError::invalid_argument("malformed module id in module stream"))?;
                    let image_id: ImageId =
                        image_id.parse().map_err(|_| CoreError::invalid_argument("malformed image id in module stream"))?;
                    modules.push(PulledModule { module_id, image_id, env });
                }
                ControllerReply::StreamEnd => break,
                ControllerReply::Error { kind, message } => return Err(CoreError::internal(format!("{kind}: {message}"))),
                other => return Err(unexpected_reply(other)),
            }
        }
        Ok(modules)
    }

    /// `ReceiveService.PushData`: relays a module's own `/controller/push`
    /// call up to the controller (§4.6, §6 Agent local REST).
    pub async fn push_data(&self, sender_module_id: ModuleId, receiver_module_id: String, data: Vec<u8>) -> Result<(), CoreError> {
        let mut conn = self.dial().await?;
        write_message(
            &mut conn.stream,
            &ControllerCall::PushData { sender_module_id: sender_module_id.to_string(), receiver_module_id, data },
        )
        .await
        .map_err(|e| CoreError::unavailable("failed to write push-data call").with_source(e))?;
        let reply: ControllerReply = read_message(&mut conn.stream)
            .await
            .map_err(|e| CoreError::unavailable("failed to read push-data reply").with_source(e))?;
        as_ack(reply)
    }
}

fn as_ack(reply: ControllerReply) -> Result<(), CoreError> {
    match reply {
        ControllerReply::Ack => Ok(()),
        ControllerReply::Error { kind, message } => Err(CoreError::internal(format!("{kind}: {message}"))),
        other => Err(unexpected_reply(other)),
    }
}

fn unexpected_reply(reply: ControllerReply) -> CoreError {
    CoreError::internal(format!("unexpected controller reply: {reply:?}"))
}
