// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Overlay Gateway capability (C1, §4.1): enroll-by-token, listen/dial by
//! identity, terminator discovery, and the controller-only identity
//! management subset.

mod tcp;

pub use tcp::{OverlayDirectory, TcpOverlayGateway};

use async_trait::async_trait;
use dmzero_core::CoreError;
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncWrite};

/// Long-lived per-node key material produced by one-time-token enrollment.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub identity_name: String,
    pub key_material: String,
}

/// An authenticated session; callers re-authenticate at `expires_at - 15s`
/// (§4.1 session refresh).
#[derive(Debug, Clone)]
pub struct Session {
    pub expires_at: SystemTime,
}

#[derive(Debug, Clone, Default)]
pub struct ListenOpts {
    pub bind_using_edge_identity: bool,
}

#[derive(Debug, Clone)]
pub struct IdentityDetail {
    pub has_api_session: bool,
    /// Present only while the identity has never completed enrollment.
    pub current_ott_jwt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EnrollmentToken {
    pub jwt: String,
    pub expires_at: SystemTime,
}

/// A single overlay connection: a byte stream plus the peer address string
/// servers parse with [`dmzero_core::parse_overlay_address`].
pub struct OverlayConn {
    pub stream: Box<dyn ReadWrite>,
    pub peer_address: String,
}

/// Convenience bound alias for a bidirectional, owned, boxable byte stream.
pub trait ReadWrite: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> ReadWrite for T {}

#[async_trait]
pub trait OverlayListener: Send + Sync {
    async fn accept(&self) -> Result<OverlayConn, CoreError>;
}

#[async_trait]
pub trait OverlayGateway: Send + Sync + 'static {
    async fn enroll_from_token(
        &self,
        token: &str,
        key_alg: &str,
    ) -> Result<IdentityConfig, CoreError>;

    async fn authenticate(&self, identity: &IdentityConfig) -> Result<Session, CoreError>;

    async fn listen(
        &self,
        service_name: &str,
        opts: ListenOpts,
    ) -> Result<Box<dyn OverlayListener>, CoreError>;

    /// Dial a specific identity's terminator, or any terminator of the
    /// service if `identity` is `None`.
    async fn dial(&self, service_name: &str, identity: Option<&str>) -> Result<OverlayConn, CoreError>;

    async fn get_service_terminators(&self, service_name: &str) -> Result<Vec<String>, CoreError>;

    fn get_current_identity(&self) -> String;

    // ---- management subset (controller only) ----

    async fn create_identity(
        &self,
        name: &str,
        is_admin: bool,
        roles: &[String],
    ) -> Result<String, CoreError>;

    async fn delete_identity(&self, identity_id: &str) -> Result<(), CoreError>;

    async fn get_identity_detail(&self, identity_id: &str) -> Result<IdentityDetail, CoreError>;

    async fn create_enrollment(
        &self,
        identity_id: &str,
        expires_at: SystemTime,
    ) -> Result<String, CoreError>;

    async fn delete_enrollment(&self, enrollment_id: &str) -> Result<(), CoreError>;

    async fn get_enrollment_token(&self, enrollment_id: &str) -> Result<EnrollmentToken, CoreError>;
}
