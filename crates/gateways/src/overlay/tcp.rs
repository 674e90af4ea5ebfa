// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reference `OverlayGateway` built from plain TCP sockets plus an
//! in-memory identity/terminator directory.
//!
//! The real overlay-network provider (identity enrollment, mesh dial/listen,
//! terminator discovery) is explicitly out of scope (§1) and specified only
//! by the [`super::OverlayGateway`] trait; this is the reference
//! implementation suitable for tests and single-host deployments, in the
//! same spirit as the narrow capability interfaces the rest of the core
//! consumes (§9 duck-typed interface wrapper note). A production deployment
//! swaps in a real zero-trust mesh provider implementing the same trait.

use async_trait::async_trait;
use dmzero_core::CoreError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

use super::{
    EnrollmentToken, IdentityConfig, IdentityDetail, ListenOpts, OverlayConn, OverlayGateway,
    OverlayListener, Session,
};

struct IdentityRecord {
    is_admin: bool,
    roles: Vec<String>,
    enrolled: bool,
}

struct EnrollmentRecord {
    identity_id: String,
    jwt: String,
    expires_at: SystemTime,
    claimed: bool,
}

/// Shared directory backing every [`TcpOverlayGateway`] in a process; a
/// controller and its agents in the same test/demo process hand the same
/// `Arc<OverlayDirectory>` to each gateway they construct.
#[derive(Default)]
pub struct OverlayDirectory {
    terminators: RwLock<HashMap<(String, String), SocketAddr>>,
    identities: RwLock<HashMap<String, IdentityRecord>>,
    enrollments: RwLock<HashMap<String, EnrollmentRecord>>,
    tokens: RwLock<HashMap<String, String>>,
    conn_counter: AtomicU64,
}

impl OverlayDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

pub struct TcpOverlayGateway {
    identity_name: RwLock<String>,
    bind_host: String,
    directory: Arc<OverlayDirectory>,
}

impl TcpOverlayGateway {
    /// `identity_name` is the fixed identity this gateway answers as once
    /// enrolled; pass an empty string for a gateway that only performs
    /// controller-side management calls and never listens/dials as itself.
    pub fn new(directory: Arc<OverlayDirectory>, bind_host: impl Into<String>) -> Self {
        Self { identity_name: RwLock::new(String::new()), bind_host: bind_host.into(), directory }
    }

    fn self_identity(&self) -> String {
        self.identity_name.read().clone()
    }
}

struct TcpOverlayListener {
    listener: TcpListener,
}

#[async_trait]
impl OverlayListener for TcpOverlayListener {
    async fn accept(&self) -> Result<OverlayConn, CoreError> {
        let (mut stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|e| CoreError::unavailable("overlay accept failed").with_source(e))?;
        let peer_address = read_handshake_line(&mut stream).await?;
        Ok(OverlayConn { stream: Box::new(stream), peer_address })
    }
}

async fn read_handshake_line(stream: &mut TcpStream) -> Result<String, CoreError> {
    let mut buf = Vec::with_capacity(128);
    let mut byte = [0u8; 1];
    loop {
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| CoreError::unavailable("overlay handshake read failed").with_source(e))?;
        if n == 0 {
            return Err(CoreError::unavailable("overlay peer closed before handshake"));
        }
        if byte[0] == b'\n' {
            break;
        }
        buf.push(byte[0]);
        if buf.len() > 4096 {
            return Err(CoreError::invalid_argument("overlay handshake line too long"));
        }
    }
    String::from_utf8(buf).map_err(|e| CoreError::invalid_argument("overlay handshake not utf8").with_source(e))
}

#[async_trait]
impl OverlayGateway for TcpOverlayGateway {
    async fn enroll_from_token(&self, token: &str, _key_alg: &str) -> Result<IdentityConfig, CoreError> {
        let identity_id = {
            let tokens = self.directory.tokens.read();
            tokens.get(token).cloned().ok_or_else(|| CoreError::unauthenticated("unknown enrollment token"))?
        };

        {
            let mut enrollments = self.directory.enrollments.write();
            let record = enrollments
                .values_mut()
                .find(|r| r.jwt == token)
                .ok_or_else(|| CoreError::unauthenticated("enrollment record missing"))?;
            if record.claimed {
                return Err(CoreError::unauthenticated("enrollment token already claimed"));
            }
            if SystemTime::now() > record.expires_at {
                return Err(CoreError::unauthenticated("enrollment token expired"));
            }
            record.claimed = true;
        }

        {
            let mut identities = self.directory.identities.write();
            if let Some(rec) = identities.get_mut(&identity_id) {
                rec.enrolled = true;
            }
        }

        *self.identity_name.write() = identity_id.clone();
        Ok(IdentityConfig { identity_name: identity_id, key_material: Uuid::new_v4().to_string() })
    }

    async fn authenticate(&self, identity: &IdentityConfig) -> Result<Session, CoreError> {
        if identity.identity_name.is_empty() {
            return Err(CoreError::unauthenticated("empty identity"));
        }
        Ok(Session { expires_at: SystemTime::now() + Duration::from_secs(3600) })
    }

    async fn listen(&self, service_name: &str, opts: ListenOpts) -> Result<Box<dyn OverlayListener>, CoreError> {
        let addr: SocketAddr = format!("{}:0", self.bind_host)
            .parse()
            .map_err(|e| CoreError::internal("invalid bind host").with_source(e))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CoreError::unavailable("failed to bind overlay listener").with_source(e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| CoreError::internal("failed to read bound address").with_source(e))?;

        if opts.bind_using_edge_identity {
            let identity = self.self_identity();
            self.directory
                .terminators
                .write()
                .insert((service_name.to_string(), identity), local_addr);
        }

        Ok(Box::new(TcpOverlayListener { listener }))
    }

    async fn dial(&self, service_name: &str, identity: Option<&str>) -> Result<OverlayConn, CoreError> {
        let target = {
            let terminators = self.directory.terminators.read();
            match identity {
                Some(id) => *terminators
                    .get(&(service_name.to_string(), id.to_string()))
                    .ok_or_else(|| CoreError::not_found(format!("no terminator for {service_name}/{id}")))?,
                None => *terminators
                    .iter()
                    .find(|((svc, _), _)| svc == service_name)
                    .map(|(_, addr)| addr)
                    .ok_or_else(|| CoreError::not_found(format!("no terminator for {service_name}")))?,
            }
        };

        let mut stream = TcpStream::connect(target)
            .await
            .map_err(|e| CoreError::unavailable("overlay dial failed").with_source(e))?;

        let conn_id = self.directory.conn_counter.fetch_add(1, Ordering::Relaxed);
        let handshake = format!(
            "zitiConn connId={} svcId={} sourceIdentity={}\n",
            conn_id,
            service_name,
            self.self_identity()
        );
        stream
            .write_all(handshake.as_bytes())
            .await
            .map_err(|e| CoreError::unavailable("overlay handshake write failed").with_source(e))?;

        Ok(OverlayConn { stream: Box::new(stream), peer_address: handshake.trim_end().to_string() })
    }

    async fn get_service_terminators(&self, service_name: &str) -> Result<Vec<String>, CoreError> {
        let terminators = self.directory.terminators.read();
        Ok(terminators
            .keys()
            .filter(|(svc, _)| svc == service_name)
            .map(|(_, identity)| identity.clone())
            .collect())
    }

    fn get_current_identity(&self) -> String {
        self.self_identity()
    }

    async fn create_identity(&self, _name: &str, is_admin: bool, roles: &[String]) -> Result<String, CoreError> {
        let identity_id = Uuid::new_v4().to_string();
        self.directory.identities.write().insert(
            identity_id.clone(),
            IdentityRecord { is_admin, roles: roles.to_vec(), enrolled: false },
        );
        Ok(identity_id)
    }

    async fn delete_identity(&self, identity_id: &str) -> Result<(), CoreError> {
        self.directory.identities.write().remove(identity_id);
        self.directory.terminators.write().retain(|(_, id), _| id != identity_id);
        Ok(())
    }

    async fn get_identity_detail(&self, identity_id: &str) -> Result<IdentityDetail, CoreError> {
        let identities = self.directory.identities.read();
        let record = identities
            .get(identity_id)
            .ok_or_else(|| CoreError::not_found("identity not found"))?;
        let current_ott_jwt = if record.enrolled {
            None
        } else {
            self.directory
                .enrollments
                .read()
                .values()
                .find(|r| r.identity_id == identity_id && !r.claimed)
                .map(|r| r.jwt.clone())
        };
        Ok(IdentityDetail { has_api_session: record.enrolled, current_ott_jwt })
    }

    async fn create_enrollment(&self, identity_id: &str, expires_at: SystemTime) -> Result<String, CoreError> {
        if !self.directory.identities.read().contains_key(identity_id) {
            return Err(CoreError::not_found("identity not found"));
        }
        let enrollment_id = Uuid::new_v4().to_string();
        let jwt = Uuid::new_v4().to_string();
        self.directory.tokens.write().insert(jwt.clone(), identity_id.to_string());
        self.directory.enrollments.write().insert(
            enrollment_id.clone(),
            EnrollmentRecord { identity_id: identity_id.to_string(), jwt, expires_at, claimed: false },
        );
        Ok(enrollment_id)
    }

    async fn delete_enrollment(&self, enrollment_id: &str) -> Result<(), CoreError> {
        if let Some(record) = self.directory.enrollments.write().remove(enrollment_id) {
            self.directory.tokens.write().remove(&record.jwt);
        }
        Ok(())
    }

    async fn get_enrollment_token(&self, enrollment_id: &str) -> Result<EnrollmentToken, CoreError> {
        let enrollments = self.directory.enrollments.read();
        let record = enrollments
            .get(enrollment_id)
            .ok_or_else(|| CoreError::not_found("enrollment not found"))?;
        Ok(EnrollmentToken { jwt: record.jwt.clone(), expires_at: record.expires_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn enroll_listen_dial_round_trip() {
        let directory = OverlayDirectory::new();
        let controller_gw = TcpOverlayGateway::new(directory.clone(), "127.0.0.1");
        let agent_gw = TcpOverlayGateway::new(directory.clone(), "127.0.0.1");

        let identity_id = controller_gw.create_identity("agent-1", false, &["agent-role".into()]).await.unwrap();
        let enrollment_id = controller_gw
            .create_enrollment(&identity_id, SystemTime::now() + Duration::from_secs(3600))
            .await
            .unwrap();
        let token = controller_gw.get_enrollment_token(&enrollment_id).await.unwrap();

        let identity = agent_gw.enroll_from_token(&token.jwt, "RSA").await.unwrap();
        assert_eq!(identity.identity_name, identity_id);

        let detail = controller_gw.get_identity_detail(&identity_id).await.unwrap();
        assert!(detail.has_api_session);

        let listener = agent_gw.listen("service-agent", ListenOpts { bind_using_edge_identity: true }).await.unwrap();

        let accept_task = tokio::spawn(async move { listener.accept().await });
        let mut conn = controller_gw.dial("service-agent", Some(&identity_id)).await.unwrap();
        let mut server_conn = accept_task.await.unwrap().unwrap();

        let parsed = dmzero_core::parse_overlay_address(&server_conn.peer_address).unwrap();
        assert_eq!(parsed.source_identity, controller_gw.get_current_identity());

        conn.stream.shutdown().await.ok();
        let mut buf = [0u8; 1];
        let n = tokio::io::AsyncReadExt::read(&mut server_conn.stream, &mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn double_claim_of_enrollment_token_fails() {
        let directory = OverlayDirectory::new();
        let gw = TcpOverlayGateway::new(directory.clone(), "127.0.0.1");
        let id = gw.create_identity("a", false, &[]).await.unwrap();
        let enrollment_id = gw.create_enrollment(&id, SystemTime::now() + Duration::from_secs(60)).await.unwrap();
        let token = gw.get_enrollment_token(&enrollment_id).await.unwrap();

        gw.enroll_from_token(&token.jwt, "RSA").await.unwrap();
        let err = gw.enroll_from_token(&token.jwt, "RSA").await.unwrap_err();
        assert_eq!(err.kind, dmzero_core::ErrorKind::Unauthenticated);
    }
}
