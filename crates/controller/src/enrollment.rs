// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C4 Enrollment Coordinator (§4.2): drives an agent catalog entry through
//! catalogued → pending-enrollment → enrolled → online, backed by the
//! overlay's identity/enrollment management subset.

use std::sync::Arc;
use std::time::SystemTime;

use dmzero_core::{AgentId, Clock, CoreError, Diagnostics, ENROLLMENT_TOKEN_VALIDITY, IDENTITY_ROLE_AGENT};
use dmzero_gateways::overlay::OverlayGateway;
use tracing::warn;

use crate::registry::{AgentEntry, AgentRegistry};

/// Read-model the REST layer renders for an agent (§3, §6): plain catalog
/// fields plus the derived flags the registry alone cannot answer, since
/// `isEnrolled`/`isOnline` depend on overlay and clock state respectively.
#[derive(Debug, Clone)]
pub struct AgentView {
    pub id: AgentId,
    pub name: String,
    pub configuration: std::collections::BTreeMap<String, String>,
    pub is_enrolled: bool,
    pub is_online: bool,
    pub present_images: std::collections::BTreeMap<String, String>,
    pub present_modules: std::collections::BTreeMap<String, String>,
}

pub struct EnrollmentCoordinator {
    overlay: Arc<dyn OverlayGateway>,
    agents: Arc<AgentRegistry>,
    clock: Arc<dyn Clock>,
}

impl EnrollmentCoordinator {
    pub fn new(overlay: Arc<dyn OverlayGateway>, agents: Arc<AgentRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { overlay, agents, clock }
    }

    pub fn create_agent(&self, name: impl Into<String>) -> Arc<AgentEntry> {
        self.agents.create(name)
    }

    pub fn rename_agent(&self, agent_id: AgentId, name: impl Into<String>) -> Result<(), CoreError> {
        self.agents.get(agent_id)?.set_name(name);
        Ok(())
    }

    /// Issues a fresh one-time enrollment token, replacing any unclaimed
    /// token already outstanding for this agent (§4.2: re-enrolling a
    /// catalogued, not-yet-enrolled agent is allowed and simply reissues).
    ///
    /// Returns `Conflict` if the agent already completed enrollment — a
    /// second enrollment attempt against an already-bound identity is not
    /// a retry, it is a programming error in the caller (§8 Invariant 3).
    pub async fn create_enrollment(&self, agent_id: AgentId) -> Result<String, CoreError> {
        let entry = self.agents.get(agent_id)?;
        if entry.has_identity_bound() {
            return Err(CoreError::conflict(format!("agent {agent_id} is already enrolled")));
        }

        let identity_id = self.overlay.create_identity(&entry.name(), false, &[IDENTITY_ROLE_AGENT.to_string()]).await?;
        let enrollment_id = self
            .overlay
            .create_enrollment(&identity_id, SystemTime::now() + ENROLLMENT_TOKEN_VALIDITY)
            .await?;
        let token = self.overlay.get_enrollment_token(&enrollment_id).await?;
        entry.set_identity_id(Some(identity_id));
        Ok(token.jwt)
    }

    /// Deletes the outstanding enrollment/identity for an agent without
    /// removing the agent itself from the catalog, letting operators
    /// revoke a leaked token and reissue (§4.2).
    pub async fn delete_enrollment(&self, agent_id: AgentId) -> Result<(), CoreError> {
        let entry = self.agents.get(agent_id)?;
        if let Some(identity_id) = entry.identity_id() {
            self.overlay.delete_identity(&identity_id).await?;
            entry.set_identity_id(None);
        }
        Ok(())
    }

    /// Deletes the agent outright: closes any live connection, deletes the
    /// bound overlay identity if one exists, then drops the catalog entry
    /// (§4.3 deletion ordering — connection before identity before
    /// catalog removal, so a stray inbound RPC can never resurrect a
    /// handle to a deleted agent).
    pub async fn delete_agent(&self, agent_id: AgentId) -> Result<(), CoreError> {
        let entry = self.agents.get(agent_id)?;
        entry.clear_connection();
        if let Some(identity_id) = entry.identity_id() {
            self.overlay.delete_identity(&identity_id).await?;
        }
        self.agents.remove(agent_id)
    }

    pub fn record_phonehome(&self, agent_id: AgentId, diagnostics: Diagnostics) -> Result<(), CoreError> {
        let entry = self.agents.get(agent_id)?;
        entry.record_diagnostics(self.clock.as_ref(), diagnostics);
        Ok(())
    }

    pub async fn view(&self, agent_id: AgentId) -> Result<AgentView, CoreError> {
        let entry = self.agents.get(agent_id)?;
        Ok(self.view_of(&entry).await)
    }

    pub async fn list_views(&self) -> Vec<AgentView> {
        let tasks = self.agents.list().into_iter().map(|entry| async move { self.view_of(&entry).await });
        futures_util::future::join_all(tasks).await
    }

    /// `isEnrolled` is the overlay's own `hasAPISession` for the bound
    /// identity (§4.4), not a local proxy — an agent that only holds an
    /// outstanding enrollment token (identity bound, never claimed) is
    /// pending, not enrolled.
    async fn view_of(&self, entry: &Arc<AgentEntry>) -> AgentView {
        let diagnostics = entry.diagnostics_if_online(self.clock.as_ref());
        let is_enrolled = match entry.identity_id() {
            Some(identity_id) => match self.overlay.get_identity_detail(&identity_id).await {
                Ok(detail) => detail.has_api_session,
                Err(error) => {
                    warn!(agent_id = %entry.id(), %error, "failed to query overlay identity detail, reporting not enrolled");
                    false
                }
            },
            None => false,
        };
        AgentView {
            id: entry.id(),
            name: entry.name(),
            configuration: entry.configuration(),
            is_enrolled,
            is_online: entry.is_online(self.clock.as_ref()),
            present_images: diagnostics.as_ref().map(|d| d.present_images.clone()).unwrap_or_default(),
            present_modules: diagnostics.as_ref().map(|d| d.present_modules.clone()).unwrap_or_default(),
        }
    }
}
