use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use crate::error::{Error, Result};
use crate::price_infra::connectors::SourceAdapter;
use crate::types::SourceId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CredentialState {
    Unvalidated,
    Valid,
    Revoked { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source_id: SourceId,
    pub credential: CredentialState,
}

struct SourceHandle {
    adapter: Arc<dyn SourceAdapter>,
    state: Mutex<CredentialState>,
}

impl SourceHandle {
    fn state(&self) -> CredentialState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_state(&self, state: CredentialState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

/// Configured sources and the credential state of each.
///
/// A revoked source stays excluded from every later cycle until it is reinstated.
pub struct SourceRegistry {
    sources: Vec<SourceHandle>,
}

impl SourceRegistry {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        SourceRegistry {
            sources: adapters
                .into_iter()
                .map(|adapter| SourceHandle {
                    adapter,
                    state: Mutex::new(CredentialState::Unvalidated),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Validates every source that has not been validated yet.
    ///
    /// The first rejection revokes that source and is returned as `CredentialRejected`.
    /// Transport failures during validation leave the source unvalidated and usable.
    pub async fn ensure_validated(&self) -> Result<()> {
        let mut rejection = None;

        for handle in &self.sources {
            if handle.state() != CredentialState::Unvalidated {
                continue;
            }
            let source_id = handle.adapter.source_id().clone();

            match handle.adapter.validate_credential().await {
                Ok(true) => {
                    info!(source_id = %source_id, "Source credentials accepted");
                    handle.set_state(CredentialState::Valid);
                }
                Ok(false) => {
                    let reason = "credential rejected by source".to_string();
                    self.revoke_handle(handle, reason.clone());
                    rejection.get_or_insert(Error::CredentialRejected { source_id, reason });
                }
                Err(err) if err.is_credential() => {
                    let reason = err.to_string();
                    self.revoke_handle(handle, reason.clone());
                    rejection.get_or_insert(Error::CredentialRejected { source_id, reason });
                }
                Err(err) => {
                    warn!(source_id = %source_id, "Credential check inconclusive: {}", err);
                }
            }
        }

        match rejection {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Sources that are not revoked, in configuration order.
    pub fn active(&self) -> Vec<Arc<dyn SourceAdapter>> {
        self.sources
            .iter()
            .filter(|handle| !matches!(handle.state(), CredentialState::Revoked { .. }))
            .map(|handle| handle.adapter.clone())
            .collect()
    }

    pub fn revoke(&self, source_id: &SourceId, reason: impl Into<String>) -> Result<()> {
        let handle = self.find(source_id)?;
        self.revoke_handle(handle, reason.into());
        Ok(())
    }

    /// Puts a revoked source back to `Unvalidated`; the next cycle validates it again.
    pub fn reinstate(&self, source_id: &SourceId) -> Result<CredentialState> {
        let handle = self.find(source_id)?;
        let previous = handle.state();
        handle.set_state(CredentialState::Unvalidated);
        info!(source_id = %source_id, ?previous, "Source reinstated");
        Ok(previous)
    }

    pub fn statuses(&self) -> Vec<SourceStatus> {
        self.sources
            .iter()
            .map(|handle| SourceStatus {
                source_id: handle.adapter.source_id().clone(),
                credential: handle.state(),
            })
            .collect()
    }

    fn find(&self, source_id: &SourceId) -> Result<&SourceHandle> {
        self.sources
            .iter()
            .find(|handle| handle.adapter.source_id() == source_id)
            .ok_or_else(|| Error::UnknownSource(source_id.clone()))
    }

    fn revoke_handle(&self, handle: &SourceHandle, reason: String) {
        error!(source_id = %handle.adapter.source_id(), "Source revoked: {}", reason);
        handle.set_state(CredentialState::Revoked { reason });
    }
}
