//! Access control collaborator.
//!
//! Retrieval never ranks a chunk whose document the calling principal cannot
//! read. The policy itself (ownership, role and group grants) lives outside
//! this crate; [`AccessPolicy`] is the seam it plugs into, and
//! [`StaticAccessPolicy`] is the in-memory table used by tests and embedded
//! deployments.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::types::{CoreError, DocumentId, PrincipalId};

/// Resolves the set of documents a principal may read: ownership plus
/// role/group grants.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn readable_documents(
        &self,
        principal: PrincipalId,
    ) -> Result<HashSet<DocumentId>, CoreError>;
}

/// In-memory grant table.
#[derive(Debug, Default)]
pub struct StaticAccessPolicy {
    grants: RwLock<HashMap<PrincipalId, HashSet<DocumentId>>>,
}

impl StaticAccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `principal` read access to `document`.
    pub fn allow(&self, principal: PrincipalId, document: DocumentId) {
        self.grants
            .write()
            .entry(principal)
            .or_default()
            .insert(document);
    }

    /// Revoke a previously granted access.
    pub fn revoke(&self, principal: PrincipalId, document: DocumentId) {
        if let Some(documents) = self.grants.write().get_mut(&principal) {
            documents.remove(&document);
        }
    }
}

#[async_trait]
impl AccessPolicy for StaticAccessPolicy {
    async fn readable_documents(
        &self,
        principal: PrincipalId,
    ) -> Result<HashSet<DocumentId>, CoreError> {
        Ok(self
            .grants
            .read()
            .get(&principal)
            .cloned()
            .unwrap_or_default())
    }
}
