//! Policy storage.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::StoreError;
use crate::policy::Policy;

/// Interface for policy storage.
pub trait PolicyStore: Send + Sync {
    /// Store a policy. Stored policies are immutable: saving a different
    /// policy under an existing id fails.
    fn save(&self, policy: Policy) -> Result<(), StoreError>;

    fn find_by_id(&self, id: &str) -> Option<Arc<Policy>>;

    fn delete(&self, id: &str) -> Result<Arc<Policy>, StoreError>;

    /// All policies, ordered by id.
    fn list(&self) -> Vec<Arc<Policy>>;
}

/// In-memory policy store.
#[derive(Default)]
pub struct InMemoryPolicyStore {
    policies: DashMap<String, Arc<Policy>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PolicyStore for InMemoryPolicyStore {
    fn save(&self, policy: Policy) -> Result<(), StoreError> {
        let id = policy.id().to_string();

        if let Some(existing) = self.policies.get(&id) {
            // Re-saving the same content is a no-op
            if **existing == policy {
                return Ok(());
            }
            return Err(StoreError::AlreadyExists(format!("policy {}", id)));
        }

        debug!(policy_id = %id, "Saved policy");
        self.policies.insert(id, Arc::new(policy));
        Ok(())
    }

    fn find_by_id(&self, id: &str) -> Option<Arc<Policy>> {
        self.policies.get(id).map(|p| p.value().clone())
    }

    fn delete(&self, id: &str) -> Result<Arc<Policy>, StoreError> {
        self.policies
            .remove(id)
            .map(|(_, policy)| policy)
            .ok_or_else(|| StoreError::Invalid(format!("policy {} does not exist", id)))
    }

    fn list(&self) -> Vec<Arc<Policy>> {
        let mut policies: Vec<Arc<Policy>> =
            self.policies.iter().map(|e| e.value().clone()).collect();
        policies.sort_by(|a, b| a.id().cmp(b.id()));
        policies
    }
}
