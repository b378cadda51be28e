//! Contract definitions: which policies govern which assets.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::asset::{Asset, AssetSelector};
use crate::error::StoreError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDefinition {
    pub id: String,
    /// Policy a consumer must satisfy to see the offer.
    pub access_policy_id: String,
    /// Policy governing use of the data once transferred.
    pub contract_policy_id: String,
    pub selector: AssetSelector,
}

impl ContractDefinition {
    pub fn new(
        id: impl Into<String>,
        access_policy_id: impl Into<String>,
        contract_policy_id: impl Into<String>,
        selector: AssetSelector,
    ) -> Result<Self, StoreError> {
        let definition = Self {
            id: id.into(),
            access_policy_id: access_policy_id.into(),
            contract_policy_id: contract_policy_id.into(),
            selector,
        };
        if definition.id.is_empty()
            || definition.access_policy_id.is_empty()
            || definition.contract_policy_id.is_empty()
        {
            return Err(StoreError::Invalid(
                "contract definition requires an id and both policy ids".to_string(),
            ));
        }
        Ok(definition)
    }

    pub fn covers(&self, asset: &Asset) -> bool {
        self.selector.matches(asset)
    }
}

/// Interface for contract definition storage.
pub trait ContractDefinitionStore: Send + Sync {
    fn save(&self, definition: ContractDefinition) -> Result<(), StoreError>;

    fn find_by_id(&self, id: &str) -> Option<ContractDefinition>;

    /// All definitions, ordered by id.
    fn list(&self) -> Vec<ContractDefinition>;

    /// Definitions whose selector matches the asset, ordered by id.
    fn find_for_asset(&self, asset: &Asset) -> Vec<ContractDefinition>;
}

/// In-memory contract definition store.
#[derive(Default)]
pub struct InMemoryContractDefinitionStore {
    definitions: DashMap<String, ContractDefinition>,
}

impl InMemoryContractDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContractDefinitionStore for InMemoryContractDefinitionStore {
    fn save(&self, definition: ContractDefinition) -> Result<(), StoreError> {
        debug!(
            contract_id = %definition.id,
            access_policy = %definition.access_policy_id,
            "Saved contract definition"
        );
        self.definitions.insert(definition.id.clone(), definition);
        Ok(())
    }

    fn find_by_id(&self, id: &str) -> Option<ContractDefinition> {
        self.definitions.get(id).map(|d| d.value().clone())
    }

    fn list(&self) -> Vec<ContractDefinition> {
        let mut definitions: Vec<ContractDefinition> =
            self.definitions.iter().map(|d| d.value().clone()).collect();
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        definitions
    }

    fn find_for_asset(&self, asset: &Asset) -> Vec<ContractDefinition> {
        let mut definitions: Vec<ContractDefinition> = self
            .definitions
            .iter()
            .filter(|d| d.value().covers(asset))
            .map(|d| d.value().clone())
            .collect();
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        definitions
    }
}
