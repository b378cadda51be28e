//! Assets and the index binding them to data addresses.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::pipeline::DataAddress;

/// Property holding an asset's id.
pub const ASSET_ID_PROPERTY: &str = "asset:prop:id";

/// A data entry offered by the connector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    id: String,
    properties: BTreeMap<String, String>,
}

impl Asset {
    /// Create an asset. The id is also recorded as `asset:prop:id`.
    pub fn new(id: impl Into<String>) -> Result<Self, StoreError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(StoreError::Invalid("asset id must not be empty".to_string()));
        }
        let mut properties = BTreeMap::new();
        properties.insert(ASSET_ID_PROPERTY.to_string(), id.clone());
        Ok(Self { id, properties })
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if key != ASSET_ID_PROPERTY {
            self.properties.insert(key, value.into());
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }
}

/// One equality test against an asset property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub property: String,
    pub value: String,
}

impl Criterion {
    pub fn eq(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, asset: &Asset) -> bool {
        asset.property(&self.property) == Some(self.value.as_str())
    }
}

/// Selects assets whose properties satisfy every criterion.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSelector {
    pub criteria: Vec<Criterion>,
}

impl AssetSelector {
    /// Selects exactly the asset with the given id.
    pub fn for_asset(asset_id: impl Into<String>) -> Self {
        Self {
            criteria: vec![Criterion::eq(ASSET_ID_PROPERTY, asset_id)],
        }
    }

    pub fn with(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    /// An empty selector matches every asset.
    pub fn matches(&self, asset: &Asset) -> bool {
        self.criteria.iter().all(|c| c.matches(asset))
    }
}

/// Interface for the asset index.
pub trait AssetIndex: Send + Sync {
    /// Register an asset and the address its data lives at.
    fn accept(&self, asset: Asset, address: DataAddress) -> Result<(), StoreError>;

    fn find_by_id(&self, id: &str) -> Option<Asset>;

    fn resolve_address(&self, id: &str) -> Result<DataAddress, StoreError>;

    /// Assets matching the selector, ordered by id.
    fn query(&self, selector: &AssetSelector) -> Vec<Asset>;

    /// Every asset with its address, ordered by id.
    fn list(&self) -> Vec<(Asset, DataAddress)>;
}

/// In-memory asset index.
#[derive(Default)]
pub struct InMemoryAssetIndex {
    entries: DashMap<String, (Asset, DataAddress)>,
}

impl InMemoryAssetIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AssetIndex for InMemoryAssetIndex {
    fn accept(&self, asset: Asset, address: DataAddress) -> Result<(), StoreError> {
        let id = asset.id().to_string();
        if self.entries.contains_key(&id) {
            return Err(StoreError::AlreadyExists(format!("asset {}", id)));
        }
        debug!(asset_id = %id, address = %address, "Registered asset");
        self.entries.insert(id, (asset, address));
        Ok(())
    }

    fn find_by_id(&self, id: &str) -> Option<Asset> {
        self.entries.get(id).map(|e| e.value().0.clone())
    }

    fn resolve_address(&self, id: &str) -> Result<DataAddress, StoreError> {
        self.entries
            .get(id)
            .map(|e| e.value().1.clone())
            .ok_or_else(|| StoreError::AssetNotFound(id.to_string()))
    }

    fn query(&self, selector: &AssetSelector) -> Vec<Asset> {
        let mut assets: Vec<Asset> = self
            .entries
            .iter()
            .filter(|e| selector.matches(&e.value().0))
            .map(|e| e.value().0.clone())
            .collect();
        assets.sort_by(|a, b| a.id.cmp(&b.id));
        assets
    }

    fn list(&self) -> Vec<(Asset, DataAddress)> {
        let mut entries: Vec<(Asset, DataAddress)> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.0.id.cmp(&b.0.id));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> InMemoryAssetIndex {
        let index = InMemoryAssetIndex::new();
        index
            .accept(
                Asset::new("test-document").unwrap().with_property("type", "text"),
                DataAddress::file("/tmp/provider", "test-document.txt").unwrap(),
            )
            .unwrap();
        index
            .accept(
                Asset::new("report").unwrap().with_property("type", "pdf"),
                DataAddress::file("/tmp/provider", "report.pdf").unwrap(),
            )
            .unwrap();
        index
    }

    #[test]
    fn test_accept_and_resolve() {
        let index = index();
        assert_eq!(
            index.resolve_address("report").unwrap().property("filename"),
            Some("report.pdf")
        );
        assert_eq!(
            index.resolve_address("missing"),
            Err(StoreError::AssetNotFound("missing".to_string()))
        );
        assert_eq!(
            index.find_by_id("test-document").unwrap().property(ASSET_ID_PROPERTY),
            Some("test-document")
        );

        let duplicate = index.accept(
            Asset::new("report").unwrap(),
            DataAddress::file("/tmp", "other.pdf").unwrap(),
        );
        assert!(matches!(duplicate, Err(StoreError::AlreadyExists(_))));
    }

    #[test]
    fn test_query_by_selector() {
        let index = index();

        let ids = |selector: AssetSelector| -> Vec<String> {
            index.query(&selector).into_iter().map(|a| a.id().to_string()).collect()
        };

        assert_eq!(ids(AssetSelector::for_asset("test-document")), vec!["test-document"]);
        assert_eq!(ids(AssetSelector::default()), vec!["report", "test-document"]);
        assert_eq!(
            ids(AssetSelector::default().with(Criterion::eq("type", "pdf"))),
            vec!["report"]
        );
        assert!(ids(AssetSelector::for_asset("report").with(Criterion::eq("type", "text"))).is_empty());
    }

    #[test]
    fn test_id_property_cannot_be_overridden() {
        let asset = Asset::new("a").unwrap().with_property(ASSET_ID_PROPERTY, "b");
        assert_eq!(asset.property(ASSET_ID_PROPERTY), Some("a"));
        assert!(Asset::new(" ").is_err());
    }
}
