//! Metadata catalog lookup.
//!
//! Data entry properties come from an Atlas-style catalog. A missing entity
//! is not an error: the lookup returns an empty map.

use std::collections::HashMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::store::AssetIndex;

/// Looks up the properties of a data entry.
pub trait DataEntryPropertyLookup: Send + Sync {
    fn properties_for_entity(&self, id: &str) -> HashMap<String, Value>;
}

/// An entity as returned by the catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AtlasEntity {
    pub guid: String,
    pub type_name: String,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

/// The subset of the catalog API the lookup needs.
pub trait AtlasApi: Send + Sync {
    fn entity_by_id(&self, id: &str) -> Option<AtlasEntity>;
}

/// [`DataEntryPropertyLookup`] backed by an [`AtlasApi`].
pub struct AtlasPropertyLookup<A> {
    api: A,
}

impl<A: AtlasApi> AtlasPropertyLookup<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }
}

impl<A: AtlasApi> DataEntryPropertyLookup for AtlasPropertyLookup<A> {
    fn properties_for_entity(&self, id: &str) -> HashMap<String, Value> {
        match self.api.entity_by_id(id) {
            Some(entity) => entity.attributes,
            None => {
                debug!(entity_id = %id, "Entity not in catalog");
                HashMap::new()
            }
        }
    }
}

/// In-memory catalog.
#[derive(Default)]
pub struct InMemoryAtlasApi {
    entities: DashMap<String, AtlasEntity>,
}

impl InMemoryAtlasApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity: AtlasEntity) {
        self.entities.insert(entity.guid.clone(), entity);
    }

    /// Seed a catalog with one `DataSet` entity per indexed asset.
    ///
    /// Attributes are the asset's properties plus its address type and
    /// address properties under `address:`-prefixed keys.
    pub fn from_assets(index: &dyn AssetIndex) -> Self {
        let catalog = Self::new();
        for (asset, address) in index.list() {
            let mut attributes: HashMap<String, Value> = asset
                .properties()
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            attributes.insert(
                "address:type".to_string(),
                Value::String(address.address_type().to_string()),
            );
            for (k, v) in address.properties() {
                attributes.insert(format!("address:{}", k), Value::String(v.clone()));
            }
            catalog.insert(AtlasEntity {
                guid: asset.id().to_string(),
                type_name: "DataSet".to_string(),
                attributes,
            });
        }
        catalog
    }
}

impl AtlasApi for InMemoryAtlasApi {
    fn entity_by_id(&self, id: &str) -> Option<AtlasEntity> {
        self.entities.get(id).map(|e| e.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::DataAddress;
    use crate::store::{Asset, InMemoryAssetIndex};
    use serde_json::json;

    #[test]
    fn test_lookup_returns_attributes() {
        let api = InMemoryAtlasApi::new();
        let mut attributes = HashMap::new();
        attributes.insert("owner".to_string(), json!("provider"));
        attributes.insert("size".to_string(), json!(42));
        api.insert(AtlasEntity {
            guid: "entity-1".to_string(),
            type_name: "DataSet".to_string(),
            attributes: attributes.clone(),
        });

        let lookup = AtlasPropertyLookup::new(api);
        assert_eq!(lookup.properties_for_entity("entity-1"), attributes);
    }

    #[test]
    fn test_absent_entity_is_empty() {
        let lookup = AtlasPropertyLookup::new(InMemoryAtlasApi::new());
        assert!(lookup.properties_for_entity("nope").is_empty());
    }

    #[test]
    fn test_seed_from_assets() {
        let index = InMemoryAssetIndex::new();
        index
            .accept(
                Asset::new("test-document").unwrap(),
                DataAddress::file("/tmp/provider", "test-document.txt").unwrap(),
            )
            .unwrap();

        let lookup = AtlasPropertyLookup::new(InMemoryAtlasApi::from_assets(&index));
        let properties = lookup.properties_for_entity("test-document");
        assert_eq!(properties["asset:prop:id"], json!("test-document"));
        assert_eq!(properties["address:type"], json!("File"));
        assert_eq!(properties["address:filename"], json!("test-document.txt"));
    }
}
