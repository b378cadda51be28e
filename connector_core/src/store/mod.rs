//! Policy, asset and contract definition stores.
//!
//! Each store is a trait with an in-memory implementation; the persistent
//! format is left to other implementations.

pub mod asset;
pub mod contract;
pub mod policy;

pub use asset::{Asset, AssetIndex, AssetSelector, Criterion, InMemoryAssetIndex, ASSET_ID_PROPERTY};
pub use contract::{ContractDefinition, ContractDefinitionStore, InMemoryContractDefinitionStore};
pub use policy::{InMemoryPolicyStore, PolicyStore};
