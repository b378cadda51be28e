//! Transfer endpoint registry.
//!
//! Maps an address type to the one source factory and the one sink factory
//! that claim it. Registration happens during bootstrap through `&mut self`;
//! afterwards the registry is shared read-only behind an `Arc`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info};

use super::address::DataAddress;
use super::endpoint::{DataSink, DataSinkFactory, DataSource, DataSourceFactory};
use crate::error::{EndpointRole, RegistryError, TransferError};

#[derive(Default)]
pub struct TransferEndpointRegistry {
    sources: HashMap<String, Arc<dyn DataSourceFactory>>,
    sinks: HashMap<String, Arc<dyn DataSinkFactory>>,
}

impl TransferEndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source factory for every type it declares.
    ///
    /// Fails without registering anything if any declared type is already
    /// claimed.
    pub fn register_source_factory(
        &mut self,
        factory: Arc<dyn DataSourceFactory>,
    ) -> Result<(), RegistryError> {
        let types = claimable(
            EndpointRole::Source,
            factory.name(),
            factory.supported_types(),
            |t| self.sources.contains_key(t),
        )?;
        for address_type in &types {
            self.sources.insert(address_type.clone(), factory.clone());
        }
        info!(factory = %factory.name(), types = ?types, "Registered source factory");
        Ok(())
    }

    /// Register a sink factory for every type it declares.
    ///
    /// Fails without registering anything if any declared type is already
    /// claimed.
    pub fn register_sink_factory(
        &mut self,
        factory: Arc<dyn DataSinkFactory>,
    ) -> Result<(), RegistryError> {
        let types = claimable(
            EndpointRole::Sink,
            factory.name(),
            factory.supported_types(),
            |t| self.sinks.contains_key(t),
        )?;
        for address_type in &types {
            self.sinks.insert(address_type.clone(), factory.clone());
        }
        info!(factory = %factory.name(), types = ?types, "Registered sink factory");
        Ok(())
    }

    pub fn resolve_source(&self, address: &DataAddress) -> Result<Box<dyn DataSource>, TransferError> {
        let factory = self
            .sources
            .get(address.address_type())
            .ok_or_else(|| unsupported(EndpointRole::Source, address))?;
        debug!(address_type = %address.address_type(), factory = %factory.name(), "Resolved source");
        factory.create_source(address)
    }

    pub fn resolve_sink(&self, address: &DataAddress) -> Result<Arc<dyn DataSink>, TransferError> {
        let factory = self
            .sinks
            .get(address.address_type())
            .ok_or_else(|| unsupported(EndpointRole::Sink, address))?;
        debug!(address_type = %address.address_type(), factory = %factory.name(), "Resolved sink");
        factory.create_sink(address)
    }

    pub fn source_types(&self) -> Vec<String> {
        sorted(self.sources.keys())
    }

    pub fn sink_types(&self) -> Vec<String> {
        sorted(self.sinks.keys())
    }
}

fn claimable(
    role: EndpointRole,
    factory: &str,
    declared: Vec<String>,
    claimed: impl Fn(&str) -> bool,
) -> Result<BTreeSet<String>, RegistryError> {
    let types: BTreeSet<String> = declared.into_iter().collect();
    if types.is_empty() {
        return Err(RegistryError::EmptyFactory {
            role,
            factory: factory.to_string(),
        });
    }
    if let Some(taken) = types.iter().find(|t| claimed(t)) {
        return Err(RegistryError::AmbiguousRegistration {
            role,
            address_type: taken.clone(),
        });
    }
    Ok(types)
}

fn unsupported(role: EndpointRole, address: &DataAddress) -> TransferError {
    RegistryError::UnsupportedAddressType {
        role,
        address_type: address.address_type().to_string(),
    }
    .into()
}

fn sorted<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut keys: Vec<String> = keys.cloned().collect();
    keys.sort();
    keys
}
