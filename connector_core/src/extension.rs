//! Service extensions and the bootstrap context.
//!
//! Bootstrap runs in two phases. During the first, extensions receive a
//! mutable [`ServiceContext`] and register endpoint factories, policies,
//! assets, contract definitions and evaluation functions. [`ServiceContext::start`]
//! then freezes the endpoint registry and hands back a [`ConnectorRuntime`];
//! no registration is possible after that point.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::{ConnectorConfig, ASSET_PATH_SETTING};
use crate::error::{BootstrapError, Error, PolicyError, RegistryError};
use crate::pipeline::{
    BoundedExecutor, DataAddress, DataSinkFactory, DataSourceFactory, FileDataSinkFactory,
    FileDataSourceFactory, TransferEndpointRegistry,
};
use crate::policy::{
    region_function, Action, Constraint, Expression, Operator, Policy, PolicyEngine, Rule,
    RuleKind, ALL_SCOPES,
};
use crate::runtime::ConnectorRuntime;
use crate::store::{
    Asset, AssetIndex, AssetSelector, ContractDefinition, ContractDefinitionStore,
    InMemoryAssetIndex, InMemoryContractDefinitionStore, InMemoryPolicyStore, PolicyStore,
};

/// Id of the sample policy.
pub const USE_EU_POLICY_ID: &str = "use-eu";

/// Id of the sample asset.
pub const SAMPLE_ASSET_ID: &str = "test-document";

/// Id of the sample contract definition.
pub const SAMPLE_CONTRACT_ID: &str = "1";

/// A unit of bootstrap wiring.
pub trait ServiceExtension: Send + Sync {
    fn name(&self) -> &str;

    fn initialize(&self, context: &mut ServiceContext) -> Result<(), Error>;
}

/// Everything an extension may register into.
pub struct ServiceContext {
    config: ConnectorConfig,
    registry: TransferEndpointRegistry,
    policy_engine: Arc<PolicyEngine>,
    policy_store: Arc<dyn PolicyStore>,
    asset_index: Arc<dyn AssetIndex>,
    contract_store: Arc<dyn ContractDefinitionStore>,
    executor: Arc<BoundedExecutor>,
    loaded: Vec<String>,
}

impl ServiceContext {
    /// A context backed by in-memory stores.
    pub fn new(config: ConnectorConfig) -> Result<Self, Error> {
        Self::with_stores(
            config,
            Arc::new(InMemoryPolicyStore::new()),
            Arc::new(InMemoryAssetIndex::new()),
            Arc::new(InMemoryContractDefinitionStore::new()),
        )
    }

    pub fn with_stores(
        config: ConnectorConfig,
        policy_store: Arc<dyn PolicyStore>,
        asset_index: Arc<dyn AssetIndex>,
        contract_store: Arc<dyn ContractDefinitionStore>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let executor = Arc::new(BoundedExecutor::new(config.executor.max_concurrency)?);

        Ok(Self {
            config,
            registry: TransferEndpointRegistry::new(),
            policy_engine: Arc::new(PolicyEngine::new()),
            policy_store,
            asset_index,
            contract_store,
            executor,
            loaded: Vec::new(),
        })
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// A named setting, or `default` when absent.
    pub fn setting<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.config.setting(key, default)
    }

    pub fn register_source_factory(
        &mut self,
        factory: Arc<dyn DataSourceFactory>,
    ) -> Result<(), RegistryError> {
        self.registry.register_source_factory(factory)
    }

    pub fn register_sink_factory(
        &mut self,
        factory: Arc<dyn DataSinkFactory>,
    ) -> Result<(), RegistryError> {
        self.registry.register_sink_factory(factory)
    }

    pub fn policy_engine(&self) -> &PolicyEngine {
        &self.policy_engine
    }

    pub fn policy_store(&self) -> &dyn PolicyStore {
        self.policy_store.as_ref()
    }

    pub fn asset_index(&self) -> &dyn AssetIndex {
        self.asset_index.as_ref()
    }

    pub fn contract_store(&self) -> &dyn ContractDefinitionStore {
        self.contract_store.as_ref()
    }

    /// Run one extension's initialization.
    pub fn load(&mut self, extension: &dyn ServiceExtension) -> Result<(), BootstrapError> {
        let name = extension.name().to_string();
        info!(extension = %name, "Initializing extension");

        extension.initialize(self).map_err(|e| {
            error!(extension = %name, error = %e, "Extension failed to initialize");
            match e {
                Error::Bootstrap(inner) => inner,
                other => BootstrapError::ExtensionFailed {
                    extension: name.clone(),
                    reason: other.to_string(),
                },
            }
        })?;

        self.loaded.push(name);
        Ok(())
    }

    /// Names of the extensions loaded so far, in load order.
    pub fn loaded_extensions(&self) -> &[String] {
        &self.loaded
    }

    /// Freeze the registry and start serving transfers.
    pub fn start(self) -> ConnectorRuntime {
        info!(
            extensions = ?self.loaded,
            source_types = ?self.registry.source_types(),
            sink_types = ?self.registry.sink_types(),
            functions = self.policy_engine.function_count(),
            "Connector started"
        );
        ConnectorRuntime::new(
            self.config,
            Arc::new(self.registry),
            self.policy_engine,
            self.policy_store,
            self.asset_index,
            self.contract_store,
            self.executor,
        )
    }
}

/// Load every extension in order and start the runtime.
pub fn bootstrap(
    config: ConnectorConfig,
    extensions: &[&dyn ServiceExtension],
) -> Result<ConnectorRuntime, Error> {
    let mut context = ServiceContext::new(config)?;
    for extension in extensions {
        context.load(*extension)?;
    }
    Ok(context.start())
}

/// The sample policy: `USE` is permitted when `region EQ "eu"`.
pub fn use_eu_policy() -> Result<Policy, PolicyError> {
    Policy::new(
        USE_EU_POLICY_ID,
        vec![Rule::permission(
            Action::new("USE"),
            vec![Constraint::atomic(
                Expression::literal("region"),
                Operator::Eq,
                Expression::literal("eu"),
            )],
        )],
        vec![],
        vec![],
    )
}

/// Wires file transfer: file endpoints, the sample policy, asset and
/// contract definition, and the region evaluation function.
#[derive(Debug, Default)]
pub struct FileTransferExtension;

impl ServiceExtension for FileTransferExtension {
    fn name(&self) -> &str {
        "file-transfer"
    }

    fn initialize(&self, context: &mut ServiceContext) -> Result<(), Error> {
        let chunk_size = context.config().transfer.chunk_size;
        context.register_source_factory(Arc::new(FileDataSourceFactory::new(chunk_size)))?;
        context.register_sink_factory(Arc::new(FileDataSinkFactory))?;

        context.policy_store().save(use_eu_policy()?)?;

        let asset_path = context.config().asset_path().to_string();
        let address = DataAddress::from_file_path(&asset_path).map_err(|e| {
            BootstrapError::InvalidSetting {
                key: ASSET_PATH_SETTING.to_string(),
                reason: e.to_string(),
            }
        })?;
        context.asset_index().accept(
            Asset::new(SAMPLE_ASSET_ID)?.with_property("type", "text"),
            address,
        )?;

        context.contract_store().save(ContractDefinition::new(
            SAMPLE_CONTRACT_ID,
            USE_EU_POLICY_ID,
            USE_EU_POLICY_ID,
            AssetSelector::for_asset(SAMPLE_ASSET_ID),
        )?)?;

        context.policy_engine().register_function(
            ALL_SCOPES,
            RuleKind::Permission,
            "region",
            region_function(),
        );

        Ok(())
    }
}
