//! Policy-gated transfers.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::ConnectorConfig;
use crate::error::{Error, PolicyError, StoreError};
use crate::pipeline::{
    BoundedExecutor, CancelToken, DataAddress, PipelineDispatcher, TransferEndpointRegistry,
    TransferRequest, TransferSummary,
};
use crate::policy::{Decision, ParticipantAgent, Policy, PolicyContext, PolicyEngine};
use crate::store::{AssetIndex, ContractDefinitionStore, PolicyStore};

/// How a transfer request ended, when it did not fault.
#[derive(Debug, Clone)]
pub enum TransferOutcome {
    Completed(TransferSummary),
    /// The governing policy denied the request. Nothing was moved.
    Denied(Decision),
}

impl TransferOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TransferOutcome::Completed(_))
    }
}

/// A started connector. Registration is closed.
pub struct ConnectorRuntime {
    config: ConnectorConfig,
    dispatcher: PipelineDispatcher,
    policy_engine: Arc<PolicyEngine>,
    policy_store: Arc<dyn PolicyStore>,
    asset_index: Arc<dyn AssetIndex>,
    contract_store: Arc<dyn ContractDefinitionStore>,
}

impl ConnectorRuntime {
    pub(crate) fn new(
        config: ConnectorConfig,
        registry: Arc<TransferEndpointRegistry>,
        policy_engine: Arc<PolicyEngine>,
        policy_store: Arc<dyn PolicyStore>,
        asset_index: Arc<dyn AssetIndex>,
        contract_store: Arc<dyn ContractDefinitionStore>,
        executor: Arc<BoundedExecutor>,
    ) -> Self {
        Self {
            config,
            dispatcher: PipelineDispatcher::new(registry, executor),
            policy_engine,
            policy_store,
            asset_index,
            contract_store,
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &PipelineDispatcher {
        &self.dispatcher
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

    /// Evaluate the policies governing an asset for a requester.
    ///
    /// The asset's contract definition supplies an access policy and a
    /// contract policy; a deny from the first is returned without evaluating
    /// the second. Definitions are tried in id order and the first one
    /// covering the asset governs.
    pub fn evaluate_asset(&self, asset_id: &str, agent: ParticipantAgent) -> Result<Decision, Error> {
        let asset = self
            .asset_index
            .find_by_id(asset_id)
            .ok_or_else(|| StoreError::AssetNotFound(asset_id.to_string()))?;
        let definition = self
            .contract_store
            .find_for_asset(&asset)
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NoContractForAsset(asset_id.to_string()))?;

        let context = PolicyContext::new(self.config.policy.scope.as_str(), agent);

        let access = self.load_policy(&definition.access_policy_id)?;
        let decision = self.policy_engine.evaluate(&access, &context);
        if !decision.allowed() || definition.contract_policy_id == definition.access_policy_id {
            return Ok(decision);
        }

        let contract = self.load_policy(&definition.contract_policy_id)?;
        Ok(self.policy_engine.evaluate(&contract, &context))
    }

    fn load_policy(&self, id: &str) -> Result<Arc<Policy>, Error> {
        self.policy_store
            .find_by_id(id)
            .ok_or_else(|| PolicyError::NotFound(id.to_string()).into())
    }

    /// Move an asset into `sink` if the requester is allowed to.
    ///
    /// A denial is an `Ok(TransferOutcome::Denied)`; only faults are errors.
    pub async fn transfer(
        &self,
        asset_id: &str,
        sink: DataAddress,
        agent: ParticipantAgent,
    ) -> Result<TransferOutcome, Error> {
        self.transfer_with_cancel(asset_id, sink, agent, CancelToken::new())
            .await
    }

    #[instrument(skip_all, fields(asset_id = %asset_id))]
    pub async fn transfer_with_cancel(
        &self,
        asset_id: &str,
        sink: DataAddress,
        agent: ParticipantAgent,
        cancel: CancelToken,
    ) -> Result<TransferOutcome, Error> {
        let decision = self.evaluate_asset(asset_id, agent)?;
        if !decision.allowed() {
            info!(asset_id = %asset_id, policy_id = %decision.policy_id, "Transfer denied");
            return Ok(TransferOutcome::Denied(decision));
        }

        let source = self.asset_index.resolve_address(asset_id)?;
        let request = TransferRequest::new(source, sink);
        let summary = self.dispatcher.execute_with_cancel(request, cancel).await?;
        Ok(TransferOutcome::Completed(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::{bootstrap, FileTransferExtension, SAMPLE_ASSET_ID};
    use crate::config::ASSET_PATH_SETTING;
    use crate::policy::{Action, Rule};
    use crate::store::{Asset, AssetSelector, ContractDefinition};
    use tempfile::tempdir;

    fn agent(region: &str) -> ParticipantAgent {
        ParticipantAgent::with_claims([("region", region)])
    }

    #[tokio::test]
    async fn test_gated_file_transfer() {
        let dir = tempdir().unwrap();
        let source_path = dir.path().join("provider").join("doc.txt");
        std::fs::create_dir_all(source_path.parent().unwrap()).unwrap();
        std::fs::write(&source_path, b"sample payload").unwrap();

        let config = ConnectorConfig::default()
            .with_setting(ASSET_PATH_SETTING, source_path.to_string_lossy());
        let runtime = bootstrap(config, &[&FileTransferExtension]).unwrap();

        let dest = dir.path().join("consumer");
        let sink = DataAddress::file(dest.to_string_lossy(), "copy.txt").unwrap();

        let outcome = runtime
            .transfer(SAMPLE_ASSET_ID, sink.clone(), agent("us"))
            .await
            .unwrap();
        match outcome {
            TransferOutcome::Denied(decision) => assert_eq!(decision.policy_id, "use-eu"),
            other => panic!("Expected denial, got {:?}", other),
        }
        assert!(!dest.join("copy.txt").exists());

        let outcome = runtime
            .transfer(SAMPLE_ASSET_ID, sink, agent("eu"))
            .await
            .unwrap();
        assert!(outcome.is_completed());
        assert_eq!(std::fs::read(dest.join("copy.txt")).unwrap(), b"sample payload");
    }

    #[test]
    fn test_missing_records_are_faults() {
        let runtime = bootstrap(ConnectorConfig::default(), &[&FileTransferExtension]).unwrap();

        assert!(matches!(
            runtime.evaluate_asset("unknown", agent("eu")),
            Err(Error::Store(StoreError::AssetNotFound(_)))
        ));

        runtime
            .asset_index()
            .accept(Asset::new("orphan").unwrap(), DataAddress::file("/tmp", "orphan").unwrap())
            .unwrap();
        assert!(matches!(
            runtime.evaluate_asset("orphan", agent("eu")),
            Err(Error::Store(StoreError::NoContractForAsset(_)))
        ));

        runtime
            .contract_store()
            .save(ContractDefinition::new("9", "missing", "missing", AssetSelector::for_asset("orphan")).unwrap())
            .unwrap();
        assert!(matches!(
            runtime.evaluate_asset("orphan", agent("eu")),
            Err(Error::Policy(PolicyError::NotFound(_)))
        ));
    }

    #[test]
    fn test_contract_policy_evaluated_after_access() {
        let runtime = bootstrap(ConnectorConfig::default(), &[&FileTransferExtension]).unwrap();
        runtime
            .policy_store()
            .save(Policy::new("nothing", vec![], vec![], vec![]).unwrap())
            .unwrap();
        runtime
            .policy_store()
            .save(
                Policy::new(
                    "anyone",
                    vec![Rule::permission(Action::new("USE"), vec![])],
                    vec![],
                    vec![],
                )
                .unwrap(),
            )
            .unwrap();
        runtime
            .asset_index()
            .accept(Asset::new("report").unwrap(), DataAddress::file("/tmp", "report").unwrap())
            .unwrap();
        runtime
            .contract_store()
            .save(ContractDefinition::new("2", "anyone", "nothing", AssetSelector::for_asset("report")).unwrap())
            .unwrap();

        let decision = runtime.evaluate_asset("report", agent("us")).unwrap();
        assert_eq!(decision.policy_id, "nothing");
        assert!(!decision.allowed());
    }
}
