//! Connector core.
//!
//! Decides whether a requester may transfer an asset by evaluating the
//! governing policy against the requester's claims, then moves the data from
//! a source endpoint to a sink endpoint through a bounded executor.

pub mod catalog;
pub mod config;
pub mod error;
pub mod extension;
pub mod pipeline;
pub mod policy;
pub mod runtime;
pub mod store;

pub use catalog::{AtlasApi, AtlasEntity, AtlasPropertyLookup, DataEntryPropertyLookup, InMemoryAtlasApi};
pub use config::ConnectorConfig;
pub use error::{Error, EvaluationFailure, PolicyError, RegistryError, TransferError};
pub use extension::{bootstrap, FileTransferExtension, ServiceContext, ServiceExtension};
pub use pipeline::{
    BoundedExecutor, CancelToken, DataAddress, PipelineDispatcher, TransferEndpointRegistry,
    TransferRequest, TransferResult, TransferSummary,
};
pub use policy::{Decision, ParticipantAgent, Policy, PolicyContext, PolicyEngine};
pub use runtime::{ConnectorRuntime, TransferOutcome};

pub type Result<T, E = Error> = std::result::Result<T, E>;
