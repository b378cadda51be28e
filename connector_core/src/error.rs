//! Error types for the connector core.
//!
//! Each concern owns its own error enum; the root [`Error`] gathers them so
//! callers that do not care about the distinction can use `?` throughout.
//!
//! A policy denial is deliberately absent from this hierarchy. Denials are
//! ordinary outcomes carried by [`crate::policy::Decision`]; everything in
//! this module is a system fault.

use thiserror::Error;

/// Root error type for the connector.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bootstrap error: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transfer(e) => e.is_retryable(),
            Error::Io(_) => true,
            _ => false,
        }
    }
}

/// Which side of a transfer an endpoint sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointRole {
    Source,
    Sink,
}

impl std::fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointRole::Source => write!(f, "source"),
            EndpointRole::Sink => write!(f, "sink"),
        }
    }
}

/// Errors raised by the transfer endpoint registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No {role} factory supports address type '{address_type}'")]
    UnsupportedAddressType {
        role: EndpointRole,
        address_type: String,
    },

    #[error("Address type '{address_type}' is already claimed by another {role} factory")]
    AmbiguousRegistration {
        role: EndpointRole,
        address_type: String,
    },

    #[error("{role} factory '{factory}' declares no address types")]
    EmptyFactory { role: EndpointRole, factory: String },
}

/// Errors raised while constructing or storing policies.
///
/// Evaluation problems are not reported here; see [`EvaluationFailure`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Invalid constraint: {0}")]
    InvalidConstraint(String),

    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Policy not found: {0}")]
    NotFound(String),
}

/// A fault encountered while evaluating a single constraint.
///
/// These never escape the policy engine: each one is turned into a deny
/// reason on the resulting decision.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvaluationFailure {
    #[error("Operator {operator} is not supported for '{key}'")]
    UnsupportedOperator { operator: String, key: String },

    #[error("Cannot apply {operator} to {left} and {right}")]
    TypeMismatch {
        operator: String,
        left: String,
        right: String,
    },

    #[error("Evaluation function for '{key}' panicked: {message}")]
    FunctionPanicked { key: String, message: String },
}

/// Errors raised while moving data from a source to a sink.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("I/O failure on part '{part}': {message}")]
    Io { part: String, message: String },

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Executor error: {0}")]
    Executor(String),
}

impl TransferError {
    /// Build an I/O failure for the named part.
    pub fn io(part: impl Into<String>, err: impl std::fmt::Display) -> Self {
        TransferError::Io {
            part: part.into(),
            message: err.to_string(),
        }
    }

    /// Whether retrying the transfer may succeed.
    ///
    /// Misconfiguration (unknown address types, malformed addresses) is
    /// permanent; I/O and executor faults are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Io { .. } | TransferError::Executor(_))
    }
}

/// Errors raised by the policy, asset and contract stores.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Contract definition not found: {0}")]
    ContractNotFound(String),

    #[error("No contract definition covers asset {0}")]
    NoContractForAsset(String),

    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid record: {0}")]
    Invalid(String),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised during the extension bootstrap sequence.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Extension '{extension}' failed to initialize: {reason}")]
    ExtensionFailed { extension: String, reason: String },

    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },
}
