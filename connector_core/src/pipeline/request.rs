//! Transfer requests and results.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::address::DataAddress;
use crate::error::TransferError;

/// A single transfer from a source address to a sink address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub id: Uuid,
    pub source: DataAddress,
    pub sink: DataAddress,
}

impl TransferRequest {
    pub fn new(source: DataAddress, sink: DataAddress) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            sink,
        }
    }
}

/// What a successful transfer moved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TransferSummary {
    pub request_id: Uuid,
    pub parts: usize,
    pub bytes: u64,
}

pub type TransferResult = Result<TransferSummary, TransferError>;
