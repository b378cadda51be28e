//! Source and sink capabilities.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::address::DataAddress;
use super::executor::CancelToken;
use super::request::TransferSummary;
use crate::error::TransferError;

/// One unit of data moved from a source to a sink.
#[derive(Clone, PartialEq, Eq)]
pub struct DataPart {
    pub name: String,
    /// Byte offset of this part within the transferred object.
    pub offset: u64,
    pub bytes: Vec<u8>,
}

impl DataPart {
    pub fn new(name: impl Into<String>, offset: u64, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            offset,
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for DataPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataPart")
            .field("name", &self.name)
            .field("offset", &self.offset)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Lazy, finite sequence of parts.
pub type PartStream = BoxStream<'static, Result<DataPart, TransferError>>;

/// Produces the parts of one transfer.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Open the source. Parts are read as the stream is polled.
    async fn open(&self) -> Result<PartStream, TransferError>;
}

/// Receives the parts of one transfer.
///
/// Writes for one request may run concurrently and complete out of order
/// unless [`DataSink::ordered`] returns `true`. After cancellation the sink
/// is left as it was at the last successful write; cleaning up is the sink's
/// business.
#[async_trait]
pub trait DataSink: Send + Sync {
    /// Write one part, returning the number of bytes written.
    async fn write(&self, part: DataPart, cancel: &CancelToken) -> Result<u64, TransferError>;

    /// Called once after every part was written successfully.
    async fn complete(&self, _summary: &TransferSummary) -> Result<(), TransferError> {
        Ok(())
    }

    /// Whether parts must be delivered one at a time in source order.
    fn ordered(&self) -> bool {
        false
    }
}

/// Creates sources for the address types it declares.
pub trait DataSourceFactory: Send + Sync {
    fn name(&self) -> &str;

    fn supported_types(&self) -> Vec<String>;

    fn create_source(&self, address: &DataAddress) -> Result<Box<dyn DataSource>, TransferError>;
}

/// Creates sinks for the address types it declares.
pub trait DataSinkFactory: Send + Sync {
    fn name(&self) -> &str;

    fn supported_types(&self) -> Vec<String>;

    fn create_sink(&self, address: &DataAddress) -> Result<Arc<dyn DataSink>, TransferError>;
}
