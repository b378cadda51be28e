//! Transfer pipeline.
//!
//! Address types map to source and sink factories in the
//! [`TransferEndpointRegistry`]. The [`PipelineDispatcher`] resolves both
//! ends of a [`TransferRequest`] and moves the source's parts through the
//! shared [`BoundedExecutor`].

pub mod address;
pub mod dispatcher;
pub mod endpoint;
pub mod executor;
pub mod file;
pub mod registry;
pub mod request;

pub use address::{DataAddress, FILE_TYPE};
pub use dispatcher::PipelineDispatcher;
pub use endpoint::{DataPart, DataSink, DataSinkFactory, DataSource, DataSourceFactory, PartStream};
pub use executor::{BoundedExecutor, CancelToken, TaskHandle, DEFAULT_MAX_CONCURRENCY};
pub use file::{FileDataSinkFactory, FileDataSourceFactory, DEFAULT_CHUNK_SIZE};
pub use registry::TransferEndpointRegistry;
pub use request::{TransferRequest, TransferResult, TransferSummary};
