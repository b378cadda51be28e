//! Filesystem endpoints for `File` addresses.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

use super::address::{DataAddress, FILENAME_PROPERTY, FILE_TYPE, PATH_PROPERTY};
use super::endpoint::{DataPart, DataSink, DataSinkFactory, DataSource, DataSourceFactory, PartStream};
use super::executor::CancelToken;
use super::request::TransferSummary;
use crate::error::TransferError;

/// Default read size for file sources.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

fn resolve_path(address: &DataAddress) -> Result<PathBuf, TransferError> {
    let dir = address.required(PATH_PROPERTY)?;
    let filename = address.required(FILENAME_PROPERTY)?;
    Ok(Path::new(dir).join(filename))
}

/// Creates [`FileDataSource`]s.
#[derive(Debug, Clone)]
pub struct FileDataSourceFactory {
    chunk_size: usize,
}

impl FileDataSourceFactory {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Default for FileDataSourceFactory {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl DataSourceFactory for FileDataSourceFactory {
    fn name(&self) -> &str {
        "file-source"
    }

    fn supported_types(&self) -> Vec<String> {
        vec![FILE_TYPE.to_string()]
    }

    fn create_source(&self, address: &DataAddress) -> Result<Box<dyn DataSource>, TransferError> {
        Ok(Box::new(FileDataSource {
            path: resolve_path(address)?,
            chunk_size: self.chunk_size,
        }))
    }
}

/// Reads a file as a sequence of fixed-size parts.
#[derive(Debug)]
pub struct FileDataSource {
    path: PathBuf,
    chunk_size: usize,
}

struct ReadState {
    file: File,
    name: String,
    offset: u64,
    index: usize,
    chunk_size: usize,
}

#[async_trait]
impl DataSource for FileDataSource {
    async fn open(&self) -> Result<PartStream, TransferError> {
        let name = self
            .path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file = File::open(&self.path)
            .await
            .map_err(|e| TransferError::io(&name, e))?;
        debug!(path = %self.path.display(), chunk_size = self.chunk_size, "Opened file source");

        let state = ReadState {
            file,
            name,
            offset: 0,
            index: 0,
            chunk_size: self.chunk_size,
        };

        let parts = stream::try_unfold(state, read_part);
        Ok(Box::pin(parts))
    }
}

async fn read_part(mut state: ReadState) -> Result<Option<(DataPart, ReadState)>, TransferError> {
    let mut bytes = Vec::with_capacity(state.chunk_size);
    let part_name = format!("{}#{}", state.name, state.index);
    (&mut state.file)
        .take(state.chunk_size as u64)
        .read_to_end(&mut bytes)
        .await
        .map_err(|e| TransferError::io(&part_name, e))?;

    if bytes.is_empty() {
        return Ok(None);
    }

    let part = DataPart::new(part_name, state.offset, bytes);
    state.offset += part.len() as u64;
    state.index += 1;
    Ok(Some((part, state)))
}

/// Creates [`FileDataSink`]s.
#[derive(Debug, Clone, Default)]
pub struct FileDataSinkFactory;

impl DataSinkFactory for FileDataSinkFactory {
    fn name(&self) -> &str {
        "file-sink"
    }

    fn supported_types(&self) -> Vec<String> {
        vec![FILE_TYPE.to_string()]
    }

    fn create_sink(&self, address: &DataAddress) -> Result<Arc<dyn DataSink>, TransferError> {
        Ok(Arc::new(FileDataSink {
            path: resolve_path(address)?,
        }))
    }
}

/// Writes each part at its own offset, so parts may land in any order.
///
/// The target is truncated to the transferred length on completion. A
/// cancelled transfer leaves whatever parts were already written.
#[derive(Debug)]
pub struct FileDataSink {
    path: PathBuf,
}

impl FileDataSink {
    async fn open_target(&self, part: &str) -> Result<File, TransferError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io(part, e))?;
        }
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .await
            .map_err(|e| TransferError::io(part, e))
    }
}

#[async_trait]
impl DataSink for FileDataSink {
    async fn write(&self, part: DataPart, cancel: &CancelToken) -> Result<u64, TransferError> {
        cancel.check()?;
        let mut file = self.open_target(&part.name).await?;

        cancel.check()?;
        file.seek(SeekFrom::Start(part.offset))
            .await
            .map_err(|e| TransferError::io(&part.name, e))?;
        file.write_all(&part.bytes)
            .await
            .map_err(|e| TransferError::io(&part.name, e))?;
        file.flush()
            .await
            .map_err(|e| TransferError::io(&part.name, e))?;

        debug!(part = %part.name, offset = part.offset, len = part.len(), "Wrote part");
        Ok(part.len() as u64)
    }

    async fn complete(&self, summary: &TransferSummary) -> Result<(), TransferError> {
        let name = self.path.display().to_string();
        let file = self.open_target(&name).await?;
        file.set_len(summary.bytes)
            .await
            .map_err(|e| TransferError::io(&name, e))?;
        file.sync_all()
            .await
            .map_err(|e| TransferError::io(&name, e))?;
        info!(
            request_id = %summary.request_id,
            path = %self.path.display(),
            bytes = summary.bytes,
            "File sink complete"
        );
        Ok(())
    }
}
