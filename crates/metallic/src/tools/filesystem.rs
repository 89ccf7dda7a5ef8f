//! File operations on a computer.

use std::pin::Pin;
use std::sync::Arc;

use metallic_proto::filesystem::filesystem_client::FilesystemClient;
use metallic_proto::filesystem::{
    CreateDirectoryRequest, ExistsRequest, FileChunk, GetStatsRequest, ReadDirectoryRequest,
    ReadFileRequest, ReadFileStreamRequest, RenameRequest, UnlinkRequest, WatchRequest,
    WriteFileRequest, WriteFileResponse,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::transport::Channel;
use tracing::{debug, info};

use super::watch::{WatchHandle, WatchListener, WatchOptions, events_mask};
use crate::error::{Error, Result, check_success};
use crate::transport::AgentTransport;

/// Stream of file content chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Buffered chunks in flight on a write stream.
const WRITE_BUFFER: usize = 16;

/// How to decode a file on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadFormat {
    #[default]
    Text,
    Bytes,
}

impl ReadFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Bytes => "bytes",
        }
    }
}

/// File content in one of the supported formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Bytes(Vec<u8>),
}

impl FileContent {
    pub const fn format(&self) -> ReadFormat {
        match self {
            Self::Text(_) => ReadFormat::Text,
            Self::Bytes(_) => ReadFormat::Bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(s) => s.into_bytes(),
            Self::Bytes(b) => b,
        }
    }
}

impl From<String> for FileContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for FileContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<&[u8]> for FileContent {
    fn from(b: &[u8]) -> Self {
        Self::Bytes(b.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStats {
    pub is_directory: bool,
    pub is_file: bool,
    pub size: u64,
    pub modified_time: String,
}

pub(crate) fn write_request(path: &str, content: FileContent) -> WriteFileRequest {
    let format = content.format().as_str().to_string();
    let (content, binary) = match content {
        FileContent::Text(text) => (text, Vec::new()),
        FileContent::Bytes(bytes) => (String::new(), bytes),
    };
    WriteFileRequest {
        path: path.to_string(),
        format,
        content,
        binary,
    }
}

/// Adapt raw file chunks into a content stream.
///
/// Empty chunks are skipped. The stream ends after a chunk marked `end`, after
/// a chunk carrying an error, or when the transport ends.
pub(crate) fn content_stream<S>(chunks: S) -> ChunkStream
where
    S: Stream<Item = std::result::Result<FileChunk, tonic::Status>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        tokio::pin!(chunks);
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(chunk) => {
                    if !chunk.error.is_empty() {
                        yield Err(Error::Remote(chunk.error));
                        break;
                    }
                    if !chunk.content.is_empty() {
                        yield Ok(chunk.content);
                    }
                    if chunk.end {
                        break;
                    }
                }
                Err(status) => {
                    yield Err(Error::from(status));
                    break;
                }
            }
        }
    })
}

/// Sink for a client-streamed file upload.
///
/// Chunks are sent as they are written; [`FileWriter::finish`] sends the end
/// marker and returns the server's verdict. Dropping the writer without
/// finishing leaves the upload unterminated.
#[derive(Debug)]
pub struct FileWriter {
    path: String,
    tx: Option<mpsc::Sender<FileChunk>>,
    call: Option<JoinHandle<Result<()>>>,
}

impl FileWriter {
    pub(crate) const fn new(
        path: String,
        tx: mpsc::Sender<FileChunk>,
        call: JoinHandle<Result<()>>,
    ) -> Self {
        Self {
            path,
            tx: Some(tx),
            call: Some(call),
        }
    }

    pub async fn write(&mut self, chunk: impl Into<Vec<u8>>) -> Result<()> {
        let chunk = FileChunk {
            path: self.path.clone(),
            content: chunk.into(),
            end: false,
            error: String::new(),
        };
        let Some(tx) = &self.tx else {
            return Err(Error::Transport("File write stream already closed".into()));
        };
        if tx.send(chunk).await.is_err() {
            // The call ended early; its result explains why.
            return Err(self
                .join()
                .await
                .err()
                .unwrap_or_else(|| Error::Transport("File write stream already closed".into())));
        }
        Ok(())
    }

    /// Send the end marker, close the stream and wait for the response.
    pub async fn finish(mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            let end = FileChunk {
                path: self.path.clone(),
                content: Vec::new(),
                end: true,
                error: String::new(),
            };
            // A failed send means the call already ended; join reports it.
            let _ = tx.send(end).await;
        }
        self.join().await
    }

    async fn join(&mut self) -> Result<()> {
        self.tx = None;
        match self.call.take() {
            Some(call) => call
                .await
                .map_err(|e| Error::Transport(format!("File write task failed: {e}")))?,
            None => Err(Error::Transport("File write stream already closed".into())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Filesystem {
    transport: AgentTransport,
}

impl Filesystem {
    pub(crate) const fn new(transport: AgentTransport) -> Self {
        Self { transport }
    }

    fn client(&self) -> FilesystemClient<Channel> {
        FilesystemClient::new(self.transport.channel())
    }

    pub async fn read_file(&self, path: &str, format: ReadFormat) -> Result<FileContent> {
        let resp = self
            .client()
            .read_file(self.transport.request(ReadFileRequest {
                path: path.to_string(),
                format: format.as_str().to_string(),
            }))
            .await?
            .into_inner();
        check_success(resp.success, &resp.error)?;
        Ok(match format {
            ReadFormat::Text => FileContent::Text(resp.content),
            ReadFormat::Bytes => FileContent::Bytes(resp.binary),
        })
    }

    pub async fn read_to_string(&self, path: &str) -> Result<String> {
        match self.read_file(path, ReadFormat::Text).await? {
            FileContent::Text(text) => Ok(text),
            FileContent::Bytes(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }

    pub async fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        Ok(self.read_file(path, ReadFormat::Bytes).await?.into_bytes())
    }

    pub async fn read_file_stream(&self, path: &str) -> Result<ChunkStream> {
        debug!(path, "Opening read stream");
        let stream = self
            .client()
            .read_file_stream(self.transport.request(ReadFileStreamRequest {
                path: path.to_string(),
            }))
            .await?
            .into_inner();
        Ok(content_stream(stream))
    }

    pub async fn write_file(&self, path: &str, content: impl Into<FileContent>) -> Result<()> {
        let resp = self
            .client()
            .write_file(self.transport.request(write_request(path, content.into())))
            .await?
            .into_inner();
        check_success(resp.success, &resp.error)
    }

    /// Open a streamed upload to `path`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create_write_stream(&self, path: &str) -> FileWriter {
        let (tx, rx) = mpsc::channel(WRITE_BUFFER);
        let mut client = self.client();
        let request = self.transport.request(ReceiverStream::new(rx));
        let call = tokio::spawn(async move {
            let resp: WriteFileResponse = client.write_file_stream(request).await?.into_inner();
            check_success(resp.success, &resp.error)
        });
        FileWriter::new(path.to_string(), tx, call)
    }

    pub async fn list_directory(&self, path: &str) -> Result<Vec<String>> {
        let resp = self
            .client()
            .read_directory(self.transport.request(ReadDirectoryRequest {
                path: path.to_string(),
            }))
            .await?
            .into_inner();
        check_success(resp.success, &resp.error)?;
        Ok(resp.files)
    }

    pub async fn create_directory(&self, path: &str) -> Result<()> {
        let resp = self
            .client()
            .create_directory(self.transport.request(CreateDirectoryRequest {
                path: path.to_string(),
            }))
            .await?
            .into_inner();
        check_success(resp.success, &resp.error)
    }

    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let resp = self
            .client()
            .rename(self.transport.request(RenameRequest {
                old_path: old_path.to_string(),
                new_path: new_path.to_string(),
            }))
            .await?
            .into_inner();
        check_success(resp.success, &resp.error)
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let resp = self
            .client()
            .unlink(self.transport.request(UnlinkRequest {
                path: path.to_string(),
            }))
            .await?
            .into_inner();
        check_success(resp.success, &resp.error)
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        let resp = self
            .client()
            .exists(self.transport.request(ExistsRequest {
                path: path.to_string(),
            }))
            .await?
            .into_inner();
        check_success(resp.success, &resp.error)?;
        Ok(resp.exists)
    }

    pub async fn stats(&self, path: &str) -> Result<FileStats> {
        let resp = self
            .client()
            .get_stats(self.transport.request(GetStatsRequest {
                path: path.to_string(),
            }))
            .await?
            .into_inner();
        check_success(resp.success, &resp.error)?;
        Ok(FileStats {
            is_directory: resp.is_directory,
            is_file: resp.is_file,
            size: resp.size,
            modified_time: resp.modified_time,
        })
    }

    /// Watch `path` for changes until stopped, timed out or closed remotely.
    pub async fn watch(
        &self,
        path: &str,
        listener: Arc<dyn WatchListener>,
        opts: WatchOptions,
    ) -> Result<WatchHandle> {
        let mask = events_mask(&opts.events);
        info!(path, recursive = opts.recursive, mask, "Starting watch");
        let stream = self
            .client()
            .watch(self.transport.request(WatchRequest {
                path: path.to_string(),
                recursive: opts.recursive,
                events: mask,
            }))
            .await?
            .into_inner();
        Ok(WatchHandle::spawn(stream, mask, opts.timeout, listener))
    }
}
