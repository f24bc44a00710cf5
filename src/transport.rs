use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::error::{ChunkUploadError, Result};
use crate::protocol::{FileData, FileDataResponse, FileToken};
use crate::transfer::Chunk;

/// Streamed response body, in server send order
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Addressing and authorization for one media download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub file_name: String,
    pub lobby_id: String,
    pub media_token: String,
}

/// Metadata headers declared by the server for a download
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadHeaders {
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub file_size: Option<u64>,
    pub upload_date: Option<String>,
    pub uploader_id: Option<String>,
    pub validate_hash: Option<String>,
}

pub struct DownloadResponse {
    pub headers: DownloadHeaders,
    pub body: ByteStream,
}

/// Remote store the transfer engine talks to.
///
/// `HttpStore` speaks to the real server; tests plug in in-memory stores.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Register file metadata and obtain an upload token
    async fn register(&self, data: &FileData) -> Result<FileDataResponse>;

    /// Upload one chunk under the given token
    async fn upload_chunk(
        &self,
        chunk: &Chunk,
        token: &FileToken,
    ) -> std::result::Result<(), ChunkUploadError>;

    /// Open a streamed download. Non-OK responses are errors.
    async fn download(&self, request: &DownloadRequest) -> Result<DownloadResponse>;
}
