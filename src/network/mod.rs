use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::config::SessionContext;
use crate::error::{ChunkUploadError, Result, TransferError};
use crate::protocol::{FileData, FileDataResponse, FileToken};
use crate::transfer::Chunk;
use crate::transport::{DownloadHeaders, DownloadRequest, DownloadResponse, FileStore};

const FILEDATA_URL: &str = "api/upload/filedata";
const FILECHUNK_URL: &str = "api/upload/filechunk";
const DOWNLOAD_URL: &str = "api/file/download";

const FILE_TOKEN_PARAM: &str = "file-token";

/// Response headers of a download
pub mod headers {
    pub const FILE_NAME: &str = "file-name";
    pub const FILE_TYPE: &str = "file-type";
    pub const FILE_SIZE: &str = "file-size";
    pub const FILE_UPLOAD_DATE: &str = "file-upload-date";
    pub const UPLOADER_ID: &str = "uploader-id";
    pub const VALIDATE_HASH: &str = "validate-hash";
    pub const LOBBY_ID: &str = "lobby-id";
    pub const MEDIA_TOKEN: &str = "media-token";
}

/// HTTP client for the quiz server's file API
pub struct HttpStore {
    http: reqwest::Client,
    base_url: String,
    session: SessionContext,
}

impl HttpStore {
    pub fn new(base_url: &str, session: SessionContext) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self::with_client(http, base_url, session))
    }

    pub fn with_client(http: reqwest::Client, base_url: &str, session: SessionContext) -> Self {
        // Endpoints are relative, so the base always ends with a slash
        let base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        Self {
            http,
            base_url,
            session,
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }
}

#[async_trait]
impl FileStore for HttpStore {
    async fn register(&self, data: &FileData) -> Result<FileDataResponse> {
        let resp = self
            .http
            .post(self.url(FILEDATA_URL))
            .query(&self.session.query())
            .query(&[(FILE_TOKEN_PARAM, "")])
            .json(data)
            .send()
            .await?;

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "Metadata registration rejected");
            return Ok(FileDataResponse::Failed("Failed to upload data".to_string()));
        }
        Ok(resp.json().await?)
    }

    async fn upload_chunk(
        &self,
        chunk: &Chunk,
        token: &FileToken,
    ) -> std::result::Result<(), ChunkUploadError> {
        let resp = self
            .http
            .post(self.url(FILECHUNK_URL))
            .query(&self.session.query())
            .query(&[(FILE_TOKEN_PARAM, token.token.as_str())])
            .json(&chunk.to_dto())
            .send()
            .await
            .map_err(|e| ChunkUploadError::Network(e.to_string()))?;

        classify_chunk_status(resp.status())
    }

    async fn download(&self, request: &DownloadRequest) -> Result<DownloadResponse> {
        let resp = self
            .http
            .get(self.url(DOWNLOAD_URL))
            .query(&self.session.query())
            .header(headers::FILE_NAME, &request.file_name)
            .header(headers::LOBBY_ID, &request.lobby_id)
            .header(headers::MEDIA_TOKEN, &request.media_token)
            .send()
            .await
            .map_err(|e| TransferError::DownloadFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransferError::DownloadFailed(format!(
                "server answered {}",
                status
            )));
        }

        let headers = parse_download_headers(resp.headers());
        debug!(?headers, "Download headers");
        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransferError::from))
            .boxed();
        Ok(DownloadResponse { headers, body })
    }
}

fn classify_chunk_status(status: StatusCode) -> std::result::Result<(), ChunkUploadError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ChunkUploadError::Unauthorized),
        s => Err(ChunkUploadError::Status(s.as_u16())),
    }
}

fn parse_download_headers(map: &HeaderMap) -> DownloadHeaders {
    let text = |name: &str| {
        map.get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    DownloadHeaders {
        file_name: text(headers::FILE_NAME),
        file_type: text(headers::FILE_TYPE),
        file_size: text(headers::FILE_SIZE).and_then(|s| s.trim().parse().ok()),
        upload_date: text(headers::FILE_UPLOAD_DATE),
        uploader_id: text(headers::UPLOADER_ID),
        validate_hash: text(headers::VALIDATE_HASH),
    }
}
