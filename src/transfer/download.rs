use bytes::Bytes;
use futures_util::StreamExt;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{decompress, format_speed, ContentHash, MediaBlob, MediaKind};
use crate::buffer::concat_buffers;
use crate::error::{Result, TransferError};
use crate::transport::{DownloadRequest, FileStore};

const UNKNOWN: &str = "unknown";
const DEFAULT_FILE_TYPE: &str = "video/mp4";

/// Progress snapshot for a download.
///
/// `blob`, `kind` and `hash` are only set on the terminal event, which is the
/// only event with `current == 100`.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub current: u8,
    pub speed: String,
    pub name: String,
    pub size: Option<u64>,
    pub upload_date: String,
    pub uploader_id: String,
    pub blob: Option<MediaBlob>,
    pub kind: Option<MediaKind>,
    pub hash: Option<String>,
}

/// A verified, decompressed download
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedFile {
    pub name: String,
    pub blob: MediaBlob,
    pub kind: MediaKind,
    pub upload_date: String,
    pub uploader_id: String,
    pub hash: String,
}

/// Fetch, verify and decompress one file.
///
/// The body is accumulated in arrival order, then checked against the
/// declared `file-size` (truncation) and `validate-hash` (corruption) before
/// anything is handed back.
pub async fn download<S, F>(
    store: &S,
    request: &DownloadRequest,
    cancel: &CancellationToken,
    on_progress: F,
) -> Result<DownloadedFile>
where
    S: FileStore + ?Sized,
    F: Fn(DownloadProgress),
{
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        response = store.download(request) => response?,
    };
    let headers = response.headers;
    let mut body = response.body;

    let expected_hash = headers.validate_hash.ok_or(TransferError::MissingHash)?;
    let name = headers.file_name.unwrap_or_else(|| UNKNOWN.to_string());
    let file_type = headers
        .file_type
        .unwrap_or_else(|| DEFAULT_FILE_TYPE.to_string());
    let upload_date = headers.upload_date.unwrap_or_else(|| UNKNOWN.to_string());
    let uploader_id = headers.uploader_id.unwrap_or_else(|| UNKNOWN.to_string());
    let size = headers.file_size;

    let event = |current: u8, speed: String| DownloadProgress {
        current,
        speed,
        name: name.clone(),
        size,
        upload_date: upload_date.clone(),
        uploader_id: uploader_id.clone(),
        blob: None,
        kind: None,
        hash: None,
    };

    on_progress(event(0, format_speed(0, 0.0)));

    let started = Instant::now();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut received: u64 = 0;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            next = body.next() => next,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk?;
        received += chunk.len() as u64;
        chunks.push(chunk);

        let speed = format_speed(received, started.elapsed().as_secs_f64());
        on_progress(event(percent(received, size), speed));
    }
    let end_speed = format_speed(received, started.elapsed().as_secs_f64());
    debug!(file = %name, received, chunks = chunks.len(), "Download stream drained");

    if let Some(expected) = size {
        if received != expected {
            error!(file = %name, expected, received, "Downloaded size mismatch");
            return Err(TransferError::SizeMismatch {
                expected,
                actual: received,
            });
        }
    }

    let data = concat_buffers(&chunks);
    drop(chunks);
    let actual_hash = ContentHash::of(&data).to_string();
    if actual_hash != expected_hash {
        error!(file = %name, expected = %expected_hash, actual = %actual_hash, "Hash is not valid");
        return Err(TransferError::IntegrityCheckFailed {
            expected: expected_hash,
            actual: actual_hash,
        });
    }

    let decompressed = tokio::task::spawn_blocking(move || decompress(&data)).await??;
    let blob = MediaBlob {
        mime_type: file_type,
        data: Bytes::from(decompressed),
    };
    let kind = blob.kind();
    info!(file = %name, size = blob.size(), ?kind, "Download complete");

    on_progress(DownloadProgress {
        blob: Some(blob.clone()),
        kind: Some(kind),
        hash: Some(actual_hash.clone()),
        ..event(100, end_speed)
    });

    Ok(DownloadedFile {
        name,
        blob,
        kind,
        upload_date,
        uploader_id,
        hash: actual_hash,
    })
}

/// Intermediate percentage; 100 is reserved for the verified terminal event.
fn percent(received: u64, total: Option<u64>) -> u8 {
    match total {
        Some(total) if total > 0 => (received.saturating_mul(100) / total).min(99) as u8,
        _ => 0,
    }
}
