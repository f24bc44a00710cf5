//! Chunked media transfer: compression, content hashing, chunking, and the
//! upload/download engines built on top of them.

mod download;
mod upload;

pub use download::{download, DownloadProgress, DownloadedFile};
pub use upload::{upload, UploadProgress, UploadReport};

use bytes::Bytes;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use xxhash_rust::xxh64::xxh64;

use crate::error::{Result, TransferError};
use crate::protocol::{FileChunk, FileData, HashDto};

const HASH_SEED: u64 = 0;

/// xxHash64 of a byte buffer. Integrity only, not security.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(u64);

impl ContentHash {
    pub fn of(data: &[u8]) -> Self {
        Self(xxh64(data, HASH_SEED))
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn to_dto(&self) -> HashDto {
        HashDto { hash: self.to_string() }
    }
}

// Decimal rendering is what the server stores and compares against.
impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw DEFLATE compression
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(TransferError::Codec)?;
    encoder.finish().map_err(TransferError::Codec)
}

/// Inverse of [`compress`]
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(TransferError::Codec)?;
    Ok(out)
}

/// A content-addressed slice of the compressed stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub file_name: Arc<str>,
    pub index: usize,
    pub payload: Bytes,
    pub hash: ContentHash,
}

impl Chunk {
    pub fn to_dto(&self) -> FileChunk {
        FileChunk {
            file_name: self.file_name.to_string(),
            index: self.index,
            chunk: self.payload.to_vec(),
            validate_hash: self.hash.to_dto(),
        }
    }
}

/// Immutable description of one file being moved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferDescriptor {
    pub file_name: String,
    pub mime_type: String,
    pub total_chunks: usize,
    pub chunk_hashes: Vec<ContentHash>,
    pub whole_file_hash: ContentHash,
}

impl FileTransferDescriptor {
    pub fn to_file_data(&self) -> FileData {
        FileData {
            file_name: self.file_name.clone(),
            file_type: self.mime_type.clone(),
            total_chunks: self.total_chunks,
            file_chunks_hashs: self.chunk_hashes.iter().map(ContentHash::to_dto).collect(),
            validate_hash: self.whole_file_hash.to_dto(),
        }
    }
}

/// Descriptor plus the chunks it describes, ready for upload
#[derive(Debug, Clone)]
pub struct PreparedUpload {
    pub descriptor: FileTransferDescriptor,
    pub chunks: Vec<Chunk>,
    pub compressed: Bytes,
}

impl PreparedUpload {
    /// Compress, hash and chunk `data` off the async executor
    pub async fn prepare(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Vec<u8>,
        chunk_size: usize,
    ) -> Result<Self> {
        let file_name = file_name.into();
        let mime_type = mime_type.into();
        tokio::task::spawn_blocking(move || {
            let compressed = compress(&data)?;
            tracing::debug!(
                original = data.len(),
                compressed = compressed.len(),
                "Compressed upload"
            );
            Self::from_compressed(file_name, mime_type, Bytes::from(compressed), chunk_size)
        })
        .await?
    }

    /// Hash and chunk an already compressed buffer
    pub fn from_compressed(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        compressed: Bytes,
        chunk_size: usize,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidConfig("chunk_size must be positive".into()));
        }
        let file_name = file_name.into();
        let shared_name: Arc<str> = Arc::from(file_name.as_str());

        let chunks: Vec<Chunk> = (0..compressed.len())
            .step_by(chunk_size)
            .enumerate()
            .map(|(index, start)| {
                let end = (start + chunk_size).min(compressed.len());
                let payload = compressed.slice(start..end);
                Chunk {
                    file_name: shared_name.clone(),
                    index,
                    hash: ContentHash::of(&payload),
                    payload,
                }
            })
            .collect();

        let descriptor = FileTransferDescriptor {
            file_name,
            mime_type: mime_type.into(),
            total_chunks: chunks.len(),
            chunk_hashes: chunks.iter().map(|c| c.hash).collect(),
            whole_file_hash: ContentHash::of(&compressed),
        };

        Ok(Self {
            descriptor,
            chunks,
            compressed,
        })
    }
}

/// Coarse media classification by mime-type prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Text,
    Image,
    Audio,
    Video,
    Other,
    Unknown,
}

impl MediaKind {
    pub fn classify(mime_type: Option<&str>) -> Self {
        match mime_type {
            None => MediaKind::Unknown,
            Some(m) if m.starts_with("text") => MediaKind::Text,
            Some(m) if m.starts_with("image") => MediaKind::Image,
            Some(m) if m.starts_with("audio") => MediaKind::Audio,
            Some(m) if m.starts_with("video") => MediaKind::Video,
            Some(_) => MediaKind::Other,
        }
    }
}

/// Decompressed download content with its declared mime type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: Bytes,
}

impl MediaBlob {
    pub fn kind(&self) -> MediaKind {
        MediaKind::classify(Some(&self.mime_type))
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Format a transfer rate as `"<N.NN> MB/s"`
pub fn format_speed(bytes: u64, seconds: f64) -> String {
    if seconds <= 0.0 {
        return "0 MB/s".to_string();
    }
    let megabytes = bytes as f64 / (1024.0 * 1024.0);
    format!("{:.2} MB/s", megabytes / seconds)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn pseudo_random(len: usize, seed: u64) -> Vec<u8> {
        let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (state >> 33) as u8
            })
            .collect()
    }

    #[test]
    fn test_hash_deterministic() {
        let data = pseudo_random(4096, 7);
        assert_eq!(ContentHash::of(&data), ContentHash::of(&data));
    }

    #[test]
    fn test_hash_bit_flip() {
        let data = pseudo_random(4096, 7);
        let mut flipped = data.clone();
        flipped[100] ^= 0b0000_0100;
        assert_ne!(ContentHash::of(&data), ContentHash::of(&flipped));
    }

    #[test]
    fn test_hash_reference_value() {
        // XXH64("", seed 0)
        assert_eq!(ContentHash::of(b"").value(), 0xEF46DB3751D8E999);
        assert_eq!(ContentHash::of(b"").to_string(), "17241709254077376921");
    }

    #[test]
    fn test_compress_round_trip() {
        let data = b"question question question answer answer".repeat(100);
        let compressed = compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_decompress_garbage_fails() {
        assert!(matches!(decompress(&[0xff; 16]), Err(TransferError::Codec(_))));
    }

    #[test]
    fn test_chunk_boundaries() {
        let compressed = Bytes::from(pseudo_random(400_000, 1));
        let prepared =
            PreparedUpload::from_compressed("clip.mp4", "video/mp4", compressed.clone(), 250_000)
                .unwrap();

        assert_eq!(prepared.descriptor.total_chunks, 2);
        assert_eq!(prepared.chunks[0].payload.len(), 250_000);
        assert_eq!(prepared.chunks[1].payload.len(), 150_000);
        assert_eq!(prepared.descriptor.chunk_hashes.len(), prepared.descriptor.total_chunks);
        assert_eq!(prepared.descriptor.whole_file_hash, ContentHash::of(&compressed));
        for (chunk, hash) in prepared.chunks.iter().zip(&prepared.descriptor.chunk_hashes) {
            assert_eq!(ContentHash::of(&chunk.payload), *hash);
        }
    }

    #[test]
    fn test_chunk_reconstruction() {
        let compressed = Bytes::from(pseudo_random(10_001, 3));
        let prepared = PreparedUpload::from_compressed("a", "b", compressed.clone(), 1000).unwrap();
        assert_eq!(prepared.descriptor.total_chunks, 11);

        let payloads: Vec<&[u8]> = prepared.chunks.iter().map(|c| c.payload.as_ref()).collect();
        assert_eq!(crate::buffer::concat_buffers(&payloads), compressed.to_vec());
    }

    #[test]
    fn test_empty_input_has_no_chunks() {
        let prepared = PreparedUpload::from_compressed("a", "b", Bytes::new(), 1000).unwrap();
        assert_eq!(prepared.descriptor.total_chunks, 0);
        assert!(prepared.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_prepare_compresses() {
        let data = b"quiz".repeat(10_000);
        let prepared = PreparedUpload::prepare("t.txt", "text/plain", data.clone(), 64).await.unwrap();
        assert_eq!(decompress(&prepared.compressed).unwrap(), data);
        assert_eq!(prepared.descriptor.mime_type, "text/plain");
    }

    #[test]
    fn test_descriptor_to_file_data() {
        let prepared =
            PreparedUpload::from_compressed("a.png", "image/png", Bytes::from_static(b"abcdef"), 4)
                .unwrap();
        let data = prepared.descriptor.to_file_data();
        assert_eq!(data.total_chunks, 2);
        assert_eq!(data.file_type, "image/png");
        assert_eq!(data.file_chunks_hashs[1].hash, ContentHash::of(b"ef").to_string());
    }

    #[test]
    fn test_media_kind() {
        assert_eq!(MediaKind::classify(Some("text/plain")), MediaKind::Text);
        assert_eq!(MediaKind::classify(Some("image/png")), MediaKind::Image);
        assert_eq!(MediaKind::classify(Some("audio/ogg")), MediaKind::Audio);
        assert_eq!(MediaKind::classify(Some("video/mp4")), MediaKind::Video);
        assert_eq!(MediaKind::classify(Some("application/pdf")), MediaKind::Other);
        assert_eq!(MediaKind::classify(None), MediaKind::Unknown);
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(1024 * 1024, 0.0), "0 MB/s");
        assert_eq!(format_speed(1024 * 1024, 1.0), "1.00 MB/s");
        assert_eq!(format_speed(3 * 1024 * 1024, 2.0), "1.50 MB/s");
    }
}
