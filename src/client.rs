//! HTTP client for the chunked-upload server and the transfer loop itself.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use async_stream::try_stream;
use futures::stream::BoxStream;
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::session::UploadSession;

const MEBIBYTE: u64 = 1024 * 1024;

/// Chunk size used on the wire. Every chunk but the last is exactly this long.
pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = MEBIBYTE;

pub const FILE_NAME_HEADER: &str = "x-file-name";
pub const FILE_OFFSET_HEADER: &str = "x-file-offset";

const STATUS_ROUTE: &str = "upload-status/";
const UPLOAD_ROUTE: &str = "upload-octet/";

/// Server-reported state of a file, used to derive the resume point.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadStatus {
    pub uploaded_bytes: u64,
}

#[derive(Clone, Debug, Default)]
pub struct UploadProgress {
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
}

impl UploadProgress {
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            100.0
        } else {
            (self.bytes_uploaded as f64 / self.total_bytes as f64) * 100.0
        }
    }
}

#[derive(Debug)]
pub enum UploadEvent {
    Progress(UploadProgress),
    /// All chunks acknowledged by the server (or nothing left to send).
    Complete,
    /// The session's cancellation token fired; no further chunks were sent.
    Canceled,
}

enum ChunkOutcome {
    Sent,
    Canceled,
}

/// Number of chunks needed to cover `file_size` bytes.
pub fn chunk_count(file_size: u64, chunk_size: u64) -> u64 {
    file_size.div_ceil(chunk_size)
}

/// First chunk still missing on the server, given its uploaded byte count.
pub fn resume_chunk_index(uploaded_bytes: u64, chunk_size: u64) -> u64 {
    uploaded_bytes / chunk_size
}

pub struct UploadClient {
    client: Client,
    base_url: Url,
    chunk_size: u64,
}

impl UploadClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: Client::new(),
            base_url,
            chunk_size: DEFAULT_CHUNK_SIZE_BYTES,
        }
    }

    /// Override the chunk size. Must be nonzero.
    pub fn with_chunk_size(base_url: Url, chunk_size: u64) -> Self {
        assert!(chunk_size > 0, "chunk size must be nonzero");
        Self {
            client: Client::new(),
            base_url,
            chunk_size,
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Ask the server how many bytes of `file_name` it already holds.
    pub async fn upload_status(&self, file_name: &str) -> Result<UploadStatus> {
        let url = self
            .base_url
            .join(STATUS_ROUTE)
            .context("Failed to construct upload status URL")?;

        let response = self
            .client
            .get(url)
            .query(&[("filename", file_name)])
            .send()
            .await?;

        if !response.status().is_success() {
            bail!(
                "Failed to fetch upload status for {}: {} - {}",
                file_name,
                response.status(),
                response.text().await.unwrap_or_default()
            );
        }

        let status: UploadStatus = response.json().await?;
        debug!("{file_name}: server holds {} bytes", status.uploaded_bytes);
        Ok(status)
    }

    async fn upload_chunk(
        &self,
        file_name: &str,
        offset: u64,
        data: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<ChunkOutcome> {
        let url = self
            .base_url
            .join(UPLOAD_ROUTE)
            .context("Failed to construct chunk upload URL")?;

        let request = self
            .client
            .post(url)
            .header(FILE_NAME_HEADER, file_name)
            .header(FILE_OFFSET_HEADER, offset.to_string())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send();

        // Racing the token drops the request future on cancel, aborting the
        // in-flight transfer.
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(ChunkOutcome::Canceled),
            result = request => result?,
        };

        if !response.status().is_success() {
            warn!(
                "{file_name}: chunk at offset {offset} rejected with {}",
                response.status()
            );
            bail!(
                "Failed to upload chunk at offset {}: {} - {}",
                offset,
                response.status(),
                response.text().await.unwrap_or_default()
            );
        }

        // The server replies with JSON; its contents are unused.
        Ok(ChunkOutcome::Sent)
    }

    /// Drive one file's transfer from its resume point to completion,
    /// cancellation, or failure.
    ///
    /// Chunks are sent strictly sequentially: chunk `i + 1` is never sent
    /// before chunk `i`'s response is observed, and at most one request is in
    /// flight at any time. Pausing the session gates the next chunk without
    /// aborting the current one; cancelling aborts immediately. Failures end
    /// the stream with an `Err` item and are never retried.
    pub fn upload_file<'a, P: AsRef<Path> + Send + 'a>(
        &'a self,
        session: Arc<UploadSession>,
        path: P,
    ) -> Result<BoxStream<'a, Result<UploadEvent>>> {
        let file_size = std::fs::metadata(path.as_ref())
            .context("Failed to get file metadata")?
            .len();
        let chunk_size = self.chunk_size;

        let stream = try_stream! {
            let file_name = session.name().to_string();
            let status = self.upload_status(&file_name).await?;

            if status.uploaded_bytes >= file_size {
                yield UploadEvent::Progress(UploadProgress {
                    bytes_uploaded: file_size,
                    total_bytes: file_size,
                });
                yield UploadEvent::Complete;
            } else {
                let total_chunks = chunk_count(file_size, chunk_size);
                let first_chunk = resume_chunk_index(status.uploaded_bytes, chunk_size);
                let resume_offset = first_chunk * chunk_size;

                yield UploadEvent::Progress(UploadProgress {
                    bytes_uploaded: resume_offset,
                    total_bytes: file_size,
                });

                let mut file = File::open(path.as_ref()).context("Failed to open file")?;
                file.seek(SeekFrom::Start(resume_offset))
                    .context("Failed to seek to resume offset")?;
                let mut buffer = vec![0u8; chunk_size as usize];

                let cancel = session.cancel_token();
                let mut gate = session.gate();
                let mut canceled = false;

                for chunk_index in first_chunk..total_chunks {
                    if cancel.is_cancelled() || !gate.wait_ready().await {
                        canceled = true;
                        break;
                    }

                    let start = chunk_index * chunk_size;
                    let end = (start + chunk_size).min(file_size);
                    let len = (end - start) as usize;
                    file.read_exact(&mut buffer[..len])
                        .context("Failed to read chunk")?;

                    debug!("{file_name}: sending chunk {chunk_index} [{start}, {end})");
                    match self
                        .upload_chunk(&file_name, start, buffer[..len].to_vec(), &cancel)
                        .await?
                    {
                        ChunkOutcome::Canceled => {
                            canceled = true;
                            break;
                        }
                        ChunkOutcome::Sent => {}
                    }

                    yield UploadEvent::Progress(UploadProgress {
                        bytes_uploaded: end,
                        total_bytes: file_size,
                    });
                }

                if canceled {
                    debug!("{file_name}: upload canceled");
                    yield UploadEvent::Canceled;
                } else {
                    yield UploadEvent::Complete;
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_count_rounds_up() {
        assert_eq!(chunk_count(0, 1024), 0);
        assert_eq!(chunk_count(1, 1024), 1);
        assert_eq!(chunk_count(1024, 1024), 1);
        assert_eq!(chunk_count(1025, 1024), 2);
        // 3.5 MiB in 1 MiB chunks -> 4 chunks (1, 1, 1, 0.5 MiB).
        assert_eq!(chunk_count(7 * MEBIBYTE / 2, MEBIBYTE), 4);
    }

    #[test]
    fn resume_index_is_floor_of_uploaded_over_chunk() {
        assert_eq!(resume_chunk_index(0, MEBIBYTE), 0);
        assert_eq!(resume_chunk_index(MEBIBYTE - 1, MEBIBYTE), 0);
        assert_eq!(resume_chunk_index(MEBIBYTE, MEBIBYTE), 1);
        assert_eq!(resume_chunk_index(2 * MEBIBYTE, MEBIBYTE), 2);
        assert_eq!(resume_chunk_index(2 * MEBIBYTE + 512, MEBIBYTE), 2);
    }

    #[test]
    fn percent_for_three_and_a_half_chunk_file() {
        let total = 7 * MEBIBYTE / 2;
        let expected = [28.5714, 57.1428, 85.7142, 100.0];
        let ends = [MEBIBYTE, 2 * MEBIBYTE, 3 * MEBIBYTE, total];
        for (end, want) in ends.iter().zip(expected) {
            let progress = UploadProgress {
                bytes_uploaded: *end,
                total_bytes: total,
            };
            assert!((progress.percent() - want).abs() < 0.01);
        }
    }

    #[test]
    fn percent_of_empty_file_is_complete() {
        let progress = UploadProgress {
            bytes_uploaded: 0,
            total_bytes: 0,
        };
        assert_eq!(progress.percent(), 100.0);
    }

    #[test]
    fn upload_status_ignores_extra_fields() {
        let status: UploadStatus = serde_json::from_value(serde_json::json!({
            "status": "In progress",
            "uploaded_bytes": 2097152,
        }))
        .unwrap();
        assert_eq!(status.uploaded_bytes, 2 * MEBIBYTE);
    }
}
