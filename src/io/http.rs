//! HTTP Range request backend for remote archives.
//!
//! Implements random-access reading over HTTP using the Range request
//! header (RFC 7233), so only the parts of a remote archive that are
//! actually needed get transferred. The transport is read-only: appending
//! to an archive requires a backend with write support.

use async_trait::async_trait;
use reqwest::Client;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::RemoteFile;

/// Shared handle onto a reader's transfer statistics.
///
/// Stays valid after the reader itself has been consumed by an archive
/// session, so callers can report bandwidth usage at the end.
#[derive(Clone)]
pub struct TransferCounter(Arc<AtomicU64>);

impl TransferCounter {
    /// Cumulative bytes received from the server.
    pub fn bytes(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// HTTP Range reader for remote archives.
///
/// The remote server must support Range requests (`Accept-Ranges: bytes`)
/// and report a `Content-Length` on HEAD, since ZIP archives are parsed
/// from the end. Transient network errors are retried with backoff;
/// persistent failures surface as `io::Error` to the archive layer.
pub struct HttpRangeReader {
    /// HTTP client with connection pooling
    client: Client,
    url: String,
    /// Total size of the remote file in bytes
    size: u64,
    /// Cumulative bytes transferred from the network
    transferred: Arc<AtomicU64>,
    /// Maximum number of retries for failed requests
    max_retry: u32,
}

fn other(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> io::Error {
    io::Error::other(err)
}

impl HttpRangeReader {
    /// Probe `url` with a HEAD request and build a reader.
    ///
    /// Fails when the request fails, the server does not support Range
    /// requests, or no `Content-Length` is reported.
    pub async fn new(url: String) -> io::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(other)?;

        let resp = client.head(&url).send().await.map_err(other)?;
        if !resp.status().is_success() {
            return Err(other(format!(
                "HTTP request failed with status: {}",
                resp.status()
            )));
        }

        // Range support is required for partial downloads
        let accept_ranges = resp
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none");
        if !accept_ranges.contains("bytes") {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "remote server does not support Range requests",
            ));
        }

        let size = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| other("remote server did not return Content-Length"))?;

        Ok(Self {
            client,
            url,
            size,
            transferred: Arc::new(AtomicU64::new(0)),
            max_retry: 10,
        })
    }

    /// Handle onto the transfer statistics; survives the reader moving
    /// into an archive session.
    pub fn transfer_counter(&self) -> TransferCounter {
        TransferCounter(self.transferred.clone())
    }
}

#[async_trait]
impl RemoteFile for HttpRangeReader {
    /// Read via `Range: bytes=start-end`, retrying transient network
    /// errors (timeouts, connection failures) with linear backoff.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        // clamp the range end to the file size
        let end = (offset + buf.len() as u64 - 1).min(self.size - 1);
        let expected_size = (end - offset + 1) as usize;

        let mut received = 0;
        let mut retry_count = 0;

        while received < expected_size {
            let current_start = offset + received as u64;
            let range = format!("bytes={}-{}", current_start, end);

            let result = self
                .client
                .get(&self.url)
                .header("Range", &range)
                .send()
                .await;

            match result {
                Ok(resp) => {
                    if resp.status() != reqwest::StatusCode::PARTIAL_CONTENT {
                        return Err(other(format!(
                            "HTTP request failed with status: {}",
                            resp.status()
                        )));
                    }

                    let bytes = resp.bytes().await.map_err(other)?;
                    let chunk_len = bytes.len().min(expected_size - received);
                    buf[received..received + chunk_len].copy_from_slice(&bytes[..chunk_len]);
                    received += chunk_len;

                    self.transferred
                        .fetch_add(chunk_len as u64, Ordering::Relaxed);
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "max retries exceeded",
                        ));
                    }
                    log::warn!(
                        "connection error, retry {}/{}: {}",
                        retry_count,
                        self.max_retry,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                Err(e) => return Err(other(e)),
            }
        }

        Ok(received)
    }

    async fn write_at(&mut self, _offset: u64, _data: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "HTTP transport is read-only",
        ))
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn url(&self) -> &str {
        &self.url
    }
}
