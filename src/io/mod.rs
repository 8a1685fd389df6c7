mod http;
mod local;

pub use http::{HttpRangeReader, TransferCounter};
pub use local::LocalFile;

use async_trait::async_trait;
use std::io;

/// Contract with the remote file client.
///
/// The archive layer issues positioned reads and writes and never seeks;
/// backends map these onto whatever transport they have (pread/pwrite,
/// HTTP Range requests, ...). Transport failures are reported as
/// `io::Error` and reach the archive caller unchanged.
#[async_trait]
pub trait RemoteFile: Send + Sync {
    /// Read up to `buf.len()` bytes at `offset`; returns the count read.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `data` at `offset`.
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Flush and release the underlying resource.
    async fn close(&mut self) -> io::Result<()>;

    /// Total size of the file as known at open time.
    fn size(&self) -> u64;

    /// The URL (or path) this file was opened from.
    fn url(&self) -> &str;
}
