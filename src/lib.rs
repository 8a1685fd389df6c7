//! # remzip
//!
//! A ZIP/ZIP64 archive access layer over remote object stores.
//!
//! remzip opens archives whose bytes live behind a random-access transport
//! (local files, HTTP servers with Range support, or anything implementing
//! [`RemoteFile`]) and keeps remote I/O to a minimum: the central directory
//! of an archive of unknown layout is discovered with at most three reads,
//! small archives are cached whole from the single open-time read, and
//! deflate members keep a streaming decoder alive per member so sequential
//! or partial reads never re-inflate from scratch.
//!
//! Archives can also be grown in place: new members are appended after the
//! existing data and the central directory plus its trailers are rewritten
//! once, when the session is closed.
//!
//! ## Features
//!
//! - ZIP and ZIP64 central directory discovery with bounded tail reads
//! - Random-access member reads, STORED and DEFLATE methods
//! - Per-member streaming inflate cache for partial reads
//! - Append-and-finalize writing of stored members
//! - Pluggable transports via the [`RemoteFile`] trait
//!
//! ## Example
//!
//! ```no_run
//! use remzip::{HttpRangeReader, OpenFlags, ZipArchive};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let file = HttpRangeReader::new("https://example.com/archive.zip".to_string()).await?;
//!     let mut archive = ZipArchive::open(file, OpenFlags::READ).await?;
//!
//!     for entry in archive.list()?.entries {
//!         println!("{} ({} bytes)", entry.name, entry.size);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::{Result, ZipError};
pub use io::{HttpRangeReader, LocalFile, RemoteFile, TransferCounter};
pub use zip::{DirectoryListing, ListEntry, OpenFlags, ZipArchive};
