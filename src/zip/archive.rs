//! Archive session: the public API over a remote ZIP file.
//!
//! A session wraps one remote file and exposes member operations once the
//! central directory has been discovered. Reads are random-access per
//! member; writes are append-only: new members are staged with
//! [`ZipArchive::open_file`], filled with [`ZipArchive::write`], and the
//! directory plus trailers are rewritten by [`ZipArchive::close`].
//!
//! ## Example
//!
//! ```no_run
//! use remzip::{HttpRangeReader, OpenFlags, ZipArchive};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let file = HttpRangeReader::new("https://example.com/archive.zip".to_string()).await?;
//! let mut archive = ZipArchive::open(file, OpenFlags::READ).await?;
//!
//! for entry in archive.list()?.entries {
//!     println!("{} ({} bytes)", entry.name, entry.size);
//! }
//!
//! archive.open_file("data.txt", OpenFlags::READ, 0, 0).await?;
//! let mut buf = vec![0u8; 16];
//! let n = archive.read(0, &mut buf).await?;
//! println!("{:?}", &buf[..n]);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::ops::BitOr;
use std::time::SystemTime;

use crate::error::{Result, ZipError};
use crate::io::RemoteFile;
use crate::zip::directory::CentralDirectory;
use crate::zip::inflate::{InflateCache, InflateStatus};
use crate::zip::open::{OpenAction, OpenMachine};
use crate::zip::records::{Cdfh, CompressionMethod, Eocd, Lfh, Zip64Eocd, Zip64EocdLocator};

/// Session and member open flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(u8);

impl OpenFlags {
    pub const NONE: OpenFlags = OpenFlags(0);
    /// Read access (the default).
    pub const READ: OpenFlags = OpenFlags(1);
    /// Permit creating a member that is not in the directory.
    pub const NEW: OpenFlags = OpenFlags(1 << 1);
    /// The session intends to write.
    pub const UPDATE: OpenFlags = OpenFlags(1 << 2);

    pub fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

/// One member in a [`DirectoryListing`].
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub name: String,
    /// Uncompressed size in bytes.
    pub size: u64,
}

/// Archive contents in directory order.
#[derive(Debug, Clone)]
pub struct DirectoryListing {
    /// Host identity from the remote URL; empty for local files.
    pub host_id: String,
    /// Parent path of the archive itself.
    pub parent: String,
    pub entries: Vec<ListEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Ready,
    /// A write or close failed; only best-effort close remains meaningful.
    Failed,
}

/// An open archive session over a remote file.
///
/// At most one member is active at a time; select with [`open_file`] and
/// deselect with [`close_file`]. Appending invalidates the on-disk
/// trailers until the next successful [`close`], so a session that staged
/// new members but failed before closing leaves the archive without a
/// tracked central directory.
///
/// [`open_file`]: ZipArchive::open_file
/// [`close_file`]: ZipArchive::close_file
/// [`close`]: ZipArchive::close
pub struct ZipArchive<F: RemoteFile> {
    file: F,
    state: SessionState,
    flags: OpenFlags,
    /// Total archive size including this session's writes.
    archsize: u64,
    /// Offset of the central directory; equivalently the end of member data.
    cdoff: u64,
    /// The underlying file still holds a central directory; falsified as
    /// soon as a new member begins to append, re-established on close.
    cdexists: bool,
    /// At least one member was appended this session.
    updated: bool,
    eocd: Option<Eocd>,
    zip64eocd: Option<Zip64Eocd>,
    directory: CentralDirectory,
    /// Whole-archive byte cache, present iff the single open-time tail read
    /// covered the entire file.
    whole: Option<Vec<u8>>,
    open_member: Option<String>,
    inflcache: HashMap<String, InflateCache>,
}

impl<F: RemoteFile> std::fmt::Debug for ZipArchive<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipArchive")
            .field("state", &self.state)
            .field("flags", &self.flags)
            .field("archsize", &self.archsize)
            .field("cdoff", &self.cdoff)
            .field("cdexists", &self.cdexists)
            .field("updated", &self.updated)
            .field("eocd", &self.eocd)
            .field("zip64eocd", &self.zip64eocd)
            .field("directory", &self.directory)
            .field("open_member", &self.open_member)
            .finish_non_exhaustive()
    }
}

/// Read exactly `buf.len()` bytes at `offset`, looping over short reads.
async fn read_full<F: RemoteFile>(file: &F, offset: u64, buf: &mut [u8]) -> Result<()> {
    let mut done = 0;
    while done < buf.len() {
        let n = file.read_at(offset + done as u64, &mut buf[done..]).await?;
        if n == 0 {
            return Err(ZipError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "short read from remote file",
            )));
        }
        done += n;
    }
    Ok(())
}

impl<F: RemoteFile> ZipArchive<F> {
    /// Open an archive session over `file` and discover its central
    /// directory.
    ///
    /// An empty file (or a target about to be created) yields a session
    /// with an empty directory; `open_file` with [`OpenFlags::NEW`] may
    /// then start appending at offset 0.
    pub async fn open(file: F, flags: OpenFlags) -> Result<Self> {
        let archsize = file.size();
        log::debug!("opening archive {} ({archsize} bytes)", file.url());

        let (mut machine, mut action) = OpenMachine::new(archsize);
        let outcome = loop {
            match action {
                OpenAction::Read { offset, len } => {
                    let mut chunk = vec![0u8; len as usize];
                    read_full(&file, offset, &mut chunk).await?;
                    action = machine.step(offset, chunk)?;
                }
                OpenAction::Done(outcome) => break *outcome,
            }
        };

        Ok(Self {
            file,
            state: SessionState::Ready,
            flags,
            archsize,
            cdoff: outcome.cdoff,
            cdexists: archsize > 0,
            updated: false,
            eocd: outcome.eocd,
            zip64eocd: outcome.zip64eocd,
            directory: outcome.directory,
            whole: outcome.whole,
            open_member: None,
            inflcache: HashMap::new(),
        })
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            SessionState::Ready => Ok(()),
            SessionState::Failed => Err(ZipError::InvalidOp("archive session failed")),
        }
    }

    /// Select the active member.
    ///
    /// An existing `name` simply becomes active. A missing name is created
    /// when `flags` carries [`OpenFlags::NEW`]: a local file header built
    /// from `(name, crc32, size, now)` is appended at the end of member
    /// data and a directory record referencing it is staged. Without `NEW`
    /// a missing name is [`ZipError::NotFound`].
    ///
    /// Appended members are stored (method 0); `size` and `crc32` must
    /// describe the bytes subsequently passed to [`write`](Self::write).
    /// The first append discards the on-disk trailers: if the session then
    /// fails before [`close`](Self::close), the old end-of-central-directory
    /// record is still physically present but no longer tracked.
    pub async fn open_file(
        &mut self,
        name: &str,
        flags: OpenFlags,
        size: u64,
        crc32: u32,
    ) -> Result<()> {
        self.ensure_ready()?;
        if self.open_member.is_some() {
            return Err(ZipError::InvalidOp("a member is already open"));
        }

        self.flags = flags;
        if self.directory.find(name).is_none() {
            if !self.flags.contains(OpenFlags::NEW) {
                return Err(ZipError::NotFound(name.to_string()));
            }

            let lfh = Lfh::new(name, crc32, size, SystemTime::now());
            let wrtoff = self.cdoff;
            let mut wrtbuf = Vec::with_capacity(lfh.serialized_size() as usize);
            lfh.to_bytes(&mut wrtbuf);

            // the on-disk trailers are stale the moment the header lands
            if self.cdexists {
                log::debug!("appending discards the existing central directory");
                self.cdexists = false;
            }
            if let Err(e) = self.file.write_at(wrtoff, &wrtbuf).await {
                self.state = SessionState::Failed;
                return Err(e.into());
            }

            self.archsize += wrtbuf.len() as u64;
            self.cdoff += wrtbuf.len() as u64;
            self.directory.append(Cdfh::from_lfh(&lfh, wrtoff));
            log::debug!("appended member {name} at {wrtoff}");
        }

        self.open_member = Some(name.to_string());
        Ok(())
    }

    /// Deselect the active member.
    pub fn close_file(&mut self) -> Result<()> {
        if self.open_member.take().is_none() {
            return Err(ZipError::InvalidOp("no member selected"));
        }
        Ok(())
    }

    /// Append `data` to the archive at the current end of member data.
    ///
    /// Only appending is supported; there is no seeking within a member.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_ready()?;
        if self.open_member.is_none() {
            return Err(ZipError::InvalidOp("no member selected"));
        }

        let wrtoff = self.cdoff;
        if let Err(e) = self.file.write_at(wrtoff, data).await {
            self.state = SessionState::Failed;
            return Err(e.into());
        }
        self.cdoff += data.len() as u64;
        self.archsize += data.len() as u64;
        self.updated = true;
        Ok(())
    }

    /// Read from the active member at member-relative `rel_off`.
    ///
    /// Returns the number of bytes delivered into `usr_buf`, clamped to
    /// the member's uncompressed size (0 when `rel_off` is at or past the
    /// end). Stored members are served from the whole-archive cache when
    /// the open-time read covered the file, otherwise with a single remote
    /// read. Deflate members go through a per-member streaming inflate
    /// cache that fetches compressed chunks at monotonically increasing
    /// raw offsets.
    pub async fn read(&mut self, rel_off: u64, usr_buf: &mut [u8]) -> Result<usize> {
        self.ensure_ready()?;
        let name = match &self.open_member {
            Some(name) => name.clone(),
            None => return Err(ZipError::InvalidOp("no member selected")),
        };
        let idx = self
            .directory
            .find(&name)
            .ok_or_else(|| ZipError::NotFound(name.clone()))?;
        let cdfh = self.directory.at(idx);

        match cdfh.compression_method {
            CompressionMethod::Stored | CompressionMethod::Deflate => {}
            CompressionMethod::Unknown(method) => return Err(ZipError::NotSupported(method)),
        }

        // The local file header carries a variable-length extra field whose
        // size the directory does not record, so the member's data range is
        // derived from where the *next* record starts: the following
        // member's header, or the central directory for the last member.
        let next_record_offset = if idx + 1 < self.directory.len() {
            self.directory.at(idx + 1).offset()
        } else {
            self.cdoff
        };
        let filesize = cdfh.compressed_size;
        let fileoff = next_record_offset
            .checked_sub(filesize)
            .ok_or_else(|| ZipError::data("member size exceeds archive layout"))?;

        let size_till_end = cdfh.uncompressed_size.saturating_sub(rel_off);
        let size = (usr_buf.len() as u64).min(size_till_end) as usize;
        if size == 0 {
            return Ok(0);
        }

        if cdfh.compression_method == CompressionMethod::Deflate {
            let uncompressed = cdfh.uncompressed_size;
            self.read_deflated(&name, fileoff, filesize, uncompressed, rel_off, &mut usr_buf[..size])
                .await?;
            return Ok(size);
        }

        // stored member: whole-archive cache first
        let offset = fileoff + rel_off;
        if let Some(whole) = &self.whole {
            let end = offset + size as u64;
            if end <= whole.len() as u64 {
                usr_buf[..size].copy_from_slice(&whole[offset as usize..end as usize]);
                log::debug!("read {size}@{rel_off} of {name} from the archive cache");
                return Ok(size);
            }
        }

        read_full(&self.file, offset, &mut usr_buf[..size]).await?;
        Ok(size)
    }

    /// Deflate read path: drive the member's inflate cache, fetching
    /// compressed chunks until the destination is satisfied.
    async fn read_deflated(
        &mut self,
        name: &str,
        fileoff: u64,
        filesize: u64,
        uncompressed: u64,
        rel_off: u64,
        dst: &mut [u8],
    ) -> Result<()> {
        // the decoder cannot seek backwards; start over for earlier offsets
        if let Some(cache) = self.inflcache.get(name) {
            if rel_off < cache.cursor() {
                log::debug!("discarding inflate cache of {name} for backward read");
                self.inflcache.remove(name);
            }
        }

        let fresh = !self.inflcache.contains_key(name);
        let cache = self.inflcache.entry(name.to_string()).or_default();

        // with the whole archive in memory the cache can be seeded with the
        // member's entire compressed stream up front
        if fresh {
            if let Some(whole) = &self.whole {
                let end = fileoff + filesize;
                if end <= whole.len() as u64 {
                    cache.input(&whole[fileoff as usize..end as usize], 0)?;
                }
            }
        }

        loop {
            match cache.read(dst, rel_off)? {
                InflateStatus::Done => return Ok(()),
                InflateStatus::NeedMore => {
                    // zero on a fresh cache, which is exactly where the
                    // member's compressed stream starts
                    let raw = cache.next_chunk_offset();
                    if raw >= filesize {
                        return Err(ZipError::data(format!(
                            "deflate member {name} exhausted before {uncompressed} bytes"
                        )));
                    }
                    let chunk_len = (dst.len() as u64).min(filesize - raw);
                    let mut chunk = vec![0u8; chunk_len as usize];
                    read_full(&self.file, fileoff + raw, &mut chunk).await?;
                    cache.input(&chunk, raw)?;
                }
            }
        }
    }

    /// List the archive contents in directory order.
    pub fn list(&self) -> Result<DirectoryListing> {
        self.ensure_ready()?;
        let (host_id, parent) = split_url(self.file.url());
        Ok(DirectoryListing {
            host_id,
            parent,
            entries: self
                .directory
                .iter()
                .map(|cdfh| ListEntry {
                    name: cdfh.file_name.clone(),
                    size: cdfh.uncompressed_size,
                })
                .collect(),
        })
    }

    /// Directory records in on-disk order, for callers that want the full
    /// per-member metadata.
    pub fn entries(&self) -> impl Iterator<Item = &Cdfh> {
        self.directory.iter()
    }

    /// Finalize the session.
    ///
    /// Without appends this just closes the remote file. With appends, the
    /// directory records and trailers (ZIP64 records included when any
    /// field overflows its 32-bit slot) are serialized into one buffer and
    /// written at the end of member data before closing. A trailer-write
    /// failure is returned to the caller; the remote close still runs
    /// best-effort.
    pub async fn close(mut self) -> Result<()> {
        if self.state == SessionState::Failed {
            let _ = self.file.close().await;
            return Err(ZipError::InvalidOp("archive session failed"));
        }

        if self.updated {
            let cdsize = self.directory.serialized_size();
            let nb_records = self.directory.len() as u64;
            let eocd = Eocd::new(self.cdoff, nb_records, cdsize);

            let mut wrtbuf = Vec::with_capacity(cdsize as usize + 128);
            self.directory.serialize(&mut wrtbuf);
            if eocd.is_zip64() {
                Zip64Eocd::new(self.cdoff, nb_records, cdsize).to_bytes(&mut wrtbuf);
                Zip64EocdLocator::new(self.cdoff + cdsize).to_bytes(&mut wrtbuf);
            }
            eocd.to_bytes(&mut wrtbuf);

            log::debug!(
                "finalizing archive: {nb_records} records, trailers at {}",
                self.cdoff
            );
            if let Err(e) = self.file.write_at(self.cdoff, &wrtbuf).await {
                let _ = self.file.close().await;
                return Err(e.into());
            }
            self.archsize += wrtbuf.len() as u64;
            self.cdexists = true;
        }

        self.file.close().await?;
        Ok(())
    }

    /// Current total archive size, including this session's writes.
    pub fn archive_size(&self) -> u64 {
        self.archsize
    }

    /// The trailer parsed at open time, absent for a freshly created file.
    pub fn eocd(&self) -> Option<&Eocd> {
        self.eocd.as_ref()
    }

    /// The ZIP64 trailer parsed at open time; present iff discovery went
    /// through the ZIP64 records.
    pub fn zip64_eocd(&self) -> Option<&Zip64Eocd> {
        self.zip64eocd.as_ref()
    }

    /// Whether at least one member was appended this session.
    pub fn updated(&self) -> bool {
        self.updated
    }

    /// The remote file's URL.
    pub fn url(&self) -> &str {
        self.file.url()
    }
}

/// Split a URL or path into (host identity, parent path).
fn split_url(url: &str) -> (String, String) {
    let (host, path) = match url.find("://") {
        Some(i) => {
            let rest = &url[i + 3..];
            match rest.find('/') {
                Some(j) => (&rest[..j], &rest[j..]),
                None => (rest, ""),
            }
        }
        None => ("", url),
    };
    let parent = match path.rfind('/') {
        Some(j) => &path[..j],
        None => "",
    };
    (host.to_string(), parent.to_string())
}
