//! Archive-open state machine.
//!
//! Discovers the central directory of a remote archive in as few reads as
//! possible when the total size and layout are initially unknown: one tail
//! read capped at the largest possible EOCD neighbourhood, optionally one
//! read for a ZIP64 EOCD that lies before the tail, and one read for the
//! directory records themselves.
//!
//! The machine is pure: it consumes byte chunks and emits [`OpenAction`]s;
//! the session executes the actions against the remote file. This keeps the
//! staging logic unit-testable without any I/O.

use crate::error::{Result, ZipError};
use crate::zip::directory::CentralDirectory;
use crate::zip::records::{Eocd, Zip64Eocd, Zip64EocdLocator, MAX_TAIL_SIZE};

/// Discovery stages. The machine starts in `HaveEocdBlk` (expecting the
/// tail chunk) and finishes in `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStage {
    HaveEocdBlk,
    HaveZip64EocdlBlk,
    HaveZip64EocdBlk,
    HaveCdRecords,
    Done,
}

/// What the driver should do next.
#[derive(Debug)]
pub enum OpenAction {
    /// Issue a remote read of `[offset, offset + len)` and feed the chunk
    /// back through [`OpenMachine::step`].
    Read { offset: u64, len: u64 },
    /// Discovery finished.
    Done(Box<OpenOutcome>),
}

/// Everything the session needs once discovery completes.
#[derive(Debug)]
pub struct OpenOutcome {
    pub eocd: Option<Eocd>,
    pub zip64eocd: Option<Zip64Eocd>,
    /// Offset of the central directory, equivalently the end of member data.
    pub cdoff: u64,
    pub directory: CentralDirectory,
    /// The entire archive, retained iff the initial tail read covered it;
    /// later member reads are then served without further I/O.
    pub whole: Option<Vec<u8>>,
}

pub struct OpenMachine {
    archsize: u64,
    stage: OpenStage,
    /// Most recently delivered chunk and its absolute offset.
    buffer: Vec<u8>,
    chunk_offset: u64,
    /// Parse position inside `buffer`.
    pos: usize,
    eocd: Option<Eocd>,
    zip64eocd: Option<Zip64Eocd>,
    cdoff: u64,
}

impl OpenMachine {
    /// Start discovery for an archive of `archsize` bytes. An empty file is
    /// immediately done (a new archive about to be created).
    pub fn new(archsize: u64) -> (Self, OpenAction) {
        let machine = Self {
            archsize,
            stage: OpenStage::HaveEocdBlk,
            buffer: Vec::new(),
            chunk_offset: 0,
            pos: 0,
            eocd: None,
            zip64eocd: None,
            cdoff: 0,
        };

        if archsize == 0 {
            let mut machine = machine;
            machine.stage = OpenStage::Done;
            return (
                machine,
                OpenAction::Done(Box::new(OpenOutcome {
                    eocd: None,
                    zip64eocd: None,
                    cdoff: 0,
                    directory: CentralDirectory::new(),
                    whole: None,
                })),
            );
        }

        let len = archsize.min(MAX_TAIL_SIZE);
        let action = OpenAction::Read {
            offset: archsize - len,
            len,
        };
        (machine, action)
    }

    pub fn stage(&self) -> OpenStage {
        self.stage
    }

    /// Feed the chunk produced by the previous [`OpenAction::Read`] and
    /// advance. Stages that already hold the bytes they need fall through
    /// without emitting a read.
    pub fn step(&mut self, chunk_offset: u64, chunk: Vec<u8>) -> Result<OpenAction> {
        self.buffer = chunk;
        self.chunk_offset = chunk_offset;
        self.pos = 0;

        loop {
            match self.stage {
                OpenStage::HaveEocdBlk => {
                    let eocd_pos = Eocd::find(&self.buffer)?;
                    let eocd = Eocd::from_bytes(&self.buffer[eocd_pos..])?;
                    log::debug!(
                        "EOCD at tail offset {eocd_pos}: {} entries, cd at {}",
                        eocd.total_entries,
                        eocd.cd_offset
                    );

                    // The tail read covered the whole archive: the directory
                    // is already in the buffer and the archive is too small
                    // for ZIP64 to be in play.
                    if self.buffer.len() as u64 == self.archsize {
                        self.cdoff = eocd.cd_offset as u64;
                        self.pos = eocd.cd_offset as usize;
                        self.eocd = Some(eocd);
                        self.stage = OpenStage::HaveCdRecords;
                        continue;
                    }

                    // A ZIP64 archive carries the EOCD locator immediately
                    // before the EOCD.
                    if eocd_pos >= Zip64EocdLocator::SIZE {
                        let locator_pos = eocd_pos - Zip64EocdLocator::SIZE;
                        if &self.buffer[locator_pos..locator_pos + 4] == Zip64EocdLocator::SIGNATURE
                        {
                            self.pos = locator_pos;
                            self.eocd = Some(eocd);
                            self.stage = OpenStage::HaveZip64EocdlBlk;
                            continue;
                        }
                    }

                    // Plain ZIP: the EOCD tells us where the directory is.
                    self.cdoff = eocd.cd_offset as u64;
                    let action = OpenAction::Read {
                        offset: eocd.cd_offset as u64,
                        len: eocd.cd_size as u64,
                    };
                    self.eocd = Some(eocd);
                    self.stage = OpenStage::HaveCdRecords;
                    return Ok(action);
                }

                OpenStage::HaveZip64EocdlBlk => {
                    let locator = Zip64EocdLocator::from_bytes(&self.buffer[self.pos..])?;
                    log::debug!("ZIP64 EOCD locator: eocd64 at {}", locator.eocd64_offset);

                    if locator.eocd64_offset >= self.archsize {
                        return Err(ZipError::data("ZIP64 EOCD locator points past the archive"));
                    }

                    if self.chunk_offset > locator.eocd64_offset {
                        // the ZIP64 EOCD lies before the bytes we hold
                        self.stage = OpenStage::HaveZip64EocdBlk;
                        return Ok(OpenAction::Read {
                            offset: locator.eocd64_offset,
                            len: self.archsize - locator.eocd64_offset,
                        });
                    }

                    self.pos = (locator.eocd64_offset - self.chunk_offset) as usize;
                    self.stage = OpenStage::HaveZip64EocdBlk;
                    continue;
                }

                OpenStage::HaveZip64EocdBlk => {
                    if self.pos + 4 > self.buffer.len()
                        || &self.buffer[self.pos..self.pos + 4] != Zip64Eocd::SIGNATURE
                    {
                        return Err(ZipError::data(
                            "ZIP64 end-of-central-directory signature not found",
                        ));
                    }
                    let zip64eocd = Zip64Eocd::from_bytes(&self.buffer[self.pos..])?;

                    self.cdoff = zip64eocd.cd_offset;
                    let action = OpenAction::Read {
                        offset: zip64eocd.cd_offset,
                        len: zip64eocd.cd_size,
                    };
                    self.zip64eocd = Some(zip64eocd);
                    self.stage = OpenStage::HaveCdRecords;
                    return Ok(action);
                }

                OpenStage::HaveCdRecords => {
                    let (count, cd_size) = match &self.zip64eocd {
                        Some(z) => (z.total_entries, z.cd_size),
                        None => {
                            let eocd = self.eocd.as_ref().expect("EOCD parsed before CD stage");
                            (eocd.total_entries as u64, eocd.cd_size as u64)
                        }
                    };

                    let end = self.pos as u64 + cd_size;
                    if end > self.buffer.len() as u64 {
                        return Err(ZipError::data("central directory corrupted"));
                    }
                    let directory =
                        CentralDirectory::parse(&self.buffer[self.pos..end as usize], count)?;

                    self.stage = OpenStage::Done;
                    let whole = (self.chunk_offset == 0
                        && self.buffer.len() as u64 == self.archsize)
                        .then(|| std::mem::take(&mut self.buffer));
                    return Ok(OpenAction::Done(Box::new(OpenOutcome {
                        eocd: self.eocd.take(),
                        zip64eocd: self.zip64eocd.take(),
                        cdoff: self.cdoff,
                        directory,
                        whole,
                    })));
                }

                OpenStage::Done => {
                    return Err(ZipError::InvalidOp("open machine already finished"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::records::{Cdfh, Lfh};
    use std::time::SystemTime;

    /// Serialize a minimal stored-member archive.
    fn build_archive(members: &[(&str, &[u8])], comment: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut dir = CentralDirectory::new();
        for (name, data) in members {
            let lfh = Lfh::new(name, crc32fast::hash(data), data.len() as u64, SystemTime::now());
            let offset = out.len() as u64;
            lfh.to_bytes(&mut out);
            out.extend_from_slice(data);
            dir.append(Cdfh::from_lfh(&lfh, offset));
        }
        let cdoff = out.len() as u64;
        dir.serialize(&mut out);
        let mut eocd = Eocd::new(cdoff, dir.len() as u64, dir.serialized_size());
        eocd.comment_len = comment.len() as u16;
        eocd.to_bytes(&mut out);
        out.extend_from_slice(comment);
        out
    }

    fn drive(bytes: &[u8]) -> Result<OpenOutcome> {
        let (mut machine, mut action) = OpenMachine::new(bytes.len() as u64);
        loop {
            match action {
                OpenAction::Read { offset, len } => {
                    let chunk = bytes[offset as usize..(offset + len) as usize].to_vec();
                    action = machine.step(offset, chunk)?;
                }
                OpenAction::Done(outcome) => return Ok(*outcome),
            }
        }
    }

    #[test]
    fn empty_file_is_done_immediately() {
        let (machine, action) = OpenMachine::new(0);
        assert_eq!(machine.stage(), OpenStage::Done);
        match action {
            OpenAction::Done(outcome) => {
                assert!(outcome.directory.is_empty());
                assert_eq!(outcome.cdoff, 0);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn small_archive_single_read() {
        let bytes = build_archive(&[("x", b"abc"), ("y", b"defg")], b"");
        let (mut machine, action) = OpenMachine::new(bytes.len() as u64);

        // one read covering the whole file
        let (offset, len) = match action {
            OpenAction::Read { offset, len } => (offset, len),
            other => panic!("expected Read, got {other:?}"),
        };
        assert_eq!(offset, 0);
        assert_eq!(len, bytes.len() as u64);

        let outcome = match machine.step(0, bytes.clone()).unwrap() {
            OpenAction::Done(outcome) => outcome,
            other => panic!("expected Done, got {other:?}"),
        };
        assert_eq!(outcome.directory.len(), 2);
        assert_eq!(outcome.directory.at(0).file_name, "x");
        assert!(outcome.whole.is_some());
        assert_eq!(outcome.whole.as_deref(), Some(&bytes[..]));
    }

    #[test]
    fn large_archive_two_reads() {
        // member data large enough that the tail read misses the LFH
        let data = vec![0x5Au8; (MAX_TAIL_SIZE + 100) as usize];
        let bytes = build_archive(&[("big.bin", &data)], b"");

        let (mut machine, action) = OpenMachine::new(bytes.len() as u64);
        let OpenAction::Read { offset, len } = action else {
            panic!("expected Read");
        };
        assert_eq!(len, MAX_TAIL_SIZE);

        let chunk = bytes[offset as usize..(offset + len) as usize].to_vec();
        let second = machine.step(offset, chunk).unwrap();
        let OpenAction::Read { offset, len } = second else {
            panic!("expected a CD read");
        };

        let chunk = bytes[offset as usize..(offset + len) as usize].to_vec();
        let outcome = match machine.step(offset, chunk).unwrap() {
            OpenAction::Done(outcome) => outcome,
            other => panic!("expected Done, got {other:?}"),
        };
        assert_eq!(outcome.directory.len(), 1);
        assert!(outcome.whole.is_none(), "partial tail must not be cached");
    }

    #[test]
    fn max_length_comment_is_located() {
        let comment = vec![b'c'; 65535];
        let data = vec![1u8; (MAX_TAIL_SIZE * 2) as usize];
        let bytes = build_archive(&[("a", &data)], &comment);
        let outcome = drive(&bytes).unwrap();
        assert_eq!(outcome.directory.len(), 1);
    }

    #[test]
    fn zip64_archive_three_reads() {
        // force the ZIP64 path with sentinel trailer fields on a large-ish
        // archive so the tail read does not cover the whole file
        let data = vec![0xA5u8; (MAX_TAIL_SIZE + 4096) as usize];
        let mut bytes = Vec::new();
        let lfh = Lfh::new("big.bin", crc32fast::hash(&data), data.len() as u64, SystemTime::now());
        lfh.to_bytes(&mut bytes);
        bytes.extend_from_slice(&data);

        let cdoff = bytes.len() as u64;
        let mut dir = CentralDirectory::new();
        dir.append(Cdfh::from_lfh(&lfh, 0));
        dir.serialize(&mut bytes);
        let cd_size = dir.serialized_size();

        let zip64_eocd_offset = bytes.len() as u64;
        Zip64Eocd::new(cdoff, 1, cd_size).to_bytes(&mut bytes);
        Zip64EocdLocator::new(zip64_eocd_offset).to_bytes(&mut bytes);
        // sentinel offset forces readers through the ZIP64 records
        let mut eocd = Eocd::new(0xFFFF_FFFF, 1, cd_size);
        eocd.to_bytes(&mut bytes);

        let mut reads = 0;
        let (mut machine, mut action) = OpenMachine::new(bytes.len() as u64);
        let outcome = loop {
            match action {
                OpenAction::Read { offset, len } => {
                    reads += 1;
                    let chunk = bytes[offset as usize..(offset + len) as usize].to_vec();
                    action = machine.step(offset, chunk).unwrap();
                }
                OpenAction::Done(outcome) => break outcome,
            }
        };
        assert!(reads <= 3, "expected at most three reads, got {reads}");
        assert!(outcome.zip64eocd.is_some());
        assert_eq!(outcome.cdoff, cdoff);
        assert_eq!(outcome.directory.len(), 1);
        assert_eq!(outcome.directory.at(0).file_name, "big.bin");
    }

    #[test]
    fn missing_eocd_is_a_data_error() {
        let bytes = vec![0u8; 4096];
        assert!(matches!(drive(&bytes), Err(ZipError::DataError(_))));
    }

    #[test]
    fn zip64_with_max_comment_rereads_eocd64() {
        // the max-length comment pushes the ZIP64 EOCD out of the tail
        // window, forcing the locator-driven re-read
        let comment = vec![b'c'; 65535];
        let data = vec![3u8; (MAX_TAIL_SIZE + 512) as usize];
        let mut bytes = Vec::new();
        let lfh = Lfh::new("a", crc32fast::hash(&data), data.len() as u64, SystemTime::now());
        lfh.to_bytes(&mut bytes);
        bytes.extend_from_slice(&data);

        let cdoff = bytes.len() as u64;
        let mut dir = CentralDirectory::new();
        dir.append(Cdfh::from_lfh(&lfh, 0));
        dir.serialize(&mut bytes);

        let zip64_eocd_offset = bytes.len() as u64;
        Zip64Eocd::new(cdoff, 1, dir.serialized_size()).to_bytes(&mut bytes);
        Zip64EocdLocator::new(zip64_eocd_offset).to_bytes(&mut bytes);
        let mut eocd = Eocd::new(0xFFFF_FFFF, 1, dir.serialized_size());
        eocd.comment_len = comment.len() as u16;
        eocd.to_bytes(&mut bytes);
        bytes.extend_from_slice(&comment);

        let outcome = drive(&bytes).unwrap();
        assert!(outcome.zip64eocd.is_some());
        assert_eq!(outcome.cdoff, cdoff);
        assert_eq!(outcome.directory.at(0).uncompressed_size, data.len() as u64);
    }

    #[test]
    fn truncated_directory_is_a_data_error() {
        let mut bytes = build_archive(&[("x", b"abc")], b"");
        // corrupt the CDFH signature
        let cd_pos = bytes.len() - Eocd::SIZE - 47;
        bytes[cd_pos] ^= 0xFF;
        let (mut machine, _) = OpenMachine::new(bytes.len() as u64);
        let err = machine.step(0, bytes).unwrap_err();
        assert!(matches!(err, ZipError::DataError(_)));
    }
}
