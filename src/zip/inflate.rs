//! Per-member streaming inflate cache.
//!
//! Deflate members cannot be decompressed from an arbitrary midpoint, so
//! random-access reads keep a decoder alive per member and drive it as a
//! producer/consumer pair: compressed chunks go in at strictly contiguous
//! raw offsets, decompressed bytes come out at a monotonically advancing
//! logical cursor. Sequential or partial reads then avoid re-inflating the
//! member from scratch. The cache never seeks backwards; a caller that
//! wants an earlier logical offset discards the cache and starts over.

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::{Result, ZipError};

/// Outcome of a [`InflateCache::read`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InflateStatus {
    /// The destination was filled to its full length.
    Done,
    /// Compressed input ran dry before the destination was filled; feed the
    /// chunk at [`InflateCache::next_chunk_offset`] and call again.
    NeedMore,
}

/// Streaming raw-deflate decoder state for one member.
pub struct InflateCache {
    decomp: Decompress,
    /// Compressed bytes supplied but not yet consumed by the decoder.
    input: Vec<u8>,
    /// Raw offset expected by the next `input` call; `None` until the first
    /// chunk arrives.
    next_raw: Option<u64>,
    finished: bool,
}

impl Default for InflateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InflateCache {
    pub fn new() -> Self {
        Self {
            // ZIP members are raw deflate streams, no zlib wrapper
            decomp: Decompress::new(false),
            input: Vec::new(),
            next_raw: None,
            finished: false,
        }
    }

    /// Supply the next compressed chunk; `raw_offset` is the member-relative
    /// offset of the first byte of `src`. Chunks must be contiguous and
    /// non-overlapping.
    pub fn input(&mut self, src: &[u8], raw_offset: u64) -> Result<()> {
        if let Some(expected) = self.next_raw {
            if raw_offset != expected {
                return Err(ZipError::data(format!(
                    "non-contiguous compressed chunk: expected raw offset {expected}, got {raw_offset}"
                )));
            }
        }
        self.input.extend_from_slice(src);
        self.next_raw = Some(raw_offset + src.len() as u64);
        Ok(())
    }

    /// The member-relative raw offset the cache wants next; zero if no chunk
    /// has been supplied yet.
    pub fn next_chunk_offset(&self) -> u64 {
        self.next_raw.unwrap_or(0)
    }

    /// Current logical (decompressed) output position.
    pub fn cursor(&self) -> u64 {
        self.decomp.total_out()
    }

    /// Produce decompressed bytes into `dst`, starting at member-relative
    /// `logical_offset`.
    ///
    /// `logical_offset` must be at or past the current [`cursor`]; bytes in
    /// between are inflated and discarded. Bytes already delivered into
    /// `dst` by an earlier `NeedMore` round are not rewritten: the caller
    /// passes the same destination and the fill position is derived from
    /// the cursor.
    ///
    /// [`cursor`]: InflateCache::cursor
    pub fn read(&mut self, dst: &mut [u8], logical_offset: u64) -> Result<InflateStatus> {
        if logical_offset < self.cursor() {
            return Err(ZipError::InvalidOp(
                "inflate cache cannot seek backwards",
            ));
        }

        let mut scratch = [0u8; 8192];
        loop {
            let cursor = self.cursor();

            if cursor < logical_offset {
                // discard up to the requested logical offset
                let want = (logical_offset - cursor).min(scratch.len() as u64) as usize;
                let (produced, consumed) = self.inflate(&mut scratch[..want])?;
                if produced == 0 && consumed == 0 {
                    return self.stalled();
                }
                continue;
            }

            let filled = (cursor - logical_offset) as usize;
            if filled >= dst.len() {
                return Ok(InflateStatus::Done);
            }
            let (produced, consumed) = self.inflate(&mut dst[filled..])?;
            if produced == 0 && consumed == 0 {
                return self.stalled();
            }
        }
    }

    fn stalled(&self) -> Result<InflateStatus> {
        if self.finished {
            // the stream ended below the size the directory promised
            Err(ZipError::data("deflate stream ended prematurely"))
        } else {
            Ok(InflateStatus::NeedMore)
        }
    }

    /// One decoder step; returns (produced, consumed) byte counts.
    fn inflate(&mut self, dst: &mut [u8]) -> Result<(usize, usize)> {
        if dst.is_empty() {
            return Ok((0, 0));
        }
        let out_before = self.decomp.total_out();
        let in_before = self.decomp.total_in();

        let status = self
            .decomp
            .decompress(&self.input, dst, FlushDecompress::None)
            .map_err(|e| ZipError::data(format!("deflate stream corrupted: {e}")))?;

        let consumed = (self.decomp.total_in() - in_before) as usize;
        let produced = (self.decomp.total_out() - out_before) as usize;
        self.input.drain(..consumed);
        if status == Status::StreamEnd {
            self.finished = true;
        }
        Ok((produced, consumed))
    }
}
