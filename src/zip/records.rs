//! ZIP record codecs.
//!
//! Pure encode/decode of the on-disk record layouts: Local File Header,
//! Central Directory File Header, End of Central Directory and its ZIP64
//! variants. All multi-byte integers are little-endian. No I/O happens
//! here; callers hand in byte slices and get records (or byte images) back.

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Datelike, Local, Timelike};
use std::io::Cursor;
use std::time::SystemTime;

use crate::error::{Result, ZipError};

/// Maximum ZIP comment size allowed by the format (65535 bytes).
pub const MAX_COMMENT_SIZE: u64 = 65535;

/// The longest file tail that can contain the EOCD plus a ZIP64 locator.
pub const MAX_TAIL_SIZE: u64 =
    MAX_COMMENT_SIZE + Eocd::SIZE as u64 + Zip64EocdLocator::SIZE as u64;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// Convert a system time to the DOS (time, date) pair stored in ZIP headers.
///
/// DOS timestamps start at 1980 and have two-second resolution; out-of-range
/// years are clamped.
pub fn dos_date_time(t: SystemTime) -> (u16, u16) {
    let local: DateTime<Local> = t.into();
    let year = local.year().clamp(1980, 2107) as u16;
    let date = ((year - 1980) << 9) | ((local.month() as u16) << 5) | local.day() as u16;
    let time = ((local.hour() as u16) << 11)
        | ((local.minute() as u16) << 5)
        | (local.second() as u16 / 2);
    (time, date)
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone)]
pub struct Eocd {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl Eocd {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::data("invalid end-of-central-directory record"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// Build the trailer for a directory of `total_entries` records,
    /// `cd_size` bytes long, starting at `cd_offset`. Fields that overflow
    /// their 32-bit slots are written as the ZIP64 sentinel; the caller must
    /// then also emit a ZIP64 EOCD and locator.
    pub fn new(cd_offset: u64, total_entries: u64, cd_size: u64) -> Self {
        let clamp16 = |v: u64| if v >= 0xFFFF { 0xFFFF } else { v as u16 };
        let clamp32 = |v: u64| if v >= 0xFFFF_FFFF { 0xFFFF_FFFF } else { v as u32 };
        Self {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: clamp16(total_entries),
            total_entries: clamp16(total_entries),
            cd_size: clamp32(cd_size),
            cd_offset: clamp32(cd_offset),
            comment_len: 0,
        }
    }

    /// Whether any field carries the ZIP64 sentinel.
    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }

    pub fn to_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(Self::SIGNATURE);
        out.extend_from_slice(&self.disk_number.to_le_bytes());
        out.extend_from_slice(&self.disk_with_cd.to_le_bytes());
        out.extend_from_slice(&self.disk_entries.to_le_bytes());
        out.extend_from_slice(&self.total_entries.to_le_bytes());
        out.extend_from_slice(&self.cd_size.to_le_bytes());
        out.extend_from_slice(&self.cd_offset.to_le_bytes());
        out.extend_from_slice(&self.comment_len.to_le_bytes());
    }

    /// Locate the EOCD inside `buf`.
    ///
    /// Scans backwards for the signature and returns the position of the
    /// **last** occurrence whose declared comment length is consistent with
    /// the bytes that follow it. Archives may end with up to 64 KiB of
    /// comment, and member data can contain stray signatures, hence the
    /// consistency check.
    pub fn find(buf: &[u8]) -> Result<usize> {
        if buf.len() >= Self::SIZE {
            for i in (0..=buf.len() - Self::SIZE).rev() {
                if &buf[i..i + 4] == Self::SIGNATURE {
                    let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
                    if comment_len == buf.len() - i - Self::SIZE {
                        return Ok(i);
                    }
                }
            }
        }
        Err(ZipError::data(
            "end-of-central-directory signature not found",
        ))
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone)]
pub struct Zip64EocdLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EocdLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::data("invalid ZIP64 EOCD locator"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn new(eocd64_offset: u64) -> Self {
        Self {
            disk_with_eocd64: 0,
            eocd64_offset,
            total_disks: 1,
        }
    }

    pub fn to_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(Self::SIGNATURE);
        out.extend_from_slice(&self.disk_with_eocd64.to_le_bytes());
        out.extend_from_slice(&self.eocd64_offset.to_le_bytes());
        out.extend_from_slice(&self.total_disks.to_le_bytes());
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone)]
pub struct Zip64Eocd {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64Eocd {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::data(
                "ZIP64 end-of-central-directory signature not found",
            ));
        }

        let mut cursor = Cursor::new(&data[4..]);
        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    pub fn new(cd_offset: u64, total_entries: u64, cd_size: u64) -> Self {
        Self {
            // size of the record counted from the version field onwards
            eocd64_size: Self::MIN_SIZE as u64 - 12,
            version_made_by: 45,
            version_needed: 45,
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: total_entries,
            total_entries,
            cd_size,
            cd_offset,
        }
    }

    pub fn to_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(Self::SIGNATURE);
        out.extend_from_slice(&self.eocd64_size.to_le_bytes());
        out.extend_from_slice(&self.version_made_by.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.disk_number.to_le_bytes());
        out.extend_from_slice(&self.disk_with_cd.to_le_bytes());
        out.extend_from_slice(&self.disk_entries.to_le_bytes());
        out.extend_from_slice(&self.total_entries.to_le_bytes());
        out.extend_from_slice(&self.cd_size.to_le_bytes());
        out.extend_from_slice(&self.cd_offset.to_le_bytes());
    }
}

/// Local File Header for a member being appended.
///
/// Appended members are always stored (method 0) with sizes and CRC known
/// up front, so no data descriptor is needed.
#[derive(Debug, Clone)]
pub struct Lfh {
    pub file_name: String,
    pub crc32: u32,
    pub uncompressed_size: u64,
    pub mod_time: u16,
    pub mod_date: u16,
}

pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// ZIP64 extended information extra field tag.
const ZIP64_EXTRA_TAG: u16 = 0x0001;

impl Lfh {
    pub fn new(file_name: &str, crc32: u32, uncompressed_size: u64, mtime: SystemTime) -> Self {
        let (mod_time, mod_date) = dos_date_time(mtime);
        Self {
            file_name: file_name.to_string(),
            crc32,
            uncompressed_size,
            mod_time,
            mod_date,
        }
    }

    fn needs_zip64(&self) -> bool {
        self.uncompressed_size >= 0xFFFF_FFFF
    }

    pub fn serialized_size(&self) -> u64 {
        let extra = if self.needs_zip64() { 20 } else { 0 };
        (LFH_SIZE + self.file_name.len() + extra) as u64
    }

    pub fn to_bytes(&self, out: &mut Vec<u8>) {
        let zip64 = self.needs_zip64();
        let size32 = if zip64 {
            0xFFFF_FFFF
        } else {
            self.uncompressed_size as u32
        };
        out.extend_from_slice(LFH_SIGNATURE);
        out.extend_from_slice(&(if zip64 { 45u16 } else { 20 }).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // general purpose flags
        out.extend_from_slice(&0u16.to_le_bytes()); // method: stored
        out.extend_from_slice(&self.mod_time.to_le_bytes());
        out.extend_from_slice(&self.mod_date.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&size32.to_le_bytes()); // compressed == uncompressed
        out.extend_from_slice(&size32.to_le_bytes());
        out.extend_from_slice(&(self.file_name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(if zip64 { 20u16 } else { 0 }).to_le_bytes());
        out.extend_from_slice(self.file_name.as_bytes());
        if zip64 {
            out.extend_from_slice(&ZIP64_EXTRA_TAG.to_le_bytes());
            out.extend_from_slice(&16u16.to_le_bytes());
            out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
            out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        }
    }
}

pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Central Directory File Header: per-member metadata record.
#[derive(Debug, Clone)]
pub struct Cdfh {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub lfh_offset: u64,
    pub file_name: String,
}

impl Cdfh {
    /// Parse one CDFH at the cursor, advancing past the variable-length
    /// name, extra field (with ZIP64 extended information applied) and
    /// comment.
    pub fn parse(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        Self::parse_inner(cursor).map_err(|e| match e {
            ZipError::Io(_) => ZipError::data("central directory corrupted"),
            other => other,
        })
    }

    fn parse_inner(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let mut sig = [0u8; 4];
        std::io::Read::read_exact(cursor, &mut sig)?;
        if sig != CDFH_SIGNATURE {
            return Err(ZipError::data("central directory corrupted"));
        }

        let version_made_by = cursor.read_u16::<LittleEndian>()?;
        let version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let mod_time = cursor.read_u16::<LittleEndian>()?;
        let mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;
        let file_comment_length = cursor.read_u16::<LittleEndian>()?;
        let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let external_attrs = cursor.read_u32::<LittleEndian>()?;
        let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

        let mut file_name_bytes = vec![0u8; file_name_length as usize];
        std::io::Read::read_exact(cursor, &mut file_name_bytes)?;
        // Lossy conversion keeps non-UTF8 names readable rather than fatal
        let file_name = String::from_utf8_lossy(&file_name_bytes).to_string();

        let buf_len = cursor.get_ref().len() as u64;
        let extra_field_end = cursor.position() + extra_field_length as u64;
        if extra_field_end + file_comment_length as u64 > buf_len {
            return Err(ZipError::data("central directory corrupted"));
        }

        // ZIP64 extended information: 64-bit values are present only for
        // fields whose 32-bit slot carries the sentinel, in this order.
        while cursor.position() + 4 <= extra_field_end {
            let header_id = cursor.read_u16::<LittleEndian>()?;
            let field_size = cursor.read_u16::<LittleEndian>()?;

            if header_id == ZIP64_EXTRA_TAG {
                if uncompressed_size == 0xFFFFFFFF && cursor.position() + 8 <= extra_field_end {
                    uncompressed_size = cursor.read_u64::<LittleEndian>()?;
                }
                if compressed_size == 0xFFFFFFFF && cursor.position() + 8 <= extra_field_end {
                    compressed_size = cursor.read_u64::<LittleEndian>()?;
                }
                if lfh_offset == 0xFFFFFFFF && cursor.position() + 8 <= extra_field_end {
                    lfh_offset = cursor.read_u64::<LittleEndian>()?;
                }
                let remaining = extra_field_end.saturating_sub(cursor.position());
                cursor.set_position(cursor.position() + remaining);
            } else {
                cursor.set_position(cursor.position() + field_size as u64);
            }
        }

        cursor.set_position(extra_field_end + file_comment_length as u64);

        Ok(Self {
            version_made_by,
            version_needed,
            flags,
            compression_method: CompressionMethod::from_u16(compression_method),
            mod_time,
            mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            internal_attrs,
            external_attrs,
            lfh_offset,
            file_name,
        })
    }

    /// Build the directory record for a freshly appended member.
    pub fn from_lfh(lfh: &Lfh, lfh_offset: u64) -> Self {
        Self {
            version_made_by: 45,
            version_needed: if lfh.uncompressed_size >= 0xFFFF_FFFF || lfh_offset >= 0xFFFF_FFFF {
                45
            } else {
                20
            },
            flags: 0,
            compression_method: CompressionMethod::Stored,
            mod_time: lfh.mod_time,
            mod_date: lfh.mod_date,
            crc32: lfh.crc32,
            compressed_size: lfh.uncompressed_size,
            uncompressed_size: lfh.uncompressed_size,
            internal_attrs: 0,
            external_attrs: 0o100644 << 16,
            lfh_offset,
            file_name: lfh.file_name.clone(),
        }
    }

    /// The absolute offset of this member's local file header.
    pub fn offset(&self) -> u64 {
        self.lfh_offset
    }

    pub fn is_directory(&self) -> bool {
        self.file_name.ends_with('/')
    }

    fn zip64_extra_len(&self) -> usize {
        let mut n = 0;
        if self.uncompressed_size >= 0xFFFF_FFFF {
            n += 8;
        }
        if self.compressed_size >= 0xFFFF_FFFF {
            n += 8;
        }
        if self.lfh_offset >= 0xFFFF_FFFF {
            n += 8;
        }
        if n > 0 {
            n + 4
        } else {
            0
        }
    }

    pub fn serialized_size(&self) -> u64 {
        (CDFH_MIN_SIZE + self.file_name.len() + self.zip64_extra_len()) as u64
    }

    pub fn to_bytes(&self, out: &mut Vec<u8>) {
        let extra_len = self.zip64_extra_len();
        let clamp32 = |v: u64| if v >= 0xFFFF_FFFF { 0xFFFF_FFFF } else { v as u32 };

        out.extend_from_slice(CDFH_SIGNATURE);
        out.extend_from_slice(&self.version_made_by.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.compression_method.as_u16().to_le_bytes());
        out.extend_from_slice(&self.mod_time.to_le_bytes());
        out.extend_from_slice(&self.mod_date.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&(clamp32(self.compressed_size)).to_le_bytes());
        out.extend_from_slice(&(clamp32(self.uncompressed_size)).to_le_bytes());
        out.extend_from_slice(&(self.file_name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(extra_len as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // comment length
        out.extend_from_slice(&0u16.to_le_bytes()); // disk number start
        out.extend_from_slice(&self.internal_attrs.to_le_bytes());
        out.extend_from_slice(&self.external_attrs.to_le_bytes());
        out.extend_from_slice(&(clamp32(self.lfh_offset)).to_le_bytes());
        out.extend_from_slice(self.file_name.as_bytes());

        if extra_len > 0 {
            out.extend_from_slice(&ZIP64_EXTRA_TAG.to_le_bytes());
            out.extend_from_slice(&((extra_len - 4) as u16).to_le_bytes());
            if self.uncompressed_size >= 0xFFFF_FFFF {
                out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
            }
            if self.compressed_size >= 0xFFFF_FFFF {
                out.extend_from_slice(&self.compressed_size.to_le_bytes());
            }
            if self.lfh_offset >= 0xFFFF_FFFF {
                out.extend_from_slice(&self.lfh_offset.to_le_bytes());
            }
        }
    }

    /// Parse modification date to (year, month, day)
    pub fn decoded_date(&self) -> (u16, u8, u8) {
        let day = (self.mod_date & 0x1F) as u8;
        let month = ((self.mod_date >> 5) & 0x0F) as u8;
        let year = ((self.mod_date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn decoded_time(&self) -> (u8, u8, u8) {
        let second = ((self.mod_time & 0x1F) * 2) as u8;
        let minute = ((self.mod_time >> 5) & 0x3F) as u8;
        let hour = ((self.mod_time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }
}
