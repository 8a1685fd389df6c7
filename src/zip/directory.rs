//! Central directory index.
//!
//! Ordered sequence of [`Cdfh`] records plus a name lookup map. Insertion
//! order equals on-disk order; member data ranges are derived from the
//! offsets of *neighbouring* records, so the ordering is load-bearing.

use std::collections::HashMap;
use std::io::Cursor;

use crate::error::{Result, ZipError};
use crate::zip::records::Cdfh;

/// Parsed central directory: `entries` in on-disk order, `index` mapping
/// member name to its position in `entries`.
#[derive(Debug, Default)]
pub struct CentralDirectory {
    entries: Vec<Cdfh>,
    index: HashMap<String, usize>,
}

impl CentralDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `count` directory records out of `buf`.
    ///
    /// Fails with a data error if a signature check or length arithmetic
    /// breaks before `count` records have been read.
    pub fn parse(buf: &[u8], count: u64) -> Result<Self> {
        let mut dir = Self::new();
        let mut cursor = Cursor::new(buf);
        for _ in 0..count {
            let cdfh = Cdfh::parse(&mut cursor)?;
            dir.append(cdfh);
        }
        log::debug!("parsed central directory: {} entries", dir.len());
        Ok(dir)
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn at(&self, i: usize) -> &Cdfh {
        &self.entries[i]
    }

    /// Add a record, keeping the vector and the map in step.
    ///
    /// A duplicate name repoints the map at the new record, mirroring how
    /// later central-directory entries shadow earlier ones on extraction.
    pub fn append(&mut self, cdfh: Cdfh) {
        self.index.insert(cdfh.file_name.clone(), self.entries.len());
        self.entries.push(cdfh);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total byte length of all records when serialized.
    pub fn serialized_size(&self) -> u64 {
        self.entries.iter().map(|e| e.serialized_size()).sum()
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        for entry in &self.entries {
            entry.to_bytes(out);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cdfh> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::records::Lfh;
    use std::time::SystemTime;

    fn sample_dir() -> CentralDirectory {
        let mut dir = CentralDirectory::new();
        dir.append(Cdfh::from_lfh(
            &Lfh::new("x", 1, 3, SystemTime::now()),
            0,
        ));
        dir.append(Cdfh::from_lfh(
            &Lfh::new("y", 2, 4, SystemTime::now()),
            34,
        ));
        dir
    }

    #[test]
    fn append_keeps_map_and_vec_in_step() {
        let dir = sample_dir();
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.find("x"), Some(0));
        assert_eq!(dir.find("y"), Some(1));
        assert_eq!(dir.at(dir.find("y").unwrap()).file_name, "y");
        assert_eq!(dir.find("z"), None);
    }

    #[test]
    fn serialize_parse_preserves_order() {
        let dir = sample_dir();
        let mut buf = Vec::new();
        dir.serialize(&mut buf);
        assert_eq!(buf.len() as u64, dir.serialized_size());

        let reparsed = CentralDirectory::parse(&buf, 2).unwrap();
        assert_eq!(reparsed.at(0).file_name, "x");
        assert_eq!(reparsed.at(1).file_name, "y");
        assert_eq!(reparsed.at(1).offset(), 34);
    }

    #[test]
    fn parse_truncated_fails() {
        let dir = sample_dir();
        let mut buf = Vec::new();
        dir.serialize(&mut buf);
        buf.truncate(buf.len() - 10);
        assert!(matches!(
            CentralDirectory::parse(&buf, 2),
            Err(ZipError::DataError(_))
        ));
    }

    #[test]
    fn parse_wrong_count_fails() {
        let dir = sample_dir();
        let mut buf = Vec::new();
        dir.serialize(&mut buf);
        assert!(CentralDirectory::parse(&buf, 3).is_err());
    }
}
