use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use super::RemoteFile;

/// Local file backend with positioned reads and writes.
pub struct LocalFile {
    file: std::fs::File,
    size: u64,
    url: String,
}

impl LocalFile {
    /// Open an existing file read-only.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file,
            size,
            url: path.to_string_lossy().into_owned(),
        })
    }

    /// Open for read and write, creating the file if it does not exist.
    pub fn open_rw(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file,
            size,
            url: path.to_string_lossy().into_owned(),
        })
    }
}

#[async_trait]
impl RemoteFile for LocalFile {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_at(buf, offset)
        }

        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            // Read and Seek are implemented for &File
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset))?;
            file.read(buf)
        }
    }

    async fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.write_all_at(data, offset)?;
        }

        #[cfg(not(unix))]
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(data)?;
        }

        self.size = self.size.max(offset + data.len() as u64);
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn url(&self) -> &str {
        &self.url
    }
}
