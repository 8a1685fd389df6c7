//! ZIP archive core: record codecs, directory index, inflate cache, the
//! open state machine and the archive session.

pub mod archive;
pub mod directory;
pub mod inflate;
pub mod open;
pub mod records;

pub use archive::{DirectoryListing, ListEntry, OpenFlags, ZipArchive};
pub use directory::CentralDirectory;
pub use inflate::{InflateCache, InflateStatus};
pub use records::{Cdfh, CompressionMethod, Eocd, Lfh, Zip64Eocd, Zip64EocdLocator};
