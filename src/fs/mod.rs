pub mod entry;
pub mod filesystem;
pub mod stream;
pub mod traversal;
pub mod volume;

pub use entry::{Attributes, DirectoryEntry};
pub use filesystem::{Filesystem, XdvdfsFilesystem};
pub use stream::SectorStream;
pub use traversal::{list_children, BreadthFirst};
pub use volume::VolumeDescriptor;

/// Every XDVDFS structure is addressed in 2048-byte sectors.
pub const SECTOR_SIZE: u64 = 2048;

/// Round a byte count up to the next sector boundary.
pub fn align_to_sector(bytes: u64) -> u64 {
    bytes.div_ceil(SECTOR_SIZE) * SECTOR_SIZE
}

/// Number of sectors needed to hold `bytes`.
pub fn sectors_for_bytes(bytes: u64) -> u64 {
    bytes.div_ceil(SECTOR_SIZE)
}

/// Join a child name onto an image path ("/" is the root).
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() || parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}
