//! Reading, verifying and rebuilding Xbox XDVDFS (XISO) disc images.

pub mod config;
pub mod error;
pub mod extract;
pub mod fs;
pub mod progress;
pub mod rebuild;
pub mod verify;

pub use error::{BuildPhase, Result, XisoError};
pub use extract::{extract_image, ExtractSummary};
pub use fs::{DirectoryEntry, Filesystem, XdvdfsFilesystem};
pub use progress::{OperationProgress, Progress};
pub use rebuild::{build, BuildOptions, BuildSource, BuildSummary};
pub use verify::{test_integrity, verify, VerifyOptions, VerifySummary};
