use std::fmt;

use thiserror::Error;

/// Which stage of an image rebuild a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    ReadingSource,
    WritingDestination,
    PostWriteVerification,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildPhase::ReadingSource => write!(f, "reading source"),
            BuildPhase::WritingDestination => write!(f, "writing destination"),
            BuildPhase::PostWriteVerification => write!(f, "post-write verification"),
        }
    }
}

#[derive(Error, Debug)]
pub enum XisoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not an XDVDFS image: {0}")]
    NotXdvdfsImage(String),

    #[error("truncated read in {name}: expected {expected} bytes, got {actual}")]
    TruncatedRead {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("corrupt directory tree: {0}")]
    CorruptDirectoryTree(String),

    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("integrity check failed at {name}: {source}")]
    Integrity {
        name: String,
        #[source]
        source: Box<XisoError>,
    },

    #[error("{phase} failed at {name}: {source}")]
    Build {
        phase: BuildPhase,
        name: String,
        #[source]
        source: Box<XisoError>,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl XisoError {
    /// Wrap an error as an integrity failure for `name`. Cancellation passes through.
    pub fn integrity(name: impl Into<String>, source: XisoError) -> Self {
        match source {
            XisoError::Cancelled => XisoError::Cancelled,
            other => XisoError::Integrity {
                name: name.into(),
                source: Box::new(other),
            },
        }
    }

    /// Wrap an error as a build failure in `phase`. Cancellation passes through.
    pub fn build(phase: BuildPhase, name: impl Into<String>, source: XisoError) -> Self {
        match source {
            XisoError::Cancelled => XisoError::Cancelled,
            other => XisoError::Build {
                phase,
                name: name.into(),
                source: Box::new(other),
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, XisoError::Cancelled)
    }

    /// Name of the entry that caused a verify or build failure, if known.
    pub fn offending_name(&self) -> Option<&str> {
        match self {
            XisoError::Integrity { name, .. } | XisoError::Build { name, .. } => Some(name),
            XisoError::TruncatedRead { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Phase tag of a build failure.
    pub fn build_phase(&self) -> Option<BuildPhase> {
        match self {
            XisoError::Build { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, XisoError>;
