// src/error.rs

//! Error types for the collision resolution engine
//!
//! Every failure maps onto a [`FailureKind`], the machine-readable class
//! reported to callers in a [`RunResult`](crate::RunResult) and used by the
//! CLI to pick an exit code.

use crate::verify::ResidualCollision;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Engine errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Archive not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Corrupt archive {}: {reason}", path.display())]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("Failed to parse metadata document {path}: {reason}")]
    ParseError { path: String, reason: String },

    #[error("Write failed for {}: {source}", path.display())]
    WriteError { path: PathBuf, source: io::Error },

    #[error("Verification failed: {} residual collision(s) remain", .0.len())]
    VerificationFailed(Vec<ResidualCollision>),

    #[error("Archive {} is locked by another run", .0.display())]
    Busy(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Machine-readable failure class for this error
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidInput(_) | Self::NotFound(_) => FailureKind::InvalidInput,
            Self::CorruptArchive { .. } => FailureKind::CorruptArchive,
            Self::ParseError { .. } => FailureKind::ParseError,
            Self::WriteError { .. } | Self::Io(_) => FailureKind::WriteError,
            Self::VerificationFailed(_) => FailureKind::VerificationFailed,
            Self::Busy(_) => FailureKind::Busy,
        }
    }

    /// Wrap an IO error with the path being written
    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::WriteError {
            path: path.into(),
            source,
        }
    }
}

/// Failure classes reported to orchestration layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Missing archive, malformed canonical identifier, bad token or config
    InvalidInput,
    /// Input is not a readable zip archive
    CorruptArchive,
    /// A metadata document could not be parsed or updated
    ParseError,
    /// Disk or permission failure while writing
    WriteError,
    /// Offending components remain after rewriting
    VerificationFailed,
    /// Another run holds the archive lock
    Busy,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::CorruptArchive => "corrupt_archive",
            Self::ParseError => "parse_error",
            Self::WriteError => "write_error",
            Self::VerificationFailed => "verification_failed",
            Self::Busy => "busy",
        }
    }

    /// Process exit code used by the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput => 2,
            Self::CorruptArchive => 3,
            Self::ParseError => 4,
            Self::WriteError => 5,
            Self::VerificationFailed => 6,
            Self::Busy => 7,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
