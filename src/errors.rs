/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

use std::io;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = RevlogError> = std::result::Result<T, E>;

/// Errors surfaced by revlog reading. Nothing is retried internally;
/// the paths identify which of the `.i`/`.d` pair was being read.
#[derive(Debug, Error)]
pub enum RevlogError {
    #[error("invalid revision {rev}: valid range is [0, {count})")]
    InvalidRevision { rev: i32, count: usize },

    #[error("corrupt revlog {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("error reading revlog {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("inconsistent append to revlog {}: {reason}", path.display())]
    InconsistentAppend { path: PathBuf, reason: String },

    #[error("revlog inspector failed")]
    Inspector(#[source] anyhow::Error),
}

impl RevlogError {
    pub(crate) fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        RevlogError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Classify a stream failure: a short or malformed read means the file
    /// itself is bad, anything else is an IO problem.
    pub(crate) fn from_read(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => RevlogError::Corrupt {
                path: path.to_path_buf(),
                reason: err.to_string(),
            },
            _ => RevlogError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }

    pub(crate) fn inconsistent_append(path: &Path, reason: impl Into<String>) -> Self {
        RevlogError::InconsistentAppend {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}
