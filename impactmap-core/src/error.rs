//! Error types and result aliases.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git {args}: {message}")]
    Git { args: String, message: String },

    #[error("Failed to load workspace manifest from {0}")]
    WorkspaceManifest(PathBuf),

    #[error("Cannot determine merge base against {branch}: {message}")]
    MergeBase { branch: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
