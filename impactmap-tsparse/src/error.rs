//! Error types and result aliases.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to load grammar: {0}")]
    Language(#[from] tree_sitter::LanguageError),

    #[error("Parser produced no tree for {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, Error>;
