use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Index error: {0}")]
    Index(#[from] vicinity::error::Error),
    #[error("Could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed fvecs file {path}: {reason}")]
    MalformedFvecs { path: PathBuf, reason: String },
    #[error("Queries have dimension {found}, base vectors have {expected}")]
    QueryDimension { expected: usize, found: usize },
    #[error("Nothing to index")]
    EmptyDataset,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
