//! Error types for the synchronization controller

use std::path::PathBuf;
use thiserror::Error;
use trellis_outline::OutlineError;
use trellis_sentinel::SentinelError;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Sentinel(#[from] SentinelError),

    #[error("Outline error: {0}")]
    Outline(#[from] OutlineError),

    #[error("Root node of {0} is not in the outline")]
    UntrackedFile(PathBuf),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
