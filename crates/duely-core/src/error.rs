use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to access {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed parsing {} line {line}", .path.display())]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to persist {}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode record")]
    Encode(#[from] serde_json::Error),

    #[error("item with id {0} not found")]
    NotFound(u64),
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}
