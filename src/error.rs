//! Startup failures that end the process with a non-zero status.

use crate::config::ConfigError;
use crate::directory::SearchError;
use crate::store::StoreError;

#[derive(thiserror::Error, Debug)]
pub enum CollectorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Directory error: {0}")]
    Directory(#[from] SearchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Could not install the interrupt handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
