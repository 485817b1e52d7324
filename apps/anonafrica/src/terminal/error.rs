use std::io;
use thiserror::Error;

use crate::error::{ConfigError, DescriptorError};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Descriptor(#[from] DescriptorError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("logging initialization failed: {0}")]
    Logging(String),
}
