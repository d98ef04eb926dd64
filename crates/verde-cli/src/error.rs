use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] verde_core::Error),
    #[error(transparent)]
    Remote(#[from] verde_core::remote::RemoteError),
    #[error(transparent)]
    Feed(#[from] verde_core::remote::FeedError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Client key cannot be empty")]
    EmptyKey,
    #[error("No rejected submission matches key/prefix: {0}")]
    KeyNotFound(String),
    #[error("{0}")]
    AmbiguousKey(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "No API is configured. Set api_base_url in the config file or VERDE_API_BASE_URL."
    )]
    ApiNotConfigured,
}
