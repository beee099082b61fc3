use std::path::PathBuf;

/// Error loading client configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Error tearing down a client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client driver already stopped")]
    DriverGone,
    #[error("client driver panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}
