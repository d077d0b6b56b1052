use thiserror::Error;

/// Errors surfaced by the application lifecycle
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("listener address repeated: {addr} (already claimed by server '{first}')")]
    DuplicateListener { addr: String, first: String },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS provisioning error: {0}")]
    TlsProvision(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
