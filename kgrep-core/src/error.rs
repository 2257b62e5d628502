use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Connecting to broker {server} - {error}")]
    Connection { server: String, error: String },

    #[error("Metadata Error - {0}")]
    Metadata(String),

    #[error("Seek Error - {0}")]
    Seek(String),

    /// A read failed; the run that issued it cannot continue.
    #[error("Read Error - {0}")]
    Read(String),

    #[error("Invalid Argument - {0}")]
    InvalidArgument(String),

    #[error("Close Error - {0}")]
    Close(String),

    #[error("Config Error - {0}")]
    Config(String),

    /// The background read loop of a tail did not finish normally.
    #[error("Worker Error - {0}")]
    Worker(String),
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Worker(err.to_string())
    }
}
