use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] kgrep_core::Error),

    #[error("Output Error - {0}")]
    Output(String),
}
