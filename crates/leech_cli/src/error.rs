use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Leech(#[from] leech::error::Error),

    #[error("Could not print the value as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),

    #[error("The log file path `{0}` has no file name")]
    LogFileInvalid(String),
}
