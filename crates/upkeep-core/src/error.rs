use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpkeepError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpkeepError {
    /// Short error code string for logs and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            UpkeepError::Config(_) => "CONFIG_ERROR",
            UpkeepError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, UpkeepError>;
