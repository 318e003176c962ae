use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobflowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),
}

impl JobflowError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            JobflowError::Config(_) => "CONFIG_ERROR",
            JobflowError::InvalidSchedule(_) => "INVALID_SCHEDULE",
        }
    }
}

pub type Result<T> = std::result::Result<T, JobflowError>;
