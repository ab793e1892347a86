//! Error types for the handle registry

use portfoliofy_storage::StoreError;
use thiserror::Error;

/// Infrastructure failures. Business rejections are reported through
/// [`crate::Outcome`] instead.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("Invalid registry configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandleFormatError {
    #[error("Handle must be at least {min} characters")]
    TooShort { min: usize },

    #[error("Handle must be at most {max} characters")]
    TooLong { max: usize },

    #[error("Handle contains invalid character {0:?}; use a-z, 0-9 and '-'")]
    InvalidCharacter(char),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
