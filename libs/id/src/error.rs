//! Error types for identifier parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The identifier string is empty.
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    /// The identifier contains a character that is never valid in a key.
    #[error("invalid character {ch:?} in {kind}")]
    InvalidCharacter { kind: &'static str, ch: char },

    /// A compound identifier is missing its `/` separator.
    #[error("{kind} missing '/' separator")]
    MissingSeparator { kind: &'static str },

    /// The identifier format is invalid.
    #[error("invalid {kind}: {message}")]
    InvalidFormat { kind: &'static str, message: String },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty { .. })
    }
}
