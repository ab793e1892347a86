//! Types for the handle registry

use crate::errors::HandleFormatError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shortest handle accepted by [`Handle::parse`].
pub const MIN_HANDLE_LENGTH: usize = 3;

/// Case-fold a raw handle the same way every operation does.
pub fn fold_handle(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Human-readable public username.
///
/// Always lowercase `[a-z0-9-]`, between [`MIN_HANDLE_LENGTH`] and the
/// registry's configured maximum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    /// Normalize and validate user input.
    pub fn parse(raw: &str, max_len: usize) -> Result<Self, HandleFormatError> {
        let folded = fold_handle(raw);
        let len = folded.chars().count();
        if len < MIN_HANDLE_LENGTH {
            return Err(HandleFormatError::TooShort {
                min: MIN_HANDLE_LENGTH,
            });
        }
        if len > max_len {
            return Err(HandleFormatError::TooLong { max: max_len });
        }
        if let Some(bad) = folded
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
        {
            return Err(HandleFormatError::InvalidCharacter(bad));
        }
        Ok(Self(folded))
    }

    /// Wrap a value read back from the store. Stored handles were validated
    /// when they were written, possibly under a different length limit.
    pub(crate) fn from_stored(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identifier for an authenticated user, supplied by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Accept any non-blank string verbatim.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Either side of a binding, used to address [`crate::IdentityRegistry::release`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKey {
    Identity(String),
    Handle(String),
}

/// Result of an availability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
}

impl Availability {
    pub fn available() -> Self {
        Self { available: true }
    }

    pub fn unavailable() -> Self {
        Self { available: false }
    }
}

/// Why a mutating operation declined to change anything (or only managed
/// part of it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// Handle is on the reserved list.
    Reserved,
    /// Handle already belongs to some identity.
    Taken,
    /// Identity already holds a handle; use rename instead.
    AlreadyBound,
    /// Identity (or handle) has no binding to act on.
    NotBound,
    InvalidHandle,
    InvalidIdentity,
    /// The batch ran but not every step reported success. Steps that did
    /// succeed are left in place.
    PartialWrite,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Reserved => "reserved",
            Rejection::Taken => "taken",
            Rejection::AlreadyBound => "already_bound",
            Rejection::NotBound => "not_bound",
            Rejection::InvalidHandle => "invalid_handle",
            Rejection::InvalidIdentity => "invalid_identity",
            Rejection::PartialWrite => "partial_write",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of claim, rename and release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Rejected(Rejection),
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied)
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Outcome::Applied => None,
            Outcome::Rejected(reason) => Some(*reason),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::Rejected(reason) => reason.as_str(),
        }
    }
}

impl From<Rejection> for Outcome {
    fn from(reason: Rejection) -> Self {
        Outcome::Rejected(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_handle_format_validation() {
        assert_eq!(Handle::parse("alice", 32).unwrap().as_str(), "alice");
        assert_eq!(Handle::parse("  Jane-Doe ", 32).unwrap().as_str(), "jane-doe");
        assert_eq!(Handle::parse("abc", 32).unwrap().as_str(), "abc");
        assert_eq!(
            Handle::parse("ab", 32),
            Err(HandleFormatError::TooShort { min: 3 })
        );
        assert_eq!(
            Handle::parse("abcdef", 5),
            Err(HandleFormatError::TooLong { max: 5 })
        );
        assert_eq!(
            Handle::parse("al_ice", 32),
            Err(HandleFormatError::InvalidCharacter('_'))
        );
        assert_eq!(
            Handle::parse("al ice", 32),
            Err(HandleFormatError::InvalidCharacter(' '))
        );
        assert!(Handle::parse("älice", 32).is_err());
    }

    #[test]
    fn identity_rejects_blank() {
        assert!(Identity::parse("").is_none());
        assert!(Identity::parse("   ").is_none());
        assert_eq!(
            Identity::parse("A@Example.com").unwrap().as_str(),
            "A@Example.com"
        );
    }

    #[test]
    fn outcome_labels() {
        assert!(Outcome::Applied.is_applied());
        assert_eq!(Outcome::Applied.rejection(), None);
        let rejected = Outcome::from(Rejection::AlreadyBound);
        assert!(!rejected.is_applied());
        assert_eq!(rejected.label(), "already_bound");
        assert_eq!(
            serde_json::to_string(&Rejection::PartialWrite).unwrap(),
            "\"partial_write\""
        );
    }

    proptest! {
        #[test]
        fn parse_is_case_insensitive(raw in "[a-zA-Z0-9-]{3,32}") {
            let upper = Handle::parse(&raw.to_uppercase(), 32).unwrap();
            let lower = Handle::parse(&raw.to_lowercase(), 32).unwrap();
            prop_assert_eq!(upper, lower);
        }

        #[test]
        fn parsed_handles_are_normalized(raw in "[a-zA-Z0-9-]{3,32}") {
            let handle = Handle::parse(&raw, 32).unwrap();
            prop_assert_eq!(handle.as_str(), fold_handle(&raw));
            prop_assert!(Handle::parse(handle.as_str(), 32).is_ok());
        }
    }
}
