//! Handle Registry for Public Usernames
//!
//! Binds an opaque user identity (verified email or OAuth subject) to a
//! human-chosen handle such as `alice` or `jane-doe`. Each binding lives as
//! two string keys in a [`portfoliofy_storage::KeyValueStore`]:
//!
//! - `user:id:<identity>` → `<handle>`
//! - `user:name:<handle>` → `<identity>`
//!
//! Claims and renames are check-then-act over a batched write. Two callers
//! racing for the same handle can both pass the existence check; the store
//! keeps whichever write lands last. Callers that need more must serialize
//! externally.

pub mod config;
pub mod errors;
pub mod registry;
pub mod types;

pub use config::RegistryConfig;
pub use errors::*;
pub use registry::IdentityRegistry;
pub use types::*;
