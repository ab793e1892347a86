//! Registry configuration

use crate::errors::{RegistryError, Result};
use crate::types::{fold_handle, MIN_HANDLE_LENGTH};
use serde::{Deserialize, Serialize};

/// Route names and system paths that can never become a public handle.
pub const DEFAULT_RESERVED_HANDLES: &[&str] = &[
    "404", "500", "about", "account", "admin", "api", "assets", "auth", "blog", "claim",
    "contact", "dashboard", "docs", "edit", "editor", "favicon", "health", "help", "home",
    "identities", "images", "index", "login", "logout", "mail", "metrics", "new", "null",
    "portfolio", "preview", "pricing", "privacy", "profile", "public", "register", "rename",
    "resume", "robots", "root", "settings", "signin", "signup", "sitemap", "static", "support",
    "terms", "undefined", "upload", "uploads", "user", "username", "users", "www",
];

pub const DEFAULT_MAX_HANDLE_LENGTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Compared case-insensitively.
    pub reserved_handles: Vec<String>,
    pub max_handle_length: usize,
    /// Namespace for the `<prefix>:id:` and `<prefix>:name:` keys.
    pub key_prefix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            reserved_handles: DEFAULT_RESERVED_HANDLES
                .iter()
                .map(|name| name.to_string())
                .collect(),
            max_handle_length: DEFAULT_MAX_HANDLE_LENGTH,
            key_prefix: "user".to_string(),
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_handle_length < MIN_HANDLE_LENGTH {
            return Err(RegistryError::InvalidConfig(format!(
                "max_handle_length must be at least {MIN_HANDLE_LENGTH}, got {}",
                self.max_handle_length
            )));
        }
        if self.key_prefix.trim().is_empty() {
            return Err(RegistryError::InvalidConfig(
                "key_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Reserved names, case-folded.
    pub fn folded_reserved(&self) -> impl Iterator<Item = String> + '_ {
        self.reserved_handles
            .iter()
            .map(|name| fold_handle(name))
            .filter(|name| !name.is_empty())
    }
}
