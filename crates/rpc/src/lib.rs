//! HTTP API for Portfoliofy handles
//!
//! Thin axum layer over [`portfoliofy_handle_registry::IdentityRegistry`].
//! Signup and settings pages call the claim/rename/availability endpoints;
//! the public profile page resolves `/<handle>` through `GET /handles/:handle`.

pub mod handles;
pub mod server;

pub use server::{build_router, start_server, ApiError, AppState};
