//! Socialstream API Library
//!
//! This crate provides the HTTP handlers, error rendering and runtime wiring
//! of the media service.

pub mod constants;
pub mod error;
pub mod extractors;
mod handlers;
pub mod setup;
pub mod state;
pub mod telemetry;

// Re-exports
pub use error::{ErrorResponse, HttpAppError};
pub use state::AppState;
