//! Core types for relkeep
//!
//! This module holds the error type shared by every stage of the update
//! engine and the helpers that turn those errors into user-facing messages.
//!
//! - [`RelkeepError`] - Enumerated failure cases of the update engine
//! - [`ErrorContext`] - User-friendly error wrapper with suggestions and details
//! - [`user_friendly_error`] - Convert any error to user-friendly format
//!
//! Engine stages return `anyhow::Result` and attach [`RelkeepError`] values
//! at the point of failure, so the CLI can downcast them later:
//!
//! ```rust
//! use relkeep::core::{RelkeepError, user_friendly_error};
//!
//! fn fetch() -> anyhow::Result<()> {
//!     Err(RelkeepError::HttpStatus {
//!         asset: "App.AppImage".to_string(),
//!         status: 404,
//!     }
//!     .into())
//! }
//!
//! if let Err(e) = fetch() {
//!     let friendly = user_friendly_error(e);
//!     assert!(friendly.suggestion.is_some());
//! }
//! ```

pub mod error;

pub use error::{ErrorContext, RelkeepError, user_friendly_error};
