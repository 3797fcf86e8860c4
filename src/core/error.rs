//! Error handling for relkeep
//!
//! The error system is designed around two core principles:
//! 1. **Strongly-typed errors** for precise handling inside the update engine
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! # Architecture
//!
//! - [`RelkeepError`] - Enumerated failure cases of the update engine
//! - [`ErrorContext`] - Wrapper that adds user-friendly suggestions and details
//!
//! # Error Categories
//!
//! - **Network**: [`RelkeepError::HttpStatus`], [`RelkeepError::Network`], [`RelkeepError::Timeout`]
//! - **Integrity**: [`RelkeepError::ChecksumMismatch`], [`RelkeepError::ChecksumUnavailable`]
//! - **Archives**: [`RelkeepError::NoArtifactInArchive`], [`RelkeepError::Archive`]
//! - **File System**: [`RelkeepError::FileSystem`], [`RelkeepError::Rotation`]
//! - **Configuration**: [`RelkeepError::Config`], [`RelkeepError::InvalidPattern`]
//!
//! Only [`RelkeepError::is_transient`] errors are retried by the download manager.
//!
//! # Examples
//!
//! ```rust,no_run
//! use relkeep::core::{RelkeepError, user_friendly_error};
//!
//! let error = RelkeepError::HttpStatus {
//!     asset: "App-1.0.AppImage".to_string(),
//!     status: 404,
//! };
//! assert!(!error.is_transient());
//!
//! let context = user_friendly_error(anyhow::Error::from(error));
//! context.display();
//! ```

use colored::Colorize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The main error type for relkeep operations.
///
/// Each variant carries enough context (asset name, HTTP status, digest values,
/// paths) for the CLI to render an actionable message without re-inspecting
/// engine state.
#[derive(Error, Debug)]
pub enum RelkeepError {
    /// The server answered with a non-success status code.
    ///
    /// 5xx responses are transient and retried; 4xx responses fail immediately.
    #[error("HTTP {status} while downloading '{asset}'")]
    HttpStatus {
        /// Asset (or digest file) being requested
        asset: String,
        /// HTTP status code returned by the server
        status: u16,
    },

    /// Connection failure, reset, or broken body stream.
    #[error("Network error while downloading '{asset}': {reason}")]
    Network {
        /// Asset being requested
        asset: String,
        /// Underlying transport error
        reason: String,
    },

    /// A single download attempt exceeded its timeout.
    #[error("Download of '{asset}' timed out after {}s", .timeout.as_secs())]
    Timeout {
        /// Asset being requested
        asset: String,
        /// The per-attempt timeout that elapsed
        timeout: Duration,
    },

    /// The computed digest differs from the published one.
    ///
    /// Always fatal for the download, regardless of whether checksums are required.
    #[error("Checksum mismatch for '{asset}' ({algorithm}): expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Asset whose digest did not match
        asset: String,
        /// Digest algorithm used
        algorithm: String,
        /// Digest published by the source
        expected: String,
        /// Digest computed from the downloaded bytes
        actual: String,
    },

    /// No published digest could be obtained while checksums are required.
    #[error("Checksum required for '{asset}' but unavailable: {reason}")]
    ChecksumUnavailable {
        /// Asset that could not be verified
        asset: String,
        /// Why the digest could not be resolved
        reason: String,
    },

    /// The archive does not contain any file with the artifact extension.
    #[error("No {extension} artifact found in '{archive}', contents were: {}", .contents.join(", "))]
    NoArtifactInArchive {
        /// Archive file name
        archive: String,
        /// Artifact extension that was searched for
        extension: String,
        /// Top-level entries of the archive, in listing order
        contents: Vec<String>,
    },

    /// The archive could not be read or extracted.
    #[error("Failed to extract '{archive}': {reason}")]
    Archive {
        /// Archive file name
        archive: String,
        /// Reason for the failure
        reason: String,
    },

    /// A filesystem operation failed.
    #[error("File system error: {operation} '{path}'")]
    FileSystem {
        /// Operation that failed (e.g. "rename", "create directory")
        operation: String,
        /// Path involved in the failure
        path: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The rotation sequence could not be completed.
    #[error("Rotation failed in {directory}: {reason}")]
    Rotation {
        /// Download directory being rotated
        directory: String,
        /// Why the rotation was aborted
        reason: String,
    },

    /// The operation was cancelled or its deadline elapsed.
    #[error("Operation cancelled: {operation}")]
    Cancelled {
        /// What was cancelled
        operation: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error
        message: String,
    },

    /// A match pattern is not a valid regular expression.
    #[error("Invalid match pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Regex compiler message
        reason: String,
    },

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Other error
    #[error("{message}")]
    Other {
        /// Generic error message
        message: String,
    },
}

impl RelkeepError {
    /// Whether a download attempt failing with this error should be retried.
    ///
    /// Timeouts, transport failures and 5xx responses are transient. Client
    /// errors (4xx), integrity failures and local filesystem errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout {
                ..
            }
            | Self::Network {
                ..
            } => true,
            Self::HttpStatus {
                status,
                ..
            } => *status >= 500,
            _ => false,
        }
    }

    /// Build a [`RelkeepError::FileSystem`] from an I/O error.
    pub fn fs(operation: impl Into<String>, path: &std::path::Path, source: std::io::Error) -> Self {
        Self::FileSystem {
            operation: operation.into(),
            path: path.display().to_string(),
            source,
        }
    }
}

impl Clone for RelkeepError {
    fn clone(&self) -> Self {
        match self {
            Self::HttpStatus {
                asset,
                status,
            } => Self::HttpStatus {
                asset: asset.clone(),
                status: *status,
            },
            Self::Network {
                asset,
                reason,
            } => Self::Network {
                asset: asset.clone(),
                reason: reason.clone(),
            },
            Self::Timeout {
                asset,
                timeout,
            } => Self::Timeout {
                asset: asset.clone(),
                timeout: *timeout,
            },
            Self::ChecksumMismatch {
                asset,
                algorithm,
                expected,
                actual,
            } => Self::ChecksumMismatch {
                asset: asset.clone(),
                algorithm: algorithm.clone(),
                expected: expected.clone(),
                actual: actual.clone(),
            },
            Self::ChecksumUnavailable {
                asset,
                reason,
            } => Self::ChecksumUnavailable {
                asset: asset.clone(),
                reason: reason.clone(),
            },
            Self::NoArtifactInArchive {
                archive,
                extension,
                contents,
            } => Self::NoArtifactInArchive {
                archive: archive.clone(),
                extension: extension.clone(),
                contents: contents.clone(),
            },
            Self::Archive {
                archive,
                reason,
            } => Self::Archive {
                archive: archive.clone(),
                reason: reason.clone(),
            },
            // io::Error is not Clone; keep its kind and message
            Self::FileSystem {
                operation,
                path,
                source,
            } => Self::FileSystem {
                operation: operation.clone(),
                path: path.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Self::Rotation {
                directory,
                reason,
            } => Self::Rotation {
                directory: directory.clone(),
                reason: reason.clone(),
            },
            Self::Cancelled {
                operation,
            } => Self::Cancelled {
                operation: operation.clone(),
            },
            Self::Config {
                message,
            } => Self::Config {
                message: message.clone(),
            },
            Self::InvalidPattern {
                pattern,
                reason,
            } => Self::InvalidPattern {
                pattern: pattern.clone(),
                reason: reason.clone(),
            },
            Self::TomlError(e) => Self::Other {
                message: format!("TOML parsing error: {e}"),
            },
            Self::Other {
                message,
            } => Self::Other {
                message: message.clone(),
            },
        }
    }
}

/// Error context wrapper that provides user-friendly error information.
///
/// Wraps a [`RelkeepError`] with an optional suggestion (shown in green) and
/// optional details (shown in yellow) for CLI display.
///
/// ```rust,no_run
/// use relkeep::core::{RelkeepError, ErrorContext};
///
/// let context = ErrorContext::new(RelkeepError::Config {
///     message: "no applications configured".to_string(),
/// })
/// .with_suggestion("Add an [[applications]] entry to ~/.relkeep/config.toml");
///
/// context.display();
/// ```
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying relkeep error
    pub error: RelkeepError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with no suggestion or details.
    #[must_use]
    pub const fn new(error: RelkeepError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error, details and suggestion to stderr with terminal colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error to a user-friendly [`ErrorContext`] with actionable suggestions.
///
/// Recognizes [`RelkeepError`] variants, I/O errors and TOML errors anywhere in
/// the error chain; anything else is rendered with its full cause chain.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(relkeep_error) = error.chain().find_map(|e| e.downcast_ref::<RelkeepError>()) {
        return create_error_context(relkeep_error.clone());
    }

    if let Some(io_error) = error.chain().find_map(|e| e.downcast_ref::<std::io::Error>()) {
        match io_error.kind() {
            std::io::ErrorKind::PermissionDenied => {
                return ErrorContext::new(RelkeepError::Other {
                    message: format!("{error:#}"),
                })
                .with_suggestion(
                    "Check ownership and permissions of the download directory and symlink path",
                );
            }
            std::io::ErrorKind::NotFound => {
                return ErrorContext::new(RelkeepError::Other {
                    message: format!("{error:#}"),
                })
                .with_suggestion("Check that the file or directory exists and the path is correct");
            }
            _ => {}
        }
    }

    if let Some(toml_error) = error.chain().find_map(|e| e.downcast_ref::<toml::de::Error>()) {
        return ErrorContext::new(RelkeepError::Config {
            message: toml_error.to_string(),
        })
        .with_suggestion(
            "Check the TOML syntax of your configuration file. Verify quotes, brackets, and table names",
        );
    }

    let mut message = error.to_string();
    let chain: Vec<String> =
        error.chain().skip(1).map(std::string::ToString::to_string).collect();

    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    ErrorContext::new(RelkeepError::Other {
        message,
    })
}

fn create_error_context(error: RelkeepError) -> ErrorContext {
    match &error {
        RelkeepError::HttpStatus {
            status,
            ..
        } if *status == 404 => ErrorContext::new(error)
            .with_suggestion("The release asset no longer exists upstream; re-run the check to pick up the current release"),
        RelkeepError::HttpStatus {
            status,
            ..
        } if *status == 401 || *status == 403 => ErrorContext::new(error)
            .with_suggestion("The source refused the request; it may be rate limited or require authentication")
            .with_details("GitHub allows 60 unauthenticated API requests per hour per IP address"),
        RelkeepError::Network {
            ..
        }
        | RelkeepError::Timeout {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Check your network connection, or raise [engine] timeout_secs / retries"),
        RelkeepError::ChecksumMismatch {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Do not install this file. Retry later; if the mismatch persists, report it upstream")
            .with_details("The downloaded file was discarded and the installed version was left untouched"),
        RelkeepError::ChecksumUnavailable {
            ..
        } => ErrorContext::new(error).with_suggestion(
            "Set checksum.pattern to the digest file name the project publishes, or set checksum.required = false",
        ),
        RelkeepError::NoArtifactInArchive {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Adjust the application's pattern or artifact_extension to match the archive layout"),
        RelkeepError::FileSystem {
            source,
            ..
        } if source.kind() == std::io::ErrorKind::PermissionDenied => ErrorContext::new(error)
            .with_suggestion("Check ownership and permissions of the download directory"),
        RelkeepError::InvalidPattern {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Patterns are case-insensitive regular expressions, e.g. 'MyApp.*\\.AppImage$'"),
        RelkeepError::Config {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Run 'relkeep list' to see how the configuration was interpreted"),
        _ => ErrorContext::new(error),
    }
}
