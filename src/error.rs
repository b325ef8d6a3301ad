//! Error types for CourseCache
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are grouped by the failure classes the learning cache distinguishes:
//!
//! - **Capability**: directory not selected, permission denied or revoked.
//!   Recoverable by asking the learner to pick the folder again, never fatal.
//! - **Scan**: unreadable entries or listings. Logged; partial results are
//!   still returned where possible.
//! - **Storage**: local database or portable progress file problems. Portable
//!   file failures degrade to local-only mode instead of failing reads.
//! - **Media**: decode or read failures during playback. The only class shown
//!   to the learner directly, with a retry affordance.
//! - **Sync**: failures delivering queued progress. Retried on the next drain,
//!   invisible to the learner but always logged.
//!
//! Expected "not ready" states (no folder selected yet, grant lapsed) are not
//! errors at all; they are reported through `HandleReadiness` and `ScanOutcome`.

use thiserror::Error;

/// Result type alias using our CourseCacheError type
pub type Result<T> = std::result::Result<T, CourseCacheError>;

/// Main error type for CourseCache
#[derive(Error, Debug)]
pub enum CourseCacheError {
    // ===== Capability Errors =====

    /// No directory has been selected for the course
    #[error("No directory selected for course: {0}")]
    DirectoryNotSelected(String),

    /// The directory grant exists but does not currently allow the operation
    #[error("Permission denied for directory '{directory}' ({mode})")]
    PermissionDenied {
        directory: String,
        /// Access mode that was requested ("read" or "readwrite")
        mode: String,
    },

    /// The stored handle no longer points at a reachable directory
    #[error("Directory handle revoked or unreachable: {0}")]
    HandleRevoked(String),

    /// A stored handle reference could not be materialized by the host
    #[error("Unrecognised directory handle reference: {0}")]
    UnresolvableHandle(String),

    /// The host lacks the directory access capability entirely
    #[error("Unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    // ===== Scan Errors =====

    /// Directory listing failed
    #[error("Failed to scan directory '{path}': {message}")]
    ScanFailed { path: String, message: String },

    /// Path escapes the course root or is otherwise malformed
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    // ===== Storage Errors =====

    /// File or directory not found
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Generic file I/O error
    #[error("File I/O error: {0}")]
    FileIoError(String),

    /// Portable progress file could not be parsed
    #[error("Malformed progress file '{path}': {message}")]
    MalformedProgressFile { path: String, message: String },

    /// Database schema migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Stored row could not be decoded into a valid entity
    #[error("Could not load a valid {entity_type} from database: {message}")]
    InvalidDatabaseEntity { entity_type: String, message: String },

    // ===== Media Errors =====

    /// Media could not be loaded or decoded for playback
    #[error("Playback failed for '{path}': {message}")]
    MediaError { path: String, message: String },

    /// Requested player transition is not allowed from the current state
    #[error("Invalid player transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    // ===== Sync Errors =====

    /// Remote sync endpoint rejected or failed the request
    #[error("Sync request failed: {message}")]
    SyncFailed {
        message: String,
        /// HTTP status code if available
        status_code: Option<u16>,
    },

    // ===== Configuration/State Errors =====

    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Application state is invalid for the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    // ===== External Library Errors =====

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Database driver error from sqlx
    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failure class of an error, used for logging and propagation decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Capability,
    Scan,
    Storage,
    Media,
    Sync,
    General,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Capability => "capability",
            ErrorCategory::Scan => "scan",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Media => "media",
            ErrorCategory::Sync => "sync",
            ErrorCategory::General => "general",
        }
    }
}

// Helper methods for creating common errors
impl CourseCacheError {
    /// Create a MediaError for a video path
    pub fn media<P: Into<String>, S: Into<String>>(path: P, message: S) -> Self {
        CourseCacheError::MediaError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a ScanFailed error
    pub fn scan_failed<P: Into<String>, S: Into<String>>(path: P, message: S) -> Self {
        CourseCacheError::ScanFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a SyncFailed error
    pub fn sync_failed<S: Into<String>>(message: S, status_code: Option<u16>) -> Self {
        CourseCacheError::SyncFailed {
            message: message.into(),
            status_code,
        }
    }

    /// Create an InvalidInput error with a message
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        CourseCacheError::InvalidInput(message.into())
    }

    /// Classify the error into one of the failure classes
    pub fn category(&self) -> ErrorCategory {
        match self {
            CourseCacheError::DirectoryNotSelected(_)
            | CourseCacheError::PermissionDenied { .. }
            | CourseCacheError::HandleRevoked(_)
            | CourseCacheError::UnresolvableHandle(_)
            | CourseCacheError::UnsupportedEnvironment(_) => ErrorCategory::Capability,

            CourseCacheError::ScanFailed { .. } | CourseCacheError::InvalidPath(_) => {
                ErrorCategory::Scan
            }

            CourseCacheError::FileNotFound(_)
            | CourseCacheError::FileIoError(_)
            | CourseCacheError::MalformedProgressFile { .. }
            | CourseCacheError::MigrationFailed(_)
            | CourseCacheError::InvalidDatabaseEntity { .. }
            | CourseCacheError::SqlxError(_)
            | CourseCacheError::IoError(_)
            | CourseCacheError::SerdeJsonError(_) => ErrorCategory::Storage,

            CourseCacheError::MediaError { .. } | CourseCacheError::InvalidTransition { .. } => {
                ErrorCategory::Media
            }

            CourseCacheError::SyncFailed { .. } | CourseCacheError::ReqwestError(_) => {
                ErrorCategory::Sync
            }

            CourseCacheError::InvalidConfiguration(_)
            | CourseCacheError::InvalidInput(_)
            | CourseCacheError::InvalidState(_) => ErrorCategory::General,
        }
    }

    /// Check if the learner has to re-select or re-grant the course folder
    pub fn needs_regrant(&self) -> bool {
        self.category() == ErrorCategory::Capability
            && !matches!(self, CourseCacheError::UnsupportedEnvironment(_))
    }

    /// Check if error is retryable
    ///
    /// Returns `true` for errors that might succeed on a later attempt:
    /// - Sync failures without a status code (network) or with a 5xx/429 status
    /// - HTTP client errors that are timeouts or connection failures
    /// - Media errors (the learner is offered a retry)
    pub fn is_retryable(&self) -> bool {
        match self {
            CourseCacheError::SyncFailed { status_code, .. } => {
                matches!(status_code, None | Some(429) | Some(500..=599))
            }
            CourseCacheError::ReqwestError(e) => e.is_timeout() || e.is_connect(),
            CourseCacheError::MediaError { .. } => true,
            _ => false,
        }
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            CourseCacheError::DirectoryNotSelected(_) => {
                "Choose the folder that contains this course's videos to continue.".to_string()
            }
            CourseCacheError::PermissionDenied { directory, .. }
            | CourseCacheError::HandleRevoked(directory) => {
                format!(
                    "Access to '{}' is no longer granted. Please select the course folder again.",
                    directory
                )
            }
            CourseCacheError::UnsupportedEnvironment(_) => {
                "This environment cannot open local folders. Try a browser or app with folder access support.".to_string()
            }
            CourseCacheError::MediaError { path, .. } => {
                format!(
                    "The video '{}' could not be played. Check that the file still exists and try again.",
                    path
                )
            }
            CourseCacheError::FileNotFound(path) => {
                format!("'{}' was not found. It may have been moved or deleted.", path)
            }
            _ => self.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for CourseCacheError {
    fn from(err: tokio::task::JoinError) -> Self {
        CourseCacheError::InvalidState(format!("Background task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_errors_need_regrant() {
        assert!(CourseCacheError::HandleRevoked("Course".into()).needs_regrant());
        assert!(CourseCacheError::PermissionDenied {
            directory: "Course".into(),
            mode: "read".into()
        }
        .needs_regrant());
        assert!(!CourseCacheError::UnsupportedEnvironment("no picker".into()).needs_regrant());
        assert!(!CourseCacheError::media("a.mp4", "decode").needs_regrant());
    }

    #[test]
    fn test_sync_retry_classification() {
        assert!(CourseCacheError::sync_failed("offline", None).is_retryable());
        assert!(CourseCacheError::sync_failed("busy", Some(503)).is_retryable());
        assert!(CourseCacheError::sync_failed("slow down", Some(429)).is_retryable());
        assert!(!CourseCacheError::sync_failed("bad request", Some(400)).is_retryable());
    }

    #[test]
    fn test_user_message_for_media_error() {
        let err = CourseCacheError::media("01 - Intro.mp4", "unsupported codec");
        assert_eq!(err.category(), ErrorCategory::Media);
        assert!(err.user_message().contains("01 - Intro.mp4"));
    }
}
