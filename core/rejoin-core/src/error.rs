//! Error types for rejoin-core operations.

use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════════
// Log Line Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Why a log line could not be turned into an [`Instance`](crate::Instance).
///
/// Always recoverable: the offending line is skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("line does not contain the destination marker")]
    MissingMarker,

    #[error("malformed timestamp: {0:?}")]
    MalformedTimestamp(String),

    #[error("no world identifier in line")]
    MissingIdentifier,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tool Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// All errors that can occur while watching or relaunching the client.
#[derive(Debug, thiserror::Error)]
pub enum RejoinError {
    // ─────────────────────────────────────────────────────────────────────
    // Startup / Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirectory,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Configuration read failed: {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No client log file found in {0}")]
    LogFileNotFound(PathBuf),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Process Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Process lookup failed for {name}: {details}")]
    ProcessLookup { name: String, details: String },

    #[error("Failed to kill process {pid}: {details}")]
    KillFailed { pid: u32, details: String },

    #[error("Failed to launch {program}: {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No known instance to rejoin")]
    NoKnownInstance,
}

/// Convenience type alias for Results using RejoinError.
pub type Result<T> = std::result::Result<T, RejoinError>;
