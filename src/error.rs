// src/error.rs

use thiserror::Error;

/// Core error types for Tessera
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Package admission needs privileges the caller does not hold
    #[error("Package {0} requires additional capabilities")]
    NeedsCapabilities(String),

    /// Malformed transaction manifest
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// Malformed version string
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// Disk-space snapshot could not be taken
    #[error("Failed to probe mounted filesystems: {0}")]
    MountProbe(String),
}

/// Result type alias using Tessera's Error type
pub type Result<T> = std::result::Result<T, Error>;
