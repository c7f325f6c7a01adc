// SPDX-License-Identifier: GPL-3.0-only
//! Error types for the application
//!
//! Mirrors the failure classes the dimmer distinguishes: fatal startup,
//! degraded devices, invalid configuration and event source failures.

use thiserror::Error;

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Neither the external display strategy nor the panel strategy found a
    /// single usable device. Fatal at startup.
    #[error("No brightness control strategy works with this hardware configuration")]
    NoUsableStrategy,

    /// A single device rejected a command or failed classification
    #[error("Device {device}: {source}")]
    Device {
        device: String,
        #[source]
        source: anyhow::Error,
    },

    /// Configuration value out of range
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file is not valid KDL
    #[error("Failed to parse configuration {path}: {reason}")]
    ConfigParse { path: String, reason: String },

    /// The event source stopped delivering events with an error
    #[error("Event source error: {0}")]
    EventSource(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Task join error
    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl AppError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::NoUsableStrategy => 5,
            AppError::Config(_) | AppError::ConfigParse { .. } => 2,
            _ => 1,
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::TaskJoin(err.to_string())
    }
}

/// Result type alias for AppError
pub type Result<T> = std::result::Result<T, AppError>;
