// src/error.rs

//! Error types for debasm
//!
//! Every inconsistency detected while assembling a package is fatal, so the
//! variants carry enough context to explain the failure without a backtrace.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Library error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The package tree was frozen before cross-package processing
    #[error("Attempted to modify {0} after the package tree was made read-only")]
    ReadOnlyTree(PathBuf),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Required tool not found: {0}")]
    ToolNotFound(String),

    /// An external tool exited with a non-zero status
    #[error("{message}. Full command was: {command}")]
    CommandFailed { command: String, message: String },

    #[error(
        "None of the service managers ({managers}) detected a service named {name} \
         (type: {type_of_service}, scope: {scope}), but the manifest definition at {source_location} \
         requested that."
    )]
    UnknownService {
        managers: String,
        name: String,
        type_of_service: String,
        scope: String,
        source_location: String,
    },

    #[error(
        "The rule {source_location} explicitly requested which service managers it should apply to. \
         However, the following service managers did not provide a service of that name, type and \
         scope: {missing}. Please check the rule is correct and either provide the missing service \
         or update the definition to match the relevant services."
    )]
    MissingServiceManagers {
        source_location: String,
        missing: String,
    },

    #[error("Unknown service manager {manager} used at {source_location}")]
    UnknownServiceManager {
        manager: String,
        source_location: String,
    },

    /// Packaging policy conflict (binNMU of an arch:all package, conflicting rules, ...)
    #[error("{0}")]
    PolicyConflict(String),
}

impl Error {
    /// Build a `CommandFailed` error from a rendered command line
    pub fn command_failed(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            message: message.into(),
        }
    }
}
