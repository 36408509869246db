//! Crate-wide error type.
//!
//! Analyses are deterministic: they either complete or fail fast on a
//! configuration problem or a collaborator contract violation. Only the
//! former is represented here; contract violations (e.g. an argument count
//! that does not match the callee's parameter count) are programming errors
//! in the IR producer and abort via assertions.

use std::path::PathBuf;

/// Convenient result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the analysis engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required analysis option is missing or has the wrong shape.
    #[error("configuration error: {0}")]
    Config(String),

    /// The taint configuration file could not be read.
    #[error("cannot read taint config {path}: {source}")]
    TaintConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The taint configuration file is not a valid rule document.
    #[error("malformed taint config {path}: {source}")]
    TaintConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A taint rule names a method or type that does not exist in the program.
    #[error("taint config: {0}")]
    TaintConfigResolve(String),
}
