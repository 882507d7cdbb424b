#![warn(missing_docs)]
//! Image, manifest and update descriptions shared by the atomupd server and
//! client.

use std::path::PathBuf;

mod buildid;
pub use buildid::*;

mod image;
pub use image::*;

mod manifest;
pub use manifest::*;

mod os_release;
pub use os_release::*;

mod update;
pub use update::*;

/// Errors raised while parsing or comparing images.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A mandatory field is absent
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A field is present but its value can't be parsed
    #[error("invalid value for `{field}`: {reason}")]
    InvalidField {
        /// Name of the offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// A manifest file could not be read or decoded
    #[error("malformed manifest {}: {reason}", path.display())]
    MalformedManifest {
        /// Path of the manifest
        path: PathBuf,
        /// What is wrong with it
        reason: String,
    },

    /// A mandatory field has neither an override nor a value on the running system
    #[error("missing system information: {0}")]
    MissingSystemInfo(String),

    /// A snapshot was compared against a versioned image
    #[error("can't compare snapshot with versioned image")]
    Incomparable,

    /// Malformed JSON document
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
