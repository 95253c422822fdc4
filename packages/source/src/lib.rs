#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incident source definitions and normalization.
//!
//! Each incident source is described by a [`source_def::SourceDefinition`]
//! (TOML) that maps its raw JSON fields onto the canonical incident format.
//! [`normalize::normalize_records`] applies the mapping record by record,
//! dropping and counting anything unusable instead of failing the batch.

pub mod normalize;
pub mod parsing;
pub mod progress;
pub mod reader;
pub mod source_def;

use strum_macros::{AsRefStr, Display, EnumString};

/// Errors that can occur while loading a source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// I/O error (file read).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Source definition TOML is malformed.
    #[error("Invalid source definition: {0}")]
    Toml(#[from] toml::de::Error),

    /// Source definition parsed but is not usable.
    #[error("Invalid source definition '{source_id}': {message}")]
    InvalidDefinition {
        /// Source the definition belongs to.
        source_id: String,
        /// Description of what went wrong.
        message: String,
    },
}

/// Why a single raw record could not be normalized.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    /// None of the category fields held a non-empty value.
    #[error("missing category code")]
    MissingCategory,

    /// The date field is absent.
    #[error("missing date")]
    MissingDate,

    /// The date field could not be parsed.
    #[error("unparsable date '{value}'")]
    InvalidDate {
        /// Raw value that failed to parse.
        value: String,
    },

    /// Latitude or longitude is absent or not numeric.
    #[error("missing coordinates")]
    MissingCoordinates,

    /// Coordinates are non-finite, out of range, or `(0, 0)`.
    #[error("invalid coordinates ({latitude}, {longitude})")]
    InvalidCoordinates {
        /// Parsed latitude.
        latitude: f64,
        /// Parsed longitude.
        longitude: f64,
    },
}

impl NormalizeError {
    /// The drop-reason bucket this error is counted under.
    #[must_use]
    pub const fn reason(&self) -> DropReason {
        match self {
            Self::MissingCategory => DropReason::MissingCategory,
            Self::MissingDate => DropReason::MissingDate,
            Self::InvalidDate { .. } => DropReason::InvalidDate,
            Self::MissingCoordinates => DropReason::MissingCoordinates,
            Self::InvalidCoordinates { .. } => DropReason::InvalidCoordinates,
        }
    }
}

/// Bucket under which dropped records are counted.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DropReason {
    /// No category code
    MissingCategory,
    /// No date value
    MissingDate,
    /// Date present but unparsable
    InvalidDate,
    /// No usable lat/lon
    MissingCoordinates,
    /// Lat/lon outside valid bounds or null island
    InvalidCoordinates,
}
