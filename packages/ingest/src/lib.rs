#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Streaming ingestion of the OpenCellID cell tower dump.
//!
//! The pipeline is fetch -> decode -> normalize -> load: the dump is
//! downloaded with [`opencellid_fetch`], decoded into batches by
//! [`opencellid_decode`], each batch has its `lon`/`lat` folded into a
//! `coords` point by [`normalize`], and [`loader`] bulk loads the batches
//! into a [`opencellid_database::DocumentStore`] and provisions the indexes.
//! [`pipeline`] wires the stages together for the CLI.

pub mod config;
pub mod loader;
pub mod normalize;
pub mod pipeline;

use std::path::PathBuf;

use opencellid_database::StoreError;
use opencellid_decode::DecodeError;
use opencellid_fetch::FetchError;
use opencellid_models::config::ConfigError;

/// Errors of an ingestion run, by stage.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Network or filesystem failure while downloading. No database work
    /// was done.
    #[error("download failed: {0}")]
    FetchFailed(#[source] FetchError),

    /// The server did not declare a content length, which is how the
    /// download endpoint signals a rejected token or an unavailable file.
    #[error("download unavailable: server answered {status} without a content length (check the access token)")]
    DownloadUnavailable {
        /// HTTP status of the response.
        status: u16,
    },

    /// The artifact is not a well-formed gzip CSV.
    #[error("failed to parse artifact: {0}")]
    ParseFailed(#[from] DecodeError),

    /// The destination store could not be opened. Nothing was changed.
    #[error("cannot open store {location}: {source}")]
    ConnectionFailed {
        /// Database file.
        location: String,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// A write or index operation failed mid-run. The collection may hold
    /// some documents and lack indexes.
    #[error("loading '{collection}' failed: {source}")]
    LoadFailed {
        /// Destination collection.
        collection: String,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// `load` was asked to read an artifact that is not there.
    #[error("artifact {} does not exist (run the download first)", .0.display())]
    ArtifactMissing(PathBuf),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The blocking load task panicked or was cancelled.
    #[error("load task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IngestError {
    /// Short name of the stage that failed, for diagnostics.
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::FetchFailed(_) | Self::DownloadUnavailable { .. } => "download",
            Self::ParseFailed(_) | Self::ArtifactMissing(_) => "decode",
            Self::ConnectionFailed { .. } => "connect",
            Self::LoadFailed { .. } | Self::Join(_) => "load",
            Self::Config(_) => "config",
        }
    }

    pub(crate) fn load_failed(collection: &str) -> impl FnOnce(StoreError) -> Self + '_ {
        move |source| Self::LoadFailed {
            collection: collection.to_string(),
            source,
        }
    }
}

impl From<FetchError> for IngestError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Unavailable { status } => Self::DownloadUnavailable { status },
            other => Self::FetchFailed(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_content_length_maps_to_unavailable() {
        let err = IngestError::from(FetchError::Unavailable { status: 200 });
        assert!(matches!(err, IngestError::DownloadUnavailable { status: 200 }));
        assert_eq!(err.stage(), "download");
    }

    #[test]
    fn other_fetch_errors_are_fetch_failures() {
        let err = IngestError::from(FetchError::HttpStatus { status: 503 });
        assert!(matches!(err, IngestError::FetchFailed(_)));
    }

    #[test]
    fn decode_errors_are_parse_failures() {
        let err = IngestError::from(DecodeError::MissingHeader);
        assert!(matches!(err, IngestError::ParseFailed(_)));
        assert_eq!(err.stage(), "decode");
    }
}
