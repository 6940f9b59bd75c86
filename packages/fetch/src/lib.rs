#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Streaming download of the cell tower dump.
//!
//! The response body is streamed into `{dest}.part` and only renamed onto
//! `dest` once every declared byte has arrived, so a failed or truncated
//! download never leaves something at `dest` that looks complete. A server
//! that does not declare a `Content-Length` (the OpenCellID endpoint does
//! this when the token is rejected) is refused before any file is touched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt as _;
use opencellid_models::config::DEFAULT_CHUNK_SIZE;
use opencellid_models::progress::{ProgressCallback, fraction};
use tokio::io::{AsyncWriteExt as _, BufWriter};

const USER_AGENT: &str = "opencellid-ingest/0.1";

/// Tunables for [`download_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Size of the write buffer between the network and the file.
    pub chunk_size: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Path the body is streamed into before it is complete.
#[must_use]
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Downloads `url` to `dest`, reporting byte progress after every chunk.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// * [`FetchError::Unavailable`] if the response declares no length. `dest`
///   is left untouched.
/// * [`FetchError::HttpStatus`] for a non-success status.
/// * [`FetchError::Truncated`] if the body ends early.
/// * [`FetchError::Http`] / [`FetchError::Io`] for transport and disk
///   failures.
pub async fn download_file(
    url: &str,
    dest: &Path,
    options: &FetchOptions,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<u64, FetchError> {
    log::info!("  -> {}", dest.display());

    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| FetchError::Http(e.without_url()))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::Http(e.without_url()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::HttpStatus {
            status: status.as_u16(),
        });
    }

    let Some(total_size) = response.content_length() else {
        return Err(FetchError::Unavailable {
            status: status.as_u16(),
        });
    };

    #[allow(clippy::cast_precision_loss)]
    let mb = total_size as f64 / 1_048_576.0;
    log::info!("  file size: {mb:.1} MB");

    if let Some(parent) = dest.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FetchError::io(parent, e))?;
    }

    let part = partial_path(dest);
    let file = tokio::fs::File::create(&part)
        .await
        .map_err(|e| FetchError::io(&part, e))?;
    let mut writer = BufWriter::with_capacity(options.chunk_size.max(1), file);

    progress.set_total(total_size);
    progress.set_position(0);

    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;
    let mut last_logged_pct: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FetchError::Http(e.without_url()))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| FetchError::io(&part, e))?;
        downloaded += chunk.len() as u64;
        progress.set_position(downloaded);

        // Log every 10%
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let pct = (fraction(downloaded, total_size) * 100.0) as u64;
        if pct / 10 > last_logged_pct / 10 {
            last_logged_pct = pct;
            log::debug!("  downloaded {downloaded}/{total_size} bytes ({pct}%)");
        }
    }

    writer.flush().await.map_err(|e| FetchError::io(&part, e))?;
    writer
        .into_inner()
        .sync_all()
        .await
        .map_err(|e| FetchError::io(&part, e))?;

    if downloaded != total_size {
        return Err(FetchError::Truncated {
            expected: total_size,
            received: downloaded,
        });
    }

    tokio::fs::rename(&part, dest)
        .await
        .map_err(|e| FetchError::io(dest, e))?;

    log::info!("  download complete: {mb:.1} MB");
    progress.finish(format!("downloaded {mb:.1} MB"));

    Ok(downloaded)
}

/// Errors from download operations.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// HTTP transport error. The URL is stripped so the token never ends up
    /// in a log line.
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    /// Non-success HTTP status.
    #[error("server answered HTTP {status}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
    },

    /// The server did not declare a content length.
    #[error("download unavailable (HTTP {status} without Content-Length, is the token valid?)")]
    Unavailable {
        /// HTTP status code of the response.
        status: u16,
    },

    /// The body ended before the declared length was reached.
    #[error("download truncated: received {received} of {expected} bytes")]
    Truncated {
        /// Declared length.
        expected: u64,
        /// Bytes actually written.
        received: u64,
    },

    /// I/O error writing to disk.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl FetchError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Whether the server refused to report a size.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}
