//! Runs the stages for the CLI: download, load, or both.
//!
//! The download is async. Decoding and loading are synchronous and run on a
//! blocking thread so a long load never stalls the runtime. The store is
//! opened only after the artifact's header has been read, and is closed
//! when the load returns, whatever the outcome.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use opencellid_database::DuckDbStore;
use opencellid_decode::ChunkedDecoder;
use opencellid_fetch::FetchOptions;
use opencellid_models::config::IngestConfig;
use opencellid_models::progress::{ProgressCallback, null_progress};

use crate::IngestError;
use crate::loader::{self, LoadOptions, LoadSummary};
use crate::normalize;

/// Progress observers for the two phases.
#[derive(Clone)]
pub struct Observers {
    pub download: Arc<dyn ProgressCallback>,
    pub load: Arc<dyn ProgressCallback>,
}

impl Default for Observers {
    fn default() -> Self {
        Self {
            download: null_progress(),
            load: null_progress(),
        }
    }
}

/// Outcome of [`sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Bytes downloaded, or `None` if an existing artifact was used.
    pub downloaded: Option<u64>,
    pub load: LoadSummary,
}

/// Downloads the dump to `config.artifact`.
///
/// # Errors
///
/// * [`IngestError::Config`] if no token is configured.
/// * [`IngestError::DownloadUnavailable`] if the server declares no length.
///   An existing artifact is left as it was.
/// * [`IngestError::FetchFailed`] for any other network or disk failure.
pub async fn download(
    config: &IngestConfig,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<u64, IngestError> {
    config.validate()?;
    config.validate_download()?;

    log::info!("Downloading data...");
    log::debug!("  from {}", config.redacted_download_url());

    let options = FetchOptions {
        chunk_size: config.chunk_size,
    };
    let bytes = opencellid_fetch::download_file(
        &config.download_url(),
        &config.artifact,
        &options,
        progress,
    )
    .await?;

    Ok(bytes)
}

/// Decodes, normalizes, and loads `config.artifact` into the configured
/// collection on the calling thread.
///
/// # Errors
///
/// * [`IngestError::ArtifactMissing`] if the artifact does not exist.
/// * [`IngestError::ParseFailed`] if it cannot be decoded.
/// * [`IngestError::ConnectionFailed`] if the store cannot be opened. The
///   store is not touched.
/// * [`IngestError::LoadFailed`] if a write or index operation fails.
pub fn load_artifact(
    config: &IngestConfig,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<LoadSummary, IngestError> {
    config.validate()?;

    if !config.artifact.is_file() {
        return Err(IngestError::ArtifactMissing(config.artifact.clone()));
    }

    log::info!("Updating database...");
    let start = Instant::now();

    let decoder = ChunkedDecoder::open(&config.artifact, config.batch_size)?;
    log::debug!("  fields: {}", decoder.headers().join(","));

    let path = config.database_path();
    let mut store = DuckDbStore::open(&path).map_err(|source| IngestError::ConnectionFailed {
        location: path.display().to_string(),
        source,
    })?;

    let options = LoadOptions {
        drop: config.drop,
        index_fields: config.index_fields.clone(),
    };
    let fields = normalize::normalized_fields(decoder.headers());
    let batches = decoder.map(|batch| batch.map(normalize::normalize_owned_batch));

    let summary = loader::load(
        &mut store,
        &config.collection,
        &fields,
        batches,
        &options,
        progress,
    )?;

    store
        .close()
        .map_err(IngestError::load_failed(&config.collection))?;

    log::info!(
        "Loaded {} documents into {} ({} batches) in {:.1}s",
        summary.documents,
        config.collection,
        summary.batches,
        start.elapsed().as_secs_f64(),
    );

    Ok(summary)
}

/// [`load_artifact`] on a blocking thread.
///
/// # Errors
///
/// Everything [`load_artifact`] returns, plus [`IngestError::Join`] if the
/// blocking task dies.
pub async fn load(
    config: &IngestConfig,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<LoadSummary, IngestError> {
    let config = config.clone();
    let progress = Arc::clone(progress);
    tokio::task::spawn_blocking(move || load_artifact(&config, &progress)).await?
}

/// Downloads the dump when needed, then loads it.
///
/// A download happens when `force_download` is set or the artifact is
/// missing. With `remove_artifact`, the artifact and any partial download
/// are deleted afterwards, also when the run failed.
///
/// # Errors
///
/// Whatever [`download`] or [`load`] returns. A failed download means no
/// database work was done.
pub async fn sync(config: &IngestConfig, observers: &Observers) -> Result<SyncReport, IngestError> {
    config.validate()?;

    let result = sync_stages(config, observers).await;

    if config.remove_artifact {
        remove_artifact(&config.artifact);
    }

    result
}

async fn sync_stages(
    config: &IngestConfig,
    observers: &Observers,
) -> Result<SyncReport, IngestError> {
    let downloaded = if config.needs_download() {
        Some(download(config, &observers.download).await?)
    } else {
        log::info!("Using existing artifact {}", config.artifact.display());
        None
    };

    let load = load(config, &observers.load).await?;

    Ok(SyncReport { downloaded, load })
}

/// Deletes the artifact and its partial download, if present.
pub fn remove_artifact(artifact: &Path) {
    for path in [artifact.to_path_buf(), opencellid_fetch::partial_path(artifact)] {
        match std::fs::remove_file(&path) {
            Ok(()) => log::info!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove {}: {e}", path.display()),
        }
    }
}
