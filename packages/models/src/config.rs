//! Run configuration for a single ingestion.
//!
//! Every value is a plain scalar (plus the index field list). Defaults match
//! the public OpenCellID dump layout; no access token is compiled in.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Download URL for the full cell tower dump. `{token}` is substituted.
pub const DEFAULT_URL_TEMPLATE: &str =
    "https://download.unwiredlabs.com/ocid/downloads?token={token}&file=cell_towers.csv.gz";

/// Placeholder replaced by the access token in the URL template.
pub const TOKEN_PLACEHOLDER: &str = "{token}";

pub const DEFAULT_DB_NAME: &str = "open_cell_id";
pub const DEFAULT_COLLECTION: &str = "cell_towers";
pub const DEFAULT_ARTIFACT: &str = "cell_towers.csv.gz";

/// Records per batch. Higher values need more RAM.
pub const DEFAULT_BATCH_SIZE: usize = 1_000_000;

/// Write buffer size for the download, in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Cell identity fields that get a secondary index.
pub const DEFAULT_INDEX_FIELDS: &[&str] = &["mcc", "net", "area", "cell"];

/// Configuration for one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    /// Access token for the download endpoint.
    pub token: String,
    /// Download URL containing a `{token}` placeholder.
    pub url_template: String,
    /// Directory holding the `DuckDB` database files.
    pub db_dir: PathBuf,
    /// Logical database name (`{db_dir}/{db_name}.duckdb`).
    pub db_name: String,
    /// Destination collection.
    pub collection: String,
    /// Local path of the downloaded `.csv.gz` artifact.
    pub artifact: PathBuf,
    /// Maximum records per batch.
    pub batch_size: usize,
    /// Download write buffer size in bytes.
    pub chunk_size: usize,
    /// Wipe the collection before loading instead of appending.
    pub drop: bool,
    /// Download even if the artifact already exists.
    pub force_download: bool,
    /// Delete the artifact once the run is over.
    pub remove_artifact: bool,
    /// Fields that get an ascending index after the load.
    pub index_fields: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            db_dir: PathBuf::from("data"),
            db_name: DEFAULT_DB_NAME.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            artifact: PathBuf::from(DEFAULT_ARTIFACT),
            batch_size: DEFAULT_BATCH_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            drop: false,
            force_download: false,
            remove_artifact: false,
            index_fields: DEFAULT_INDEX_FIELDS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl IngestConfig {
    /// The download URL with the token filled in.
    #[must_use]
    pub fn download_url(&self) -> String {
        self.url_template.replace(TOKEN_PLACEHOLDER, &self.token)
    }

    /// The download URL with the token masked, safe for logging.
    #[must_use]
    pub fn redacted_download_url(&self) -> String {
        self.url_template.replace(TOKEN_PLACEHOLDER, "***")
    }

    /// Path of the `DuckDB` file backing `db_name`.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.db_dir.join(format!("{}.duckdb", self.db_name))
    }

    /// Whether this run has to download the artifact.
    #[must_use]
    pub fn needs_download(&self) -> bool {
        self.force_download || !self.artifact.exists()
    }

    /// Checks the values that would otherwise fail deep inside a run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a zero batch or chunk size, an empty
    /// collection or database name, or an index field list with blanks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "batch_size",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                field: "chunk_size",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.collection.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "collection",
                message: "must not be empty".to_string(),
            });
        }
        if self.db_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "db_name",
                message: "must not be empty".to_string(),
            });
        }
        if self.index_fields.iter().any(|f| f.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "index_fields",
                message: "contains an empty field name".to_string(),
            });
        }
        Ok(())
    }

    /// Checks that a download can be attempted at all.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingToken`] if no token is set, or
    /// [`ConfigError::Invalid`] if the template has no token placeholder.
    pub fn validate_download(&self) -> Result<(), ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if !self.url_template.contains(TOKEN_PLACEHOLDER) {
            return Err(ConfigError::Invalid {
                field: "url_template",
                message: format!("must contain {TOKEN_PLACEHOLDER}"),
            });
        }
        Ok(())
    }
}

/// Errors from configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Config file path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`IngestConfig`].
    #[error("failed to parse config {path}: {message}")]
    Parse {
        /// Config file path.
        path: String,
        /// Parser diagnostic.
        message: String,
    },

    /// A value is out of range.
    #[error("invalid {field}: {message}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// A download is required but no token was supplied.
    #[error("an access token is required to download (use --token or OPENCELLID_TOKEN)")]
    MissingToken,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.index_fields, vec!["mcc", "net", "area", "cell"]);
    }

    #[test]
    fn renders_token_into_url() {
        let config = IngestConfig {
            token: "abc123".to_string(),
            ..IngestConfig::default()
        };
        assert_eq!(
            config.download_url(),
            "https://download.unwiredlabs.com/ocid/downloads?token=abc123&file=cell_towers.csv.gz"
        );
        assert!(!config.redacted_download_url().contains("abc123"));
    }

    #[test]
    fn database_path_uses_db_name() {
        let config = IngestConfig {
            db_dir: PathBuf::from("/tmp/ocid"),
            db_name: "towers".to_string(),
            ..IngestConfig::default()
        };
        assert_eq!(config.database_path(), PathBuf::from("/tmp/ocid/towers.duckdb"));
    }

    #[test]
    fn rejects_zero_batch_size() {
        let config = IngestConfig {
            batch_size: 0,
            ..IngestConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "batch_size",
                ..
            })
        ));
    }

    #[test]
    fn download_requires_token() {
        let config = IngestConfig::default();
        assert!(matches!(
            config.validate_download(),
            Err(ConfigError::MissingToken)
        ));
    }
}
