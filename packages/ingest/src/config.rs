//! Run configuration: an optional TOML file with command-line flags layered
//! on top.

use std::path::{Path, PathBuf};

use opencellid_models::config::{ConfigError, IngestConfig};

/// Reads an [`IngestConfig`] from a TOML file. Keys left out keep their
/// defaults; unknown keys are rejected.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if it is not a valid config.
pub fn load_config_file(path: &Path) -> Result<IngestConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    toml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Settings that can be given on the command line. Every flag is optional
/// and overrides the config file.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigArgs {
    /// TOML file with run settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Access token for the download endpoint
    #[arg(long, global = true, env = "OPENCELLID_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Download URL; `{token}` is replaced by the access token
    #[arg(long, global = true)]
    pub url_template: Option<String>,

    /// Directory holding the database files
    #[arg(long, global = true)]
    pub db_dir: Option<PathBuf>,

    /// Database name
    #[arg(long, global = true)]
    pub db_name: Option<String>,

    /// Destination collection
    #[arg(long, global = true)]
    pub collection: Option<String>,

    /// Local path of the downloaded `.csv.gz`
    #[arg(long, global = true)]
    pub artifact: Option<PathBuf>,

    /// Records per batch (higher values need more memory)
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,

    /// Download write buffer size in bytes
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    /// Drop the collection before loading instead of appending
    #[arg(long, global = true)]
    pub drop: bool,

    /// Download even if the artifact already exists
    #[arg(long, global = true)]
    pub force_download: bool,

    /// Delete the artifact when the run is over
    #[arg(long, global = true)]
    pub remove_artifact: bool,

    /// Comma-separated fields that get an ascending index
    #[arg(long, global = true, value_delimiter = ',')]
    pub index_fields: Option<Vec<String>>,
}

impl ConfigArgs {
    /// Builds the validated configuration for this run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be loaded or the
    /// result is invalid.
    pub fn resolve(&self) -> Result<IngestConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => {
                log::debug!("Loading config from {}", path.display());
                load_config_file(path)?
            }
            None => IngestConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Overwrites `config` with every flag that was given.
    pub fn apply(&self, config: &mut IngestConfig) {
        if let Some(token) = &self.token {
            config.token.clone_from(token);
        }
        if let Some(url_template) = &self.url_template {
            config.url_template.clone_from(url_template);
        }
        if let Some(db_dir) = &self.db_dir {
            config.db_dir.clone_from(db_dir);
        }
        if let Some(db_name) = &self.db_name {
            config.db_name.clone_from(db_name);
        }
        if let Some(collection) = &self.collection {
            config.collection.clone_from(collection);
        }
        if let Some(artifact) = &self.artifact {
            config.artifact.clone_from(artifact);
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(index_fields) = &self.index_fields {
            config.index_fields = index_fields
                .iter()
                .map(|f| f.trim().to_string())
                .collect();
        }

        config.drop |= self.drop;
        config.force_download |= self.force_download;
        config.remove_artifact |= self.remove_artifact;
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn file_values_override_defaults() {
        let file = write_config(
            r#"
            db_name = "towers"
            batch_size = 5000
            drop = true
            index_fields = ["mcc", "cell"]
            "#,
        );

        let config = load_config_file(file.path()).unwrap();

        assert_eq!(config.db_name, "towers");
        assert_eq!(config.batch_size, 5000);
        assert!(config.drop);
        assert_eq!(config.index_fields, vec!["mcc", "cell"]);
        assert_eq!(config.collection, "cell_towers");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let file = write_config("batchsize = 10\n");
        assert!(matches!(
            load_config_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_config_file(&dir.path().join("nope.toml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn flags_override_the_file() {
        let file = write_config("collection = \"from_file\"\nbatch_size = 10\n");
        let args = ConfigArgs {
            config: Some(file.path().to_path_buf()),
            collection: Some("from_flag".to_string()),
            index_fields: Some(vec!["mcc".to_string(), " net ".to_string()]),
            drop: true,
            ..ConfigArgs::default()
        };

        let config = args.resolve().unwrap();

        assert_eq!(config.collection, "from_flag");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.index_fields, vec!["mcc", "net"]);
        assert!(config.drop);
    }

    #[test]
    fn resolve_validates() {
        let args = ConfigArgs {
            batch_size: Some(0),
            ..ConfigArgs::default()
        };
        assert!(matches!(args.resolve(), Err(ConfigError::Invalid { .. })));
    }
}
