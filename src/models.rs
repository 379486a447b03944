//! Model file cache and download
//!
//! Resolves the segmentation model's `config.json` and ONNX weights from the
//! Hugging Face hub into a local cache directory. Downloads land in a
//! temporary directory next to the cache and are renamed into place, so a
//! partially downloaded model is never visible as cached.
//!
//! Cache location, in order of precedence:
//! - `ModelConfig::cache_dir`
//! - `IDPHOTO_PREP_CACHE_DIR`
//! - the user cache directory (`~/.cache/idphoto-prep/models` on Linux)

use crate::{
    config::ModelConfig,
    error::{PhotoError, Result},
    services::progress::{DownloadProgress, ProgressReporter},
};
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

/// Environment override for the cache root
pub const CACHE_DIR_ENV: &str = "IDPHOTO_PREP_CACHE_DIR";

const HUB_BASE_URL: &str = "https://huggingface.co";
const CONFIG_FILE: &str = "config.json";

/// Locally available model files
///
/// When the cache is disabled the files live in a temporary directory owned
/// by this value and are removed when it is dropped.
#[derive(Debug)]
pub struct ModelFiles {
    pub dir: PathBuf,
    pub config: PathBuf,
    pub weights: PathBuf,
    _scratch: Option<TempDir>,
}

impl ModelFiles {
    /// Read and parse the label map from `config.json`
    ///
    /// # Errors
    /// - File cannot be read or parsed
    pub fn metadata(&self) -> Result<ModelMetadata> {
        let raw = fs::read_to_string(&self.config)
            .map_err(|e| PhotoError::file_io_error("read model config", &self.config, &e))?;
        ModelMetadata::from_json(&raw)
    }

    /// Read the ONNX weights into memory
    ///
    /// # Errors
    /// - File cannot be read
    pub fn read_weights(&self) -> Result<Vec<u8>> {
        fs::read(&self.weights)
            .map_err(|e| PhotoError::file_io_error("read model weights", &self.weights, &e))
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    id2label: BTreeMap<String, String>,
}

/// Class labels of a semantic segmentation model, indexed by output channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMetadata {
    pub labels: Vec<String>,
}

impl ModelMetadata {
    /// Parse a Hugging Face `config.json`
    ///
    /// # Errors
    /// - Invalid JSON
    /// - Missing, sparse or non-numeric `id2label` entries
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: RawConfig = serde_json::from_str(raw)
            .map_err(|e| PhotoError::model(format!("Invalid model config: {}", e)))?;
        if config.id2label.is_empty() {
            return Err(PhotoError::model("Model config has no id2label map"));
        }

        let mut indexed = config
            .id2label
            .into_iter()
            .map(|(id, label)| {
                id.parse::<usize>()
                    .map(|index| (index, label))
                    .map_err(|_| PhotoError::model(format!("Non-numeric label id '{}'", id)))
            })
            .collect::<Result<Vec<_>>>()?;
        indexed.sort_by_key(|(index, _)| *index);

        if indexed.iter().enumerate().any(|(pos, (index, _))| pos != *index) {
            return Err(PhotoError::model("Label ids are not contiguous from 0"));
        }
        Ok(Self {
            labels: indexed.into_iter().map(|(_, label)| label).collect(),
        })
    }
}

/// Fetches and caches model files
#[derive(Debug)]
pub struct ModelStore {
    client: Client,
    cache_root: PathBuf,
    model_id: String,
    weights_file: String,
    persistent: bool,
}

impl ModelStore {
    /// Create a store for the configured model
    ///
    /// # Errors
    /// - Failed to create the HTTP client
    /// - No cache directory could be determined
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| PhotoError::network_error("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            cache_root: Self::resolve_cache_dir(config)?,
            model_id: config.model_id.clone(),
            weights_file: config.weights_file.clone(),
            persistent: config.cache_enabled,
        })
    }

    /// Cache root for a configuration
    ///
    /// # Errors
    /// - Neither an override nor a user cache directory is available
    pub fn resolve_cache_dir(config: &ModelConfig) -> Result<PathBuf> {
        if let Some(dir) = &config.cache_dir {
            return Ok(dir.clone());
        }
        if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(dir).join("models"));
        }
        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                PhotoError::invalid_config(format!(
                    "Failed to determine cache directory. Set {} environment variable.",
                    CACHE_DIR_ENV
                ))
            })?
            .join("idphoto-prep")
            .join("models"))
    }

    /// Filesystem-safe directory name for a hub repository id
    ///
    /// `Xenova/segformer-b0-finetuned-ade-512-512` becomes
    /// `Xenova--segformer-b0-finetuned-ade-512-512`.
    #[must_use]
    pub fn model_dir_name(model_id: &str) -> String {
        model_id.trim_matches('/').replace('/', "--")
    }

    /// Download URL of a file inside a hub repository
    #[must_use]
    pub fn file_url(model_id: &str, file: &str) -> String {
        format!(
            "{}/{}/resolve/main/{}",
            HUB_BASE_URL,
            model_id.trim_matches('/'),
            file
        )
    }

    #[must_use]
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        self.cache_root.join(Self::model_dir_name(&self.model_id))
    }

    /// Whether every required file is present in the cache
    #[must_use]
    pub fn is_cached(&self) -> bool {
        let dir = self.model_dir();
        dir.join(CONFIG_FILE).is_file() && dir.join(&self.weights_file).is_file()
    }

    fn files_in(&self, dir: PathBuf, scratch: Option<TempDir>) -> ModelFiles {
        ModelFiles {
            config: dir.join(CONFIG_FILE),
            weights: dir.join(&self.weights_file),
            dir,
            _scratch: scratch,
        }
    }

    /// Return local model files, downloading them on first use
    ///
    /// # Errors
    /// - Network or HTTP errors while downloading
    /// - File system errors while writing or moving files
    pub async fn ensure_model(&self, reporter: &dyn ProgressReporter) -> Result<ModelFiles> {
        if self.persistent && self.is_cached() {
            log::debug!("Model already cached: {}", self.model_dir().display());
            return Ok(self.files_in(self.model_dir(), None));
        }

        if !self.persistent {
            let scratch = tempfile::Builder::new()
                .prefix("idphoto-prep-model-")
                .tempdir()
                .map_err(|e| PhotoError::file_io_error("create temp directory", std::env::temp_dir(), &e))?;
            self.download_into(scratch.path(), reporter).await?;
            let dir = scratch.path().to_path_buf();
            return Ok(self.files_in(dir, Some(scratch)));
        }

        fs::create_dir_all(&self.cache_root).map_err(|e| {
            PhotoError::file_io_error("create cache directory", &self.cache_root, &e)
        })?;
        // Same filesystem as the cache so the final rename is atomic
        let staging = tempfile::Builder::new()
            .prefix(".download-")
            .tempdir_in(&self.cache_root)
            .map_err(|e| PhotoError::file_io_error("create temp directory", &self.cache_root, &e))?;

        log::info!("Downloading model {}", self.model_id);
        self.download_into(staging.path(), reporter).await?;

        let final_dir = self.model_dir();
        if final_dir.exists() {
            fs::remove_dir_all(&final_dir).map_err(|e| {
                PhotoError::file_io_error("remove incomplete model directory", &final_dir, &e)
            })?;
        }
        fs::rename(staging.path(), &final_dir).map_err(|e| {
            PhotoError::file_io_error("move downloaded model to cache", &final_dir, &e)
        })?;
        drop(staging);

        log::info!("Cached model at {}", final_dir.display());
        Ok(self.files_in(final_dir, None))
    }

    async fn download_into(&self, dir: &Path, reporter: &dyn ProgressReporter) -> Result<()> {
        for file in [CONFIG_FILE, self.weights_file.as_str()] {
            let url = Self::file_url(&self.model_id, file);
            self.download_file(&url, file, &dir.join(file), reporter)
                .await?;
        }
        Ok(())
    }

    async fn download_file(
        &self,
        url: &str,
        file_name: &str,
        local_path: &Path,
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        log::debug!("Downloading: {} -> {}", url, local_path.display());

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PhotoError::file_io_error("create directory", parent, &e))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PhotoError::network_error(format!("Failed to download {}", url), e))?;

        if !response.status().is_success() {
            return Err(PhotoError::network_error(
                format!("Failed to download {}", url),
                format!("HTTP {}", response.status()),
            ));
        }

        let total = response.content_length();
        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| PhotoError::file_io_error("create file", local_path, &e))?;
        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut progress = DownloadProgress {
            file_name: file_name.to_string(),
            downloaded: 0,
            total,
            completed: false,
        };
        let mut buffer = vec![0; 8192];
        loop {
            let bytes_read = tokio::io::AsyncReadExt::read(&mut stream, &mut buffer)
                .await
                .map_err(|e| PhotoError::network_error("Failed to read download stream", e))?;
            if bytes_read == 0 {
                break;
            }
            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| PhotoError::file_io_error("write to file", local_path, &e))?;
            progress.downloaded += bytes_read as u64;
            reporter.report_download(&progress);
        }

        file.flush()
            .await
            .map_err(|e| PhotoError::file_io_error("flush file", local_path, &e))?;

        progress.completed = true;
        reporter.report_download(&progress);
        Ok(())
    }
}
