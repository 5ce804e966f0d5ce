//! Model checkpoint resolution
//!
//! A model id such as `TinyLlama/TinyLlama-1.1B-Chat-v1.0` maps to a local
//! cache directory named by [`cache_key`]. The cache is checked before any
//! network fetch; files pulled from the HuggingFace Hub are copied into it so
//! later runs stay offline.

use anyhow::{anyhow, Context, Result};
use hf_hub::api::sync::Api;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";
const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

/// Filesystem-safe directory name for a model id
pub fn cache_key(model_id: &str) -> String {
    model_id.replace('/', "_")
}

/// Files that make up one loadable checkpoint
#[derive(Debug, Clone)]
pub struct ModelFiles {
    /// Directory holding the files
    pub dir: PathBuf,
    pub config_file: PathBuf,
    pub tokenizer_file: PathBuf,
    /// One entry for single-file checkpoints, one per shard otherwise
    pub weights_files: Vec<PathBuf>,
}

impl ModelFiles {
    /// Collect checkpoint files from a directory
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        let config_file = dir.join(CONFIG_FILE);
        if !config_file.exists() {
            return Err(anyhow!("{} not found in {:?}", CONFIG_FILE, dir));
        }

        let tokenizer_file = dir.join(TOKENIZER_FILE);
        if !tokenizer_file.exists() {
            return Err(anyhow!("{} not found in {:?}", TOKENIZER_FILE, dir));
        }

        let weights_files = if dir.join(WEIGHTS_FILE).exists() {
            vec![dir.join(WEIGHTS_FILE)]
        } else if dir.join(WEIGHTS_INDEX_FILE).exists() {
            shard_names(&dir.join(WEIGHTS_INDEX_FILE))?
                .into_iter()
                .map(|name| dir.join(name))
                .collect()
        } else {
            return Err(anyhow!(
                "No safetensors weights found in {:?} (tried {} and {})",
                dir,
                WEIGHTS_FILE,
                WEIGHTS_INDEX_FILE
            ));
        };

        if let Some(missing) = weights_files.iter().find(|p| !p.exists()) {
            return Err(anyhow!("Weight shard missing: {:?}", missing));
        }

        Ok(Self {
            dir,
            config_file,
            tokenizer_file,
            weights_files,
        })
    }

    /// Parse `config.json` into a model-specific config type
    pub fn read_config<T: DeserializeOwned>(&self) -> Result<T> {
        let content = fs::read_to_string(&self.config_file)
            .with_context(|| format!("Failed to read config file: {:?}", self.config_file))?;
        serde_json::from_str(&content).context("Failed to parse config.json")
    }
}

/// Distinct shard file names listed in a safetensors index, in first-seen order
fn shard_names(index_file: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(index_file)
        .with_context(|| format!("Failed to read {:?}", index_file))?;
    let index: serde_json::Value = serde_json::from_str(&content)?;
    let weight_map = index
        .get("weight_map")
        .and_then(|m| m.as_object())
        .ok_or_else(|| anyhow!("{:?} has no weight_map", index_file))?;

    let mut names: Vec<String> = Vec::new();
    for file in weight_map.values().filter_map(|v| v.as_str()) {
        if !names.iter().any(|n| n == file) {
            names.push(file.to_string());
        }
    }
    Ok(names)
}

/// Local checkpoint cache with HuggingFace Hub fallback
#[derive(Debug, Clone)]
pub struct ModelCache {
    root: PathBuf,
    offline: bool,
}

impl ModelCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            offline: false,
        }
    }

    /// Never reach out to the Hub; only local files are used
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache directory for a model id
    pub fn model_dir(&self, model_id: &str) -> PathBuf {
        self.root.join(cache_key(model_id))
    }

    /// Resolve a model id or local path to checkpoint files.
    ///
    /// Order: existing local directory, then the cache directory, then the Hub.
    pub fn resolve(&self, model_id_or_path: &str) -> Result<ModelFiles> {
        let local = Path::new(model_id_or_path);
        if local.is_dir() {
            tracing::info!("Loading model from local path: {}", model_id_or_path);
            return ModelFiles::from_dir(local);
        }

        let cached = self.model_dir(model_id_or_path);
        if cached.is_dir() {
            match ModelFiles::from_dir(&cached) {
                Ok(files) => {
                    tracing::info!("Model cache hit: {:?}", cached);
                    return Ok(files);
                }
                Err(e) => tracing::debug!("Incomplete cache entry {:?}: {}", cached, e),
            }
        }

        if self.offline {
            return Err(anyhow!(
                "Model '{}' is not cached at {:?} and offline mode is set",
                model_id_or_path,
                cached
            ));
        }

        self.fetch(model_id_or_path, &cached)?;
        ModelFiles::from_dir(&cached)
    }

    /// Resolve one file of a checkpoint without pulling the weights.
    ///
    /// Used to read `config.json` while the full checkpoint is still loading.
    pub fn resolve_file(&self, model_id_or_path: &str, name: &str) -> Result<PathBuf> {
        let local = Path::new(model_id_or_path);
        if local.is_dir() {
            let path = local.join(name);
            return if path.exists() {
                Ok(path)
            } else {
                Err(anyhow!("{} not found in {:?}", name, local))
            };
        }

        let cached_dir = self.model_dir(model_id_or_path);
        let cached = cached_dir.join(name);
        if cached.exists() {
            return Ok(cached);
        }
        if self.offline {
            return Err(anyhow!(
                "{} for '{}' is not cached and offline mode is set",
                name,
                model_id_or_path
            ));
        }

        let api = Api::new().context("Failed to initialize HuggingFace Hub API")?;
        let path = api
            .model(model_id_or_path.to_string())
            .get(name)
            .with_context(|| format!("Failed to download {}", name))?;
        fs::create_dir_all(&cached_dir)?;
        copy_into(&path, &cached_dir, name)?;
        Ok(cached)
    }

    /// Download a checkpoint from the Hub and copy it into `target`
    fn fetch(&self, model_id: &str, target: &Path) -> Result<()> {
        tracing::info!("Downloading model from HuggingFace Hub: {}", model_id);

        let api = Api::new().context("Failed to initialize HuggingFace Hub API")?;
        let repo = api.model(model_id.to_string());

        fs::create_dir_all(target)
            .with_context(|| format!("Failed to create model cache directory: {:?}", target))?;

        let mut files = vec![CONFIG_FILE.to_string(), TOKENIZER_FILE.to_string()];
        match repo.get(WEIGHTS_FILE) {
            Ok(path) => copy_into(&path, target, WEIGHTS_FILE)?,
            Err(_) => {
                let index = repo
                    .get(WEIGHTS_INDEX_FILE)
                    .context("No safetensors weights published for this model")?;
                copy_into(&index, target, WEIGHTS_INDEX_FILE)?;
                files.extend(shard_names(&index)?);
            }
        }
        // Optional, only used for chat template discovery
        if let Ok(path) = repo.get("tokenizer_config.json") {
            copy_into(&path, target, "tokenizer_config.json")?;
        }

        for name in &files {
            let path = repo
                .get(name)
                .with_context(|| format!("Failed to download {}", name))?;
            tracing::debug!("Downloaded {}: {:?}", name, path);
            copy_into(&path, target, name)?;
        }

        tracing::info!("Model cached at {:?}", target);
        Ok(())
    }
}

fn copy_into(source: &Path, dir: &Path, name: &str) -> Result<()> {
    let dest = dir.join(name);
    if dest.exists() {
        return Ok(());
    }
    fs::copy(source, &dest).with_context(|| format!("Failed to copy {:?} to {:?}", source, dest))?;
    Ok(())
}
