//! Configuration module for clipdex.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.clipdex/settings.toml`)
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `CLIPDEX_` and use double
//! underscores to separate nested levels:
//! - `CLIPDEX_SEARCH__NPROBE=8` sets `search.nprobe`
//! - `CLIPDEX_SYNC__LEASE_TTL_SECS=60` sets `sync.lease_ttl_secs`
//! - `CLIPDEX_LINKS__SECRET=...` sets `links.secret`

use crate::search::{SearchConfig, SearchParams};
use crate::snapshot::SnapshotKeys;
use crate::sync::{LeaseConfig, SyncConfig, TrainingSample};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory holding the settings file and, by default, all local state.
pub const WORKSPACE_DIR: &str = ".clipdex";

const SETTINGS_FILE: &str = "settings.toml";

const ENV_PREFIX: &str = "CLIPDEX_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Where snapshot artifacts live
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Embedding store settings
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,

    /// Index training settings
    #[serde(default)]
    pub index: IndexConfig,

    /// Search defaults
    #[serde(default)]
    pub search: SearchSettings,

    /// Sync scheduling and lease settings
    #[serde(default)]
    pub sync: SyncSettings,

    /// Retrieval link settings
    #[serde(default)]
    pub links: LinksConfig,

    /// Query encoder settings
    #[serde(default)]
    pub encoder: EncoderConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SnapshotConfig {
    /// Directory backing the object store
    #[serde(default = "default_snapshot_root")]
    pub root: PathBuf,

    #[serde(default = "default_index_key")]
    pub index_key: String,

    #[serde(default = "default_mapping_key")]
    pub mapping_key: String,

    #[serde(default = "default_metadata_key")]
    pub metadata_key: String,

    /// Object guarding against concurrent syncs
    #[serde(default = "default_lease_key")]
    pub lease_key: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingsConfig {
    /// JSON-lines embedding store
    #[serde(default = "default_embeddings_path")]
    pub path: PathBuf,

    /// Partition synced into the index
    #[serde(default = "default_partition")]
    pub partition: String,

    /// Records per page when querying the store
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexConfig {
    /// Number of clusters trained at bootstrap; fixed afterwards
    #[serde(default = "default_clusters")]
    pub clusters: usize,

    /// `.npy` matrix of training embeddings used on first sync
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap_sample: Option<PathBuf>,

    /// K-means seed
    #[serde(default = "default_seed")]
    pub seed: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SearchSettings {
    #[serde(default = "default_k")]
    pub k: usize,

    #[serde(default = "default_nprobe")]
    pub nprobe: usize,

    /// Seconds a loaded snapshot may be reused (0 disables caching)
    #[serde(default)]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SyncSettings {
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,

    #[serde(default = "default_lease_retries")]
    pub lease_retries: u32,

    #[serde(default = "default_lease_backoff")]
    pub lease_backoff_ms: u64,

    /// Seconds between runs in watch mode
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_sync_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LinksConfig {
    /// Base URL images are served from
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Signing secret shared with whatever serves `base_url`
    #[serde(default)]
    pub secret: String,

    #[serde(default = "default_link_ttl")]
    pub ttl_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EncoderConfig {
    /// Text encoder model
    #[serde(default = "default_encoder_model")]
    pub model: String,

    /// Model download directory (defaults to the user cache directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_false() -> bool {
    false
}
fn default_snapshot_root() -> PathBuf {
    PathBuf::from(".clipdex/snapshots")
}
fn default_index_key() -> String {
    "faiss.index".to_string()
}
fn default_mapping_key() -> String {
    "index_to_id.json".to_string()
}
fn default_metadata_key() -> String {
    "metadata.json".to_string()
}
fn default_lease_key() -> String {
    "sync.lease".to_string()
}
fn default_embeddings_path() -> PathBuf {
    PathBuf::from(".clipdex/embeddings.jsonl")
}
fn default_partition() -> String {
    "image".to_string()
}
fn default_page_size() -> usize {
    100
}
fn default_clusters() -> usize {
    15
}
fn default_seed() -> u64 {
    crate::vector::clustering::DEFAULT_SEED
}
fn default_k() -> usize {
    crate::search::DEFAULT_K
}
fn default_nprobe() -> usize {
    crate::search::DEFAULT_NPROBE
}
fn default_search_timeout() -> u64 {
    30
}
fn default_lease_ttl() -> u64 {
    300
}
fn default_lease_retries() -> u32 {
    5
}
fn default_lease_backoff() -> u64 {
    200
}
fn default_sync_interval() -> u64 {
    300
}
fn default_sync_timeout() -> u64 {
    240
}
fn default_base_url() -> String {
    "http://localhost:8080/images/".to_string()
}
fn default_link_ttl() -> u64 {
    3600
}
fn default_encoder_model() -> String {
    "ClipVitB32".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            debug: false,
            snapshot: SnapshotConfig::default(),
            embeddings: EmbeddingsConfig::default(),
            index: IndexConfig::default(),
            search: SearchSettings::default(),
            sync: SyncSettings::default(),
            links: LinksConfig::default(),
            encoder: EncoderConfig::default(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            root: default_snapshot_root(),
            index_key: default_index_key(),
            mapping_key: default_mapping_key(),
            metadata_key: default_metadata_key(),
            lease_key: default_lease_key(),
        }
    }
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            path: default_embeddings_path(),
            partition: default_partition(),
            page_size: default_page_size(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            clusters: default_clusters(),
            bootstrap_sample: None,
            seed: default_seed(),
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            k: default_k(),
            nprobe: default_nprobe(),
            cache_ttl_secs: 0,
            timeout_secs: default_search_timeout(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            lease_ttl_secs: default_lease_ttl(),
            lease_retries: default_lease_retries(),
            lease_backoff_ms: default_lease_backoff(),
            interval_secs: default_sync_interval(),
            timeout_secs: default_sync_timeout(),
        }
    }
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            secret: String::new(),
            ttl_secs: default_link_ttl(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            model: default_encoder_model(),
            cache_dir: None,
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| Path::new(WORKSPACE_DIR).join(SETTINGS_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring the environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nested levels; single underscores stay
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract::<Settings>()
            .and_then(|settings| {
                settings.validate().map_err(figment::Error::from)?;
                Ok(settings)
            })
            .map_err(Box::new)
    }

    /// Rejects combinations that parse but cannot work together.
    pub fn validate(&self) -> Result<(), String> {
        if self.sync.timeout_secs >= self.sync.lease_ttl_secs {
            return Err(format!(
                "sync.timeout_secs ({}) must be less than sync.lease_ttl_secs ({})",
                self.sync.timeout_secs, self.sync.lease_ttl_secs
            ));
        }
        Ok(())
    }

    /// Find the settings file by looking for `.clipdex` from the current
    /// directory up to the filesystem root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(WORKSPACE_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join(SETTINGS_FILE));
            }
        }

        None
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(
        dir: impl AsRef<Path>,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = dir.as_ref().join(WORKSPACE_DIR).join(SETTINGS_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = format!(
            r#"# clipdex configuration file

# Version of the configuration schema
version = 1

# Global debug mode
debug = false

[snapshot]
# Directory backing the snapshot object store
root = ".clipdex/snapshots"

# Object keys of the three snapshot artifacts and the sync lease
index_key = "faiss.index"
mapping_key = "index_to_id.json"
metadata_key = "metadata.json"
lease_key = "sync.lease"

[embeddings]
# Append-only JSON-lines embedding store
path = ".clipdex/embeddings.jsonl"

# Partition folded into the index
partition = "image"

# Records fetched per page
page_size = 100

[index]
# Clusters trained on first sync; cannot change afterwards
clusters = 15

# .npy matrix (n x 512, float32) used to train the clusters on first sync
# bootstrap_sample = "bootstrap.npy"

# K-means seed
seed = {seed}

[search]
# Results per query
k = 5

# Clusters scanned per query (higher = better recall, slower)
nprobe = 3

# Reuse a loaded snapshot for this many seconds (0 = always reload)
cache_ttl_secs = 0

timeout_secs = 30

[sync]
# A crashed sync's lease is taken over after this many seconds
lease_ttl_secs = 300
lease_retries = 5
lease_backoff_ms = 200

# Seconds between runs in watch mode
interval_secs = 300

# Must stay below lease_ttl_secs so a slow run cannot outlive its lease
timeout_secs = 240

[links]
# Images are linked as <base_url>/<external id>?expires=...&signature=...
base_url = "http://localhost:8080/images/"

# Signing secret; prefer CLIPDEX_LINKS__SECRET over writing it here
secret = ""

ttl_secs = 3600

[encoder]
# Text encoder for queries; must match the image encoder
model = "ClipVitB32"

# Model download directory (defaults to the user cache directory)
# cache_dir = "/path/to/models"
"#,
            seed = default_seed()
        );

        std::fs::write(&config_path, template)?;
        Ok(config_path)
    }

    /// Snapshot object keys.
    #[must_use]
    pub fn snapshot_keys(&self) -> SnapshotKeys {
        SnapshotKeys {
            index: self.snapshot.index_key.clone(),
            mapping: self.snapshot.mapping_key.clone(),
            metadata: self.snapshot.metadata_key.clone(),
        }
    }

    /// Sync engine settings.
    #[must_use]
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            partition: self.embeddings.partition.clone(),
            keys: self.snapshot_keys(),
            lease_key: self.snapshot.lease_key.clone(),
            lease: LeaseConfig {
                ttl: Duration::from_secs(self.sync.lease_ttl_secs),
                retries: self.sync.lease_retries,
                backoff: Duration::from_millis(self.sync.lease_backoff_ms),
            },
            clusters: self.index.clusters,
            seed: self.index.seed,
            training: self.index.bootstrap_sample.clone().map(TrainingSample::Npy),
        }
    }

    /// Search engine settings.
    #[must_use]
    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            keys: self.snapshot_keys(),
            cache_ttl: Duration::from_secs(self.search.cache_ttl_secs),
            link_ttl: Duration::from_secs(self.links.ttl_secs),
        }
    }

    /// Default per-query parameters.
    #[must_use]
    pub fn search_params(&self) -> SearchParams {
        SearchParams {
            k: self.search.k,
            nprobe: self.search.nprobe,
        }
    }

    /// Where encoder models are downloaded.
    #[must_use]
    pub fn models_dir(&self) -> PathBuf {
        self.encoder.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(WORKSPACE_DIR))
                .join("clipdex")
                .join("models")
        })
    }
}
