//! Configuration module for the symptom search engine.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `AURORA_` and use double
//! underscores to separate nested levels:
//! - `AURORA_STORAGE__PATH=/var/lib/aurora` sets `storage.path`
//! - `AURORA_RANKING__VECTOR_WEIGHT=0.6` sets `ranking.vector_weight`
//! - `AURORA_INDEX__AUTO_REBUILD=false` sets `index.auto_rebuild`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ranking::{HybridRanker, RankOptions};
use crate::storage::{DEFAULT_MAX_AGE_SECS, DEFAULT_MAX_ENTRIES, EvictionPolicy};
use crate::vector::{DEFAULT_LISTS, DEFAULT_MODEL_IDENTIFIER, DEFAULT_PROBES, IndexParams};

/// Directory holding the settings file.
const CONFIG_DIR: &str = ".aurora";

/// Settings file name inside [`CONFIG_DIR`].
const CONFIG_FILE: &str = "settings.toml";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Where records and cached embeddings are persisted
    #[serde(default)]
    pub storage: StorageConfig,

    /// IVF index parameters
    #[serde(default)]
    pub index: IndexConfig,

    /// Hybrid ranking weights and thresholds
    #[serde(default)]
    pub ranking: RankingConfig,

    /// Embedding cache settings
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct StorageConfig {
    /// Directory for `records.avr` and `cache.avc`. Unset runs in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexConfig {
    /// Number of k-means partitions
    #[serde(default = "default_lists")]
    pub lists: usize,

    /// Partitions probed per query
    #[serde(default = "default_probes")]
    pub probes: usize,

    /// Seed for k-means++ initialisation
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Store mutations tolerated before the published index counts as stale
    #[serde(default = "default_staleness_threshold")]
    pub staleness_threshold: u64,

    /// Rebuild a stale index on query instead of failing the vector path
    #[serde(default = "default_true")]
    pub auto_rebuild: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RankingConfig {
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    #[serde(default = "default_text_weight")]
    pub text_weight: f32,

    /// Minimum vector similarity for a candidate to qualify on its own
    #[serde(default = "default_vector_threshold")]
    pub vector_threshold: f32,

    /// Minimum trigram similarity for a candidate to qualify on its own
    #[serde(default = "default_text_threshold")]
    pub text_threshold: f32,

    /// Maximum results per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Vector candidates fetched per requested result
    #[serde(default = "default_oversample")]
    pub oversample: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CacheConfig {
    /// Model identifier cached vectors are tagged with
    #[serde(default = "default_model")]
    pub model: String,

    /// Entries not accessed for this long are evicted
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Upper bound on entries kept after eviction
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_lists() -> usize {
    DEFAULT_LISTS
}
fn default_probes() -> usize {
    DEFAULT_PROBES
}
fn default_seed() -> u64 {
    42
}
fn default_staleness_threshold() -> u64 {
    64
}
fn default_vector_weight() -> f32 {
    0.7
}
fn default_text_weight() -> f32 {
    0.3
}
fn default_vector_threshold() -> f32 {
    0.5
}
fn default_text_threshold() -> f32 {
    0.3
}
fn default_top_k() -> usize {
    10
}
fn default_oversample() -> usize {
    4
}
fn default_model() -> String {
    DEFAULT_MODEL_IDENTIFIER.to_string()
}
fn default_max_age_secs() -> u64 {
    DEFAULT_MAX_AGE_SECS
}
fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            debug: false,
            storage: StorageConfig::default(),
            index: IndexConfig::default(),
            ranking: RankingConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            lists: default_lists(),
            probes: default_probes(),
            seed: default_seed(),
            staleness_threshold: default_staleness_threshold(),
            auto_rebuild: true,
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            text_weight: default_text_weight(),
            vector_threshold: default_vector_threshold(),
            text_threshold: default_text_threshold(),
            top_k: default_top_k(),
            oversample: default_oversample(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_age_secs: default_max_age_secs(),
            max_entries: default_max_entries(),
        }
    }
}

impl IndexConfig {
    #[must_use]
    pub fn params(&self) -> IndexParams {
        IndexParams {
            lists: self.lists,
            probes: self.probes,
            seed: self.seed,
        }
    }
}

impl RankingConfig {
    /// Default per-query options.
    #[must_use]
    pub fn options(&self) -> RankOptions {
        RankOptions {
            vector_threshold: self.vector_threshold,
            text_threshold: self.text_threshold,
            top_k: self.top_k,
        }
    }

    #[must_use]
    pub fn ranker(&self) -> HybridRanker {
        HybridRanker {
            vector_weight: self.vector_weight,
            text_weight: self.text_weight,
            oversample: self.oversample,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn policy(&self) -> EvictionPolicy {
        EvictionPolicy::new(self.max_age_secs, self.max_entries)
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honouring
    /// environment overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path.as_ref()))
            // Double underscore (__) separates nested levels
            .merge(Env::prefixed("AURORA_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the settings file by looking for a `.aurora` directory from
    /// the current directory up to the root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join(CONFIG_FILE));
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

    /// Check value ranges figment cannot express
    pub fn validate(&self) -> Result<(), String> {
        let ranking = &self.ranking;
        for (name, value) in [
            ("ranking.vector_weight", ranking.vector_weight),
            ("ranking.text_weight", ranking.text_weight),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{name} must be a non-negative number, got {value}"));
            }
        }
        for (name, value) in [
            ("ranking.vector_threshold", ranking.vector_threshold),
            ("ranking.text_threshold", ranking.text_threshold),
        ] {
            if !value.is_finite() {
                return Err(format!("{name} must be finite, got {value}"));
            }
        }
        for (name, value) in [
            ("index.lists", self.index.lists),
            ("index.probes", self.index.probes),
            ("ranking.top_k", ranking.top_k),
            ("ranking.oversample", ranking.oversample),
        ] {
            if value == 0 {
                return Err(format!("{name} must be at least 1"));
            }
        }
        Ok(())
    }
}
