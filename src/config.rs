use crate::error::Result;
use crate::ingestion::LoaderConfig;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_DATASET: &str = "SALES_ANALYTICS_DATASET";
pub const ENV_CACHE: &str = "SALES_ANALYTICS_CACHE";
pub const ENV_SALES_SHEET: &str = "SALES_ANALYTICS_SALES_SHEET";
pub const ENV_RETURNS_SHEET: &str = "SALES_ANALYTICS_RETURNS_SHEET";

/// Top-level settings for loading a workbook and serving analyses from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineConfig {
    pub dataset_path: PathBuf,
    pub loader: LoaderConfig,
    pub default_rank_size: usize,
    pub default_recent_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::from("BASE.xlsx"),
            loader: LoaderConfig::default(),
            default_rank_size: 20,
            default_recent_window: 3,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        debug!("Loaded engine config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Defaults overridden by the `SALES_ANALYTICS_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an arbitrary variable source.
    ///
    /// An empty `SALES_ANALYTICS_CACHE` (or `off`) disables the snapshot
    /// cache; an empty `SALES_ANALYTICS_RETURNS_SHEET` disables return sheets.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_DATASET).filter(|v| !v.trim().is_empty()) {
            config.dataset_path = PathBuf::from(path.trim());
        }
        if let Some(cache) = lookup(ENV_CACHE) {
            let cache = cache.trim();
            if cache.is_empty() || cache.eq_ignore_ascii_case("off") {
                config.loader.enable_cache = false;
                config.loader.cache_dir = None;
            } else {
                config.loader.cache_dir = Some(PathBuf::from(cache));
            }
        }
        if let Some(prefix) = lookup(ENV_SALES_SHEET).filter(|v| !v.trim().is_empty()) {
            config.loader.sales_sheet_prefix = prefix.trim().to_string();
        }
        if let Some(prefix) = lookup(ENV_RETURNS_SHEET) {
            let prefix = prefix.trim();
            config.loader.returns_sheet_prefix = (!prefix.is_empty()).then(|| prefix.to_string());
        }
        config
    }
}
