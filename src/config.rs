use crate::game::{self, GameId};
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_BACKEND_URL: &str = "https://api.loadcheck.app";
pub const BACKEND_URL_ENV: &str = "LOADCHECK_BACKEND_URL";
pub const DEFAULT_MASTERLIST_BRANCH: &str = "v0.21";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemSpecs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_gb: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vram_gb: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default)]
    pub active_game: GameId,
    #[serde(default = "default_masterlist_branch")]
    pub masterlist_branch: String,
    #[serde(default = "default_recommendation_limit")]
    pub recommendation_limit: u32,
    #[serde(default = "default_preview_debounce_ms")]
    pub preview_debounce_ms: u64,
    #[serde(default = "default_recommendations_debounce_ms")]
    pub recommendations_debounce_ms: u64,
    #[serde(default)]
    pub specs: Option<SystemSpecs>,
    #[serde(skip)]
    pub data_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            active_game: GameId::default(),
            masterlist_branch: default_masterlist_branch(),
            recommendation_limit: default_recommendation_limit(),
            preview_debounce_ms: default_preview_debounce_ms(),
            recommendations_debounce_ms: default_recommendations_debounce_ms(),
            specs: None,
            data_dir: PathBuf::new(),
        }
    }
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        let base_dir = base_data_dir()?;
        Self::load_or_create_in(&base_dir)
    }

    pub fn load_or_create_in(base_dir: &Path) -> Result<Self> {
        fs::create_dir_all(base_dir).context("create app data dir")?;
        let path = base_dir.join("config.json");
        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path).context("read app config")?;
            let mut config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            config.data_dir = base_dir.to_path_buf();
            if !game::supported_games().contains(&config.active_game) {
                config.active_game = GameId::default();
                config.save()?;
            }
            config
        } else {
            let config = AppConfig {
                data_dir: base_dir.to_path_buf(),
                ..AppConfig::default()
            };
            config.save()?;
            config
        };

        if let Ok(url) = env::var(BACKEND_URL_ENV) {
            if !url.trim().is_empty() {
                config.backend_url = url.trim().to_string();
            }
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir).context("create app data dir")?;
        let path = self.data_dir.join("config.json");
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(path, raw).context("write app config")?;
        Ok(())
    }

    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    pub fn export_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("loadcheck.log")
    }
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

fn default_masterlist_branch() -> String {
    DEFAULT_MASTERLIST_BRANCH.to_string()
}

fn default_recommendation_limit() -> u32 {
    8
}

fn default_preview_debounce_ms() -> u64 {
    250
}

fn default_recommendations_debounce_ms() -> u64 {
    600
}

fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("loadcheck"))
}
