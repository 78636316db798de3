use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use dirs_next::{cache_dir, config_dir};
use serde::Deserialize;

use crate::quality::SelectorStrategy;

pub const ENV_PREFIX: &str = "RESOLVR";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub request_timeout_secs: u64,
    pub cache_dir: Option<PathBuf>,
    pub challenge: ChallengeSettings,
    pub animepahe: AnimePaheSettings,
    pub kisskh: KissKhSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            cache_dir: None,
            challenge: ChallengeSettings::default(),
            animepahe: AnimePaheSettings::default(),
            kisskh: KissKhSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults, then the TOML file (if present), then `RESOLVR__*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path).format(FileFormat::Toml));
            }
            None => {
                if let Some(default) = default_config_path() {
                    builder = builder
                        .add_source(File::from(default).format(FileFormat::Toml).required(false));
                }
            }
        }
        builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        let base = cache_dir().ok_or_else(|| anyhow!("Could not determine cache directory"))?;
        Ok(base.join("resolvr").join("sessions"))
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("resolvr").join("config.toml"))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChallengeSettings {
    pub retries: u32,
    pub backoff_secs: u64,
    pub headless: bool,
}

impl Default for ChallengeSettings {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff_secs: 5,
            headless: true,
        }
    }
}

impl ChallengeSettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnimePaheSettings {
    pub base_url: String,
    pub marker_selector: String,
    pub resolution: String,
    pub selector: SelectorStrategy,
    /// Audio tracks whose variants are ignored.
    pub skip_audio: Vec<String>,
}

impl Default for AnimePaheSettings {
    fn default() -> Self {
        Self {
            base_url: String::from("https://animepahe.ru/"),
            marker_selector: String::from("body > header > nav > a > img"),
            resolution: String::from("720"),
            selector: SelectorStrategy::Lowest,
            skip_audio: vec![String::from("eng")],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KissKhSettings {
    pub base_url: String,
    pub index_path: String,
    pub episode_path: String,
    pub subtitles_path: String,
    pub resolution: String,
    pub selector: SelectorStrategy,
    pub token: TokenSettings,
}

impl Default for KissKhSettings {
    fn default() -> Self {
        Self {
            base_url: String::from("https://kisskh.co/"),
            index_path: String::from("index.html"),
            episode_path: String::from("api/DramaList/Episode/{id}.png?kkey="),
            subtitles_path: String::from("api/Sub/{id}?kkey="),
            resolution: String::from("720"),
            selector: SelectorStrategy::Lowest,
            token: TokenSettings::default(),
        }
    }
}

/// Site-issued literals fed to the token routine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenSettings {
    pub routine: String,
    pub bundle_marker: String,
    pub app_name: String,
    pub app_version: String,
    pub platform_version: u64,
    pub stream_guid: String,
    pub subtitle_guid: String,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            routine: String::from("_0x54b991"),
            bundle_marker: String::from("common"),
            app_name: String::from("kisskh"),
            app_version: String::from("2.8.10"),
            platform_version: 4830201,
            stream_guid: String::from("62f176f3bb1b5b8e70e39932ad34a0c7"),
            subtitle_guid: String::from("VgV52sWhwvBSf8BsM3BRY9weWiiCbtGp"),
        }
    }
}
