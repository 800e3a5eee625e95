// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for the meme manager

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    /// Where imported images and thumbnails live
    #[serde(default)]
    pub storage: StorageConfig,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Import rules
    #[serde(default)]
    pub import: ImportConfig,

    /// Thumbnail generation
    #[serde(default)]
    pub thumbnails: ThumbnailConfig,

    /// Library behaviour
    #[serde(default)]
    pub library: LibraryConfig,

    /// Inbox watching
    #[serde(default)]
    pub watch: WatchConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default = "default_thumbnail_root")]
    pub thumbnails: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ImportConfig {
    /// Allowed file extensions, lowercase without the dot
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,
    /// Longest side allowed for stored images
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    /// Re-encode images larger than `max_dimension` instead of copying them verbatim
    #[serde(default)]
    pub downscale_large: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ThumbnailConfig {
    #[serde(default = "default_thumbnail_size")]
    pub size: u32,
    #[serde(default = "default_thumbnail_quality")]
    pub quality: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LibraryConfig {
    /// Drop tags left without images after a delete
    #[serde(default)]
    pub prune_orphan_tags: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    #[serde(default = "default_inbox")]
    pub inbox: PathBuf,
    #[serde(default = "default_true")]
    pub remove_after_import: bool,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

// Default value functions
fn default_storage_root() -> PathBuf { PathBuf::from("storage/memes") }
fn default_thumbnail_root() -> PathBuf { PathBuf::from("storage/thumbnails") }
fn default_db_path() -> PathBuf { PathBuf::from("mememanager.db") }
fn default_max_dimension() -> u32 { 2048 }
fn default_thumbnail_size() -> u32 { 200 }
fn default_thumbnail_quality() -> u8 { 85 }
fn default_inbox() -> PathBuf { PathBuf::from("inbox") }
fn default_true() -> bool { true }
fn default_settle_ms() -> u64 { 500 }

fn default_formats() -> Vec<String> {
    vec!["png", "jpg", "jpeg", "gif", "webp", "bmp"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            thumbnails: default_thumbnail_root(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            formats: default_formats(),
            max_dimension: default_max_dimension(),
            downscale_large: false,
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            size: default_thumbnail_size(),
            quality: default_thumbnail_quality(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            inbox: default_inbox(),
            remove_after_import: true,
            settle_ms: default_settle_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::MemeError::Config(format!("Failed to parse config: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the storage layer cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        if self.import.formats.is_empty() {
            return Err(crate::MemeError::Config("import.formats must not be empty".to_string()));
        }
        if self.import.max_dimension == 0 {
            return Err(crate::MemeError::Config("import.max_dimension must be positive".to_string()));
        }
        if self.thumbnails.size == 0 {
            return Err(crate::MemeError::Config("thumbnails.size must be positive".to_string()));
        }
        if !(1..=100).contains(&self.thumbnails.quality) {
            return Err(crate::MemeError::Config("thumbnails.quality must be within 1..=100".to_string()));
        }
        Ok(())
    }

    /// Rebase every relative path onto `base`
    pub fn rooted_at(mut self, base: &Path) -> Self {
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        rebase(&mut self.storage.root);
        rebase(&mut self.storage.thumbnails);
        rebase(&mut self.database.path);
        rebase(&mut self.watch.inbox);
        self
    }
}
