// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for the meme manager

use thiserror::Error;

/// Result type alias for meme manager operations
pub type Result<T> = std::result::Result<T, MemeError>;

/// Meme manager error types
#[derive(Error, Debug)]
pub enum MemeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid image file: {0}")]
    InvalidImage(String),

    #[error("Invalid tag name: {0:?}")]
    InvalidTag(String),

    #[error("Not found: {0}")]
    NotFound(String),
}
