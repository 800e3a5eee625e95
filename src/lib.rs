// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Meme Manager: local meme library
//!
//! Imports images into a date-partitioned folder tree, keeps names and tags
//! in SQLite, and answers search-as-you-type queries over both.

pub mod config;
pub mod db;
pub mod error;
pub mod library;
pub mod storage;
pub mod watcher;

pub use config::AppConfig;
pub use error::{MemeError, Result};
pub use library::MemeLibrary;
