// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Image file handling: date-partitioned storage, unique names, thumbnails

use chrono::{DateTime, Datelike, Local};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::{AppConfig, MemeError, Result};

const MAX_STEM_CHARS: usize = 50;
const THUMB_SUFFIX: &str = ".thumb.jpg";

/// A file written into storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub filename: String,
    pub path: PathBuf,
}

/// Basic facts about an image file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub file_size: u64,
}

/// Storage usage statistics
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StorageUsage {
    pub total_size_bytes: u64,
    pub file_count: u64,
}

impl StorageUsage {
    pub fn total_size_mb(&self) -> f64 {
        (self.total_size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }
}

/// Stores imported images under `<root>/YYYY/MM/` and caches thumbnails
#[derive(Debug, Clone)]
pub struct ImageStorage {
    root: PathBuf,
    thumbnail_root: PathBuf,
    formats: Vec<String>,
    max_dimension: u32,
    downscale_large: bool,
    thumbnail_size: u32,
    thumbnail_quality: u8,
}

impl ImageStorage {
    /// Create the storage handler and its root directories
    pub fn new(config: &AppConfig) -> Result<Self> {
        let storage = Self {
            root: config.storage.root.clone(),
            thumbnail_root: config.storage.thumbnails.clone(),
            formats: config.import.formats.iter().map(|f| f.trim_start_matches('.').to_lowercase()).collect(),
            max_dimension: config.import.max_dimension,
            downscale_large: config.import.downscale_large,
            thumbnail_size: config.thumbnails.size,
            thumbnail_quality: config.thumbnails.quality,
        };
        fs::create_dir_all(&storage.root)?;
        fs::create_dir_all(&storage.thumbnail_root)?;
        debug!("Storage root {:?}, thumbnails {:?}", storage.root, storage.thumbnail_root);
        Ok(storage)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn thumbnail_root(&self) -> &Path {
        &self.thumbnail_root
    }

    /// Check the file extension against the allow-list
    pub fn is_supported_format(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.is_supported_extension(ext))
            .unwrap_or(false)
    }

    fn is_supported_extension(&self, ext: &str) -> bool {
        self.formats.iter().any(|f| f.eq_ignore_ascii_case(ext))
    }

    /// Check that a file exists, is on the allow-list and has a readable image header
    pub fn check_image_file(&self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(MemeError::NotFound(path.display().to_string()));
        }
        if !self.is_supported_format(path) {
            return Err(MemeError::UnsupportedFormat(extension_label(path)));
        }
        image::image_dimensions(path)
            .map_err(|e| MemeError::InvalidImage(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }

    pub fn validate_image_file(&self, path: &Path) -> bool {
        self.check_image_file(path).is_ok()
    }

    /// `YYYYMMDD_HHMMSS_<8 hex>_<clean stem><extension>`
    pub fn generate_unique_filename(
        &self,
        original_name: &str,
        extension: Option<&str>,
        now: DateTime<Local>,
    ) -> String {
        let original = Path::new(original_name);
        let extension = match extension {
            Some(ext) => normalize_extension(ext),
            None => original
                .extension()
                .and_then(|e| e.to_str())
                .map(normalize_extension)
                .unwrap_or_default(),
        };
        let stem = original.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        let unique_id = uuid::Uuid::new_v4().simple().to_string();

        format!(
            "{}_{}_{}{}",
            now.format("%Y%m%d_%H%M%S"),
            &unique_id[..8],
            clean_stem(stem),
            extension
        )
    }

    /// Directory for images imported on `date`, created on demand
    pub fn storage_dir_for<D: Datelike>(&self, date: &D) -> Result<PathBuf> {
        let dir = self.root
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()));
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Copy an image file into storage
    pub fn save_image(&self, source: &Path, original_name: &str) -> Result<StoredFile> {
        self.save_image_at(source, original_name, Local::now())
    }

    pub fn save_image_at(
        &self,
        source: &Path,
        original_name: &str,
        now: DateTime<Local>,
    ) -> Result<StoredFile> {
        if !self.is_supported_format(source) {
            return Err(MemeError::UnsupportedFormat(extension_label(source)));
        }
        let extension = source.extension().and_then(|e| e.to_str());
        let format = ImageFormat::from_path(source).ok();
        let bytes = fs::read(source)?;
        let bytes = self.prepare_bytes(bytes, format);

        let filename = self.generate_unique_filename(original_name, extension, now);
        let dir = self.storage_dir_for(&now)?;
        let stored = write_new(&dir, &filename, &bytes)?;
        info!("Stored {:?} as {:?}", source, stored.path);
        Ok(stored)
    }

    /// Store raw image bytes (pasted or piped); the format is sniffed from the data
    pub fn save_image_bytes(&self, bytes: &[u8], original_name: &str) -> Result<StoredFile> {
        self.save_image_bytes_at(bytes, original_name, Local::now())
    }

    pub fn save_image_bytes_at(
        &self,
        bytes: &[u8],
        original_name: &str,
        now: DateTime<Local>,
    ) -> Result<StoredFile> {
        let format = image::guess_format(bytes)
            .map_err(|e| MemeError::InvalidImage(format!("{}: {}", original_name, e)))?;
        let extension = format.extensions_str().first().copied().unwrap_or("bin");
        if !self.is_supported_extension(extension) {
            return Err(MemeError::UnsupportedFormat(format!("{:?}", format)));
        }
        let data = self.prepare_bytes(bytes.to_vec(), Some(format));

        let filename = self.generate_unique_filename(original_name, Some(extension), now);
        let dir = self.storage_dir_for(&now)?;
        let stored = write_new(&dir, &filename, &data)?;
        info!("Stored {} bytes of {:?} as {:?}", data.len(), format, stored.path);
        Ok(stored)
    }

    /// Downscale oversized images when configured; anything else passes through untouched
    fn prepare_bytes(&self, bytes: Vec<u8>, format: Option<ImageFormat>) -> Vec<u8> {
        let format = match format {
            Some(f) if self.downscale_large && f != ImageFormat::Gif => f,
            _ => return bytes,
        };

        let img = match image::load_from_memory_with_format(&bytes, format) {
            Ok(img) => img,
            Err(e) => {
                warn!("Could not decode image for downscaling, storing as-is: {}", e);
                return bytes;
            }
        };
        if img.width() <= self.max_dimension && img.height() <= self.max_dimension {
            return bytes;
        }

        let resized = img.resize(self.max_dimension, self.max_dimension, FilterType::Lanczos3);
        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);
        match resized.write_to(&mut cursor, format) {
            Ok(()) => {
                debug!(
                    "Downscaled {}x{} to {}x{}",
                    img.width(), img.height(), resized.width(), resized.height()
                );
                buffer
            }
            Err(e) => {
                warn!("Re-encoding failed, storing original: {}", e);
                bytes
            }
        }
    }

    /// `<thumb root>/YYYY/MM/<stem>.thumb.jpg`, mirroring the image's own partition
    pub fn thumbnail_path(&self, image_path: &Path) -> PathBuf {
        let (year, month) = partition_of(image_path).unwrap_or_else(|| {
            let now = Local::now();
            (format!("{:04}", now.year()), format!("{:02}", now.month()))
        });
        let stem = image_path.file_stem().and_then(|s| s.to_str()).unwrap_or("image");
        self.thumbnail_root
            .join(year)
            .join(month)
            .join(format!("{}{}", stem, THUMB_SUFFIX))
    }

    /// Return a cached thumbnail, regenerating it when missing or stale
    pub fn get_or_create_thumbnail(&self, image_path: &Path) -> Result<PathBuf> {
        if !image_path.is_file() {
            return Err(MemeError::NotFound(image_path.display().to_string()));
        }

        let thumb_path = self.thumbnail_path(image_path);
        if is_fresh(&thumb_path, image_path) {
            debug!("Thumbnail cache hit: {:?}", thumb_path);
            return Ok(thumb_path);
        }

        let img = image::open(image_path)?;
        let thumb = self.create_thumbnail(&img);

        if let Some(parent) = thumb_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&thumb_path)?);
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, self.thumbnail_quality);
            encoder.encode_image(&thumb)?;
        }
        writer.flush()?;

        debug!("Generated thumbnail {:?}", thumb_path);
        Ok(thumb_path)
    }

    /// Scale down to fit the thumbnail box and flatten transparency onto white
    pub fn create_thumbnail(&self, img: &DynamicImage) -> RgbImage {
        let size = self.thumbnail_size;
        let scaled = if img.width() > size || img.height() > size {
            img.thumbnail(size, size)
        } else {
            img.clone()
        };
        flatten_on_white(&scaled)
    }

    pub fn image_info(&self, path: &Path) -> Result<ImageInfo> {
        let (width, height) = image::image_dimensions(path)?;
        let file_size = fs::metadata(path)?.len();
        let format = ImageFormat::from_path(path)
            .map(|f| format!("{:?}", f))
            .unwrap_or_else(|_| "unknown".to_string());
        Ok(ImageInfo { width, height, format, file_size })
    }

    /// Remove a stored image and its thumbnail. Returns `false` if it was already gone.
    pub fn delete_image_file(&self, image_path: &Path) -> Result<bool> {
        let thumb = self.thumbnail_path(image_path);
        if thumb.exists() {
            fs::remove_file(&thumb)?;
        }
        match fs::remove_file(image_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn storage_usage(&self) -> Result<StorageUsage> {
        let mut usage = StorageUsage::default();
        for path in self.glob_under(&self.root, "**/*")? {
            if path.is_file() && self.is_supported_format(&path) {
                usage.total_size_bytes += fs::metadata(&path)?.len();
                usage.file_count += 1;
            }
        }
        Ok(usage)
    }

    /// Delete thumbnails whose image is not in `valid_images`
    pub fn cleanup_orphaned_thumbnails(&self, valid_images: &[PathBuf]) -> Result<usize> {
        let keep: HashSet<PathBuf> = valid_images.iter().map(|p| self.thumbnail_path(p)).collect();
        let mut removed = 0;

        for thumb in self.glob_under(&self.thumbnail_root, &format!("**/*{}", THUMB_SUFFIX))? {
            if keep.contains(&thumb) {
                continue;
            }
            match fs::remove_file(&thumb) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove thumbnail {:?}: {}", thumb, e),
            }
        }

        if removed > 0 {
            info!("Removed {} orphaned thumbnail(s)", removed);
        }
        Ok(removed)
    }

    fn glob_under(&self, base: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
        let full = format!(
            "{}/{}",
            glob::Pattern::escape(&base.to_string_lossy()),
            pattern
        );
        let paths = glob::glob(&full)
            .map_err(|e| MemeError::Config(format!("Invalid glob {:?}: {}", full, e)))?;
        Ok(paths
            .filter_map(|entry| match entry {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!("Skipping unreadable path: {}", e);
                    None
                }
            })
            .collect())
    }
}

/// Write `bytes` under `dir` without ever replacing an existing file.
///
/// On a name clash `_1`, `_2`, ... is appended to the stem.
fn write_new(dir: &Path, filename: &str, bytes: &[u8]) -> Result<StoredFile> {
    let name = Path::new(filename);
    let stem = name.file_stem().and_then(|s| s.to_str()).unwrap_or(filename);
    let ext = name.extension().and_then(|e| e.to_str());

    let mut attempt = 0u32;
    loop {
        let candidate = match (attempt, ext) {
            (0, _) => filename.to_string(),
            (n, Some(ext)) => format!("{}_{}.{}", stem, n, ext),
            (n, None) => format!("{}_{}", stem, n),
        };
        let path = dir.join(&candidate);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                fill_new(&path, file, bytes)?;
                if attempt > 0 {
                    debug!("Name {:?} taken, stored as {:?}", filename, candidate);
                }
                return Ok(StoredFile { filename: candidate, path });
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Fill a file just created at `path`. A partial file is removed on failure.
fn fill_new<W: Write>(path: &Path, mut file: W, bytes: &[u8]) -> Result<()> {
    if let Err(e) = file.write_all(bytes).and_then(|_| file.flush()) {
        drop(file);
        if let Err(rm) = fs::remove_file(path) {
            warn!("Could not remove partial file {:?}: {}", path, rm);
        }
        return Err(e.into());
    }
    Ok(())
}

fn clean_stem(stem: &str) -> String {
    stem.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ' '))
        .take(MAX_STEM_CHARS)
        .collect()
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim_start_matches('.');
    if ext.is_empty() {
        String::new()
    } else {
        format!(".{}", ext.to_lowercase())
    }
}

fn extension_label(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_else(|| "(no extension)".to_string())
}

/// `(YYYY, MM)` when the file sits directly in a `YYYY/MM` directory
fn partition_of(path: &Path) -> Option<(String, String)> {
    let month_dir = path.parent()?;
    let year_dir = month_dir.parent()?;
    let month = month_dir.file_name()?.to_str()?;
    let year = year_dir.file_name()?.to_str()?;

    let is_year = year.len() == 4 && year.chars().all(|c| c.is_ascii_digit());
    let is_month = month.len() == 2 && matches!(month.parse::<u32>(), Ok(1..=12));
    if is_year && is_month {
        Some((year.to_string(), month.to_string()))
    } else {
        None
    }
}

fn is_fresh(thumb: &Path, source: &Path) -> bool {
    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(thumb), modified(source)) {
        (Some(t), Some(s)) => t >= s,
        _ => false,
    }
}

fn flatten_on_white(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let a = a as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a)) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}
