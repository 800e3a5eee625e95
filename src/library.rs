// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! The meme library: user actions on top of the metadata store and file storage

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::db::{Database, DbStats, Image, Tag, TagCount};
use crate::storage::{ImageStorage, StorageUsage, StoredFile};
use crate::{AppConfig, MemeError, Result};

/// Name given to images imported from raw bytes without a name
pub const DEFAULT_PASTE_NAME: &str = "clipboard_image";

/// An image with its tag names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageDetails {
    #[serde(flatten)]
    pub image: Image,
    pub tags: Vec<String>,
}

/// Outcome of importing several files
#[derive(Debug, Default)]
pub struct ImportReport {
    pub imported: Vec<Image>,
    pub failed: Vec<(PathBuf, MemeError)>,
}

impl ImportReport {
    /// Serializable view listing each failure with its reason
    pub fn summary(&self) -> ImportSummary<'_> {
        ImportSummary {
            imported: &self.imported,
            failed: self.failed
                .iter()
                .map(|(path, e)| FailedImport { path, error: e.to_string() })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ImportSummary<'a> {
    pub imported: &'a [Image],
    pub failed: Vec<FailedImport<'a>>,
}

#[derive(Debug, Serialize)]
pub struct FailedImport<'a> {
    pub path: &'a Path,
    pub error: String,
}

/// Combined store and disk statistics
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LibraryStats {
    pub db: DbStats,
    pub storage: StorageUsage,
}

pub struct MemeLibrary {
    db: Database,
    storage: ImageStorage,
    prune_orphan_tags: bool,
}

impl MemeLibrary {
    /// Open the database and storage described by `config`
    pub fn open(config: &AppConfig) -> Result<Self> {
        let db = Database::open(&config.database.path)?;
        let storage = ImageStorage::new(config)?;
        Ok(Self::new(db, storage, config.library.prune_orphan_tags))
    }

    pub fn new(db: Database, storage: ImageStorage, prune_orphan_tags: bool) -> Self {
        Self { db, storage, prune_orphan_tags }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn storage(&self) -> &ImageStorage {
        &self.storage
    }

    // === Import ===

    /// Import an image file, attaching `tags`
    pub fn import_file(&self, path: &Path, tags: &[String]) -> Result<Image> {
        let tags = clean_tags(tags)?;
        self.storage.check_image_file(path)?;

        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let stored = self.storage.save_image(path, &original_name)?;
        self.record(stored, &original_name, &tags)
    }

    /// Import image bytes from a paste or a pipe
    pub fn import_bytes(&self, bytes: &[u8], name: Option<&str>, tags: &[String]) -> Result<Image> {
        let tags = clean_tags(tags)?;
        let original_name = name.filter(|n| !n.trim().is_empty()).unwrap_or(DEFAULT_PASTE_NAME);
        let stored = self.storage.save_image_bytes(bytes, original_name)?;
        self.record(stored, original_name, &tags)
    }

    /// Import each path independently; one failure does not stop the rest
    pub fn import_many<P: AsRef<Path>>(&self, paths: &[P], tags: &[String]) -> ImportReport {
        let mut report = ImportReport::default();
        for path in paths {
            let path = path.as_ref();
            match self.import_file(path, tags) {
                Ok(image) => {
                    info!("Imported {:?} as #{}", path, image.id);
                    report.imported.push(image);
                }
                Err(e) => {
                    warn!("Failed to import {:?}: {}", path, e);
                    report.failed.push((path.to_path_buf(), e));
                }
            }
        }
        report
    }

    fn record(&self, stored: StoredFile, original_name: &str, tags: &[&str]) -> Result<Image> {
        let path = stored.path.to_string_lossy();
        match self.db.add_image_with_tags(&stored.filename, original_name, &path, tags) {
            Ok(image) => {
                debug!("Recorded #{} with {} tag(s)", image.id, tags.len());
                Ok(image)
            }
            Err(e) => {
                // keep disk and store in step
                if let Err(rm) = std::fs::remove_file(&stored.path) {
                    warn!("Could not remove {:?} after failed insert: {}", stored.path, rm);
                }
                Err(e)
            }
        }
    }

    // === Edit ===

    /// Change the display name of an image
    pub fn rename(&self, id: i64, new_name: &str) -> Result<Image> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(MemeError::Config("New name must not be empty".to_string()));
        }
        if !self.db.update_image(id, None, Some(new_name))? {
            return Err(not_found(id));
        }
        self.require(id)
    }

    /// Attach tags; returns the image's full tag list
    pub fn tag(&self, id: i64, names: &[String]) -> Result<Vec<Tag>> {
        let names = clean_tags(names)?;
        self.require(id)?;
        for name in names {
            if self.db.tag_image(id, name)? {
                debug!("Tagged #{} with {:?}", id, name);
            }
        }
        self.db.get_image_tags(id)
    }

    /// Detach tags; returns how many associations were removed
    pub fn untag(&self, id: i64, names: &[String]) -> Result<usize> {
        self.require(id)?;
        let mut removed = 0;
        for name in names {
            if self.db.untag_image(id, name)? {
                removed += 1;
            }
        }
        if removed > 0 && self.prune_orphan_tags {
            self.db.prune_orphan_tags()?;
        }
        Ok(removed)
    }

    pub fn tags_of(&self, id: i64) -> Result<Vec<Tag>> {
        self.require(id)?;
        self.db.get_image_tags(id)
    }

    pub fn rename_tag(&self, old: &str, new: &str) -> Result<()> {
        if !self.db.rename_tag(old, new)? {
            return Err(MemeError::NotFound(format!("tag {:?}", old)));
        }
        Ok(())
    }

    pub fn all_tags(&self) -> Result<Vec<TagCount>> {
        self.db.get_all_tags_with_counts()
    }

    /// Delete an image, its associations, its file and its thumbnail.
    ///
    /// Returns `false` if no such image exists.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let Some(image) = self.db.get_image(id)? else {
            return Ok(false);
        };

        if !self.storage.delete_image_file(Path::new(&image.path))? {
            warn!("Stored file for #{} was already missing: {}", id, image.path);
        }
        self.db.delete_image(id)?;
        info!("Deleted #{} ({})", id, image.original_name);

        if self.prune_orphan_tags {
            self.db.prune_orphan_tags()?;
        }
        Ok(true)
    }

    // === Query ===

    pub fn details(&self, id: i64) -> Result<ImageDetails> {
        let image = self.require(id)?;
        self.with_tags(image)
    }

    pub fn list(&self) -> Result<Vec<ImageDetails>> {
        self.db.get_all_images()?
            .into_iter()
            .map(|image| self.with_tags(image))
            .collect()
    }

    /// Search-as-you-type: names and tags, most relevant first
    pub fn search(&self, query: &str) -> Result<Vec<ImageDetails>> {
        self.db.search_images(query)?
            .into_iter()
            .map(|image| self.with_tags(image))
            .collect()
    }

    pub fn by_tag(&self, tag: &str) -> Result<Vec<ImageDetails>> {
        self.db.get_images_by_tag(tag)?
            .into_iter()
            .map(|image| self.with_tags(image))
            .collect()
    }

    /// Absolute path of the stored file, for sharing
    pub fn stored_path(&self, id: i64) -> Result<PathBuf> {
        let image = self.require(id)?;
        let path = PathBuf::from(&image.path);
        if !path.exists() {
            return Err(MemeError::NotFound(image.path));
        }
        Ok(std::fs::canonicalize(path)?)
    }

    pub fn thumbnail(&self, id: i64) -> Result<PathBuf> {
        let image = self.require(id)?;
        self.storage.get_or_create_thumbnail(Path::new(&image.path))
    }

    // === Maintenance ===

    pub fn stats(&self) -> Result<LibraryStats> {
        Ok(LibraryStats {
            db: self.db.get_stats()?,
            storage: self.storage.storage_usage()?,
        })
    }

    pub fn prune_tags(&self) -> Result<usize> {
        self.db.prune_orphan_tags()
    }

    pub fn cleanup_thumbnails(&self) -> Result<usize> {
        let paths: Vec<PathBuf> = self.db.get_all_images()?
            .into_iter()
            .map(|image| PathBuf::from(image.path))
            .collect();
        self.storage.cleanup_orphaned_thumbnails(&paths)
    }

    /// Write every image and its tags as pretty JSON; returns the image count
    pub fn export_json(&self, output: &Path) -> Result<usize> {
        let export = self.db.export()?;
        std::fs::write(output, serde_json::to_string_pretty(&export)?)?;
        Ok(export.len())
    }

    pub fn vacuum(&self) -> Result<()> {
        self.db.vacuum()
    }

    fn require(&self, id: i64) -> Result<Image> {
        self.db.get_image(id)?.ok_or_else(|| not_found(id))
    }

    fn with_tags(&self, image: Image) -> Result<ImageDetails> {
        let tags = self.db.get_image_tags(image.id)?
            .into_iter()
            .map(|t| t.name)
            .collect();
        Ok(ImageDetails { image, tags })
    }
}

fn not_found(id: i64) -> MemeError {
    MemeError::NotFound(format!("image #{}", id))
}

/// Trim tags and reject empty ones before anything touches disk
fn clean_tags(tags: &[String]) -> Result<Vec<&str>> {
    let mut out: Vec<&str> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(MemeError::InvalidTag(tag.to_string()));
        }
        if !out.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            out.push(tag);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, MemeLibrary) {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::default().rooted_at(dir.path());
        let library = MemeLibrary::new(
            Database::in_memory().unwrap(),
            ImageStorage::new(&config).unwrap(),
            false,
        );
        (dir, library)
    }

    fn sample(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(6, 6, Rgb([10, 200, 30])).save(&path).unwrap();
        path
    }

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn stored_files(library: &MemeLibrary) -> usize {
        library.storage().storage_usage().unwrap().file_count as usize
    }

    #[test]
    fn import_each_supported_format_adds_one_row_and_one_file() {
        let (dir, library) = setup();
        for (i, ext) in ["png", "jpg", "jpeg", "gif", "webp", "bmp"].iter().enumerate() {
            let src = sample(dir.path(), &format!("meme.{}", ext));
            let image = library.import_file(&src, &[]).unwrap();

            assert_eq!(library.db().image_count().unwrap(), i as i64 + 1);
            assert_eq!(stored_files(&library), i + 1);

            let stored = PathBuf::from(&image.path);
            assert!(stored.exists());
            let partition = stored.parent().unwrap();
            assert_eq!(partition.parent().unwrap().parent().unwrap(), library.storage().root());
            assert_eq!(image.original_name, format!("meme.{}", ext));
        }
    }

    #[test]
    fn import_rejects_unsupported_without_side_effects() {
        let (dir, library) = setup();
        let src = dir.path().join("doc.txt");
        fs::write(&src, b"text").unwrap();

        assert!(matches!(library.import_file(&src, &[]), Err(MemeError::UnsupportedFormat(_))));
        assert_eq!(library.db().image_count().unwrap(), 0);
        assert_eq!(stored_files(&library), 0);
    }

    #[test]
    fn reimport_never_overwrites() {
        let (dir, library) = setup();
        let src = sample(dir.path(), "dup.png");
        let first = library.import_file(&src, &[]).unwrap();
        let before = fs::read(&first.path).unwrap();

        let second = library.import_file(&src, &[]).unwrap();
        assert_ne!(first.filename, second.filename);
        assert_eq!(fs::read(&first.path).unwrap(), before);
        assert_eq!(stored_files(&library), 2);
    }

    #[test]
    fn import_with_tags_and_search_by_tag() {
        let (dir, library) = setup();
        let a = library.import_file(&sample(dir.path(), "a.png"), &tags(&["Reaction", "cat"])).unwrap();
        let b = library.import_file(&sample(dir.path(), "b.png"), &tags(&["dog"])).unwrap();
        let c = library.import_file(&sample(dir.path(), "c.png"), &tags(&["reaction"])).unwrap();

        // "Reaction" and "reaction" are the same tag
        assert_eq!(library.db().get_stats().unwrap().tag_count, 3);

        let mut found: Vec<_> = library.by_tag("reaction").unwrap().into_iter().map(|d| d.image.id).collect();
        found.sort();
        assert_eq!(found, vec![a.id, c.id]);

        let hits = library.search("dog").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].image.id, b.id);
        assert_eq!(hits[0].tags, vec!["dog"]);
    }

    #[test]
    fn empty_tag_rejected_before_storing() {
        let (dir, library) = setup();
        let src = sample(dir.path(), "x.png");
        assert!(matches!(
            library.import_file(&src, &tags(&["ok", "  "])),
            Err(MemeError::InvalidTag(_))
        ));
        assert_eq!(stored_files(&library), 0);
    }

    #[test]
    fn failed_tagging_rolls_back_row_and_file() {
        let (dir, library) = setup();
        let source = sample(dir.path(), "cat.png");
        let stored = library.storage().save_image(&source, "cat.png").unwrap();
        let stored_path = stored.path.clone();

        let err = library.record(stored, "cat.png", &["funny", " "]).unwrap_err();

        assert!(matches!(err, MemeError::InvalidTag(_)));
        assert!(!stored_path.exists());
        assert_eq!(library.db().image_count().unwrap(), 0);
        assert!(library.all_tags().unwrap().is_empty());
        assert_eq!(stored_files(&library), 0);
    }

    #[test]
    fn import_many_reports_each_path() {
        let (dir, library) = setup();
        let good = sample(dir.path(), "good.png");
        let missing = dir.path().join("missing.png");

        let report = library.import_many(&[good, missing.clone()], &[]);
        assert_eq!(report.imported.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, missing);
        assert!(matches!(report.failed[0].1, MemeError::NotFound(_)));

        let json = serde_json::to_value(report.summary()).unwrap();
        assert_eq!(json["imported"].as_array().unwrap().len(), 1);
        assert_eq!(json["failed"][0]["path"].as_str(), missing.to_str());
        assert!(json["failed"][0]["error"].as_str().unwrap().contains("missing.png"));
    }

    #[test]
    fn import_bytes_uses_default_name() {
        let (dir, library) = setup();
        let bytes = fs::read(sample(dir.path(), "pasted.png")).unwrap();
        let image = library.import_bytes(&bytes, None, &tags(&["pasted"])).unwrap();
        assert_eq!(image.original_name, DEFAULT_PASTE_NAME);
        assert!(image.filename.ends_with(".png"));
        assert_eq!(library.tags_of(image.id).unwrap()[0].name, "pasted");
    }

    #[test]
    fn delete_removes_row_associations_file_and_thumbnail() {
        let (dir, library) = setup();
        let image = library.import_file(&sample(dir.path(), "bye.png"), &tags(&["a", "b"])).unwrap();
        let thumb = library.thumbnail(image.id).unwrap();
        assert!(thumb.exists());

        assert!(library.delete(image.id).unwrap());
        assert!(!Path::new(&image.path).exists());
        assert!(!thumb.exists());

        let stats = library.db().get_stats().unwrap();
        assert_eq!(stats.image_count, 0);
        assert_eq!(stats.association_count, 0);
        assert_eq!(stats.tag_count, 2);

        assert!(!library.delete(image.id).unwrap());
    }

    #[test]
    fn delete_prunes_when_configured() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::default().rooted_at(dir.path());
        let library = MemeLibrary::new(
            Database::in_memory().unwrap(),
            ImageStorage::new(&config).unwrap(),
            true,
        );
        let keep = library.import_file(&sample(dir.path(), "k.png"), &tags(&["shared"])).unwrap();
        let gone = library.import_file(&sample(dir.path(), "g.png"), &tags(&["shared", "solo"])).unwrap();

        library.delete(gone.id).unwrap();
        let names: Vec<_> = library.all_tags().unwrap().into_iter().map(|t| t.tag.name).collect();
        assert_eq!(names, vec!["shared"]);
        assert_eq!(library.tags_of(keep.id).unwrap().len(), 1);
    }

    #[test]
    fn rename_changes_display_name_only() {
        let (dir, library) = setup();
        let image = library.import_file(&sample(dir.path(), "old.png"), &[]).unwrap();

        let renamed = library.rename(image.id, "distracted boyfriend").unwrap();
        assert_eq!(renamed.original_name, "distracted boyfriend");
        assert_eq!(renamed.filename, image.filename);
        assert_eq!(library.search("boyfriend").unwrap().len(), 1);

        assert!(matches!(library.rename(999, "x"), Err(MemeError::NotFound(_))));
    }

    #[test]
    fn tag_and_untag() {
        let (dir, library) = setup();
        let image = library.import_file(&sample(dir.path(), "t.png"), &[]).unwrap();

        let now = library.tag(image.id, &tags(&["b", "a", "a"])).unwrap();
        let names: Vec<_> = now.into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["a", "b"]);

        assert_eq!(library.untag(image.id, &tags(&["a", "zzz"])).unwrap(), 1);
        assert!(matches!(library.tag(404, &tags(&["a"])), Err(MemeError::NotFound(_))));
    }

    #[test]
    fn stored_path_is_absolute() {
        let (dir, library) = setup();
        let image = library.import_file(&sample(dir.path(), "share.png"), &[]).unwrap();
        let path = library.stored_path(image.id).unwrap();
        assert!(path.is_absolute());
        assert!(path.exists());
    }

    #[test]
    fn export_and_maintenance() {
        let (dir, library) = setup();
        let image = library.import_file(&sample(dir.path(), "e.png"), &tags(&["x"])).unwrap();
        library.thumbnail(image.id).unwrap();

        let out = dir.path().join("export.json");
        assert_eq!(library.export_json(&out).unwrap(), 1);
        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(json[0]["tags"][0], "x");

        assert_eq!(library.cleanup_thumbnails().unwrap(), 0);
        let stats = library.stats().unwrap();
        assert_eq!(stats.db.image_count, 1);
        assert_eq!(stats.storage.file_count, 1);
        library.vacuum().unwrap();
    }
}
