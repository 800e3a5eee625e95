// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Metadata store for images, tags and their associations

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::{MemeError, Result};

const IMAGE_COLUMNS: &str = "i.id, i.filename, i.original_name, i.path, i.created_at, i.updated_at";

/// Database manager for the meme library (thread-safe wrapper)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// An imported image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: i64,
    /// Generated name of the stored file
    pub filename: String,
    /// Name the file had before import, shown to the user
    pub original_name: String,
    /// Location of the stored file
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

/// A tag with the number of images carrying it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: Tag,
    pub image_count: i64,
}

/// Database statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbStats {
    pub image_count: i64,
    pub tag_count: i64,
    pub association_count: i64,
}

/// An image together with its tag names, as written by `export`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageExport {
    #[serde(flatten)]
    pub image: Image,
    pub tags: Vec<String>,
}

impl Database {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        info!("Database opened: {:?}", path);
        Self::with_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| MemeError::Config("Database lock poisoned".to_string()))
    }

    /// Initialize database schema
    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL UNIQUE,
                original_name TEXT NOT NULL,
                path TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE
            );

            CREATE TABLE IF NOT EXISTS image_tags (
                image_id INTEGER NOT NULL,
                tag_id INTEGER NOT NULL,
                PRIMARY KEY (image_id, tag_id),
                FOREIGN KEY (image_id) REFERENCES images (id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags (id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_images_filename ON images(filename);
            CREATE INDEX IF NOT EXISTS idx_images_created ON images(created_at);
            CREATE INDEX IF NOT EXISTS idx_tags_name ON tags(name);
            CREATE INDEX IF NOT EXISTS idx_image_tags_tag ON image_tags(tag_id);
        "#)?;
        Ok(())
    }

    // === Images ===

    /// Insert a new image record
    pub fn add_image(&self, filename: &str, original_name: &str, path: &str) -> Result<Image> {
        self.add_image_with_tags(filename, original_name, path, &[])
    }

    /// Insert an image together with its tags in one transaction.
    ///
    /// Nothing is written if any tag is rejected.
    pub fn add_image_with_tags(
        &self,
        filename: &str,
        original_name: &str,
        path: &str,
        tags: &[&str],
    ) -> Result<Image> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let now = now_timestamp();
        tx.execute(
            r#"INSERT INTO images (filename, original_name, path, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?4)"#,
            params![filename, original_name, path, now],
        )?;
        let id = tx.last_insert_rowid();
        for name in tags {
            let tag_id = ensure_tag(&tx, normalize_tag(name)?)?;
            tx.execute(
                "INSERT OR IGNORE INTO image_tags (image_id, tag_id) VALUES (?1, ?2)",
                params![id, tag_id],
            )?;
        }
        let image = query_image(&tx, id)?.ok_or_else(|| MemeError::NotFound(format!("image {}", id)))?;
        tx.commit()?;
        debug!("Inserted image {} ({}) with {} tag(s)", id, filename, tags.len());
        Ok(image)
    }

    /// Get an image by id
    pub fn get_image(&self, id: i64) -> Result<Option<Image>> {
        let conn = self.lock_conn()?;
        query_image(&conn, id)
    }

    /// Get all images, newest first
    pub fn get_all_images(&self) -> Result<Vec<Image>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {} FROM images i ORDER BY i.created_at DESC, i.id DESC",
            IMAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let images = stmt.query_map([], image_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(images)
    }

    pub fn image_count(&self) -> Result<i64> {
        let conn = self.lock_conn()?;
        conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))
            .map_err(Into::into)
    }

    /// Update the stored filename and/or display name.
    ///
    /// Returns `false` when there is nothing to change or no such image.
    pub fn update_image(
        &self,
        id: i64,
        filename: Option<&str>,
        original_name: Option<&str>,
    ) -> Result<bool> {
        let filename = filename.filter(|s| !s.is_empty());
        let original_name = original_name.filter(|s| !s.is_empty());
        if filename.is_none() && original_name.is_none() {
            return Ok(false);
        }

        let conn = self.lock_conn()?;
        let changed = conn.execute(
            r#"UPDATE images
               SET filename = COALESCE(?1, filename),
                   original_name = COALESCE(?2, original_name),
                   updated_at = ?3
               WHERE id = ?4"#,
            params![filename, original_name, now_timestamp(), id],
        )?;
        Ok(changed > 0)
    }

    /// Delete an image; its tag associations go with it
    pub fn delete_image(&self, id: i64) -> Result<bool> {
        let conn = self.lock_conn()?;
        let changed = conn.execute("DELETE FROM images WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    // === Tags ===

    /// Get or create a tag, returning its id
    pub fn add_tag(&self, name: &str) -> Result<i64> {
        let name = normalize_tag(name)?;
        let conn = self.lock_conn()?;
        ensure_tag(&conn, name)
    }

    pub fn get_tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT id, name FROM tags WHERE name = ?1",
            params![name.trim()],
            |row| Ok(Tag { id: row.get(0)?, name: row.get(1)? }),
        )
        .optional()
        .map_err(Into::into)
    }

    /// Get all tags
    pub fn get_all_tags(&self) -> Result<Vec<Tag>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT id, name FROM tags ORDER BY name")?;
        let tags = stmt.query_map([], |row| {
            Ok(Tag {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    /// Get all tags with how many images carry each
    pub fn get_all_tags_with_counts(&self) -> Result<Vec<TagCount>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT t.id, t.name, COUNT(it.image_id)
               FROM tags t LEFT JOIN image_tags it ON it.tag_id = t.id
               GROUP BY t.id ORDER BY t.name"#
        )?;
        let tags = stmt.query_map([], |row| {
            Ok(TagCount {
                tag: Tag { id: row.get(0)?, name: row.get(1)? },
                image_count: row.get(2)?,
            })
        })?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    /// Rename a tag. Renaming onto an existing name is a constraint error.
    pub fn rename_tag(&self, old: &str, new: &str) -> Result<bool> {
        let new = normalize_tag(new)?;
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "UPDATE tags SET name = ?2 WHERE name = ?1",
            params![old.trim(), new],
        )?;
        Ok(changed > 0)
    }

    /// Delete tags no image refers to any more
    pub fn prune_orphan_tags(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let removed = conn.execute(
            "DELETE FROM tags WHERE id NOT IN (SELECT DISTINCT tag_id FROM image_tags)",
            [],
        )?;
        if removed > 0 {
            info!("Pruned {} orphan tag(s)", removed);
        }
        Ok(removed)
    }

    // === Associations ===

    /// Associate a tag with an image. Returns `false` if already associated.
    pub fn add_image_tag(&self, image_id: i64, tag_id: i64) -> Result<bool> {
        let conn = self.lock_conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO image_tags (image_id, tag_id) VALUES (?1, ?2)",
            params![image_id, tag_id],
        )?;
        Ok(inserted > 0)
    }

    pub fn remove_image_tag(&self, image_id: i64, tag_id: i64) -> Result<bool> {
        let conn = self.lock_conn()?;
        let removed = conn.execute(
            "DELETE FROM image_tags WHERE image_id = ?1 AND tag_id = ?2",
            params![image_id, tag_id],
        )?;
        Ok(removed > 0)
    }

    /// Tag an image by name, creating the tag if needed
    pub fn tag_image(&self, image_id: i64, tag_name: &str) -> Result<bool> {
        let tag_id = self.add_tag(tag_name)?;
        self.add_image_tag(image_id, tag_id)
    }

    /// Remove a tag from an image by name
    pub fn untag_image(&self, image_id: i64, tag_name: &str) -> Result<bool> {
        match self.get_tag_by_name(tag_name)? {
            Some(tag) => self.remove_image_tag(image_id, tag.id),
            None => Ok(false),
        }
    }

    /// Tags attached to an image, by name
    pub fn get_image_tags(&self, image_id: i64) -> Result<Vec<Tag>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT t.id, t.name FROM tags t
               JOIN image_tags it ON t.id = it.tag_id
               WHERE it.image_id = ?1
               ORDER BY t.name"#
        )?;
        let tags = stmt.query_map(params![image_id], |row| {
            Ok(Tag { id: row.get(0)?, name: row.get(1)? })
        })?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    // === Search ===

    /// Search images by stored name, original name or tag.
    ///
    /// Exact tag hits rank above name hits, which rank above partial tag hits;
    /// within a rank newer images come first.
    pub fn search_images(&self, query: &str) -> Result<Vec<Image>> {
        let query = query.trim();
        let pattern = format!("%{}%", escape_like(query));
        let conn = self.lock_conn()?;
        let sql = format!(
            r#"SELECT {cols},
                   MAX(CASE
                       WHEN t.name = ?2 THEN 3
                       WHEN i.filename LIKE ?1 ESCAPE '\' OR i.original_name LIKE ?1 ESCAPE '\' THEN 2
                       WHEN t.name LIKE ?1 ESCAPE '\' THEN 1
                       ELSE 0
                   END) AS relevance
               FROM images i
               LEFT JOIN image_tags it ON i.id = it.image_id
               LEFT JOIN tags t ON it.tag_id = t.id
               WHERE i.filename LIKE ?1 ESCAPE '\'
                  OR i.original_name LIKE ?1 ESCAPE '\'
                  OR t.name LIKE ?1 ESCAPE '\'
               GROUP BY i.id
               ORDER BY relevance DESC, i.created_at DESC, i.id DESC"#,
            cols = IMAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let images = stmt.query_map(params![pattern, query], image_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!("Search {:?} matched {} image(s)", query, images.len());
        Ok(images)
    }

    /// Get exactly the images carrying a tag
    pub fn get_images_by_tag(&self, tag_name: &str) -> Result<Vec<Image>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            r#"SELECT {} FROM images i
               JOIN image_tags it ON i.id = it.image_id
               JOIN tags t ON it.tag_id = t.id
               WHERE t.name = ?1
               ORDER BY i.created_at DESC, i.id DESC"#,
            IMAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let images = stmt.query_map(params![tag_name.trim()], image_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(images)
    }

    // === Maintenance ===

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DbStats> {
        let conn = self.lock_conn()?;
        let image_count: i64 = conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        let tag_count: i64 = conn.query_row("SELECT COUNT(*) FROM tags", [], |row| row.get(0))?;
        let association_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM image_tags", [], |row| row.get(0))?;
        Ok(DbStats { image_count, tag_count, association_count })
    }

    /// Every image with its tag names
    pub fn export(&self) -> Result<Vec<ImageExport>> {
        let images = self.get_all_images()?;
        let mut out = Vec::with_capacity(images.len());
        for image in images {
            let tags = self.get_image_tags(image.id)?
                .into_iter()
                .map(|t| t.name)
                .collect();
            out.push(ImageExport { image, tags });
        }
        Ok(out)
    }

    /// Vacuum database
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("VACUUM", [])?;
        Ok(())
    }
}

fn ensure_tag(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute("INSERT OR IGNORE INTO tags (name) VALUES (?1)", params![name])?;
    let tag_id: i64 = conn.query_row(
        "SELECT id FROM tags WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(tag_id)
}

fn query_image(conn: &Connection, id: i64) -> Result<Option<Image>> {
    let sql = format!("SELECT {} FROM images i WHERE i.id = ?1", IMAGE_COLUMNS);
    conn.query_row(&sql, params![id], image_from_row)
        .optional()
        .map_err(Into::into)
}

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<Image> {
    Ok(Image {
        id: row.get(0)?,
        filename: row.get(1)?,
        original_name: row.get(2)?,
        path: row.get(3)?,
        created_at: parse_timestamp(row, 4)?,
        updated_at: parse_timestamp(row, 5)?,
    })
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Fixed-width UTC timestamps sort the same lexically and chronologically
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn normalize_tag(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(MemeError::InvalidTag(name.to_string()));
    }
    Ok(name)
}

/// Escape LIKE wildcards so user input matches literally (with `ESCAPE '\'`)
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::in_memory().unwrap()
    }

    fn ids(images: &[Image]) -> Vec<i64> {
        images.iter().map(|i| i.id).collect()
    }

    #[test]
    fn fresh_database_is_empty() {
        let db = db();
        let stats = db.get_stats().unwrap();
        assert_eq!(stats, DbStats { image_count: 0, tag_count: 0, association_count: 0 });
    }

    #[test]
    fn open_creates_file_and_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = Database::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(db.image_count().unwrap(), 0);

        // reopening keeps the schema and data
        db.add_image("a.png", "a.png", "/x/a.png").unwrap();
        drop(db);
        let db = Database::open(&path).unwrap();
        assert_eq!(db.image_count().unwrap(), 1);
    }

    #[test]
    fn add_tag_reuses_existing_row() {
        let db = db();
        let first = db.add_tag("funny").unwrap();
        assert!(first > 0);
        assert_eq!(db.add_tag("funny").unwrap(), first);
        assert_eq!(db.add_tag("  Funny ").unwrap(), first);
        assert_eq!(db.get_stats().unwrap().tag_count, 1);

        let tag = db.get_tag_by_name("funny").unwrap().unwrap();
        assert_eq!(tag.id, first);
        assert_eq!(tag.name, "funny");
    }

    #[test]
    fn empty_tag_is_rejected() {
        let db = db();
        assert!(matches!(db.add_tag("   "), Err(MemeError::InvalidTag(_))));
    }

    #[test]
    fn image_crud() {
        let db = db();
        let image = db.add_image("test.jpg", "original.jpg", "/path/to/test.jpg").unwrap();
        assert!(image.id > 0);
        assert_eq!(image.created_at, image.updated_at);

        let fetched = db.get_image(image.id).unwrap().unwrap();
        assert_eq!(fetched.filename, "test.jpg");
        assert_eq!(fetched.original_name, "original.jpg");

        assert!(db.update_image(image.id, Some("updated.jpg"), None).unwrap());
        let updated = db.get_image(image.id).unwrap().unwrap();
        assert_eq!(updated.filename, "updated.jpg");
        assert_eq!(updated.original_name, "original.jpg");
        assert!(updated.updated_at >= image.updated_at);

        assert!(!db.update_image(image.id, None, None).unwrap());
        assert!(!db.update_image(image.id, Some(""), None).unwrap());
        assert!(!db.update_image(9999, Some("x.jpg"), None).unwrap());

        assert!(db.delete_image(image.id).unwrap());
        assert!(db.get_image(image.id).unwrap().is_none());
        assert!(!db.delete_image(image.id).unwrap());
    }

    #[test]
    fn duplicate_filename_is_a_constraint_error() {
        let db = db();
        db.add_image("same.png", "a.png", "/a").unwrap();
        let err = db.add_image("same.png", "b.png", "/b").unwrap_err();
        assert!(matches!(err, MemeError::Database(_)));
    }

    #[test]
    fn image_with_tags_is_all_or_nothing() {
        let db = db();
        let image = db.add_image_with_tags("a.png", "a.png", "/a", &["cat", "Cat", "dog"]).unwrap();
        let names: Vec<String> = db.get_image_tags(image.id).unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["cat", "dog"]);

        let err = db.add_image_with_tags("b.png", "b.png", "/b", &["bird", "  "]).unwrap_err();
        assert!(matches!(err, MemeError::InvalidTag(_)));
        assert_eq!(db.image_count().unwrap(), 1);
        assert!(db.get_tag_by_name("bird").unwrap().is_none());
    }

    #[test]
    fn delete_cascades_to_associations() {
        let db = db();
        let a = db.add_image("a.png", "a.png", "/a").unwrap();
        let b = db.add_image("b.png", "b.png", "/b").unwrap();
        db.tag_image(a.id, "cat").unwrap();
        db.tag_image(a.id, "dog").unwrap();
        db.tag_image(b.id, "cat").unwrap();
        assert_eq!(db.get_stats().unwrap().association_count, 3);

        db.delete_image(a.id).unwrap();

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.association_count, 1);
        // tags survive until pruned
        assert_eq!(stats.tag_count, 2);
        assert!(db.get_image_tags(a.id).unwrap().is_empty());
    }

    #[test]
    fn association_requires_existing_rows() {
        let db = db();
        let tag = db.add_tag("orphan").unwrap();
        assert!(db.add_image_tag(42, tag).is_err());

        let image = db.add_image("a.png", "a.png", "/a").unwrap();
        assert!(db.add_image_tag(image.id, 42).is_err());
    }

    #[test]
    fn add_image_tag_is_idempotent() {
        let db = db();
        let image = db.add_image("a.png", "a.png", "/a").unwrap();
        let tag = db.add_tag("cat").unwrap();
        assert!(db.add_image_tag(image.id, tag).unwrap());
        assert!(!db.add_image_tag(image.id, tag).unwrap());

        assert!(db.remove_image_tag(image.id, tag).unwrap());
        assert!(!db.remove_image_tag(image.id, tag).unwrap());
        assert!(!db.untag_image(image.id, "never-created").unwrap());
    }

    #[test]
    fn tag_search_returns_exactly_tagged_images() {
        let db = db();
        let a = db.add_image("a.png", "first.png", "/a").unwrap();
        let b = db.add_image("b.png", "second.png", "/b").unwrap();
        let c = db.add_image("c.png", "third.png", "/c").unwrap();
        db.tag_image(a.id, "reaction").unwrap();
        db.tag_image(c.id, "reaction").unwrap();
        db.tag_image(b.id, "wholesome").unwrap();

        let mut found = ids(&db.search_images("reaction").unwrap());
        found.sort();
        assert_eq!(found, vec![a.id, c.id]);

        let mut by_tag = ids(&db.get_images_by_tag("reaction").unwrap());
        by_tag.sort();
        assert_eq!(by_tag, vec![a.id, c.id]);
    }

    #[test]
    fn search_matches_names_and_dedupes() {
        let db = db();
        let a = db.add_image("20250101_abc_doge.png", "doge.png", "/a").unwrap();
        db.tag_image(a.id, "doge").unwrap();
        db.tag_image(a.id, "dogecoin").unwrap();

        let found = db.search_images("DOGE").unwrap();
        assert_eq!(ids(&found), vec![a.id]);
    }

    #[test]
    fn search_ranks_exact_tag_over_name_over_partial_tag() {
        let db = db();
        let partial = db.add_image("p.png", "p.png", "/p").unwrap();
        db.tag_image(partial.id, "catgirl").unwrap();
        let named = db.add_image("n.png", "grumpy cat.png", "/n").unwrap();
        let exact = db.add_image("e.png", "e.png", "/e").unwrap();
        db.tag_image(exact.id, "cat").unwrap();
        db.add_image("other.png", "other.png", "/o").unwrap();

        let found = db.search_images("cat").unwrap();
        assert_eq!(ids(&found), vec![exact.id, named.id, partial.id]);
    }

    #[test]
    fn search_orders_by_recency_within_rank() {
        let db = db();
        let old = db.add_image("old_meme.png", "old_meme.png", "/1").unwrap();
        let new = db.add_image("new_meme.png", "new_meme.png", "/2").unwrap();
        let found = db.search_images("meme").unwrap();
        assert_eq!(ids(&found), vec![new.id, old.id]);
    }

    #[test]
    fn search_treats_wildcards_literally() {
        let db = db();
        db.add_image("plain.png", "plain.png", "/a").unwrap();
        let pct = db.add_image("100%.png", "100%.png", "/b").unwrap();

        assert_eq!(ids(&db.search_images("%").unwrap()), vec![pct.id]);
        assert!(db.search_images("_").unwrap().is_empty());
    }

    #[test]
    fn empty_search_lists_everything() {
        let db = db();
        db.add_image("a.png", "a.png", "/a").unwrap();
        db.add_image("b.png", "b.png", "/b").unwrap();
        assert_eq!(db.search_images("  ").unwrap().len(), 2);
    }

    #[test]
    fn prune_only_removes_unused_tags() {
        let db = db();
        let image = db.add_image("a.png", "a.png", "/a").unwrap();
        db.tag_image(image.id, "kept").unwrap();
        db.add_tag("lonely").unwrap();

        assert_eq!(db.prune_orphan_tags().unwrap(), 1);
        let names: Vec<_> = db.get_all_tags().unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["kept"]);
    }

    #[test]
    fn rename_tag_and_conflict() {
        let db = db();
        db.add_tag("lol").unwrap();
        db.add_tag("rofl").unwrap();
        assert!(db.rename_tag("lol", "lmao").unwrap());
        assert!(db.get_tag_by_name("lmao").unwrap().is_some());
        assert!(db.rename_tag("lmao", "rofl").is_err());
        assert!(!db.rename_tag("missing", "whatever").unwrap());
    }

    #[test]
    fn tag_counts_include_unused_tags() {
        let db = db();
        let image = db.add_image("a.png", "a.png", "/a").unwrap();
        db.tag_image(image.id, "used").unwrap();
        db.add_tag("unused").unwrap();

        let counts: Vec<_> = db.get_all_tags_with_counts().unwrap()
            .into_iter()
            .map(|c| (c.tag.name, c.image_count))
            .collect();
        assert_eq!(counts, vec![("unused".to_string(), 0), ("used".to_string(), 1)]);
    }

    #[test]
    fn export_includes_tags() {
        let db = db();
        let image = db.add_image("a.png", "a.png", "/a").unwrap();
        db.tag_image(image.id, "b").unwrap();
        db.tag_image(image.id, "a").unwrap();

        let export = db.export().unwrap();
        assert_eq!(export.len(), 1);
        assert_eq!(export[0].tags, vec!["a", "b"]);

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json[0]["filename"], "a.png");
    }

    #[test]
    fn escape_like_escapes_wildcards() {
        assert_eq!(escape_like(r"a%b_c\d"), r"a\%b\_c\\d");
    }
}
