//! SQLite persistence for clipboard history

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;
use zstd::stream::{decode_all, encode_all};

use super::{ContentType, HistoryError, HistoryItem, HistoryItemContent, ItemId};

const SCHEMA_VERSION: u32 = 1;
const COMPRESSION_THRESHOLD: usize = 100 * 1024; // 100KB
const COMPRESSION_LEVEL: i32 = 3;

/// Durable backing for the history store
#[cfg_attr(test, mockall::automock)]
pub trait Storage: Send {
    /// Every persisted item, most recently copied first
    fn load_all(&self) -> Result<Vec<HistoryItem>, HistoryError>;

    /// Insert an item, replacing any row with the same id
    fn save(&mut self, item: &HistoryItem) -> Result<(), HistoryError>;

    /// Delete the given items and their contents
    fn remove(&mut self, ids: &[ItemId]) -> Result<(), HistoryError>;

    /// Delete everything
    fn remove_all(&mut self) -> Result<(), HistoryError>;
}

/// SQLite database holding the `items` and `contents` tables
pub struct HistoryDatabase {
    conn: Connection,
}

impl HistoryDatabase {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Database that lives only as long as the process
    pub fn in_memory() -> Result<Self, HistoryError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, HistoryError> {
        // WAL keeps readers (CLI invocations) from blocking the watcher
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )?;

        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> Result<(), HistoryError> {
        let version = self.schema_version()?;

        if version == 0 {
            self.create_schema()?;
        } else if version < SCHEMA_VERSION {
            self.migrate_schema(version)?;
        }

        Ok(())
    }

    fn schema_version(&self) -> Result<u32, HistoryError> {
        let table_exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            [],
            |row| row.get(0),
        )?;

        if !table_exists {
            return Ok(0);
        }

        let version: Option<u32> = self
            .conn
            .query_row(
                "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        Ok(version.unwrap_or(0))
    }

    fn create_schema(&self) -> Result<(), HistoryError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER DEFAULT (strftime('%s', 'now'))
            );

            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                first_copied_at INTEGER NOT NULL,
                last_copied_at INTEGER NOT NULL,
                number_of_copies INTEGER NOT NULL DEFAULT 1,
                pin TEXT UNIQUE,
                application TEXT,
                internal INTEGER NOT NULL DEFAULT 0,
                modified INTEGER
            );

            CREATE TABLE IF NOT EXISTS contents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                content_type TEXT NOT NULL,
                payload BLOB NOT NULL,
                checksum TEXT NOT NULL,
                compressed INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_items_last_copied ON items(last_copied_at DESC);
            CREATE INDEX IF NOT EXISTS idx_contents_item ON contents(item_id, position);
            ",
        )?;

        self.conn.execute(
            "INSERT INTO schema_version (version) VALUES (?)",
            params![SCHEMA_VERSION],
        )?;

        debug!("Created history schema v{}", SCHEMA_VERSION);
        Ok(())
    }

    fn migrate_schema(&self, _from_version: u32) -> Result<(), HistoryError> {
        Ok(())
    }

    fn insert_item(tx: &Transaction<'_>, item: &HistoryItem) -> Result<(), HistoryError> {
        tx.execute(
            "DELETE FROM items WHERE uuid = ?",
            params![item.id.to_string()],
        )?;

        tx.execute(
            "INSERT INTO items
             (uuid, title, first_copied_at, last_copied_at, number_of_copies, pin, application, internal, modified)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                item.id.to_string(),
                &item.title,
                item.first_copied_at.timestamp_millis(),
                item.last_copied_at.timestamp_millis(),
                item.number_of_copies,
                item.pin.map(String::from),
                &item.application,
                item.internal as i32,
                item.modified.map(|m| m as i64),
            ],
        )?;
        let row_id = tx.last_insert_rowid();

        let mut stmt = tx.prepare(
            "INSERT INTO contents (item_id, position, content_type, payload, checksum, compressed)
             VALUES (?, ?, ?, ?, ?, ?)",
        )?;
        for (position, content) in item.contents.iter().enumerate() {
            let checksum = compute_checksum(&content.payload);
            let compressed = content.payload.len() > COMPRESSION_THRESHOLD;
            let payload = if compressed {
                encode_all(&content.payload[..], COMPRESSION_LEVEL)?
            } else {
                content.payload.clone()
            };

            stmt.execute(params![
                row_id,
                position as i64,
                content.content_type.as_mime(),
                payload,
                checksum,
                compressed as i32,
            ])?;
        }

        Ok(())
    }

    fn load_contents(&self) -> Result<HashMap<i64, Vec<HistoryItemContent>>, HistoryError> {
        let mut stmt = self.conn.prepare(
            "SELECT item_id, content_type, payload, checksum, compressed
             FROM contents
             ORDER BY item_id, position",
        )?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row_to_content(row))))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut contents: HashMap<i64, Vec<HistoryItemContent>> = HashMap::new();
        for (item_id, content) in rows {
            match content {
                Ok(content) => contents.entry(item_id).or_default().push(content),
                Err(e) => warn!("Skipping content of item row {}: {}", item_id, e),
            }
        }
        Ok(contents)
    }
}

impl Storage for HistoryDatabase {
    fn load_all(&self) -> Result<Vec<HistoryItem>, HistoryError> {
        let mut contents = self.load_contents()?;

        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, title, first_copied_at, last_copied_at, number_of_copies,
                    pin, application, internal, modified
             FROM items
             ORDER BY last_copied_at DESC, id DESC",
        )?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row_to_item(row))))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut items = Vec::with_capacity(rows.len());
        for (row_id, item) in rows {
            let mut item = match item {
                Ok(item) => item,
                Err(e) => {
                    warn!("Skipping history row {}: {}", row_id, e);
                    continue;
                }
            };
            item.contents = contents.remove(&row_id).unwrap_or_default();
            if item.contents.is_empty() {
                warn!("Skipping history item {} without readable contents", item.id);
                continue;
            }
            items.push(item);
        }

        debug!("Loaded {} history items", items.len());
        Ok(items)
    }

    fn save(&mut self, item: &HistoryItem) -> Result<(), HistoryError> {
        let tx = self.conn.transaction()?;
        Self::insert_item(&tx, item)?;
        tx.commit()?;
        Ok(())
    }

    fn remove(&mut self, ids: &[ItemId]) -> Result<(), HistoryError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM items WHERE uuid = ?")?;
            for id in ids {
                stmt.execute(params![id.to_string()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn remove_all(&mut self) -> Result<(), HistoryError> {
        self.conn.execute("DELETE FROM items", [])?;
        Ok(())
    }
}

/// SHA-256 of a payload, hex encoded
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn row_to_content(row: &Row) -> Result<HistoryItemContent, HistoryError> {
    let content_type: String = row.get(1)?;
    let stored: Vec<u8> = row.get(2)?;
    let checksum: String = row.get(3)?;
    let compressed: i32 = row.get(4)?;

    let payload = if compressed != 0 {
        decode_all(&stored[..])?
    } else {
        stored
    };

    if compute_checksum(&payload) != checksum {
        return Err(HistoryError::Checksum(checksum));
    }

    Ok(HistoryItemContent::new(
        ContentType::from_mime(&content_type),
        payload,
    ))
}

fn row_to_item(row: &Row) -> Result<HistoryItem, HistoryError> {
    let uuid: String = row.get(1)?;
    let title: String = row.get(2)?;
    let first_copied_at: i64 = row.get(3)?;
    let last_copied_at: i64 = row.get(4)?;
    let number_of_copies: u32 = row.get(5)?;
    let pin: Option<String> = row.get(6)?;
    let application: Option<String> = row.get(7)?;
    let internal: i32 = row.get(8)?;
    let modified: Option<i64> = row.get(9)?;

    let id = Uuid::parse_str(&uuid).map_err(|e| HistoryError::Corrupt(e.to_string()))?;

    Ok(HistoryItem {
        id,
        contents: Vec::new(),
        title,
        first_copied_at: from_millis(first_copied_at)?,
        last_copied_at: from_millis(last_copied_at)?,
        number_of_copies: number_of_copies.max(1),
        pin: pin.and_then(|p| p.chars().next()),
        application,
        internal: internal != 0,
        modified: modified.map(|m| m as u64),
    })
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, HistoryError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| HistoryError::Corrupt(format!("invalid timestamp {millis}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn setup_test_db() -> (HistoryDatabase, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = HistoryDatabase::open(&temp_dir.path().join("test.db")).unwrap();
        (db, temp_dir)
    }

    fn sample(text: &str, offset: i64) -> HistoryItem {
        let mut item = HistoryItem::from_text(text)
            .with_application("TextEdit")
            .copied_at(Utc::now() + Duration::seconds(offset));
        item.title = text.to_string();
        item
    }

    #[test]
    fn test_save_and_load() {
        let (mut db, _temp_dir) = setup_test_db();

        let mut item = sample("Test content", 0);
        item.contents.push(HistoryItemContent::html("<b>Test content</b>"));
        item.pin = Some('a');
        item.modified = Some(7);
        db.save(&item).unwrap();

        let loaded = db.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, item.id);
        assert_eq!(loaded[0].contents, item.contents);
        assert_eq!(loaded[0].pin, Some('a'));
        assert_eq!(loaded[0].application.as_deref(), Some("TextEdit"));
        assert_eq!(loaded[0].modified, Some(7));
        assert_eq!(
            loaded[0].last_copied_at.timestamp_millis(),
            item.last_copied_at.timestamp_millis()
        );
    }

    #[test]
    fn test_save_replaces_existing_row() {
        let (mut db, _temp_dir) = setup_test_db();

        let mut item = sample("first", 0);
        db.save(&item).unwrap();

        item.contents = vec![HistoryItemContent::text("second")];
        item.number_of_copies = 2;
        db.save(&item).unwrap();

        let loaded = db.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].text(), Some("second"));
        assert_eq!(loaded[0].number_of_copies, 2);
    }

    #[test]
    fn test_load_order_and_remove() {
        let (mut db, _temp_dir) = setup_test_db();

        let items: Vec<_> = (0..5).map(|i| sample(&format!("Item {i}"), i)).collect();
        for item in &items {
            db.save(item).unwrap();
        }

        let loaded = db.load_all().unwrap();
        assert_eq!(loaded[0].text(), Some("Item 4"));
        assert_eq!(loaded[4].text(), Some("Item 0"));

        db.remove(&[items[4].id, items[0].id]).unwrap();
        let loaded = db.load_all().unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].text(), Some("Item 3"));

        db.remove_all().unwrap();
        assert!(db.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_large_payload_is_compressed() {
        let (mut db, _temp_dir) = setup_test_db();

        let png = vec![7u8; 512 * 1024];
        let mut item = HistoryItem::new(vec![HistoryItemContent::image(png.clone())]);
        item.title = "Image".to_string();
        db.save(&item).unwrap();

        let stored: i64 = db
            .conn
            .query_row("SELECT length(payload) FROM contents", [], |row| row.get(0))
            .unwrap();
        assert!((stored as usize) < png.len());

        let loaded = db.load_all().unwrap();
        assert_eq!(loaded[0].image(), Some(png.as_slice()));
    }

    #[test]
    fn test_corrupt_payload_is_skipped() {
        let (mut db, _temp_dir) = setup_test_db();

        db.save(&sample("good", 1)).unwrap();
        let bad = sample("bad", 0);
        db.save(&bad).unwrap();

        db.conn
            .execute(
                "UPDATE contents SET checksum = 'broken'
                 WHERE item_id = (SELECT id FROM items WHERE uuid = ?)",
                params![bad.id.to_string()],
            )
            .unwrap();

        let loaded = db.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].text(), Some("good"));
    }

    #[test]
    fn test_duplicate_pin_is_rejected() {
        let (mut db, _temp_dir) = setup_test_db();

        let mut a = sample("a", 0);
        a.pin = Some('x');
        let mut b = sample("b", 1);
        b.pin = Some('x');

        db.save(&a).unwrap();
        assert!(db.save(&b).is_err());
    }

    #[test]
    fn test_reopen_keeps_schema() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("reopen.db");

        {
            let mut db = HistoryDatabase::open(&path).unwrap();
            db.save(&sample("persisted", 0)).unwrap();
        }

        let db = HistoryDatabase::open(&path).unwrap();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
        assert_eq!(db.load_all().unwrap().len(), 1);
    }
}
