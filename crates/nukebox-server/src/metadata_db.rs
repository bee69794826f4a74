//! SQLite metadata store for uploaders and their files.
//!
//! Provides pooled connections, schema bootstrap, and a closed set of typed
//! operations per entity. "Not found" is reported as `None`/`false`, never as an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

const SCHEMA_VERSION: i32 = 1;

#[derive(Clone)]
pub struct MetadataDb {
    pool: Pool<SqliteConnectionManager>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: i64,
    pub name: String,
    pub mac_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub file_id: i64,
    pub path: String,
    pub size: i64,
    pub filetype: String,
    pub title: String,
    pub artist: String,
    pub genre: Option<String>,
    pub album: Option<String>,
    pub duration: Option<i64>,
    pub user_id: i64,
}

/// Details for a file about to be recorded.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub path: String,
    pub size: i64,
    pub filetype: String,
    pub title: String,
    pub artist: String,
    pub genre: Option<String>,
    pub album: Option<String>,
    pub duration: Option<i64>,
    pub user_id: i64,
}

/// Exact-match lookup key for files.
#[derive(Debug, Clone)]
pub enum FileKey {
    Path(String),
    Title(String),
}

/// Fields to change on a user; `None` leaves the column as is.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub mac_id: Option<String>,
}

/// Fields to change on a file; `None` leaves the column as is.
#[derive(Debug, Clone, Default)]
pub struct FileChanges {
    pub path: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub album: Option<String>,
    pub duration: Option<i64>,
}

const FILE_COLUMNS: &str =
    "file_id, path, size, filetype, title, artist, genre, album, duration, user_id";

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        user_id: row.get(0)?,
        name: row.get(1)?,
        mac_id: row.get(2)?,
    })
}

fn map_file_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        file_id: row.get(0)?,
        path: row.get(1)?,
        size: row.get(2)?,
        filetype: row.get(3)?,
        title: row.get(4)?,
        artist: row.get(5)?,
        genre: row.get(6)?,
        album: row.get(7)?,
        duration: row.get(8)?,
        user_id: row.get(9)?,
    })
}

impl MetadataDb {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create metadata dir {:?}", parent))?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.busy_timeout(Duration::from_secs(5))?;
            Ok(())
        });
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .context("create metadata db pool")?;

        {
            let conn = pool.get().context("open metadata db")?;
            init_schema(&conn)?;
        }

        Ok(Self { pool })
    }

    /// Return the user for `mac_id`, creating it on first sight.
    ///
    /// Concurrent callers with the same `mac_id` all get the same row.
    pub fn get_or_create_user(&self, name: &str, mac_id: &str) -> Result<UserRecord> {
        let mut conn = self.pool.get().context("open metadata db")?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin metadata tx")?;
        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO users (name, mac_id) VALUES (?1, ?2)",
                params![name, mac_id],
            )
            .context("insert user")?;
        let user = tx
            .query_row(
                "SELECT user_id, name, mac_id FROM users WHERE mac_id = ?1",
                params![mac_id],
                map_user_row,
            )
            .context("select user")?;
        tx.commit().context("commit metadata tx")?;
        if inserted > 0 {
            tracing::info!(user_id = user.user_id, mac_id = %mac_id, name = %name, "new user");
        }
        Ok(user)
    }

    pub fn find_user(&self, mac_id: &str) -> Result<Option<UserRecord>> {
        let conn = self.pool.get().context("open metadata db")?;
        conn.query_row(
            "SELECT user_id, name, mac_id FROM users WHERE mac_id = ?1",
            params![mac_id],
            map_user_row,
        )
        .optional()
        .context("find user")
    }

    pub fn update_user(&self, mac_id: &str, changes: &UserChanges) -> Result<bool> {
        let conn = self.pool.get().context("open metadata db")?;
        let updated = conn
            .execute(
                r#"
                UPDATE users
                SET name = COALESCE(?2, name),
                    mac_id = COALESCE(?3, mac_id)
                WHERE mac_id = ?1
                "#,
                params![mac_id, changes.name, changes.mac_id],
            )
            .context("update user")?;
        Ok(updated > 0)
    }

    /// Delete a user and, through the foreign key, all of their files.
    pub fn delete_user(&self, mac_id: &str) -> Result<bool> {
        let conn = self.pool.get().context("open metadata db")?;
        let deleted = conn
            .execute("DELETE FROM users WHERE mac_id = ?1", params![mac_id])
            .context("delete user")?;
        Ok(deleted > 0)
    }

    pub fn user_count(&self) -> Result<i64> {
        let conn = self.pool.get().context("open metadata db")?;
        conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .context("count users")
    }

    /// Record a file, keyed by path. A row already at that path takes the new details.
    pub fn get_or_create_file(&self, file: &NewFile) -> Result<FileRecord> {
        let mut conn = self.pool.get().context("open metadata db")?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin metadata tx")?;
        tx.execute(
            r#"
            INSERT INTO files (path, size, filetype, title, artist, genre, album, duration, user_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(path) DO UPDATE SET
                size = excluded.size,
                filetype = excluded.filetype,
                title = excluded.title,
                artist = excluded.artist,
                genre = excluded.genre,
                album = excluded.album,
                duration = excluded.duration,
                user_id = excluded.user_id
            "#,
            params![
                file.path,
                file.size,
                file.filetype,
                file.title,
                file.artist,
                file.genre,
                file.album,
                file.duration,
                file.user_id,
            ],
        )
        .context("upsert file")?;
        let record = tx
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE path = ?1"),
                params![file.path],
                map_file_row,
            )
            .context("select file")?;
        tx.commit().context("commit metadata tx")?;
        Ok(record)
    }

    /// Exact-match lookup. More than one match (possible for titles) is an error.
    pub fn find_file(&self, key: &FileKey) -> Result<Option<FileRecord>> {
        let conn = self.pool.get().context("open metadata db")?;
        find_file_in(&conn, key)
    }

    /// Update the one file matching `key`. `false` when none or several match.
    pub fn update_file(&self, key: &FileKey, changes: &FileChanges) -> Result<bool> {
        let conn = self.pool.get().context("open metadata db")?;
        let Some(existing) = unique_file_in(&conn, key)? else {
            return Ok(false);
        };
        let updated = conn
            .execute(
                r#"
                UPDATE files
                SET path = COALESCE(?2, path),
                    title = COALESCE(?3, title),
                    artist = COALESCE(?4, artist),
                    genre = COALESCE(?5, genre),
                    album = COALESCE(?6, album),
                    duration = COALESCE(?7, duration)
                WHERE file_id = ?1
                "#,
                params![
                    existing.file_id,
                    changes.path,
                    changes.title,
                    changes.artist,
                    changes.genre,
                    changes.album,
                    changes.duration,
                ],
            )
            .context("update file")?;
        Ok(updated > 0)
    }

    /// Delete the one file matching `key`. `false` when none or several match.
    pub fn delete_file(&self, key: &FileKey) -> Result<bool> {
        let conn = self.pool.get().context("open metadata db")?;
        let Some(existing) = unique_file_in(&conn, key)? else {
            return Ok(false);
        };
        let deleted = conn
            .execute(
                "DELETE FROM files WHERE file_id = ?1",
                params![existing.file_id],
            )
            .context("delete file")?;
        Ok(deleted > 0)
    }

    /// Files uploaded by the user with `mac_id`, oldest first.
    pub fn files_for_user(&self, mac_id: &str) -> Result<Vec<FileRecord>> {
        let conn = self.pool.get().context("open metadata db")?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT f.file_id, f.path, f.size, f.filetype, f.title, f.artist,
                       f.genre, f.album, f.duration, f.user_id
                FROM files f
                JOIN users u ON u.user_id = f.user_id
                WHERE u.mac_id = ?1
                ORDER BY f.file_id
                "#,
            )
            .context("prepare files for user")?;
        let rows = stmt
            .query_map(params![mac_id], map_file_row)
            .context("query files for user")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read files for user")
    }
}

/// Up to two rows matching `key`; enough to tell unique from ambiguous.
fn matching_files(conn: &Connection, key: &FileKey) -> Result<Vec<FileRecord>> {
    let (column, value) = match key {
        FileKey::Path(path) => ("path", path),
        FileKey::Title(title) => ("title", title),
    };
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE {column} = ?1 LIMIT 2"
        ))
        .context("prepare find file")?;
    stmt.query_map(params![value], map_file_row)
        .context("query find file")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("read find file")
}

fn find_file_in(conn: &Connection, key: &FileKey) -> Result<Option<FileRecord>> {
    let mut matches = matching_files(conn, key)?;
    if matches.len() > 1 {
        anyhow::bail!("more than one file matches {key:?}");
    }
    Ok(matches.pop())
}

/// The single row matching `key`, or `None` when there are zero or several.
fn unique_file_in(conn: &Connection, key: &FileKey) -> Result<Option<FileRecord>> {
    let mut matches = matching_files(conn, key)?;
    if matches.len() == 1 {
        Ok(matches.pop())
    } else {
        Ok(None)
    }
}

/// Default DB location under the library directory.
pub fn db_path_for(library_dir: &Path) -> PathBuf {
    library_dir.join(".nukebox").join("metadata.sqlite")
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            mac_id TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS files (
            file_id INTEGER PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            size INTEGER NOT NULL,
            filetype TEXT NOT NULL,
            title TEXT NOT NULL,
            artist TEXT NOT NULL,
            genre TEXT,
            album TEXT,
            duration INTEGER,
            user_id INTEGER NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(user_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_files_title ON files(title);
        CREATE INDEX IF NOT EXISTS idx_files_user_id ON files(user_id);
        "#,
    )
    .context("create metadata schema")?;

    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if version.is_none() {
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )
        .context("insert schema version")?;
    }

    Ok(())
}
