//! Local cache index: normalized link → object-store pointer.
//!
//! Two tables, single-writer SQLite. `pointers` holds one row per stored
//! record with freshness timestamps; `links` maps many normalized input
//! links onto one pointer and cascades away with it. Link values never
//! reach the object store; this index is the only place they persist.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, warn};

use crate::error::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pointers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uri TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    last_looked_up_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pointers_last_looked_up_at ON pointers(last_looked_up_at);
CREATE TABLE IF NOT EXISTS links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    link TEXT NOT NULL UNIQUE,
    pointer_id INTEGER NOT NULL REFERENCES pointers(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_links_pointer_id ON links(pointer_id);
"#;

#[derive(Debug, Clone, FromRow)]
pub struct PointerRow {
    pub id: i64,
    pub uri: String,
    pub created_at: DateTime<Utc>,
    pub last_looked_up_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CacheIndex {
    pool: SqlitePool,
}

impl CacheIndex {
    /// Open (creating if missing) the index database at `path`.
    /// `:memory:` is accepted for tests.
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        // Single-writer semantics; multi-writer deployments need external
        // coordination.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Pointer row for a normalized link, if any.
    pub async fn get(&self, link: &str) -> Result<Option<PointerRow>> {
        let row = sqlx::query_as::<_, PointerRow>(
            "SELECT p.id, p.uri, p.created_at, p.last_looked_up_at
             FROM pointers p JOIN links l ON l.pointer_id = p.id
             WHERE l.link = ?",
        )
        .bind(link)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn create_pointer(&self, uri: &str) -> Result<i64> {
        let now = Utc::now();
        let id = sqlx::query("INSERT INTO pointers (uri, created_at, last_looked_up_at) VALUES (?, ?, ?)")
            .bind(uri)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        Ok(id)
    }

    /// Associate links with a pointer. Inserts pre-filter against existing
    /// rows; a row that raced in first and points elsewhere wins, and the
    /// duplicate write is dropped.
    pub async fn add_links(&self, pointer_id: i64, links: &[String]) -> Result<()> {
        for link in links {
            let existing: Option<(i64,)> =
                sqlx::query_as("SELECT pointer_id FROM links WHERE link = ?")
                    .bind(link)
                    .fetch_optional(&self.pool)
                    .await?;
            match existing {
                Some((owner,)) if owner == pointer_id => {}
                Some((owner,)) => {
                    debug!(link = %link, owner, pointer_id, "link already mapped elsewhere, dropping write");
                }
                None => {
                    let inserted = sqlx::query(
                        "INSERT OR IGNORE INTO links (link, pointer_id, created_at) VALUES (?, ?, ?)",
                    )
                    .bind(link)
                    .bind(pointer_id)
                    .bind(Utc::now())
                    .execute(&self.pool)
                    .await?;
                    if inserted.rows_affected() == 0 {
                        // Lost the race after the pre-filter; verify the
                        // winner and drop ours if it points elsewhere.
                        let winner: Option<(i64,)> =
                            sqlx::query_as("SELECT pointer_id FROM links WHERE link = ?")
                                .bind(link)
                                .fetch_optional(&self.pool)
                                .await?;
                        if let Some((owner,)) = winner {
                            if owner != pointer_id {
                                warn!(link = %link, owner, pointer_id, "concurrent link write, first writer wins");
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Advance a pointer's freshness timestamp to now.
    pub async fn touch_pointer(&self, pointer_id: i64) -> Result<()> {
        sqlx::query("UPDATE pointers SET last_looked_up_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(pointer_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove a pointer and, via cascade, its link rows. Used for tombstone
    /// eviction when the stored record is gone.
    pub async fn remove_pointer(&self, pointer_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM pointers WHERE id = ?")
            .bind(pointer_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
