//! Shared fixture: a temporary beads workspace with the minimum store layout.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bd_claim::clock::{Clock, FixedClock};
use bd_claim::{SqliteClaimStore, SqliteStoreOptions};
use chrono::{TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, SqliteConnection, SqlitePool};
use tempfile::TempDir;

const SCHEMA: &str = r#"
CREATE TABLE issues (
    id          TEXT PRIMARY KEY,
    title       TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    status      TEXT NOT NULL DEFAULT 'open',
    priority    INTEGER NOT NULL DEFAULT 2,
    issue_type  TEXT NOT NULL DEFAULT 'task',
    assignee    TEXT,
    created_at  DATETIME NOT NULL,
    updated_at  DATETIME NOT NULL
);
CREATE TABLE labels (
    issue_id TEXT NOT NULL,
    label    TEXT NOT NULL,
    PRIMARY KEY (issue_id, label)
);
CREATE TABLE blocked_issues_cache (
    issue_id TEXT PRIMARY KEY
);
CREATE TABLE metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Default creation time for seeded issues.
pub const CREATED_AT: &str = "2025-01-01T00:00:00Z";

pub struct Fixture {
    pub dir: TempDir,
    pub path: PathBuf,
    pub clock: FixedClock,
    pool: SqlitePool,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let beads = dir.path().join(".beads");
        std::fs::create_dir(&beads).unwrap();
        let path = beads.join("beads.db");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options(&path))
            .await
            .unwrap();
        sqlx::raw_sql(SCHEMA).execute(&pool).await.unwrap();

        Self {
            dir,
            path,
            clock: FixedClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()),
            pool,
        }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }

    /// Adapter with the default options on the fixture clock.
    pub async fn store(&self) -> SqliteClaimStore {
        self.store_with(SqliteStoreOptions::default()).await
    }

    pub async fn store_with(&self, options: SqliteStoreOptions) -> SqliteClaimStore {
        SqliteClaimStore::open(&self.path, options, self.clock())
            .await
            .unwrap()
    }

    /// Open issue with the default creation time.
    pub async fn seed(&self, id: &str, priority: i32) {
        self.seed_at(id, priority, CREATED_AT).await;
    }

    pub async fn seed_at(&self, id: &str, priority: i32, created_at: &str) {
        sqlx::query(
            "INSERT INTO issues (id, title, priority, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
        )
        .bind(id)
        .bind(format!("Issue {id}"))
        .bind(priority)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .unwrap();
    }

    pub async fn label(&self, id: &str, labels: &[&str]) {
        for label in labels {
            sqlx::query("INSERT INTO labels (issue_id, label) VALUES (?1, ?2)")
                .bind(id)
                .bind(label)
                .execute(&self.pool)
                .await
                .unwrap();
        }
    }

    pub async fn block(&self, id: &str) {
        sqlx::query("INSERT INTO blocked_issues_cache (issue_id) VALUES (?1)")
            .bind(id)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    pub async fn set_status(&self, id: &str, status: &str) {
        sqlx::query("UPDATE issues SET status = ?2 WHERE id = ?1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    pub async fn set_assignee(&self, id: &str, assignee: &str) {
        sqlx::query("UPDATE issues SET assignee = ?2 WHERE id = ?1")
            .bind(id)
            .bind(assignee)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    /// Raw priority, bypassing the i32 range of the seeding helpers.
    pub async fn set_priority(&self, id: &str, priority: i64) {
        sqlx::query("UPDATE issues SET priority = ?2 WHERE id = ?1")
            .bind(id)
            .bind(priority)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    pub async fn set_created_at(&self, id: &str, created_at: &str) {
        sqlx::query("UPDATE issues SET created_at = ?2, updated_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(created_at)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    pub async fn set_version(&self, version: &str) {
        sqlx::query("INSERT OR REPLACE INTO metadata (key, value) VALUES ('bd_version', ?1)")
            .bind(version)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    pub async fn drop_metadata(&self) {
        sqlx::query("DROP TABLE metadata")
            .execute(&self.pool)
            .await
            .unwrap();
    }

    /// `(status, assignee, updated_at)` as stored.
    pub async fn row(&self, id: &str) -> (String, Option<String>, String) {
        sqlx::query_as(
            "SELECT status, assignee, CAST(updated_at AS TEXT) FROM issues WHERE id = ?1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .unwrap()
    }

    pub async fn count_with_status(&self, status: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM issues WHERE status = ?1")
            .bind(status)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    /// A separate connection holding the write lock until it is committed
    /// or dropped.
    pub async fn hold_write_lock(&self) -> SqliteConnection {
        let mut conn = SqliteConnection::connect_with(&connect_options(&self.path))
            .await
            .unwrap();
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut conn)
            .await
            .unwrap();
        conn
    }
}

fn connect_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
}
