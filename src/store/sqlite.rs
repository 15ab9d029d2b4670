//! SQLite claim adapter.
//!
//! A claim is one guarded statement inside one transaction:
//!
//! ```sql
//! UPDATE issues SET status = 'in_progress', assignee = ?, updated_at = ?
//! WHERE id = (<candidate selection> LIMIT 1) AND status = 'open'
//! RETURNING id
//! ```
//!
//! The `status = 'open'` guard is the compare-and-swap: if a concurrent
//! writer claimed the selected id first, no row comes back and the call
//! reports "no issue". SQLite serializes writers; lock waits are bounded by
//! the connection busy timeout and surface as busy errors, which are retried
//! by [`RetryPolicy`]. Dropping a transaction without commit rolls it back,
//! so cancellation and every error path leave the store untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{Instrument, debug, warn};

use super::version::{self, MIN_COMPATIBLE_VERSION, VERSION_KEY};
use super::{ClaimStore, RetryPolicy, filter};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::{
    AgentName, ClaimFilters, Issue, IssueId, Priority, Timestamp, format_timestamp,
    parse_timestamp,
};
use crate::telemetry::claim::transaction_span;

/// Lock-wait bound applied to every connection unless overridden.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 3000;

/// Connection and retry settings for [`SqliteClaimStore`].
#[derive(Debug, Clone)]
pub struct SqliteStoreOptions {
    /// How long a statement waits on another writer's lock before failing busy.
    pub busy_timeout: Duration,
    pub max_connections: u32,
    pub retry: RetryPolicy,
    /// Run the version gate when opening.
    pub check_version: bool,
}

impl Default for SqliteStoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            max_connections: 4,
            retry: RetryPolicy::default(),
            check_version: true,
        }
    }
}

impl SqliteStoreOptions {
    pub fn busy_timeout_ms(mut self, ms: u64) -> Self {
        self.busy_timeout = Duration::from_millis(ms);
        self
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn skip_version_check(mut self) -> Self {
        self.check_version = false;
        self
    }
}

/// Claim store over a shared beads SQLite database.
///
/// Holds no per-call state; every claim or find runs in its own transaction.
pub struct SqliteClaimStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    path: PathBuf,
}

impl SqliteClaimStore {
    /// Open an existing database. Never creates one.
    pub async fn open(
        path: impl AsRef<Path>,
        options: SqliteStoreOptions,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::StoreNotFound(format!(
                "no database at {}",
                path.display()
            )));
        }

        let connect = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false)
            .busy_timeout(options.busy_timeout)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect_with(connect)
            .await
            .map_err(|e| open_error(path, e))?;

        // Catches files that exist but are not databases.
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| open_error(path, e))?;

        debug!(
            path = %path.display(),
            busy_timeout_ms = options.busy_timeout.as_millis() as u64,
            "opened claim store"
        );

        let store = Self {
            pool,
            clock,
            retry: options.retry,
            path: path.to_path_buf(),
        };

        if options.check_version {
            store.check_version_compatibility().await?;
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close all pooled connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// The raw version marker, if the store has one.
    pub async fn stored_version(&self) -> Result<Option<String>> {
        let has_metadata: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'metadata'",
        )
        .fetch_optional(&self.pool)
        .await?;

        if has_metadata.is_none() {
            return Ok(None);
        }

        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT value FROM metadata WHERE key = ?1")
                .bind(VERSION_KEY)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value
            .flatten()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    /// Refuse stores older than [`MIN_COMPATIBLE_VERSION`]. Unversioned
    /// stores pass.
    pub async fn check_version_compatibility(&self) -> Result<()> {
        let stored = self.stored_version().await?;
        debug!(
            stored = stored.as_deref(),
            minimum = MIN_COMPATIBLE_VERSION,
            "checking store version"
        );
        version::check(stored.as_deref(), MIN_COMPATIBLE_VERSION)
    }

    async fn try_claim(
        &self,
        agent: &AgentName,
        filters: &ClaimFilters,
        attempt: u32,
    ) -> Result<Option<Issue>> {
        let mut tx = self.pool.begin().await?;
        let now = format_timestamp(self.clock.now());

        let mut qb =
            QueryBuilder::<Sqlite>::new("UPDATE issues SET status = 'in_progress', assignee = ");
        qb.push_bind(agent.as_str().to_string());
        qb.push(", updated_at = ");
        qb.push_bind(now);
        qb.push(" WHERE id = (");
        filter::push_candidate_id(&mut qb, filters);
        qb.push(") AND status = 'open' RETURNING id");

        let claimed: Option<String> = qb.build_query_scalar().fetch_optional(&mut *tx).await?;

        // Nothing eligible, or the race for the selected id was lost.
        let Some(id) = claimed else {
            tx.rollback().await?;
            debug!(attempt, "no issue claimed");
            return Ok(None);
        };

        let issue = fetch_issue(&mut tx, &id).await?;
        tx.commit().await?;

        debug!(attempt, issue_id = %issue.id, "claim committed");
        Ok(Some(issue))
    }

    async fn try_find(&self, filters: &ClaimFilters) -> Result<Option<Issue>> {
        let mut tx = self.pool.begin().await?;

        let mut qb = QueryBuilder::<Sqlite>::new("");
        filter::push_candidate_id(&mut qb, filters);
        let found: Option<String> = qb.build_query_scalar().fetch_optional(&mut *tx).await?;

        let issue = match found {
            Some(id) => Some(fetch_issue(&mut tx, &id).await?),
            None => None,
        };

        // Read-only; nothing to keep.
        tx.rollback().await?;
        Ok(issue)
    }
}

impl ClaimStore for SqliteClaimStore {
    async fn claim_one_ready(
        &self,
        agent: &AgentName,
        filters: &ClaimFilters,
    ) -> Result<Option<Issue>> {
        self.retry
            .run(move |attempt| {
                self.try_claim(agent, filters, attempt)
                    .instrument(transaction_span("claim", attempt))
            })
            .await
    }

    async fn find_one_ready(&self, filters: &ClaimFilters) -> Result<Option<Issue>> {
        self.retry
            .run(move |attempt| {
                self.try_find(filters)
                    .instrument(transaction_span("find", attempt))
            })
            .await
    }
}

/// Busy stays busy; anything else while opening means there is no usable store.
fn open_error(path: &Path, err: sqlx::Error) -> Error {
    let err = Error::Storage(err);
    if err.is_busy() {
        err
    } else {
        Error::StoreNotFound(format!("failed to open {}: {err}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// Hydration
// ---------------------------------------------------------------------------

async fn fetch_issue(conn: &mut SqliteConnection, id: &str) -> Result<Issue> {
    let row: IssueRow = sqlx::query_as(
        "SELECT i.id, i.title, i.description, i.status, i.assignee, i.priority,
                i.issue_type,
                CAST(i.created_at AS TEXT) AS created_at,
                CAST(i.updated_at AS TEXT) AS updated_at,
                EXISTS (SELECT 1 FROM blocked_issues_cache b WHERE b.issue_id = i.id) AS blocked
         FROM issues i
         WHERE i.id = ?1",
    )
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;

    let labels: Vec<String> =
        sqlx::query_scalar("SELECT label FROM labels WHERE issue_id = ?1 ORDER BY label")
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;

    row.try_into_issue(labels)
}

/// Internal row type for sqlx::FromRow. Columns other tools may leave NULL
/// are optional.
#[derive(sqlx::FromRow)]
struct IssueRow {
    id: String,
    title: Option<String>,
    description: Option<String>,
    status: Option<String>,
    assignee: Option<String>,
    priority: Option<i64>,
    issue_type: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    blocked: i64,
}

impl IssueRow {
    fn try_into_issue(self, labels: Vec<String>) -> Result<Issue> {
        let status = self.status.as_deref().unwrap_or("open").parse()?;
        let priority = stored_priority(&self.id, self.priority.unwrap_or(0));
        let created_at = stored_timestamp(&self.id, "created_at", self.created_at.as_deref());
        let updated_at = stored_timestamp(&self.id, "updated_at", self.updated_at.as_deref());

        Ok(Issue {
            id: IssueId::new(self.id),
            title: self.title.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            status,
            assignee: self
                .assignee
                .filter(|a| !a.is_empty())
                .map(AgentName::from_store),
            priority: Priority::new(priority),
            labels: labels.into_iter().collect(),
            issue_type: self.issue_type.unwrap_or_default(),
            blocked: self.blocked != 0,
            created_at,
            updated_at,
        })
    }
}

/// Out-of-range priorities saturate; the row still sorts where SQL put it.
fn stored_priority(id: &str, raw: i64) -> i32 {
    i32::try_from(raw).unwrap_or_else(|_| {
        warn!(issue_id = id, raw, "out-of-range priority, clamping");
        if raw < 0 { i32::MIN } else { i32::MAX }
    })
}

/// A malformed timestamp on one row must not make every claim fail.
fn stored_timestamp(id: &str, column: &str, raw: Option<&str>) -> Timestamp {
    match raw.and_then(parse_timestamp) {
        Some(ts) => ts,
        None => {
            warn!(issue_id = id, column, raw, "unparseable timestamp, using epoch");
            DateTime::<Utc>::UNIX_EPOCH
        }
    }
}
