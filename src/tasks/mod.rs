use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::RunQueryDsl;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TaskletError};

mod schema;
use schema::tasks;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

type SqliteAsyncConn = SyncConnectionWrapper<SqliteConnection>;
type SqlitePool = Pool<SqliteAsyncConn>;
type SqlitePooledConn<'a> = PooledConnection<'a, SqliteAsyncConn>;

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Partial update. An absent title or a title supplied as the empty string
/// keeps the stored value; a description supplied as the empty string is
/// applied as-is.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub completed: Option<bool>,
}

#[derive(Queryable)]
struct TaskRow {
    id: String,
    user_id: String,
    title: String,
    description: Option<String>,
    completed: bool,
    created_at: i64,
    updated_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = tasks)]
struct NewTask<'a> {
    id: &'a str,
    user_id: &'a str,
    title: &'a str,
    description: Option<&'a str>,
    completed: bool,
    created_at: i64,
    updated_at: i64,
}

/// Task persistence plus the ownership rule: every read and mutation
/// filters by both task id and owner id, so a missing task and a task
/// owned by someone else are the same outcome.
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub async fn new(sqlite_path: impl AsRef<str>) -> Result<Self> {
        let sqlite_path = sqlite_path.as_ref();
        ensure_parent_dir(sqlite_path)?;
        run_migrations(sqlite_path).await?;

        let manager = AsyncDieselConnectionManager::<SqliteAsyncConn>::new(sqlite_path);
        let pool: SqlitePool = Pool::builder()
            .build(manager)
            .await
            .map_err(|e| TaskletError::Runtime(e.to_string()))?;
        Ok(Self { pool })
    }

    pub async fn create(
        &self,
        owner_id: &str,
        title: &str,
        description: Option<&str>,
    ) -> Result<Task> {
        let now = now_ts();
        let id = Uuid::new_v4().to_string();
        let new = NewTask {
            id: &id,
            user_id: owner_id,
            title,
            description,
            completed: false,
            created_at: now,
            updated_at: now,
        };

        let mut conn = self.conn().await?;
        diesel::insert_into(tasks::table)
            .values(&new)
            .execute(&mut conn)
            .await
            .map_err(|e| TaskletError::Runtime(e.to_string()))?;

        let row: TaskRow = tasks::table
            .filter(tasks::id.eq(&id))
            .first(&mut conn)
            .await
            .map_err(|e| TaskletError::Runtime(e.to_string()))?;
        Ok(map_row(row))
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<Task>> {
        let mut conn = self.conn().await?;
        let rows: Vec<TaskRow> = tasks::table
            .filter(tasks::user_id.eq(owner_id))
            .order(tasks::created_at.asc())
            .load(&mut conn)
            .await
            .map_err(|e| TaskletError::Runtime(e.to_string()))?;
        Ok(rows.into_iter().map(map_row).collect())
    }

    pub async fn get(&self, owner_id: &str, task_id: &str) -> Result<Option<Task>> {
        let mut conn = self.conn().await?;
        let row: Option<TaskRow> = tasks::table
            .filter(tasks::id.eq(task_id))
            .filter(tasks::user_id.eq(owner_id))
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| TaskletError::Runtime(e.to_string()))?;
        Ok(row.map(map_row))
    }

    pub async fn update(
        &self,
        owner_id: &str,
        task_id: &str,
        patch: TaskPatch,
    ) -> Result<Option<Task>> {
        let now = now_ts();
        let title = patch.title.filter(|title| !title.is_empty());

        let mut conn = self.conn().await?;
        let count = diesel::update(
            tasks::table
                .filter(tasks::id.eq(task_id))
                .filter(tasks::user_id.eq(owner_id)),
        )
        .set((
            title.map(|title| tasks::title.eq(title)),
            patch
                .description
                .map(|description| tasks::description.eq(description)),
            patch.completed.map(|completed| tasks::completed.eq(completed)),
            tasks::updated_at.eq(now),
        ))
        .execute(&mut conn)
        .await
        .map_err(|e| TaskletError::Runtime(e.to_string()))?;

        if count == 0 {
            return Ok(None);
        }

        let row: TaskRow = tasks::table
            .filter(tasks::id.eq(task_id))
            .filter(tasks::user_id.eq(owner_id))
            .first(&mut conn)
            .await
            .map_err(|e| TaskletError::Runtime(e.to_string()))?;
        Ok(Some(map_row(row)))
    }

    pub async fn delete(&self, owner_id: &str, task_id: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let count = diesel::delete(
            tasks::table
                .filter(tasks::id.eq(task_id))
                .filter(tasks::user_id.eq(owner_id)),
        )
        .execute(&mut conn)
        .await
        .map_err(|e| TaskletError::Runtime(e.to_string()))?;
        Ok(count > 0)
    }

    pub async fn set_completed(
        &self,
        owner_id: &str,
        task_id: &str,
        completed: bool,
    ) -> Result<Option<Task>> {
        let now = now_ts();
        let mut conn = self.conn().await?;
        let count = diesel::update(
            tasks::table
                .filter(tasks::id.eq(task_id))
                .filter(tasks::user_id.eq(owner_id)),
        )
        .set((
            tasks::completed.eq(completed),
            tasks::updated_at.eq(now),
        ))
        .execute(&mut conn)
        .await
        .map_err(|e| TaskletError::Runtime(e.to_string()))?;

        if count == 0 {
            return Ok(None);
        }

        let row: TaskRow = tasks::table
            .filter(tasks::id.eq(task_id))
            .filter(tasks::user_id.eq(owner_id))
            .first(&mut conn)
            .await
            .map_err(|e| TaskletError::Runtime(e.to_string()))?;
        Ok(Some(map_row(row)))
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        self.pool
            .get()
            .await
            .map_err(|e| TaskletError::Runtime(e.to_string()))
    }
}

fn map_row(row: TaskRow) -> Task {
    Task {
        id: row.id,
        user_id: row.user_id,
        title: row.title,
        description: row.description,
        completed: row.completed,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| TaskletError::Runtime(e.to_string()))?;
    }
    Ok(())
}

async fn run_migrations(database_url: &str) -> Result<()> {
    let database_url = database_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = SqliteConnection::establish(&database_url)
            .map_err(|e| TaskletError::Runtime(e.to_string()))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| TaskletError::Runtime(e.to_string()))?;
        Ok::<_, TaskletError>(())
    })
    .await
    .map_err(|e| TaskletError::Runtime(e.to_string()))??;
    Ok(())
}

fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
