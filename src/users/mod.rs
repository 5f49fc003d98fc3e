use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::RunQueryDsl;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Result, TaskletError};

mod schema;
use schema::users;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

type SqliteAsyncConn = SyncConnectionWrapper<SqliteConnection>;
type SqlitePool = Pool<SqliteAsyncConn>;
type SqlitePooledConn<'a> = PooledConnection<'a, SqliteAsyncConn>;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Queryable)]
struct UserRow {
    id: String,
    email: String,
    password_hash: String,
    created_at: i64,
    updated_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUser<'a> {
    id: &'a str,
    email: &'a str,
    password_hash: &'a str,
    created_at: i64,
    updated_at: i64,
}

pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
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

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let mut conn = self.conn().await?;
        let row: Option<UserRow> = users::table
            .filter(users::email.eq(email))
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| TaskletError::Runtime(e.to_string()))?;
        Ok(row.map(map_row))
    }

    pub async fn create(&self, email: &str, password_hash: &str) -> Result<User> {
        let now = now_ts();
        let id = Uuid::new_v4().to_string();
        let new = NewUser {
            id: &id,
            email,
            password_hash,
            created_at: now,
            updated_at: now,
        };

        let mut conn = self.conn().await?;
        diesel::insert_into(users::table)
            .values(&new)
            .execute(&mut conn)
            .await
            .map_err(|e| TaskletError::Runtime(e.to_string()))?;

        let row: UserRow = users::table
            .filter(users::id.eq(&id))
            .first(&mut conn)
            .await
            .map_err(|e| TaskletError::Runtime(e.to_string()))?;
        Ok(map_row(row))
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        self.pool
            .get()
            .await
            .map_err(|e| TaskletError::Runtime(e.to_string()))
    }
}

fn map_row(row: UserRow) -> User {
    User {
        id: row.id,
        email: row.email,
        password_hash: row.password_hash,
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
