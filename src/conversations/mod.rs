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
use schema::{conversations, messages};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

type SqliteAsyncConn = SyncConnectionWrapper<SqliteConnection>;
type SqlitePool = Pool<SqliteAsyncConn>;
type SqlitePooledConn<'a> = PooledConnection<'a, SqliteAsyncConn>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: i32,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub created_at: i64,
}

#[derive(Queryable)]
struct ConversationRow {
    id: String,
    user_id: String,
    created_at: i64,
    updated_at: i64,
}

#[derive(Queryable)]
struct MessageRow {
    id: i32,
    conversation_id: String,
    role: String,
    content: String,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = conversations)]
struct NewConversation<'a> {
    id: &'a str,
    user_id: &'a str,
    created_at: i64,
    updated_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = messages)]
struct NewMessage<'a> {
    conversation_id: &'a str,
    role: &'a str,
    content: &'a str,
    created_at: i64,
}

/// Append-only chat transcript, one conversation row per chat turn.
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
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

    pub async fn create_conversation(&self, user_id: &str) -> Result<Conversation> {
        let now = now_ts();
        let id = Uuid::new_v4().to_string();
        let new = NewConversation {
            id: &id,
            user_id,
            created_at: now,
            updated_at: now,
        };

        let mut conn = self.conn().await?;
        diesel::insert_into(conversations::table)
            .values(&new)
            .execute(&mut conn)
            .await
            .map_err(|e| TaskletError::Runtime(e.to_string()))?;

        let row: ConversationRow = conversations::table
            .filter(conversations::id.eq(&id))
            .first(&mut conn)
            .await
            .map_err(|e| TaskletError::Runtime(e.to_string()))?;
        Ok(Conversation {
            id: row.id,
            user_id: row.user_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    pub async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<()> {
        let new = NewMessage {
            conversation_id,
            role: role.as_str(),
            content,
            created_at: now_ts(),
        };
        let mut conn = self.conn().await?;
        diesel::insert_into(messages::table)
            .values(&new)
            .execute(&mut conn)
            .await
            .map_err(|e| TaskletError::Runtime(e.to_string()))?;
        Ok(())
    }

    pub async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let mut conn = self.conn().await?;
        let rows: Vec<MessageRow> = messages::table
            .filter(messages::conversation_id.eq(conversation_id))
            .order((messages::created_at.asc(), messages::id.asc()))
            .limit(limit as i64)
            .load(&mut conn)
            .await
            .map_err(|e| TaskletError::Runtime(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| Message {
                id: row.id,
                conversation_id: row.conversation_id,
                role: row.role,
                content: row.content,
                created_at: row.created_at,
            })
            .collect())
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        self.pool
            .get()
            .await
            .map_err(|e| TaskletError::Runtime(e.to_string()))
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
