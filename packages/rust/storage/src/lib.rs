//! Session persistence.
//!
//! The core reads and writes [`SessionState`] only through the
//! [`SessionStore`] capability, so backends can be swapped without touching
//! tutoring logic:
//! - [`InMemorySessionStore`]: process-local map
//! - [`Storage`]: Turso Embedded / libSQL database (file or `:memory:`)

mod memory;
mod migrations;

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, params};
use tracing::{debug, info};

use studyforge_shared::{Result, SessionId, SessionState, StudyForgeError};

pub use memory::InMemorySessionStore;

/// Injected session persistence capability.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session, `None` if it does not exist.
    async fn get(&self, id: &SessionId) -> Result<Option<SessionState>>;

    /// Create an empty session and return its id.
    async fn create(&self) -> Result<SessionId>;

    /// Overwrite an existing session. Unknown ids are `SessionNotFound`.
    async fn save(&self, id: &SessionId, state: &SessionState) -> Result<()>;

    /// Remove a session; `false` if it did not exist.
    async fn delete(&self, id: &SessionId) -> Result<bool>;

    async fn count(&self) -> Result<usize>;
}

fn storage_err(e: impl std::fmt::Display) -> StudyForgeError {
    StudyForgeError::Storage(e.to_string())
}

// ---------------------------------------------------------------------------
// libSQL backend
// ---------------------------------------------------------------------------

/// Durable session store wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StudyForgeError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        Self::from_database(db).await
    }

    /// Open a private in-memory database (tests, ephemeral runs).
    pub async fn open_in_memory() -> Result<Self> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(storage_err)?;
        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self> {
        let conn = db.connect().map_err(storage_err)?;
        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        StudyForgeError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }
}

#[async_trait]
impl SessionStore for Storage {
    async fn get(&self, id: &SessionId) -> Result<Option<SessionState>> {
        let mut rows = self
            .conn
            .query(
                "SELECT state_json FROM sessions WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => {
                let json = row.get::<String>(0).map_err(storage_err)?;
                let state = serde_json::from_str(&json).map_err(|e| {
                    StudyForgeError::Storage(format!("corrupt state for session {id}: {e}"))
                })?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    async fn create(&self) -> Result<SessionId> {
        let id = SessionId::new();
        let state = SessionState::new();
        let json = serde_json::to_string(&state).map_err(storage_err)?;
        let created = state.created_at.to_rfc3339();

        self.conn
            .execute(
                "INSERT INTO sessions (id, state_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), json, created.as_str(), created.as_str()],
            )
            .await
            .map_err(storage_err)?;

        debug!(session_id = %id, "session created");
        Ok(id)
    }

    async fn save(&self, id: &SessionId, state: &SessionState) -> Result<()> {
        let json = serde_json::to_string(state).map_err(storage_err)?;
        let now = Utc::now().to_rfc3339();

        let changed = self
            .conn
            .execute(
                "UPDATE sessions SET state_json = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), json, now.as_str()],
            )
            .await
            .map_err(storage_err)?;

        if changed == 0 {
            return Err(StudyForgeError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM sessions WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    async fn count(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM sessions", params![])
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => {
                let n = row.get::<i64>(0).map_err(storage_err)?;
                Ok(usize::try_from(n).unwrap_or(0))
            }
            None => Ok(0),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
