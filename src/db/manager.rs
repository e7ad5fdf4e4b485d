use crate::config::DatabaseConfig;
use crate::db::{DatabaseError, MappingStore, MembershipStore};
use std::sync::Arc;

#[cfg(feature = "sqlite")]
use crate::db::sqlite::{SqliteHandle, SqliteMappingStore, SqliteMembershipStore, establish_connection};
#[cfg(feature = "sqlite")]
use diesel::RunQueryDsl;
#[cfg(feature = "sqlite")]
use diesel::connection::SimpleConnection;

#[derive(Clone)]
pub struct DatabaseManager {
    sqlite_path: String,
    mapping_store: Arc<dyn MappingStore>,
    membership_store: Arc<dyn MembershipStore>,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        #[cfg(feature = "sqlite")]
        {
            let path = config.sqlite_path();
            if path.is_empty() {
                return Err(DatabaseError::Connection(
                    "database filename cannot be empty".to_string(),
                ));
            }

            let handle = SqliteHandle::new(Arc::new(path.clone()), config.retry_policy());
            let mapping_store = Arc::new(SqliteMappingStore::new(handle.clone()));
            let membership_store = Arc::new(SqliteMembershipStore::new(handle));

            Ok(Self {
                sqlite_path: path,
                mapping_store,
                membership_store,
            })
        }

        #[cfg(not(feature = "sqlite"))]
        {
            let _ = config;
            Err(DatabaseError::Connection(
                "SQLite feature not enabled".to_string(),
            ))
        }
    }

    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        #[cfg(feature = "sqlite")]
        {
            Self::migrate_sqlite(&self.sqlite_path).await
        }

        #[cfg(not(feature = "sqlite"))]
        {
            Err(DatabaseError::Migration(
                "SQLite feature not enabled".to_string(),
            ))
        }
    }

    #[cfg(feature = "sqlite")]
    async fn migrate_sqlite(path: &str) -> Result<(), DatabaseError> {
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&path)?;

            // WAL lets readers proceed while a migration task is writing.
            conn.batch_execute("PRAGMA journal_mode = WAL;")
                .map_err(|e| DatabaseError::Migration(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS id_mappings (
                    rc_id TEXT NOT NULL,
                    mapping_type INTEGER NOT NULL,
                    matrix_id TEXT NOT NULL DEFAULT '',
                    access_token TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (rc_id, mapping_type)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS memberships (
                    rc_room_id TEXT NOT NULL,
                    rc_user_id TEXT NOT NULL,
                    PRIMARY KEY (rc_room_id, rc_user_id)
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_id_mappings_matrix_id ON id_mappings(matrix_id)",
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_id_mappings_type_matrix_id ON id_mappings(mapping_type, matrix_id) WHERE matrix_id <> ''",
                "CREATE INDEX IF NOT EXISTS idx_memberships_user ON memberships(rc_user_id)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    pub fn mapping_store(&self) -> Arc<dyn MappingStore> {
        self.mapping_store.clone()
    }

    pub fn membership_store(&self) -> Arc<dyn MembershipStore> {
        self.membership_store.clone()
    }

    pub fn path(&self) -> &str {
        &self.sqlite_path
    }
}
