use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::payload::ValidConfig;

const DOCUMENT_ID_LEN: usize = 20;
const SALT_LEN: usize = 16;
const TOKEN_LEN: usize = 32;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handles to the dependent service, constructed once from a validated
/// configuration.
#[derive(Debug, Clone)]
pub struct ServiceHandles {
    pub project_id: String,
    pub auth: AuthHandle,
    pub data: DataHandle,
}

#[derive(Debug, Clone)]
pub struct AuthHandle {
    db_path: PathBuf,
    auth_domain: String,
}

#[derive(Debug, Clone)]
pub struct DataHandle {
    db_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub email: String,
    pub role: String,
    pub auth_domain: String,
    pub token: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("project id {0:?} cannot be used as a storage name")]
    InvalidProjectId(String),
    #[error("failed to prepare data directory: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("an account already exists for {0}")]
    AccountExists(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },
    #[error("documents must be JSON objects")]
    NotAnObject,
    #[error("stored document is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Builds [`ServiceHandles`] from configuration.
pub trait ServiceFactory: Send + Sync {
    fn connect(
        &self,
        config: &ValidConfig,
    ) -> impl Future<Output = Result<ServiceHandles, ServiceError>> + Send;
}

/// Local SQLite-backed service: one database file per project under
/// `data_dir`.
#[derive(Debug, Clone)]
pub struct SqliteServiceFactory {
    data_dir: PathBuf,
}

impl SqliteServiceFactory {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

impl ServiceFactory for SqliteServiceFactory {
    async fn connect(&self, config: &ValidConfig) -> Result<ServiceHandles, ServiceError> {
        let project_id = config.project_id().to_string();
        if !is_storage_safe(&project_id) {
            return Err(ServiceError::InvalidProjectId(project_id));
        }
        tokio::fs::create_dir_all(&self.data_dir).await?;
        let db_path = self.data_dir.join(format!("{project_id}.db"));
        init_schema(&db_path).await?;
        tracing::info!(project = %project_id, path = %db_path.display(), "service handles ready");
        Ok(ServiceHandles {
            project_id,
            auth: AuthHandle {
                db_path: db_path.clone(),
                auth_domain: config.auth_domain().to_string(),
            },
            data: DataHandle { db_path },
        })
    }
}

fn is_storage_safe(project_id: &str) -> bool {
    !project_id.is_empty()
        && project_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

async fn init_schema(db_path: &Path) -> Result<(), ServiceError> {
    let path = db_path.to_path_buf();
    tokio::task::spawn_blocking(move || -> rusqlite::Result<()> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS accounts (
                email TEXT PRIMARY KEY,
                salt TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );
            "#,
        )
    })
    .await??;
    Ok(())
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

impl AuthHandle {
    pub fn auth_domain(&self) -> &str {
        &self.auth_domain
    }

    pub async fn create_account(
        &self,
        email: &str,
        password: &str,
        role: &str,
    ) -> Result<(), AuthError> {
        let path = self.db_path.clone();
        let email = normalize_email(email);
        let role = role.to_string();
        let salt = random_string(SALT_LEN);
        let hash = hash_password(&salt, password);
        let created_at = Utc::now().to_rfc3339();
        let inserted = tokio::task::spawn_blocking({
            let email = email.clone();
            move || -> rusqlite::Result<usize> {
                let conn = Connection::open(path)?;
                conn.execute(
                    "INSERT OR IGNORE INTO accounts (email, salt, password_hash, role, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![email, salt, hash, role, created_at],
                )
            }
        })
        .await??;
        if inserted == 0 {
            return Err(AuthError::AccountExists(email));
        }
        Ok(())
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let path = self.db_path.clone();
        let email = normalize_email(email);
        let row = tokio::task::spawn_blocking({
            let email = email.clone();
            move || -> rusqlite::Result<Option<(String, String, String)>> {
                let conn = Connection::open(path)?;
                conn.query_row(
                    "SELECT salt, password_hash, role FROM accounts WHERE email = ?1",
                    params![email],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
            }
        })
        .await??;

        let Some((salt, stored_hash, role)) = row else {
            return Err(AuthError::InvalidCredentials);
        };
        if hash_password(&salt, password) != stored_hash {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(Session {
            email,
            role,
            auth_domain: self.auth_domain.clone(),
            token: random_string(TOKEN_LEN),
            issued_at: Utc::now(),
        })
    }
}

impl DataHandle {
    pub async fn get(&self, collection: &str, id: &str) -> Result<Document, StoreError> {
        let path = self.db_path.clone();
        let collection = collection.to_string();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Document, StoreError> {
            let conn = Connection::open(path)?;
            let row = conn
                .query_row(
                    "SELECT body, created_at, updated_at FROM documents
                     WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            parse_datetime_sql(&row.get::<_, String>(1)?, 1)?,
                            parse_datetime_sql(&row.get::<_, String>(2)?, 2)?,
                        ))
                    },
                )
                .optional()?;
            let Some((body, created_at, updated_at)) = row else {
                return Err(StoreError::NotFound { collection, id });
            };
            Ok(Document {
                id,
                fields: parse_body(&body)?,
                created_at,
                updated_at,
            })
        })
        .await?
    }

    pub async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let path = self.db_path.clone();
        let collection = collection.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<Document>, StoreError> {
            let conn = Connection::open(path)?;
            let mut stmt = conn.prepare(
                "SELECT id, body, created_at, updated_at FROM documents
                 WHERE collection = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(params![collection], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        parse_datetime_sql(&row.get::<_, String>(2)?, 2)?,
                        parse_datetime_sql(&row.get::<_, String>(3)?, 3)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(|(id, body, created_at, updated_at)| {
                    Ok(Document {
                        id,
                        fields: parse_body(&body)?,
                        created_at,
                        updated_at,
                    })
                })
                .collect()
        })
        .await?
    }

    pub async fn create(&self, collection: &str, fields: Value) -> Result<String, StoreError> {
        let Value::Object(fields) = fields else {
            return Err(StoreError::NotAnObject);
        };
        let path = self.db_path.clone();
        let collection = collection.to_string();
        let id = random_string(DOCUMENT_ID_LEN);
        let body = serde_json::to_string(&fields)?;
        let now = Utc::now().to_rfc3339();
        tokio::task::spawn_blocking({
            let id = id.clone();
            move || -> rusqlite::Result<()> {
                let conn = Connection::open(path)?;
                conn.execute(
                    "INSERT INTO documents (collection, id, body, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![collection, id, body, now],
                )?;
                Ok(())
            }
        })
        .await??;
        Ok(id)
    }

    /// Merge top-level fields into an existing document.
    ///
    /// The read, merge and write share one `IMMEDIATE` transaction, so
    /// concurrent updates to the same document serialize on the write lock.
    pub async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<(), StoreError> {
        let Value::Object(changes) = fields else {
            return Err(StoreError::NotAnObject);
        };
        let path = self.db_path.clone();
        let collection = collection.to_string();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut conn = Connection::open(path)?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let body = tx
                .query_row(
                    "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            let Some(body) = body else {
                return Err(StoreError::NotFound { collection, id });
            };
            let mut current = parse_body(&body)?;
            current.extend(changes);
            tx.execute(
                "UPDATE documents SET body = ?3, updated_at = ?4
                 WHERE collection = ?1 AND id = ?2",
                params![
                    collection,
                    id,
                    serde_json::to_string(&current)?,
                    Utc::now().to_rfc3339()
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await?
    }

    pub async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let path = self.db_path.clone();
        let collection = collection.to_string();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = Connection::open(path)?;
            let changed = conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound { collection, id });
            }
            Ok(())
        })
        .await?
    }
}

fn parse_datetime_sql(value: &str, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn parse_body(body: &str) -> Result<Map<String, Value>, StoreError> {
    match serde_json::from_str::<Value>(body)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::NotAnObject),
    }
}
