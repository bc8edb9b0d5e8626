//! Administrator credential store.
//!
//! A single `admins` relation with a unique username and a plaintext
//! password. Every call opens its own connection and closes it on return.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("username and password are required")]
    MissingInput,
    #[error("username already exists: {0}")]
    DuplicateUsername(String),
    #[error("credential database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("credential database I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to the credential database file.
pub struct CredentialStore {
    db_path: PathBuf,
}

impl CredentialStore {
    /// Create the database (and its parent directory) if absent and ensure
    /// the `admins` relation exists.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, CredentialError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self { db_path };
        let conn = store.connect()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS admins (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE,
                password TEXT
            )",
            [],
        )?;

        tracing::debug!(path = %store.db_path.display(), "credential store ready");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, CredentialError> {
        Ok(Connection::open(&self.db_path)?)
    }

    /// Add a new administrator. Existing usernames are never overwritten.
    pub fn register(&self, username: &str, password: &str) -> Result<(), CredentialError> {
        if username.is_empty() || password.is_empty() {
            return Err(CredentialError::MissingInput);
        }

        let conn = self.connect()?;
        match conn.execute(
            "INSERT INTO admins (username, password) VALUES (?1, ?2)",
            params![username, password],
        ) {
            Ok(_) => {
                tracing::info!(username, "administrator registered");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(CredentialError::DuplicateUsername(username.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// True iff a row matches both fields exactly.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<bool, CredentialError> {
        let conn = self.connect()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM admins WHERE username = ?1 AND password = ?2",
                params![username, password],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Registered usernames in insertion order.
    pub fn usernames(&self) -> Result<Vec<String>, CredentialError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT username FROM admins ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut names = Vec::new();
        for name in rows {
            names.push(name?);
        }
        Ok(names)
    }
}
