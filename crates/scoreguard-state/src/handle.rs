//! SurrealDB connection setup
//!
//! A [`StoreTarget`] names where validation data lives. It is resolved from
//! `SURREALDB_*` variables in priority order: remote credentials, then a raw
//! `SURREALDB_URL`, then a local SurrealKV directory. Every connection
//! selects its namespace/database and runs the idempotent schema migrations
//! before the client is handed back.

use std::path::PathBuf;

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

use crate::error::StateError;
use crate::migrations;
use crate::Result;

const DEFAULT_NAMESPACE: &str = "scoreguard";
const DEFAULT_DATABASE: &str = "main";
const LOCAL_DB_PATH: &str = ".scoreguard/db";

/// Credentials for an authenticated WebSocket deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCredentials {
    /// `ws://` or `wss://` endpoint
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub namespace: String,
    pub database: String,
    /// Sign in as a root user instead of a database user
    pub root: bool,
}

impl RemoteCredentials {
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            root: false,
        }
    }
}

/// Where a `SurrealStore` connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    /// Throwaway `mem://` database
    Memory,
    /// Any URL the `any` engine accepts, unauthenticated
    Url(String),
    /// SurrealKV files under a directory
    Local(PathBuf),
    /// Authenticated remote deployment
    Remote(RemoteCredentials),
}

impl StoreTarget {
    /// Resolve the target from the process environment.
    pub fn from_env() -> Self {
        Self::resolve(|name| std::env::var(name).ok())
    }

    /// Resolve the target from `lookup`.
    ///
    /// Remote credentials need all of `SURREALDB_ENDPOINT`,
    /// `SURREALDB_USERNAME` and `SURREALDB_PASSWORD`; a partial set falls
    /// through to the next option.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let remote = (
            lookup("SURREALDB_ENDPOINT"),
            lookup("SURREALDB_USERNAME"),
            lookup("SURREALDB_PASSWORD"),
        );
        if let (Some(endpoint), Some(username), Some(password)) = remote {
            let mut credentials = RemoteCredentials::new(endpoint, username, password);
            if let Some(ns) = lookup("SURREALDB_NAMESPACE") {
                credentials.namespace = ns;
            }
            if let Some(db) = lookup("SURREALDB_DATABASE") {
                credentials.database = db;
            }
            credentials.root = lookup("SURREALDB_ROOT")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            return Self::Remote(credentials);
        }

        match lookup("SURREALDB_URL") {
            Some(url) if url == "mem://" => Self::Memory,
            Some(url) => Self::Url(url),
            None => Self::Local(PathBuf::from(LOCAL_DB_PATH)),
        }
    }

    /// Open a migrated connection to this target.
    #[instrument(skip_all, fields(target = %self))]
    pub(crate) async fn connect(&self) -> Result<Surreal<Any>> {
        match self {
            Self::Memory => connect_url("mem://").await,
            Self::Url(url) => connect_url(url).await,
            Self::Local(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| {
                    StateError::Connection(format!(
                        "Failed to create database directory {}: {}",
                        dir.display(),
                        e
                    ))
                })?;
                connect_url(&format!("surrealkv://{}", dir.display())).await
            }
            Self::Remote(credentials) => connect_remote(credentials).await,
        }
    }
}

impl std::fmt::Display for StoreTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("mem://"),
            Self::Url(url) => f.write_str(url),
            Self::Local(dir) => write!(f, "surrealkv://{}", dir.display()),
            Self::Remote(c) => write!(f, "{} ({}/{})", c.endpoint, c.namespace, c.database),
        }
    }
}

async fn connect_url(url: &str) -> Result<Surreal<Any>> {
    let db = surrealdb::engine::any::connect(url)
        .await
        .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

    db.use_ns(DEFAULT_NAMESPACE)
        .use_db(DEFAULT_DATABASE)
        .await
        .map_err(|e| StateError::Connection(e.to_string()))?;

    migrations::init_schema(&db).await?;
    info!(url, "store connected");
    Ok(db)
}

async fn connect_remote(credentials: &RemoteCredentials) -> Result<Surreal<Any>> {
    let db = surrealdb::engine::any::connect(&credentials.endpoint)
        .await
        .map_err(|e| {
            StateError::Connection(format!(
                "Failed to connect to {}: {}",
                credentials.endpoint, e
            ))
        })?;

    let signin = if credentials.root {
        db.signin(Root {
            username: &credentials.username,
            password: &credentials.password,
        })
        .await
    } else {
        db.signin(Database {
            namespace: &credentials.namespace,
            database: &credentials.database,
            username: &credentials.username,
            password: &credentials.password,
        })
        .await
    };
    signin.map_err(|e| StateError::Connection(format!("Authentication failed: {}", e)))?;

    db.use_ns(&credentials.namespace)
        .use_db(&credentials.database)
        .await
        .map_err(|e| {
            StateError::Connection(format!("Failed to select namespace/database: {}", e))
        })?;

    migrations::init_schema(&db).await?;
    info!(
        endpoint = %credentials.endpoint,
        root = credentials.root,
        "remote store connected"
    );
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_environment_uses_local_files() {
        assert_eq!(
            StoreTarget::resolve(env(&[])),
            StoreTarget::Local(PathBuf::from(".scoreguard/db"))
        );
    }

    #[test]
    fn url_is_used_when_credentials_are_incomplete() {
        let target = StoreTarget::resolve(env(&[
            ("SURREALDB_ENDPOINT", "wss://db.example"),
            ("SURREALDB_URL", "ws://localhost:8000"),
        ]));
        assert_eq!(target, StoreTarget::Url("ws://localhost:8000".into()));

        let target = StoreTarget::resolve(env(&[("SURREALDB_URL", "mem://")]));
        assert_eq!(target, StoreTarget::Memory);
    }

    #[test]
    fn full_credentials_win_over_url() {
        let target = StoreTarget::resolve(env(&[
            ("SURREALDB_ENDPOINT", "wss://db.example"),
            ("SURREALDB_USERNAME", "grader"),
            ("SURREALDB_PASSWORD", "pw"),
            ("SURREALDB_DATABASE", "assessments"),
            ("SURREALDB_ROOT", "TRUE"),
            ("SURREALDB_URL", "ws://ignored"),
        ]));
        let credentials = match target {
            StoreTarget::Remote(credentials) => credentials,
            other => panic!("expected remote target, got {other:?}"),
        };
        assert_eq!(credentials.namespace, "scoreguard");
        assert_eq!(credentials.database, "assessments");
        assert!(credentials.root);
    }

    #[test]
    fn display_hides_credentials() {
        let target = StoreTarget::Remote(RemoteCredentials::new("wss://db", "u", "secret"));
        let shown = target.to_string();
        assert!(shown.starts_with("wss://db"));
        assert!(!shown.contains("secret"));
    }
}
