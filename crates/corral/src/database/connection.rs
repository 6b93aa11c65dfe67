/*
 *  Copyright 2025-2026 Corral Maintainers
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! SQLite connection pooling.
//!
//! Corral persists everything in a single SQLite file. Connections come from a
//! `deadpool-diesel` pool and all queries run inside `interact` closures on the
//! pool's blocking threads.

use deadpool_diesel::sqlite::{Manager as SqliteManager, Pool as SqlitePool, Runtime};
use tracing::info;

use crate::error::DatabaseError;

pub type SqliteObject = deadpool::managed::Object<SqliteManager>;

/// Returns true when the URL addresses a SQLite database.
pub fn is_sqlite_url(url: &str) -> bool {
    url.starts_with("sqlite://")
        || url.starts_with("file:")
        || url.starts_with('/')
        || url.starts_with("./")
        || url.starts_with("../")
        || url == ":memory:"
        || url.ends_with(".db")
        || url.ends_with(".sqlite")
        || url.ends_with(".sqlite3")
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    url: String,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("url", &self.url).finish()
    }
}

impl Database {
    /// Opens a pool for the given SQLite URL or path.
    ///
    /// The pool holds a single connection. SQLite serializes writers anyway and
    /// one connection keeps the pragmas set during migration in effect for
    /// every later query.
    pub fn try_new(connection_string: &str) -> Result<Self, DatabaseError> {
        if !is_sqlite_url(connection_string) {
            return Err(DatabaseError::UnsupportedBackend(
                connection_string.to_string(),
            ));
        }

        let url = Self::build_sqlite_url(connection_string);
        let manager = SqliteManager::new(url.clone(), Runtime::Tokio1);
        let sqlite_pool_size = 1;
        let pool = SqlitePool::builder(manager)
            .max_size(sqlite_pool_size)
            .build()
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))?;

        info!(
            "SQLite connection pool initialized (size: {})",
            sqlite_pool_size
        );

        Ok(Self { pool, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn build_sqlite_url(connection_string: &str) -> String {
        if let Some(path) = connection_string.strip_prefix("sqlite://") {
            path.to_string()
        } else {
            connection_string.to_string()
        }
    }

    /// Checks a connection out of the pool.
    pub async fn get_connection(&self) -> Result<SqliteObject, DatabaseError> {
        self.pool
            .get()
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))
    }

    /// Applies connection pragmas and any pending embedded migrations.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.get_connection().await?;
        conn.interact(|conn| {
            use diesel::prelude::*;
            use diesel_migrations::MigrationHarness;

            // WAL lets readers proceed during writes; busy_timeout waits on locks
            diesel::sql_query("PRAGMA journal_mode=WAL;")
                .execute(conn)
                .map_err(|e| e.to_string())?;
            diesel::sql_query("PRAGMA busy_timeout=30000;")
                .execute(conn)
                .map_err(|e| e.to_string())?;

            conn.run_pending_migrations(crate::database::MIGRATIONS)
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?
        .map_err(DatabaseError::Migration)?;

        info!("Database migrations applied");
        Ok(())
    }
}
