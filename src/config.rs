// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Service configuration.
//!
//! Sources, lowest priority first:
//!
//! 1. built-in defaults,
//! 2. `$CONFIG_FILE`, or `config/wallet.*` when present,
//! 3. `WALLET__<SECTION>__<KEY>` environment variables,
//! 4. legacy flat variables (`DB_HOST`, `DB_PORT`, `DB_PASSWORD`, `DB_NAME`,
//!    `SERVER_ADDR`, `SERVER_PORT`, `DATABASE_URL`). `DB_NAME` names the
//!    wallet table, not the database.
//!
//! `config.env` is loaded into the environment first if it exists.

use crate::store::PoolConfig;
use config::{ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Deadline for a single request; the transaction rolls back when it
    /// elapses.
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub backend: Backend,
    /// Full connection URL. Takes precedence over the individual fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub table: String,
    pub max_open_connections: u32,
    pub max_idle_connections: u32,
    pub max_connection_lifetime_secs: u64,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

/// Legacy flat variables and the keys they override.
const LEGACY_VARS: &[(&str, &str)] = &[
    ("DB_HOST", "database.host"),
    ("DB_PORT", "database.port"),
    ("DB_PASSWORD", "database.password"),
    ("DB_NAME", "database.table"),
    ("SERVER_ADDR", "server.host"),
    ("SERVER_PORT", "server.port"),
    ("DATABASE_URL", "database.url"),
];

impl Config {
    /// Loads `config.env` if present, then reads every source.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::from_filename("config.env").ok();
        Self::from_env()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.request_timeout_ms", 5000)?
            .set_default("database.backend", "postgres")?
            .set_default("database.host", "localhost")?
            .set_default("database.port", 5432)?
            .set_default("database.user", "postgres")?
            .set_default("database.password", "")?
            .set_default("database.name", "postgres")?
            .set_default("database.table", "wallets")?
            .set_default("database.max_open_connections", 50)?
            .set_default("database.max_idle_connections", 20)?
            .set_default("database.max_connection_lifetime_secs", 120)?
            .set_default("database.acquire_timeout_secs", 5)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?;

        builder = match env::var("CONFIG_FILE") {
            Ok(path) => builder.add_source(File::with_name(&path).required(false)),
            Err(_) => builder.add_source(File::with_name("config/wallet").required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix("WALLET")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        for (var, key) in LEGACY_VARS {
            if let Ok(value) = env::var(var) {
                if !value.is_empty() {
                    builder = builder.set_override(*key, value)?;
                }
            }
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Message("server port cannot be 0".into()));
        }
        if self.server.request_timeout_ms == 0 {
            return Err(ConfigError::Message("request timeout cannot be 0".into()));
        }

        let db = &self.database;
        if db.backend == Backend::Postgres {
            if db.max_open_connections == 0 {
                return Err(ConfigError::Message(
                    "max_open_connections must be at least 1".into(),
                ));
            }
            if db.max_idle_connections > db.max_open_connections {
                return Err(ConfigError::Message(format!(
                    "max_idle_connections ({}) exceeds max_open_connections ({})",
                    db.max_idle_connections, db.max_open_connections
                )));
            }
            if !crate::store::is_valid_table_name(&db.table) {
                return Err(ConfigError::Message(format!(
                    "table name {:?} is not a plain SQL identifier",
                    db.table
                )));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }
}

impl DatabaseConfig {
    /// Connection URL, built from the individual fields unless `url` is set.
    pub fn url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "postgres://{}:{}@{}:{}/{}?sslmode=disable",
                self.user, self.password, self.host, self.port, self.name
            ),
        }
    }

    pub fn pool(&self) -> PoolConfig {
        PoolConfig {
            max_open_connections: self.max_open_connections,
            max_idle_connections: self.max_idle_connections,
            max_connection_lifetime: Duration::from_secs(self.max_connection_lifetime_secs),
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
        }
    }
}
