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

//! PostgreSQL balance store.
//!
//! One table keyed by wallet id:
//!
//! ```sql
//! CREATE TABLE wallets (
//!     id     UUID    PRIMARY KEY,
//!     amount NUMERIC NOT NULL CHECK (amount >= 0)
//! );
//! ```
//!
//! The balance lives in the `amount` column, so tables created by earlier
//! deployments of the service are used as they are.
//!
//! Row locks come from `SELECT ... FOR UPDATE`. Creation uses
//! `INSERT ... ON CONFLICT DO NOTHING`, which waits for a concurrent
//! uncommitted insert of the same key and reports the conflict without
//! aborting the surrounding transaction.

use super::{BalanceStore, StoreError, StoreTransaction, ensure_non_negative};
use crate::base::WalletId;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Connection pool limits, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_open_connections: u32,
    /// Idle connections kept warm. sqlx has no idle cap, so this becomes the
    /// pool's minimum size.
    pub max_idle_connections: u32,
    pub max_connection_lifetime: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open_connections: 50,
            max_idle_connections: 20,
            max_connection_lifetime: Duration::from_secs(120),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    fn options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_open_connections)
            .min_connections(self.max_idle_connections.min(self.max_open_connections))
            .max_lifetime(self.max_connection_lifetime)
            .acquire_timeout(self.acquire_timeout)
    }
}

/// Pre-rendered statements for one table.
#[derive(Debug)]
struct Queries {
    create_table: String,
    select: String,
    select_for_update: String,
    insert: String,
    update: String,
}

impl Queries {
    fn new(table: &str) -> Self {
        Self {
            create_table: format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 id UUID PRIMARY KEY, \
                 amount NUMERIC NOT NULL CHECK (amount >= 0))"
            ),
            select: format!("SELECT amount FROM {table} WHERE id = $1"),
            select_for_update: format!("SELECT amount FROM {table} WHERE id = $1 FOR UPDATE"),
            insert: format!(
                "INSERT INTO {table} (id, amount) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING"
            ),
            update: format!("UPDATE {table} SET amount = $1 WHERE id = $2"),
        }
    }
}

/// Returns true for plain SQL identifiers (optionally schema-qualified).
///
/// Table names are interpolated into statements, so nothing else is allowed.
pub(crate) fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').count() <= 2
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

fn check_table_name(table: &str) -> Result<(), StoreError> {
    if is_valid_table_name(table) {
        return Ok(());
    }
    Err(StoreError::Database(sqlx::Error::Configuration(
        format!("invalid table name {table:?}").into(),
    )))
}

/// [`BalanceStore`] backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    queries: Arc<Queries>,
}

impl PgStore {
    /// Connects a pool to `database_url` and targets `table`.
    pub async fn connect(
        database_url: &str,
        table: &str,
        pool_config: &PoolConfig,
    ) -> Result<Self, StoreError> {
        check_table_name(table)?;
        let pool = pool_config.options().connect(database_url).await?;
        info!(
            table,
            max_open = pool_config.max_open_connections,
            max_idle = pool_config.max_idle_connections,
            "connected to postgres"
        );
        Self::with_pool(pool, table)
    }

    /// Wraps an existing pool.
    ///
    /// # Errors
    ///
    /// [`StoreError::Database`] if `table` is not a plain SQL identifier.
    pub fn with_pool(pool: PgPool, table: &str) -> Result<Self, StoreError> {
        check_table_name(table)?;
        Ok(Self {
            pool,
            queries: Arc::new(Queries::new(table)),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the wallet table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(&self.queries.create_table)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BalanceStore for PgStore {
    type Transaction = PgTransaction;

    async fn begin(&self) -> Result<PgTransaction, StoreError> {
        Ok(PgTransaction {
            tx: self.pool.begin().await?,
            queries: Arc::clone(&self.queries),
        })
    }

    async fn balance(&self, wallet_id: WalletId) -> Result<Option<Decimal>, StoreError> {
        let balance = sqlx::query_scalar::<_, Decimal>(&self.queries.select)
            .bind(wallet_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(balance)
    }
}

/// Open database transaction. sqlx rolls it back when dropped uncommitted.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
    queries: Arc<Queries>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn locked_read(&mut self, wallet_id: WalletId) -> Result<Option<Decimal>, StoreError> {
        let balance = sqlx::query_scalar::<_, Decimal>(&self.queries.select_for_update)
            .bind(wallet_id.0)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(balance)
    }

    async fn insert(&mut self, wallet_id: WalletId, balance: Decimal) -> Result<(), StoreError> {
        ensure_non_negative(wallet_id, balance)?;
        let result = sqlx::query(&self.queries.insert)
            .bind(wallet_id.0)
            .bind(balance)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::DuplicateKey(wallet_id));
        }
        Ok(())
    }

    async fn update(&mut self, wallet_id: WalletId, balance: Decimal) -> Result<(), StoreError> {
        ensure_non_negative(wallet_id, balance)?;
        let result = sqlx::query(&self.queries.update)
            .bind(balance)
            .bind(wallet_id.0)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotLocked(wallet_id));
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
