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

//! Lock-aware balance storage.
//!
//! A [`BalanceStore`] hands out transactions. Inside a transaction,
//! [`StoreTransaction::locked_read`] takes an exclusive per-wallet row lock
//! that is held until the transaction commits, rolls back, or is dropped.
//! That row lock is the only concurrency control in the crate.
//!
//! # Implementations
//!
//! - [`PgStore`]: PostgreSQL, locks through `SELECT ... FOR UPDATE`.
//! - [`MemoryStore`]: in-process, same visibility and locking rules.

use crate::base::WalletId;
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

mod memory;
mod postgres;

pub use memory::{MemoryStore, MemoryTransaction};
pub use postgres::{PgStore, PgTransaction, PoolConfig};
pub(crate) use postgres::is_valid_table_name;

/// Storage-level failures.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A record with this id already exists (or a concurrent creator won).
    #[error("wallet {0} already exists")]
    DuplicateKey(WalletId),

    /// Update issued for a record this transaction does not hold locked
    #[error("wallet {0} is not locked by this transaction")]
    NotLocked(WalletId),

    /// Attempt to persist a negative balance
    #[error("refusing to persist negative balance {balance} for wallet {wallet_id}")]
    NegativeBalance { wallet_id: WalletId, balance: Decimal },

    /// Record reported as existing could not be found on re-read
    #[error("wallet {0} vanished after a concurrent create")]
    Vanished(WalletId),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable wallet balances.
///
/// Implementations are shared between request handlers, so they are
/// `Send + Sync` and cheap to reach through an `Arc`.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    type Transaction: StoreTransaction;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Self::Transaction, StoreError>;

    /// Reads the last committed balance without taking any lock.
    async fn balance(&self, wallet_id: WalletId) -> Result<Option<Decimal>, StoreError>;
}

/// A single atomic unit of work against a [`BalanceStore`].
///
/// Dropping a transaction without calling [`commit`](Self::commit) must roll
/// it back and release every lock it holds.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Locks the wallet row and returns its balance.
    ///
    /// Blocks while another transaction holds the lock. Returns `None`, and
    /// holds nothing, if the wallet does not exist.
    async fn locked_read(&mut self, wallet_id: WalletId) -> Result<Option<Decimal>, StoreError>;

    /// Creates the wallet row and keeps it locked.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateKey`] if the row exists or a concurrent
    /// creator commits it first. The transaction stays usable.
    async fn insert(&mut self, wallet_id: WalletId, balance: Decimal) -> Result<(), StoreError>;

    /// Writes the balance of a row locked by this transaction.
    async fn update(&mut self, wallet_id: WalletId, balance: Decimal) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

fn ensure_non_negative(wallet_id: WalletId, balance: Decimal) -> Result<(), StoreError> {
    if balance < Decimal::ZERO {
        return Err(StoreError::NegativeBalance { wallet_id, balance });
    }
    Ok(())
}
