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

//! In-process balance store.
//!
//! Each wallet is a [`Row`] in a [`DashMap`]. A row carries two locks:
//!
//! - `lock`: a FIFO async mutex standing in for the database row lock. A
//!   transaction keeps the owned guard until it ends, so waiters are served
//!   in acquisition order and a dropped transaction frees the row at once.
//! - `committed`: a short-lived [`RwLock`] around the last committed balance,
//!   so unlocked reads never wait behind an open transaction.
//!
//! A row whose `committed` value is `None` has been reserved by a creator
//! that has not committed yet; it is invisible to readers. When the creator
//! ends without committing, the reservation is removed unless another
//! transaction still holds the row.

use super::{BalanceStore, StoreError, StoreTransaction, ensure_non_negative};
use crate::base::WalletId;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct Row {
    lock: Arc<Mutex<()>>,
    committed: RwLock<Option<Decimal>>,
}

impl Row {
    fn committed(&self) -> Option<Decimal> {
        *self.committed.read()
    }
}

type Rows = DashMap<WalletId, Arc<Row>>;

/// Thread-safe in-memory [`BalanceStore`].
///
/// Cloning is cheap and clones share the same rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    rows: Arc<Rows>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of wallets with a committed balance.
    pub fn len(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| row.value().committed().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn row(&self, wallet_id: &WalletId) -> Option<Arc<Row>> {
        self.rows.get(wallet_id).map(|row| Arc::clone(row.value()))
    }

    fn row_or_reserve(&self, wallet_id: WalletId) -> Arc<Row> {
        Arc::clone(self.rows.entry(wallet_id).or_default().value())
    }

    /// Removes a never-committed row once the caller's handle is the only
    /// one left outside the map.
    fn discard_reservation(&self, wallet_id: WalletId, row: &Arc<Row>) {
        self.rows.remove_if(&wallet_id, |_, current| {
            Arc::ptr_eq(current, row)
                && Arc::strong_count(current) == 2
                && current.committed().is_none()
        });
    }
}

#[async_trait]
impl BalanceStore for MemoryStore {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, StoreError> {
        Ok(MemoryTransaction {
            store: self.clone(),
            held: HashMap::new(),
        })
    }

    async fn balance(&self, wallet_id: WalletId) -> Result<Option<Decimal>, StoreError> {
        Ok(self.row(&wallet_id).and_then(|row| row.committed()))
    }
}

/// A row locked by a transaction, with its uncommitted write.
#[derive(Debug)]
struct Held {
    row: Arc<Row>,
    pending: Option<Decimal>,
    _guard: OwnedMutexGuard<()>,
}

impl Held {
    fn current(&self) -> Option<Decimal> {
        self.pending.or_else(|| self.row.committed())
    }
}

/// Transaction over a [`MemoryStore`].
///
/// Writes are buffered until [`commit`](StoreTransaction::commit). Dropping
/// the transaction discards them and releases every row lock.
#[derive(Debug)]
pub struct MemoryTransaction {
    store: MemoryStore,
    held: HashMap<WalletId, Held>,
}

impl MemoryTransaction {
    async fn lock(row: &Arc<Row>) -> OwnedMutexGuard<()> {
        Arc::clone(&row.lock).lock_owned().await
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn locked_read(&mut self, wallet_id: WalletId) -> Result<Option<Decimal>, StoreError> {
        if let Some(held) = self.held.get(&wallet_id) {
            return Ok(held.current());
        }
        let Some(row) = self.store.row(&wallet_id) else {
            return Ok(None);
        };

        let guard = Self::lock(&row).await;
        match row.committed() {
            Some(balance) => {
                self.held.insert(
                    wallet_id,
                    Held {
                        row,
                        pending: None,
                        _guard: guard,
                    },
                );
                Ok(Some(balance))
            }
            // Reserved by a creator that rolled back; nothing to lock.
            None => {
                drop(guard);
                self.store.discard_reservation(wallet_id, &row);
                Ok(None)
            }
        }
    }

    async fn insert(&mut self, wallet_id: WalletId, balance: Decimal) -> Result<(), StoreError> {
        ensure_non_negative(wallet_id, balance)?;
        if self.held.contains_key(&wallet_id) {
            return Err(StoreError::DuplicateKey(wallet_id));
        }

        // Whoever locks the reserved row first becomes the creator. Everyone
        // else waits here until that creator commits or rolls back.
        let row = self.store.row_or_reserve(wallet_id);
        let guard = Self::lock(&row).await;
        if row.committed().is_some() {
            return Err(StoreError::DuplicateKey(wallet_id));
        }

        self.held.insert(
            wallet_id,
            Held {
                row,
                pending: Some(balance),
                _guard: guard,
            },
        );
        Ok(())
    }

    async fn update(&mut self, wallet_id: WalletId, balance: Decimal) -> Result<(), StoreError> {
        ensure_non_negative(wallet_id, balance)?;
        let held = self
            .held
            .get_mut(&wallet_id)
            .ok_or(StoreError::NotLocked(wallet_id))?;
        held.pending = Some(balance);
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        for held in std::mem::take(&mut self.held).into_values() {
            if let Some(balance) = held.pending {
                *held.row.committed.write() = Some(balance);
            }
            // Row lock released here, after the write is visible.
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        drop(self);
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        for (wallet_id, held) in self.held.drain() {
            let Held { row, _guard, .. } = held;
            drop(_guard);
            if row.committed().is_none() {
                self.store.discard_reservation(wallet_id, &row);
            }
        }
    }
}
