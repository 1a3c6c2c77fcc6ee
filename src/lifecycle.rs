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

//! Implicit wallet creation.
//!
//! A wallet springs into existence at balance zero the moment a deposit
//! targets an unknown id. There is no explicit "create wallet" call.

use crate::base::WalletId;
use crate::store::{StoreError, StoreTransaction};
use rust_decimal::Decimal;
use tracing::debug;

/// Result of [`create_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creation {
    /// The row was inserted at zero and is locked by the caller's transaction.
    Created,
    /// Another transaction created the wallet first.
    AlreadyExists,
}

/// Inserts `wallet_id` at balance zero inside `tx`.
///
/// A duplicate key is not an error here: it means a concurrent request won
/// the race, and the caller should lock and read the wallet instead.
pub async fn create_if_absent<T>(tx: &mut T, wallet_id: WalletId) -> Result<Creation, StoreError>
where
    T: StoreTransaction,
{
    match tx.insert(wallet_id, Decimal::ZERO).await {
        Ok(()) => {
            debug!(%wallet_id, "created wallet");
            Ok(Creation::Created)
        }
        Err(StoreError::DuplicateKey(_)) => {
            debug!(%wallet_id, "wallet created concurrently");
            Ok(Creation::AlreadyExists)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BalanceStore, MemoryStore};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn creates_missing_wallet_at_zero() {
        let store = MemoryStore::new();
        let id = WalletId::new_v4();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(create_if_absent(&mut tx, id).await.unwrap(), Creation::Created);
        assert_eq!(tx.locked_read(id).await.unwrap(), Some(Decimal::ZERO));
        tx.commit().await.unwrap();

        assert_eq!(store.balance(id).await.unwrap(), Some(Decimal::ZERO));
    }

    #[tokio::test]
    async fn existing_wallet_reports_already_exists() {
        let store = MemoryStore::new();
        let id = WalletId::new_v4();
        let mut tx = store.begin().await.unwrap();
        tx.insert(id, dec!(3)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            create_if_absent(&mut tx, id).await.unwrap(),
            Creation::AlreadyExists
        );
        tx.commit().await.unwrap();

        assert_eq!(store.balance(id).await.unwrap(), Some(dec!(3)));
    }
}
