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

//! Balance mutation engine.
//!
//! The [`Engine`] applies one [`Operation`] to one wallet inside one store
//! transaction:
//!
//! 1. validate the operation (no transaction yet),
//! 2. lock and read the wallet,
//! 3. create it on first deposit, or reject a withdrawal from nowhere,
//! 4. compute the candidate balance and reject it if negative,
//! 5. write and commit.
//!
//! # Thread Safety
//!
//! The engine keeps no state of its own. Operations on the same wallet are
//! serialized by the store's row lock; operations on different wallets run
//! in parallel.

use crate::base::WalletId;
use crate::error::{ValidationError, WalletError};
use crate::lifecycle::{self, Creation};
use crate::operation::{Operation, OperationKind};
use crate::store::{BalanceStore, StoreError, StoreTransaction};
use crate::wallet::Wallet;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Applies deposits and withdrawals against a [`BalanceStore`].
///
/// # Invariants
///
/// - A committed balance is never negative.
/// - A wallet exists only after its first successful deposit.
/// - Every read-compute-write happens under the wallet's row lock, so no
///   update is lost.
pub struct Engine<S> {
    store: Arc<S>,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: BalanceStore> Engine<S> {
    /// Creates an engine over an already configured store handle.
    pub fn new(store: Arc<S>) -> Self {
        Engine { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Applies an operation and returns the committed wallet state.
    ///
    /// | Kind | Wallet missing | Wallet present |
    /// |------|----------------|----------------|
    /// | Deposit | created at 0, then credited | credited |
    /// | Withdraw | [`WalletError::WalletNotFound`] | debited if funds allow |
    ///
    /// Dropping the returned future before it completes rolls the
    /// transaction back.
    ///
    /// # Errors
    ///
    /// - [`WalletError::Validation`] - Amount is zero or negative, or the result overflows.
    /// - [`WalletError::WalletNotFound`] - Withdrawal from a wallet that does not exist.
    /// - [`WalletError::InsufficientFunds`] - Withdrawal exceeds the balance.
    /// - [`WalletError::Storage`] - The store failed; nothing was written.
    #[instrument(
        skip(self, operation),
        fields(wallet_id = %operation.wallet_id, kind = %operation.kind, amount = %operation.amount)
    )]
    pub async fn apply(&self, operation: Operation) -> Result<Wallet, WalletError> {
        operation.validate()?;
        let Operation {
            wallet_id,
            kind,
            amount,
        } = operation;

        let mut tx = self.store.begin().await?;

        let balance = match tx.locked_read(wallet_id).await? {
            Some(balance) => balance,
            None => match kind {
                OperationKind::Withdraw => {
                    abort(tx).await;
                    return Err(WalletError::WalletNotFound(wallet_id));
                }
                OperationKind::Deposit => materialize(&mut tx, wallet_id).await?,
            },
        };

        let Some(candidate) = kind.apply_to(balance, amount) else {
            abort(tx).await;
            return Err(ValidationError::Overflow(amount).into());
        };
        if candidate < Decimal::ZERO {
            abort(tx).await;
            return Err(WalletError::InsufficientFunds {
                balance,
                requested: amount,
            });
        }

        tx.update(wallet_id, candidate).await?;
        tx.commit().await?;
        debug!(%balance, %candidate, "operation committed");

        Ok(Wallet::new(wallet_id, candidate))
    }

    /// Returns the last committed state of a wallet without locking it.
    ///
    /// # Errors
    ///
    /// - [`WalletError::WalletNotFound`] - No deposit has ever created the wallet.
    /// - [`WalletError::Storage`] - The store failed.
    #[instrument(skip(self))]
    pub async fn balance(&self, wallet_id: WalletId) -> Result<Wallet, WalletError> {
        self.store
            .balance(wallet_id)
            .await?
            .map(|balance| Wallet::new(wallet_id, balance))
            .ok_or(WalletError::WalletNotFound(wallet_id))
    }
}

/// Creates a missing wallet for a deposit and returns its locked balance.
///
/// If a concurrent deposit created it first, the row is locked and read once
/// more. A second miss means the store broke its own contract.
async fn materialize<T: StoreTransaction>(
    tx: &mut T,
    wallet_id: WalletId,
) -> Result<Decimal, StoreError> {
    match lifecycle::create_if_absent(tx, wallet_id).await? {
        Creation::Created => Ok(Decimal::ZERO),
        Creation::AlreadyExists => tx
            .locked_read(wallet_id)
            .await?
            .ok_or(StoreError::Vanished(wallet_id)),
    }
}

/// Rolls back on a rejected operation. The rejection is what the caller
/// sees; a failed rollback is only logged, the drop releases the locks anyway.
async fn abort<T: StoreTransaction>(tx: T) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "rollback failed");
    }
}
