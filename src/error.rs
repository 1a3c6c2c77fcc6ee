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

//! Error types for wallet operations.

use crate::base::WalletId;
use crate::store::StoreError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Outcome of a rejected operation.
///
/// Callers match on the variant; nothing here is compared by identity.
#[derive(Error, Debug)]
pub enum WalletError {
    /// The request itself is malformed. No transaction was opened.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Withdrawal from, or query of, a wallet that was never funded
    #[error("wallet {0} not found")]
    WalletNotFound(WalletId),

    /// Withdrawal would drive the balance below zero
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },

    /// Connection or transaction failure in the backing store
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Reasons an operation is rejected before touching storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Operation kind is neither `DEPOSIT` nor `WITHDRAW`
    #[error("the operation_type field must have the value DEPOSIT or WITHDRAW, got {0:?}")]
    UnknownKind(String),

    /// Amount is zero or negative
    #[error("invalid amount {0} (must be positive)")]
    NonPositiveAmount(Decimal),

    /// Resulting balance does not fit in a decimal
    #[error("amount {0} overflows the wallet balance")]
    Overflow(Decimal),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            ValidationError::UnknownKind("REFUND".into()).to_string(),
            "the operation_type field must have the value DEPOSIT or WITHDRAW, got \"REFUND\""
        );
        assert_eq!(
            ValidationError::NonPositiveAmount(dec!(-1)).to_string(),
            "invalid amount -1 (must be positive)"
        );
        assert_eq!(
            WalletError::InsufficientFunds {
                balance: dec!(100.00),
                requested: dec!(150.00)
            }
            .to_string(),
            "insufficient funds: balance 100.00, requested 150.00"
        );
        let id: WalletId = "67e55044-10b1-426f-9247-bb680e5fe0c8".parse().unwrap();
        assert_eq!(
            WalletError::WalletNotFound(id).to_string(),
            "wallet 67e55044-10b1-426f-9247-bb680e5fe0c8 not found"
        );
    }

    #[test]
    fn validation_converts_transparently() {
        let err: WalletError = ValidationError::NonPositiveAmount(dec!(0)).into();
        assert!(matches!(
            err,
            WalletError::Validation(ValidationError::NonPositiveAmount(_))
        ));
        assert_eq!(err.to_string(), "invalid amount 0 (must be positive)");
    }

    #[test]
    fn store_errors_become_storage() {
        let id = WalletId::new_v4();
        let err: WalletError = StoreError::Vanished(id).into();
        assert!(matches!(err, WalletError::Storage(StoreError::Vanished(_))));
    }
}
