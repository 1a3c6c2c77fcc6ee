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

//! Wallet snapshot.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use wallet_ledger::{Wallet, WalletId};
//!
//! let wallet = Wallet::new(WalletId::new_v4(), dec!(42.50));
//! assert_eq!(wallet.balance, dec!(42.50));
//! ```

use crate::base::WalletId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Committed state of a wallet as returned to callers.
///
/// The balance is exact; no rounding is applied on the way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    #[serde(rename = "wallet_id")]
    pub id: WalletId,
    pub balance: Decimal,
}

impl Wallet {
    pub fn new(id: WalletId, balance: Decimal) -> Self {
        debug_assert!(
            balance >= Decimal::ZERO,
            "Invariant violated: wallet {id} balance went negative: {balance}"
        );
        Self { id, balance }
    }
}
