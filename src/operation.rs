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

//! Balance-mutating operations.
//!
//! An [`Operation`] is transient: it is validated, applied once and never
//! stored.

use crate::base::WalletId;
use crate::error::ValidationError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Deposit,
    Withdraw,
}

impl OperationKind {
    /// Computes the candidate balance, or `None` on decimal overflow.
    ///
    /// The result of a withdrawal may be negative; the caller decides what
    /// that means.
    pub fn apply_to(self, balance: Decimal, amount: Decimal) -> Option<Decimal> {
        match self {
            Self::Deposit => balance.checked_add(amount),
            Self::Withdraw => balance.checked_sub(amount),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "DEPOSIT",
            Self::Withdraw => "WITHDRAW",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(Self::Deposit),
            "WITHDRAW" => Ok(Self::Withdraw),
            other => Err(ValidationError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Operation {
    pub wallet_id: WalletId,
    pub kind: OperationKind,
    pub amount: Decimal,
}

impl Operation {
    pub fn deposit(wallet_id: WalletId, amount: Decimal) -> Self {
        Self {
            wallet_id,
            kind: OperationKind::Deposit,
            amount,
        }
    }

    pub fn withdraw(wallet_id: WalletId, amount: Decimal) -> Self {
        Self {
            wallet_id,
            kind: OperationKind::Withdraw,
            amount,
        }
    }

    /// Builds an operation from its wire representation.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::UnknownKind`] if `kind` is not `DEPOSIT` or `WITHDRAW`.
    /// - [`ValidationError::NonPositiveAmount`] if `amount <= 0`.
    pub fn parse(wallet_id: WalletId, kind: &str, amount: Decimal) -> Result<Self, ValidationError> {
        let operation = Self {
            wallet_id,
            kind: kind.parse()?,
            amount,
        };
        operation.validate()?;
        Ok(operation)
    }

    /// Rejects non-positive amounts.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(self.amount));
        }
        Ok(())
    }
}
