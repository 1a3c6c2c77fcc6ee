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

//! # Wallet Ledger
//!
//! This library keeps per-wallet balances and applies deposits and
//! withdrawals to them safely under concurrent access.
//!
//! ## Core Components
//!
//! - [`Engine`]: Applies one operation to one wallet inside one locked transaction
//! - [`BalanceStore`]: Lock-aware storage ([`PgStore`] for PostgreSQL, [`MemoryStore`] in-process)
//! - [`lifecycle`]: Implicit wallet creation on first deposit
//! - [`WalletError`]: Closed set of outcomes callers match on
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use rust_decimal_macros::dec;
//! use wallet_ledger::{Engine, MemoryStore, Operation, WalletError, WalletId};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let engine = Engine::new(Arc::new(MemoryStore::new()));
//! let id = WalletId::new_v4();
//!
//! // The first deposit creates the wallet
//! let wallet = engine.apply(Operation::deposit(id, dec!(50.00))).await.unwrap();
//! assert_eq!(wallet.balance, dec!(50.00));
//!
//! // Withdrawals never drive the balance negative
//! let result = engine.apply(Operation::withdraw(id, dec!(80.00))).await;
//! assert!(matches!(result, Err(WalletError::InsufficientFunds { .. })));
//! assert_eq!(engine.balance(id).await.unwrap().balance, dec!(50.00));
//! # });
//! ```
//!
//! ## Thread Safety
//!
//! The engine holds no lock of its own. Operations on one wallet are
//! serialized by the store's row lock; different wallets proceed in parallel.

mod base;
pub mod config;
mod engine;
pub mod error;
pub mod lifecycle;
pub mod logging;
mod operation;
pub mod server;
pub mod store;
mod wallet;

pub use base::WalletId;
pub use engine::Engine;
pub use error::{ValidationError, WalletError};
pub use operation::{Operation, OperationKind};
pub use store::{BalanceStore, MemoryStore, PgStore, StoreError, StoreTransaction};
pub use wallet::Wallet;
