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

//! REST API over the [`Engine`].
//!
//! ## Endpoints
//!
//! - `POST /api/v1/wallet` - Apply a deposit or withdrawal
//! - `GET /api/v1/wallets/{wallet_uuid}` - Read a wallet balance
//!
//! ## Example Usage
//!
//! ```bash
//! # Deposit (creates the wallet on first use)
//! curl -X POST http://localhost:8080/api/v1/wallet \
//!   -H "Content-Type: application/json" \
//!   -d '{"wallet_id": "67e55044-10b1-426f-9247-bb680e5fe0c8", "operation_type": "DEPOSIT", "amount": "100.00"}'
//!
//! # Balance
//! curl http://localhost:8080/api/v1/wallets/67e55044-10b1-426f-9247-bb680e5fe0c8
//! ```
//!
//! Balances are returned as decimal strings. Request amounts are accepted as
//! strings or JSON numbers, both parsed exactly.

use crate::base::WalletId;
use crate::engine::Engine;
use crate::error::WalletError;
use crate::operation::Operation;
use crate::store::BalanceStore;
use crate::wallet::Wallet;
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Informational text returned for wallets that do not exist yet.
pub const CREATE_HINT: &str = "You need to deposit a positive amount to create a wallet";

// === Request/Response DTOs ===

/// Request body for `POST /api/v1/wallet`.
///
/// ```json
/// {"wallet_id": "67e55044-10b1-426f-9247-bb680e5fe0c8", "operation_type": "WITHDRAW", "amount": "25.00"}
/// ```
///
/// `amount` may also be a JSON number (`25.00`); its literal text is parsed,
/// never a float.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    pub wallet_id: WalletId,
    pub operation_type: String,
    #[serde(deserialize_with = "rust_decimal::serde::arbitrary_precision::deserialize")]
    pub amount: Decimal,
}

/// Response body for errors and informational replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared state handed to every handler.
pub struct AppState<S> {
    pub engine: Engine<S>,
    /// Requests still running after this long are dropped, which rolls
    /// their transaction back.
    pub request_timeout: Duration,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

// === Error Handling ===

pub enum AppError {
    Wallet(WalletError),
    InvalidWalletId(String),
    InvalidJson(String),
    Timeout,
}

impl From<WalletError> for AppError {
    fn from(err: WalletError) -> Self {
        AppError::Wallet(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Wallet(WalletError::Validation(e)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
            }
            AppError::Wallet(WalletError::WalletNotFound(_)) => {
                (StatusCode::OK, "WALLET_NOT_FOUND", CREATE_HINT.to_string())
            }
            AppError::Wallet(e @ WalletError::InsufficientFunds { .. }) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INSUFFICIENT_FUNDS",
                e.to_string(),
            ),
            AppError::Wallet(e @ WalletError::Storage(_)) => {
                error!(error = %e, "storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "storage unavailable, retry later".to_string(),
                )
            }
            AppError::InvalidWalletId(raw) => (
                StatusCode::BAD_REQUEST,
                "INVALID_WALLET_ID",
                format!("invalid wallet UUID {raw:?}"),
            ),
            AppError::InvalidJson(detail) => (
                StatusCode::BAD_REQUEST,
                "INVALID_JSON",
                format!("failed to decode JSON: {detail}"),
            ),
            AppError::Timeout => (
                StatusCode::SERVICE_UNAVAILABLE,
                "REQUEST_TIMEOUT",
                "request deadline exceeded".to_string(),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Handlers ===

/// POST /api/v1/wallet - Apply an operation.
async fn change_balance<S: BalanceStore + 'static>(
    State(state): State<AppState<S>>,
    payload: Result<Json<OperationRequest>, JsonRejection>,
) -> Result<Json<Wallet>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::InvalidJson(e.body_text()))?;
    let operation = Operation::parse(request.wallet_id, &request.operation_type, request.amount)
        .map_err(WalletError::from)?;

    let wallet = tokio::time::timeout(state.request_timeout, state.engine.apply(operation))
        .await
        .map_err(|_| AppError::Timeout)??;
    Ok(Json(wallet))
}

/// GET /api/v1/wallets/{wallet_uuid} - Read a balance.
async fn get_balance<S: BalanceStore + 'static>(
    State(state): State<AppState<S>>,
    Path(wallet_uuid): Path<String>,
) -> Result<Json<Wallet>, AppError> {
    let wallet_id: WalletId = wallet_uuid
        .parse()
        .map_err(|_| AppError::InvalidWalletId(wallet_uuid.clone()))?;

    let wallet = tokio::time::timeout(state.request_timeout, state.engine.balance(wallet_id))
        .await
        .map_err(|_| AppError::Timeout)??;
    Ok(Json(wallet))
}

// === Router ===

pub fn create_router<S: BalanceStore + 'static>(state: AppState<S>) -> Router {
    Router::new()
        .route("/api/v1/wallet", post(change_balance::<S>))
        .route("/api/v1/wallets/{wallet_uuid}", get(get_balance::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the API on `listener` until Ctrl-C.
pub async fn serve<S: BalanceStore + 'static>(
    listener: TcpListener,
    state: AppState<S>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "wallet API listening");
    }
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            error!(error = %e, "cannot listen for Ctrl-C, running until killed");
            std::future::pending::<()>().await;
        }
    }
}
