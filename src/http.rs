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

//! REST API over the transfer [`Engine`].
//!
//! # Endpoints
//!
//! ```bash
//! # Open an account
//! curl -X POST http://localhost:8080/accounts \
//!   -H "Content-Type: application/json" \
//!   -d '{"id": "A", "balance": 1000}'
//!
//! # Queue a transfer
//! curl -X POST http://localhost:8080/transfer \
//!   -H "Content-Type: application/json" \
//!   -d '{"from_id": "A", "to_id": "B", "amount": 200, "reference": "rent"}'
//!
//! # Statement of an account
//! curl http://localhost:8080/statement/A
//!
//! # Audit log of finished jobs
//! curl http://localhost:8080/debug/jobs
//! ```
//!
//! Amounts travel as JSON numbers. Errors are returned as
//! `{"error": "...", "code": "..."}`.

use crate::audit::AuditRecord;
use crate::base::JobId;
use crate::engine::Engine;
use crate::error::{EngineError, ProcessorError};
use crate::transaction::Transaction;
use axum::{
    Json, Router,
    extract::{Path, Request, State, rejection::JsonRejection},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{info, warn};

// === Request/Response DTOs ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    pub id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_id: String,
    pub to_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(default)]
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferAccepted {
    pub job_id: JobId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub reference: String,
}

impl From<Transaction> for TransactionResponse {
    fn from(tx: Transaction) -> Self {
        Self {
            id: tx.id().to_string(),
            from: tx.from().to_string(),
            to: tx.to().to_string(),
            amount: tx.amount(),
            reference: tx.reference().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecordResponse {
    pub from: String,
    pub to: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub reference: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<AuditRecord> for AuditRecordResponse {
    fn from(record: AuditRecord) -> Self {
        Self {
            from: record.from.to_string(),
            to: record.to.to_string(),
            amount: record.amount,
            reference: record.reference,
            timestamp: record.timestamp,
            success: record.success,
            error: record.error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

// === Error Handling ===

/// Handler failures, rendered as [`ErrorResponse`] bodies.
#[derive(Debug)]
pub enum AppError {
    Engine(EngineError),
    BadRequest(String),
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::Engine(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(format!("invalid JSON: {}", rejection.body_text()))
    }
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Engine(err) => match err {
                EngineError::UnknownAccount { .. } => (StatusCode::BAD_REQUEST, "UNKNOWN_ACCOUNT"),
                EngineError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND"),
                EngineError::SelfTransferDisallowed => (StatusCode::BAD_REQUEST, "SELF_TRANSFER"),
                EngineError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
                EngineError::DuplicateAccount(_) => (StatusCode::CONFLICT, "DUPLICATE_ACCOUNT"),
                EngineError::Submit(ProcessorError::QueueFull) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_FULL")
                }
                EngineError::Submit(_) => (StatusCode::SERVICE_UNAVAILABLE, "PROCESSOR_STOPPED"),
                EngineError::Statement(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
            },
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let error = match self {
            AppError::Engine(err) => err.to_string(),
            AppError::BadRequest(msg) | AppError::Internal(msg) => msg,
        };

        (
            status,
            Json(ErrorResponse {
                error,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Handlers ===

/// POST /accounts - Open a new account.
async fn create_account(
    State(state): State<AppState>,
    payload: Result<Json<CreateAccountRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AccountResponse>), AppError> {
    let Json(request) = payload?;
    if request.id.is_empty() {
        return Err(AppError::BadRequest("account id required".to_string()));
    }

    let account = state.engine.open_account(&request.id, request.balance)?;
    Ok((
        StatusCode::CREATED,
        Json(AccountResponse {
            id: account.id().to_string(),
            balance: account.balance(),
        }),
    ))
}

/// POST /transfer - Queue a transfer.
async fn create_transfer(
    State(state): State<AppState>,
    payload: Result<Json<TransferRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TransferAccepted>), AppError> {
    let Json(request) = payload?;

    // Submission may back off while the queue is full.
    let engine = Arc::clone(&state.engine);
    let job_id = tokio::task::spawn_blocking(move || {
        engine.submit_transfer(
            &request.from_id,
            &request.to_id,
            request.amount,
            &request.reference,
        )
    })
    .await
    .map_err(|err| AppError::Internal(format!("submit task failed: {err}")))??;

    Ok((StatusCode::ACCEPTED, Json(TransferAccepted { job_id })))
}

/// GET /statement/{id} - Transactions of one account.
async fn get_statement(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TransactionResponse>>, AppError> {
    let transactions = state.engine.statement(&id)?;
    Ok(Json(
        transactions
            .into_iter()
            .map(TransactionResponse::from)
            .collect(),
    ))
}

/// GET /debug/jobs - Audit log of finished jobs.
async fn debug_jobs(State(state): State<AppState>) -> Json<Vec<AuditRecordResponse>> {
    Json(
        state
            .engine
            .audit_log()
            .into_iter()
            .map(AuditRecordResponse::from)
            .collect(),
    )
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if status.is_server_error() {
        warn!(%method, path = %path, status = status.as_u16(), elapsed_ms, "request failed");
    } else {
        info!(%method, path = %path, status = status.as_u16(), elapsed_ms, "request");
    }
    response
}

// === Router ===

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/accounts", post(create_account))
        .route("/transfer", post(create_transfer))
        .route("/statement/{id}", get(get_statement))
        .route("/debug/jobs", get(debug_jobs))
        .layer(middleware::from_fn(log_request))
        .with_state(AppState { engine })
}

/// Serves the API on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, engine: Arc<Engine>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "transfer API listening");
    }
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown)
        .await
}
