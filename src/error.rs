use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;
use uuid::Uuid;

use crate::orders::models::{ItemRef, LineStatus};

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Concurrent update detected: {0}")]
    Concurrency(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("External dependency failed: {0}")]
    ExternalDependency(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Wallet ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("Wallet for user {0} not found")]
    WalletNotFound(Uuid),

    #[error("Wallet {0} is locked")]
    WalletLocked(Uuid),

    #[error("Escrow wallet for user {0} is not provisioned")]
    EscrowWalletMissing(Uuid),

    #[error("Transaction {0} is not pending")]
    TransactionNotPending(Uuid),

    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
}

/// Inventory ledger errors
#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Insufficient stock for item {item_id}: requested {requested}, available {available}")]
    InsufficientStock {
        item_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("No inventory record for item {item_id} in warehouse {warehouse_id}")]
    RecordNotFound { item_id: Uuid, warehouse_id: Uuid },

    #[error("Quantity for item {0} is out of range")]
    QuantityOverflow(Uuid),
}

/// Checkout, payment and fulfillment errors
#[derive(Error, Debug)]
pub enum OrderError {
    #[error("Invalid cart item {item}: {reason}")]
    InvalidItem { item: ItemRef, reason: String },

    #[error("Order {0} is already paid")]
    AlreadyPaid(Uuid),

    #[error("Order {0} is not paid")]
    NotPaid(Uuid),

    #[error("Order {0} is canceled")]
    Canceled(Uuid),

    #[error("Checkout hold for order {0} has expired")]
    HoldExpired(Uuid),

    #[error("Checkout session already completed")]
    CheckoutCompleted,

    #[error("Invalid line transition: {from} -> {to}")]
    InvalidTransition { from: LineStatus, to: LineStatus },
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    /// True for failures the caller may retry unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Concurrency(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg, None),
            AppError::Order(OrderError::InvalidItem { item, reason }) => (
                StatusCode::BAD_REQUEST,
                "INVALID_ITEM",
                format!("Invalid cart item {}: {}", item, reason),
                Some(serde_json::json!({ "item_type": item.kind, "item_id": item.id })),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            AppError::Ledger(LedgerError::WalletNotFound(user_id)) => (
                StatusCode::NOT_FOUND,
                "WALLET_NOT_FOUND",
                format!("Wallet for user {} not found", user_id),
                None,
            ),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg, None),
            AppError::Ledger(LedgerError::InsufficientBalance { required, available }) => (
                StatusCode::CONFLICT,
                "INSUFFICIENT_BALANCE",
                "Insufficient wallet balance".to_string(),
                Some(serde_json::json!({
                    "required": required,
                    "available": available,
                })),
            ),
            AppError::Ledger(LedgerError::EscrowWalletMissing(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "ESCROW_UNAVAILABLE",
                "Payments are temporarily unavailable".to_string(),
                None,
            ),
            AppError::Ledger(err) => (StatusCode::CONFLICT, "LEDGER_CONFLICT", err.to_string(), None),
            AppError::Inventory(InventoryError::InsufficientStock {
                item_id,
                requested,
                available,
            }) => (
                StatusCode::CONFLICT,
                "INSUFFICIENT_STOCK",
                format!("Insufficient stock for item {}", item_id),
                Some(serde_json::json!({
                    "item_id": item_id,
                    "requested": requested,
                    "available": available,
                })),
            ),
            AppError::Inventory(err) => (StatusCode::CONFLICT, "INVENTORY_CONFLICT", err.to_string(), None),
            AppError::Order(OrderError::InvalidTransition { from, to }) => (
                StatusCode::CONFLICT,
                "INVALID_TRANSITION",
                format!("Cannot move line from {} to {}", from, to),
                Some(serde_json::json!({ "from": from, "to": to })),
            ),
            AppError::Order(err) => (StatusCode::CONFLICT, "ORDER_CONFLICT", err.to_string(), None),
            AppError::Concurrency(msg) => (StatusCode::CONFLICT, "CONCURRENT_UPDATE", msg, None),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Rate limit exceeded. Please try again later.".to_string(),
                None,
            ),
            AppError::ExternalDependency(msg) => (StatusCode::BAD_GATEWAY, "EXTERNAL_DEPENDENCY", msg, None),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        // serialization_failure, deadlock_detected, unique_violation
        if let sqlx::Error::Database(db) = &error {
            if let Some(code) = db.code() {
                if matches!(code.as_ref(), "40001" | "40P01" | "23505") {
                    return AppError::Concurrency(db.message().to_string());
                }
            }
        }
        AppError::Database(error)
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::ExternalDependency(format!("HTTP request error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
