use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub checks: Vec<ComponentStatus>,
}

/// Status of one dependency the service needs to take payments
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub component: String,
    pub healthy: bool,
    pub detail: Option<String>,
}
