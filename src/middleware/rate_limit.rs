use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::actor::USER_ID_HEADER;
use crate::error::{AppError, AppResult};

const ANONYMOUS: &str = "anonymous";

/// Per-caller limiter, keyed by the `x-user-id` header
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>>,
}

impl RateLimitLayer {
    /// Allows `requests` per `per_seconds`, all of them usable as a burst
    pub fn new(requests: u32, per_seconds: u64) -> AppResult<Self> {
        let burst = NonZeroU32::new(requests)
            .ok_or_else(|| AppError::Config("rate limit must allow at least one request".to_string()))?;
        let period = Duration::from_secs(per_seconds.max(1)) / burst.get();
        let quota = Quota::with_period(period)
            .ok_or_else(|| AppError::Config("rate limit period must be positive".to_string()))?
            .allow_burst(burst);

        Ok(RateLimitLayer {
            limiter: Arc::new(RateLimiter::keyed(quota)),
        })
    }

    pub fn check(&self, key: &str) -> bool {
        self.limiter.check_key(&key.to_string()).is_ok()
    }

    /// Drops state of callers that are back to a full quota
    pub fn prune(&self) {
        self.limiter.retain_recent();
    }
}

/// Rejects a caller's request once its quota is used up
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimitLayer>,
    req: Request,
    next: Next,
) -> Response {
    let key = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(ANONYMOUS)
        .to_string();

    if limiter.check(&key) {
        next.run(req).await
    } else {
        debug!("Rate limit exceeded for {}", key);
        AppError::RateLimited.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_per_caller() {
        let limiter = RateLimitLayer::new(2, 60).unwrap();
        assert!(limiter.check("alice"));
        assert!(limiter.check("alice"));
        assert!(!limiter.check("alice"));
        assert!(limiter.check("bob"));
    }

    #[test]
    fn test_zero_requests_is_a_config_error() {
        assert!(matches!(RateLimitLayer::new(0, 60), Err(AppError::Config(_))));
    }
}
