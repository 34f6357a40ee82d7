use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Which bucket denied the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketScope {
    User,
    Service,
}

impl BucketScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketScope::User => "user",
            BucketScope::Service => "service",
        }
    }
}

impl fmt::Display for BucketScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rate-limit denial with everything needed for the 429 contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRejection {
    pub scope: BucketScope,
    pub limit: u32,
    pub remaining: u32,
    pub retry_after: Duration,
    /// Unix seconds at which a token is available again
    pub reset_at: i64,
}

impl RateLimitRejection {
    /// Whole seconds to wait, rounded up
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    pub fn message(&self) -> String {
        format!(
            "Rate limit exceeded for {} bucket. Try again in {} seconds.",
            self.scope,
            self.retry_after_secs()
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    code: &'static str,
    message: String,
    retry_after: u64,
    limit: u32,
    remaining: u32,
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

impl IntoResponse for RateLimitRejection {
    fn into_response(self) -> Response {
        let retry_after = self.retry_after_secs();
        let body = ErrorBody {
            error: ErrorDetail {
                code: RATE_LIMIT_EXCEEDED,
                message: self.message(),
                retry_after,
                limit: self.limit,
                remaining: self.remaining,
            },
        };

        (
            StatusCode::TOO_MANY_REQUESTS,
            [
                (header::RETRY_AFTER, retry_after.to_string()),
                (X_RATELIMIT_LIMIT, self.limit.to_string()),
                (X_RATELIMIT_REMAINING, self.remaining.to_string()),
                (X_RATELIMIT_RESET, self.reset_at.to_string()),
            ],
            Json(body),
        )
            .into_response()
    }
}
