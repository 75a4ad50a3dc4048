//! Liveness check.
//!
//! Plain-text `ok`, for load balancers and deployment probes.

pub async fn healthcheck() -> &'static str {
    "ok"
}
