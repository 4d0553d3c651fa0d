//! Per-client request quotas.
//!
//! Clients are keyed by peer IP address. A request must fit every quota in a
//! [`ClientLimits`] set; the first one it exceeds answers `429` with a
//! `Retry-After` header.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use kbforge_shared::RateLimitConfig;
use tracing::warn;

use crate::error::ApiError;

/// Tracked clients above which idle entries are pruned.
const PRUNE_ABOVE: usize = 10_000;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

struct Limit {
    label: String,
    limiter: DefaultKeyedRateLimiter<IpAddr>,
}

/// A set of quotas checked together for each request.
#[derive(Default)]
pub(crate) struct ClientLimits {
    limits: Vec<Limit>,
}

impl ClientLimits {
    /// Quotas applied to every route.
    pub(crate) fn global(config: &RateLimitConfig) -> Self {
        let mut limits = Self::default();
        if config.enabled {
            limits.push(config.per_day, "per day", |n| {
                Quota::with_period(DAY / n.get()).map(|q| q.allow_burst(n))
            });
            limits.push(config.per_hour, "per hour", |n| Some(Quota::per_hour(n)));
        }
        limits
    }

    /// Extra quota for the upload route.
    pub(crate) fn upload(config: &RateLimitConfig) -> Self {
        let mut limits = Self::default();
        if config.enabled {
            limits.push(config.upload_per_minute, "per minute", |n| {
                Some(Quota::per_minute(n))
            });
        }
        limits
    }

    fn push(&mut self, count: u32, unit: &str, quota: impl FnOnce(NonZeroU32) -> Option<Quota>) {
        let Some(quota) = NonZeroU32::new(count).and_then(quota) else {
            return;
        };
        self.limits.push(Limit {
            label: format!("{count} {unit}"),
            limiter: RateLimiter::keyed(quota),
        });
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    /// Take one request for `client` from every quota, or report the first
    /// quota exceeded and how long until it admits the client again.
    fn check(&self, client: IpAddr) -> Result<(), (&str, Duration)> {
        for limit in &self.limits {
            if let Err(not_until) = limit.limiter.check_key(&client) {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                return Err((&limit.label, wait));
            }
            if limit.limiter.len() > PRUNE_ABOVE {
                limit.limiter.retain_recent();
            }
        }
        Ok(())
    }
}

fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Middleware rejecting requests that exceed any quota in `limits`.
pub(crate) async fn enforce(
    State(limits): State<Arc<ClientLimits>>,
    request: Request,
    next: Next,
) -> Response {
    if limits.is_empty() {
        return next.run(request).await;
    }
    let client = client_ip(&request);
    match limits.check(client) {
        Ok(()) => next.run(request).await,
        Err((label, wait)) => {
            let retry_after = wait.as_secs().max(1);
            warn!(%client, limit = label, retry_after, path = %request.uri().path(), "rate limit exceeded");
            let error = ApiError::new(
                StatusCode::TOO_MANY_REQUESTS,
                format!("rate limit exceeded: {label}"),
            );
            ([(header::RETRY_AFTER, retry_after.to_string())], error).into_response()
        }
    }
}

impl std::fmt::Debug for ClientLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let labels: Vec<&str> = self.limits.iter().map(|l| l.label.as_str()).collect();
        f.debug_struct("ClientLimits").field("limits", &labels).finish()
    }
}
