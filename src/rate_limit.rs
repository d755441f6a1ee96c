/// Per-client request limiting
use crate::{
    config::RateLimitConfig,
    context::AppContext,
    error::{RewardsError, RewardsResult},
};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock as GovernorClock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter as GovernorLimiter,
};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
};

/// Tracked clients before stale keys are swept
const MAX_TRACKED_CLIENTS: usize = 10_000;

type KeyedLimiter = GovernorLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Keyed limiter, one bucket per client IP
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Option<Arc<KeyedLimiter>>,
    requests_per_minute: u32,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let limiter = config.enabled.then(|| {
            let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
            Arc::new(GovernorLimiter::keyed(Quota::per_minute(per_minute)))
        });

        Self {
            limiter,
            requests_per_minute: config.requests_per_minute,
        }
    }

    /// Limiter that admits everything
    pub fn disabled() -> Self {
        Self {
            limiter: None,
            requests_per_minute: 0,
        }
    }

    /// Consume one request from `client`'s bucket
    pub fn check(&self, client: IpAddr) -> RewardsResult<()> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };

        if limiter.len() > MAX_TRACKED_CLIENTS {
            limiter.retain_recent();
        }

        limiter.check_key(&client).map_err(|not_until| {
            let retry_after = not_until.wait_time_from(DefaultClock::default().now());
            tracing::warn!(%client, ?retry_after, "rate limit exceeded");
            RewardsError::RateLimitExceeded { retry_after }
        })
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }
}

/// Rate limiting middleware
///
/// Requests without connection info (in-process callers) share one bucket.
pub async fn rate_limit_middleware(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, RewardsError> {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    ctx.rate_limiter.check(client)?;

    let mut response = next.run(request).await;
    if ctx.rate_limiter.limiter.is_some() {
        response.headers_mut().insert(
            "X-RateLimit-Limit",
            HeaderValue::from(ctx.rate_limiter.requests_per_minute()),
        );
    }

    Ok(response)
}
