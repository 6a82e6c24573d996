//! Per-client-IP rate limiting built atop `governor`.
//!
//! One keyed limiter guards the whole gateway: each client address may make
//! `requests` requests per `period`, replenished continuously (GCRA).
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
};

use axum::extract::ConnectInfo;
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use http::Request;

use crate::{
    config::models::{MissingKeyPolicy, RateLimitConfig},
    error::GatewayError,
};

pub type KeyedRateLimiterImpl<K> = RateLimiter<K, DefaultKeyedStateStore<K>, DefaultClock>;

/// Shared IP-keyed limiter; clones share state.
#[derive(Clone)]
pub struct ClientRateLimiter {
    limiter: Arc<KeyedRateLimiterImpl<IpAddr>>,
    message: String,
    on_missing_key: MissingKeyPolicy,
}

impl ClientRateLimiter {
    /// Build a limiter from a `RateLimitConfig` definition.
    pub fn new(config: &RateLimitConfig) -> Result<Self, String> {
        let period_duration = humantime::parse_duration(&config.period).map_err(|e| {
            format!(
                "Invalid period string '{period}': {e}",
                period = config.period
            )
        })?;

        let requests = u32::try_from(config.requests)
            .map_err(|_| format!("Rate limit 'requests' is too large: {}", config.requests))?;
        let quota_requests = NonZeroU32::new(requests)
            .ok_or_else(|| "Rate limit 'requests' must be greater than 0".to_string())?;

        // `requests` cells per period, all available as an initial burst.
        let replenish_interval = period_duration / quota_requests.get();
        let quota = Quota::with_period(replenish_interval)
            .ok_or_else(|| format!("Invalid period duration: {period_duration:?}"))?
            .allow_burst(quota_requests);

        tracing::info!(
            "Creating per-IP rate limiter: requests={}, period={}, on_missing_key={:?}",
            config.requests,
            config.period,
            config.on_missing_key
        );

        Ok(Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            message: config.message.clone(),
            on_missing_key: config.on_missing_key,
        })
    }

    pub fn check_ip(&self, ip: IpAddr) -> Result<(), GatewayError> {
        if self.limiter.check_key(&ip).is_err() {
            tracing::debug!("Rate limit exceeded for {}", ip);
            Err(GatewayError::RateLimited(self.message.clone()))
        } else {
            Ok(())
        }
    }

    /// Enforce the limit for the peer address recorded by axum's `ConnectInfo`.
    pub fn check<T>(&self, req: &Request<T>) -> Result<(), GatewayError> {
        let client_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|connect_info| connect_info.0.ip());

        match client_ip {
            Some(ip) => self.check_ip(ip),
            None => match self.on_missing_key {
                MissingKeyPolicy::Allow => Ok(()),
                MissingKeyPolicy::Deny => Err(GatewayError::RateLimited(
                    "No client IP available".to_string(),
                )),
            },
        }
    }

    /// Drop state for clients whose quota has fully replenished.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
    }
}
