//! Sliding-window rate limiting for credential endpoints

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::auth::middleware::peer_ip;
use super::types::ApiError;
use crate::core::config::RateLimitConfig;
use crate::core::constants::RATE_LIMIT_SWEEP_INTERVAL_SECS;
use crate::utils::net::{IpRange, any_contains};

/// Result of one metered attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
}

/// Per-key list of attempt instants within the trailing window
pub struct SlidingWindowLimiter {
    max_attempts: u32,
    window: Duration,
    attempts: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            window: config.window,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Meter one attempt for `key` now
    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    /// Count attempts in the window. A denied attempt is not recorded.
    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut attempts = self.attempts.lock();
        let entry = attempts.entry(key.to_string()).or_default();
        prune(entry, now, self.window);

        let used = u32::try_from(entry.len()).unwrap_or(u32::MAX);
        if used >= self.max_attempts {
            return RateDecision {
                allowed: false,
                limit: self.max_attempts,
                remaining: 0,
            };
        }
        entry.push_back(now);
        RateDecision {
            allowed: true,
            limit: self.max_attempts,
            remaining: self.max_attempts - used - 1,
        }
    }

    /// Evict keys whose attempts have all aged out
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut attempts = self.attempts.lock();
        let before = attempts.len();
        attempts.retain(|_, entry| {
            prune(entry, now, self.window);
            !entry.is_empty()
        });
        before - attempts.len()
    }

    pub fn start_sweep_task(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(RATE_LIMIT_SWEEP_INTERVAL_SECS));
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("Rate limit sweep task shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let evicted = limiter.sweep();
                        if evicted > 0 {
                            tracing::trace!(evicted, "Rate limit entries swept");
                        }
                    }
                }
            }
        })
    }
}

fn prune(entry: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = entry.front() {
        if now.saturating_duration_since(oldest) >= window {
            entry.pop_front();
        } else {
            break;
        }
    }
}

/// Rate limit middleware state
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<SlidingWindowLimiter>,
    /// Proxies whose `X-Forwarded-For` is honored
    pub trusted_proxies: Arc<Vec<IpRange>>,
}

/// Key for the caller: the direct peer, or the nearest untrusted hop in
/// `X-Forwarded-For` when the peer is a trusted proxy.
pub fn client_key(peer: Option<IpAddr>, headers: &HeaderMap, trusted: &[IpRange]) -> String {
    let Some(peer) = peer else {
        return "unknown".to_string();
    };
    if !any_contains(trusted, peer) {
        return peer.to_string();
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    for hop in forwarded.rsplit(',') {
        match hop.trim().parse::<IpAddr>() {
            Ok(ip) if any_contains(trusted, ip) => continue,
            Ok(ip) => return ip.to_string(),
            Err(_) => break,
        }
    }
    peer.to_string()
}

/// Meter POST requests; other methods pass unmetered
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::POST {
        return next.run(request).await;
    }

    let key = client_key(
        peer_ip(request.extensions()),
        request.headers(),
        &state.trusted_proxies,
    );
    let decision = state.limiter.check(&key);

    if !decision.allowed {
        tracing::warn!(
            %key,
            path = %request.uri().path(),
            "Rate limit exceeded"
        );
        return ApiError::rate_limited(state.limiter.window().as_secs()).into_response();
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", HeaderValue::from(decision.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(decision.remaining));
    response
}
