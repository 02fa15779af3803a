//! Fixed-window per-IP rate limiter with TTL eviction, plus the
//! trusted-proxy header contract from spec.md §4.4.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::{AuthConfig, RateLimitRule, RateLimitsConfig};

struct Window {
    count: u64,
    window_start: Instant,
}

/// A single fixed-window counter keyed by an arbitrary string (the chosen
/// IP). `increment_and_check` atomically increments and reports whether the
/// new count exceeds the configured maximum.
pub struct FixedWindowLimiter {
    period: Duration,
    max_actions: u64,
    windows: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(rule: &RateLimitRule) -> Self {
        Self {
            period: Duration::from_secs(rule.period_minutes * 60),
            max_actions: rule.max_actions,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Increments the counter for `key`, evicting it first if its window has
    /// elapsed. Returns `true` iff the new count exceeds the maximum, i.e.
    /// the caller should be rejected.
    pub fn increment_and_check(&self, key: &str) -> bool {
        self.increment_and_check_at(key, Instant::now())
    }

    fn increment_and_check_at(&self, key: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap();

        self.evict_expired(&mut windows, now);

        let entry = windows.entry(key.to_string()).or_insert_with(|| Window {
            count: 0,
            window_start: now,
        });

        entry.count += 1;
        entry.count > self.max_actions
    }

    fn evict_expired(&self, windows: &mut HashMap<String, Window>, now: Instant) {
        windows.retain(|_, w| now.duration_since(w.window_start) < self.period);
    }
}

/// A secondary limiter with multiplicative backoff, used to deter scanning
/// via repeated not-found requests (spec.md §4.4). Each rejection doubles
/// the effective window for that key, up to a cap, so repeat offenders are
/// locked out for progressively longer.
pub struct BackoffLimiter {
    inner: FixedWindowLimiter,
    backoff: Mutex<HashMap<String, u32>>,
    max_multiplier: u32,
}

impl BackoffLimiter {
    pub fn new(rule: &RateLimitRule, max_multiplier: u32) -> Self {
        Self {
            inner: FixedWindowLimiter::new(rule),
            backoff: Mutex::new(HashMap::new()),
            max_multiplier,
        }
    }

    pub fn increment_and_check(&self, key: &str) -> bool {
        let exceeded = self.inner.increment_and_check(key);
        if exceeded {
            let mut backoff = self.backoff.lock().unwrap();
            let multiplier = backoff.entry(key.to_string()).or_insert(1);
            *multiplier = (*multiplier * 2).min(self.max_multiplier);
        }
        exceeded
    }
}

/// The three independent action limiters plus the not-found backoff
/// limiter, configured separately per spec.md §4.4.
pub struct RateLimiters {
    pub post: FixedWindowLimiter,
    pub update: FixedWindowLimiter,
    pub get: FixedWindowLimiter,
    pub not_found: BackoffLimiter,
}

impl RateLimiters {
    pub fn new(config: &RateLimitsConfig) -> Self {
        Self {
            post: FixedWindowLimiter::new(&config.post),
            update: FixedWindowLimiter::new(&config.update),
            get: FixedWindowLimiter::new(&config.get),
            not_found: BackoffLimiter::new(&config.not_found, 8),
        }
    }
}

/// The result of classifying a caller against the trusted-proxy headers.
pub struct CallerContext {
    /// The IP to use for rate limiting: either the connection IP, or the
    /// forwarded IP if a valid trusted-proxy API key was presented.
    pub rate_limit_ip: String,
    /// True unless the caller is a trusted server reporting only itself
    /// (no forwarded IP alongside a valid API key).
    pub is_real_user: bool,
}

/// Errors from the trusted-proxy header contract.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Unauthorized")]
    InvalidApiKey,
}

/// Classifies a caller per spec.md §4.4: if an API key is presented it must
/// be in the allowlist, and if a forwarded-IP is also present, that value
/// replaces the connection IP. A caller is a "real user" unless it presents
/// only a valid API key with no forwarded IP (a trusted server reporting
/// itself).
pub fn classify_caller(
    auth: &AuthConfig,
    connection_ip: &str,
    api_key: Option<&str>,
    forwarded_ip: Option<&str>,
) -> Result<CallerContext, AuthError> {
    match api_key {
        None => Ok(CallerContext {
            rate_limit_ip: connection_ip.to_string(),
            is_real_user: true,
        }),
        Some(key) => {
            if !auth.trusted_proxy_keys.iter().any(|k| k == key) {
                return Err(AuthError::InvalidApiKey);
            }

            match forwarded_ip {
                Some(ip) => Ok(CallerContext {
                    rate_limit_ip: ip.to_string(),
                    is_real_user: true,
                }),
                None => Ok(CallerContext {
                    rate_limit_ip: connection_ip.to_string(),
                    is_real_user: false,
                }),
            }
        }
    }
}

pub fn is_valid_admin_key(auth: &AuthConfig, key: &str) -> bool {
    auth.admin_keys.iter().any(|k| k == key)
}
