//! Expiry policy: maps `(user-agent, origin, host)` to a content lifetime.

use chrono::{DateTime, Utc};

use crate::config::ExpiryConfig;

/// Either a finite instant, or the "never" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    At(DateTime<Utc>),
    Never,
}

impl Expiry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            Expiry::At(at) => *at < now,
            Expiry::Never => false,
        }
    }

    /// Millisecond representation used by the on-disk/object-store formats,
    /// where `-1` denotes "never" (spec.md §4.6).
    pub fn to_millis(&self) -> i64 {
        match self {
            Expiry::At(at) => at.timestamp_millis(),
            Expiry::Never => -1,
        }
    }

    pub fn from_millis(millis: i64) -> Self {
        if millis < 0 {
            Expiry::Never
        } else {
            Expiry::At(DateTime::from_timestamp_millis(millis).unwrap_or(Utc::now()))
        }
    }
}

/// Resolves the lifetime for a new record, given the policy and the
/// request's `User-Agent`, `Origin`, and `Host` headers. Precedence is
/// user-agent, then origin, then host (first match wins); resolving to a
/// zero-or-negative duration yields [`Expiry::Never`].
pub fn get_expiry(
    config: &ExpiryConfig,
    now: DateTime<Utc>,
    user_agent: Option<&str>,
    origin: Option<&str>,
    host: Option<&str>,
) -> Expiry {
    let minutes = user_agent
        .and_then(|ua| config.user_agent_overrides.get(ua))
        .or_else(|| origin.and_then(|o| config.origin_overrides.get(o)))
        .or_else(|| host.and_then(|h| config.host_overrides.get(h)))
        .copied()
        .unwrap_or(config.default_minutes);

    if minutes <= 0 {
        Expiry::Never
    } else {
        Expiry::At(now + chrono::Duration::minutes(minutes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_config() -> ExpiryConfig {
        ExpiryConfig {
            default_minutes: 60,
            user_agent_overrides: HashMap::new(),
            origin_overrides: HashMap::new(),
            host_overrides: HashMap::new(),
        }
    }

    #[test]
    fn default_lifetime_applies_with_no_overrides() {
        let now = Utc::now();
        let expiry = get_expiry(&base_config(), now, None, None, None);
        match expiry {
            Expiry::At(at) => assert_eq!(at, now + chrono::Duration::minutes(60)),
            Expiry::Never => panic!("expected finite expiry"),
        }
    }

    #[test]
    fn non_positive_default_means_never() {
        let mut config = base_config();
        config.default_minutes = 0;
        assert_eq!(get_expiry(&config, Utc::now(), None, None, None), Expiry::Never);
    }

    #[test]
    fn user_agent_override_takes_precedence_over_origin_and_host() {
        let mut config = base_config();
        config.user_agent_overrides.insert("bot/1.0".into(), 5);
        config.origin_overrides.insert("https://example.com".into(), 120);
        let now = Utc::now();
        let expiry = get_expiry(
            &config,
            now,
            Some("bot/1.0"),
            Some("https://example.com"),
            None,
        );
        assert_eq!(expiry, Expiry::At(now + chrono::Duration::minutes(5)));
    }

    #[test]
    fn host_override_used_when_others_absent() {
        let mut config = base_config();
        config.host_overrides.insert("cdn.example.com".into(), -1);
        let expiry = get_expiry(&config, Utc::now(), None, None, Some("cdn.example.com"));
        assert_eq!(expiry, Expiry::Never);
    }

    #[test]
    fn millis_round_trip() {
        let now = Utc::now();
        let expiry = Expiry::At(now);
        let millis = expiry.to_millis();
        assert_eq!(Expiry::from_millis(millis).to_millis(), millis);
        assert_eq!(Expiry::from_millis(-1), Expiry::Never);
    }
}
