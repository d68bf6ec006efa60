use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;

use crate::error::ConfigError;
use crate::lock::LockConfig;
use crate::sync::ReconnectPolicy;

pub const DEFAULT_WS_URL: &str = "ws://localhost:8000";

/// Runtime settings, read from `DESKGRID_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub tz: Tz,
    pub lock: LockConfig,
    pub reconnect: ReconnectPolicy,
    pub ws_url: String,
    /// File holding the sync channel's bearer token.
    pub token_file: Option<PathBuf>,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to defaults;
    /// an unknown zone or an inconsistent lock timing is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let num = |key: &str, default: u64| -> u64 {
            lookup(key).and_then(|s| s.parse().ok()).unwrap_or(default)
        };

        let tz = match lookup("DESKGRID_TZ") {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| ConfigError::UnknownTimezone(name))?,
            None => Tz::UTC,
        };

        let lock = LockConfig::new(
            Duration::from_secs(num("DESKGRID_HEARTBEAT_SECS", 25)),
            Duration::from_secs(num("DESKGRID_LOCK_TTL_SECS", 60)),
            Duration::from_secs(num("DESKGRID_LOCK_MAX_HOLD_SECS", 300)),
        )?;

        let max_attempts = num("DESKGRID_RECONNECT_ATTEMPTS", 5);
        let reconnect = ReconnectPolicy::with_delays(
            u32::try_from(max_attempts).map_err(|_| ConfigError::Invalid("too many reconnect attempts"))?,
            num("DESKGRID_RECONNECT_BASE_MS", 3_000),
            num("DESKGRID_RECONNECT_MAX_MS", 30_000),
        );
        if reconnect.base_delay_ms > reconnect.max_delay_ms {
            return Err(ConfigError::Invalid("reconnect base delay exceeds max delay"));
        }

        Ok(Self {
            tz,
            lock,
            reconnect,
            ws_url: lookup("DESKGRID_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
            token_file: lookup("DESKGRID_TOKEN_FILE").map(PathBuf::from),
            metrics_port: lookup("DESKGRID_METRICS_PORT").and_then(|s| s.parse().ok()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = from(&[]).unwrap();
        assert_eq!(c.tz, Tz::UTC);
        assert_eq!(c.lock, LockConfig::default());
        assert_eq!(c.reconnect, ReconnectPolicy::default());
        assert_eq!(c.ws_url, DEFAULT_WS_URL);
        assert_eq!(c.token_file, None);
        assert_eq!(c.metrics_port, None);
    }

    #[test]
    fn overrides() {
        let c = from(&[
            ("DESKGRID_TZ", "Europe/Berlin"),
            ("DESKGRID_HEARTBEAT_SECS", "10"),
            ("DESKGRID_LOCK_TTL_SECS", "30"),
            ("DESKGRID_RECONNECT_ATTEMPTS", "2"),
            ("DESKGRID_METRICS_PORT", "9100"),
            ("DESKGRID_WS_URL", "wss://desks.example.com"),
            ("DESKGRID_TOKEN_FILE", "/run/deskgrid/token"),
        ])
        .unwrap();
        assert_eq!(c.tz, chrono_tz::Europe::Berlin);
        assert_eq!(c.lock.heartbeat(), Duration::from_secs(10));
        assert_eq!(c.lock.ttl(), Duration::from_secs(30));
        assert_eq!(c.reconnect.max_attempts, 2);
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.ws_url, "wss://desks.example.com");
        assert_eq!(c.token_file, Some(PathBuf::from("/run/deskgrid/token")));
    }

    #[test]
    fn garbage_numbers_use_defaults() {
        let c = from(&[("DESKGRID_HEARTBEAT_SECS", "soon"), ("DESKGRID_METRICS_PORT", "x")]).unwrap();
        assert_eq!(c.lock.heartbeat(), Duration::from_secs(25));
        assert_eq!(c.metrics_port, None);
    }

    #[test]
    fn heartbeat_must_beat_ttl() {
        let err = from(&[("DESKGRID_HEARTBEAT_SECS", "60")]).unwrap_err();
        assert_eq!(err, ConfigError::HeartbeatNotBelowTtl { heartbeat_ms: 60_000, ttl_ms: 60_000 });
        assert!(matches!(from(&[("DESKGRID_LOCK_TTL_SECS", "600")]), Err(ConfigError::TtlAboveMaxHold { .. })));
    }

    #[test]
    fn unknown_zone() {
        assert_eq!(
            from(&[("DESKGRID_TZ", "Mars/Olympus")]).unwrap_err(),
            ConfigError::UnknownTimezone("Mars/Olympus".into())
        );
    }
}
