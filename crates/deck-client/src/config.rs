//! Client configuration

use deck_core::{DEFAULT_FPS, DEFAULT_PORT};
use deck_transport::TcpConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Upper bound for every configured delay, so deadlines never overflow
pub const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms).min(MAX_DELAY)
}

/// Settings for one deck connection.
///
/// Every field has a default, so a config file only needs the values it
/// changes:
///
/// ```toml
/// host = "10.0.0.40"
/// response_timeout_ms = 800
///
/// [reconnect]
/// max_attempts = 10
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// How long a command may wait for its reply before it is resent
    pub response_timeout_ms: u64,
    /// Pause between a reply and dispatching the next queued command
    pub dispatch_delay_ms: u64,
    /// Commands allowed to wait behind the one in flight
    pub max_backlog: usize,
    /// Resends of one command before the connection is considered dead
    pub max_retries: u32,
    /// Quiet period after a slot notification before clips are re-queried
    pub refresh_debounce_ms: u64,
    /// How long `end()` waits for the deck to close the socket
    pub close_timeout_ms: u64,
    /// Frame rate used to turn clip timecodes into milliseconds
    pub fps: u32,
    /// TCP keepalive interval (0 = disabled)
    pub keepalive_secs: u64,
    /// Buffered events per subscriber
    pub event_capacity: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 5000,
            response_timeout_ms: 500,
            dispatch_delay_ms: 200,
            max_backlog: 5,
            max_retries: 5,
            refresh_debounce_ms: 200,
            close_timeout_ms: 2000,
            fps: DEFAULT_FPS,
            keepalive_secs: 30,
            event_capacity: 256,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl DeckConfig {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            ..Default::default()
        }
    }

    /// `host:port` to connect to; a host that already names a port wins
    pub fn address(&self) -> String {
        if self.host.parse::<SocketAddr>().is_ok() {
            return self.host.clone();
        }
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => format!("[{}]:{}", ip, self.port),
            _ => format!("{}:{}", self.host, self.port),
        }
    }

    pub fn response_timeout(&self) -> Duration {
        millis(self.response_timeout_ms)
    }

    pub fn dispatch_delay(&self) -> Duration {
        millis(self.dispatch_delay_ms)
    }

    pub fn refresh_debounce(&self) -> Duration {
        millis(self.refresh_debounce_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        millis(self.close_timeout_ms)
    }

    pub fn tcp_config(&self) -> TcpConfig {
        TcpConfig {
            keepalive_secs: self.keepalive_secs,
            connect_timeout: millis(self.connect_timeout_ms),
            ..Default::default()
        }
    }
}

/// What to do once a command has exhausted its retries.
///
/// The session is torn down and, when enabled, the client reconnects with
/// exponential backoff and runs the full bootstrap again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Delay before the given attempt (1-based): doubles each time, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.initial_backoff_ms.saturating_mul(1u64 << shift);
        millis(delay.min(self.max_backoff_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DeckConfig::default();
        assert_eq!(config.port, 9993);
        assert_eq!(config.response_timeout(), Duration::from_millis(500));
        assert_eq!(config.dispatch_delay(), Duration::from_millis(200));
        assert_eq!(config.max_backlog, 5);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.close_timeout(), Duration::from_secs(2));
        assert_eq!(config.fps, 60);
    }

    #[test]
    fn test_address() {
        assert_eq!(DeckConfig::new("10.0.0.40").address(), "10.0.0.40:9993");
        assert_eq!(DeckConfig::new("deck.local").address(), "deck.local:9993");
        assert_eq!(DeckConfig::new("127.0.0.1:4000").address(), "127.0.0.1:4000");
        assert_eq!(DeckConfig::new("::1").address(), "[::1]:9993");
    }

    #[test]
    fn test_huge_delays_are_capped() {
        let config: DeckConfig = toml::from_str(
            "response_timeout_ms = 9223372036854775807\n\
             close_timeout_ms = 9223372036854775807\n\
             [reconnect]\n\
             initial_backoff_ms = 9223372036854775807\n\
             max_backoff_ms = 9223372036854775807\n",
        )
        .unwrap();
        assert_eq!(config.response_timeout(), MAX_DELAY);
        assert_eq!(config.close_timeout(), MAX_DELAY);
        assert_eq!(config.reconnect.backoff(3), MAX_DELAY);

        let config = DeckConfig {
            dispatch_delay_ms: u64::MAX,
            ..Default::default()
        };
        assert_eq!(config.dispatch_delay(), MAX_DELAY);

        // Deadlines stay representable
        let now = tokio::time::Instant::now();
        assert!(now.checked_add(config.response_timeout()).is_some());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectPolicy {
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
            ..Default::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1000));
        assert_eq!(policy.backoff(60), Duration::from_millis(1000));
    }
}
