use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use reqwest::Url;
use thiserror::Error;

use crate::forward::ForwardingConfig;
use crate::rate_limit::RateLimitPolicy;

const DEFAULT_BODY_LIMIT: usize = 5 * 1024 * 1024;

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "webhook-relay")]
#[command(about = "Authenticated, rate limited relay in front of a webhook API")]
pub struct Args {
    // Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    // Downstream webhook url
    #[arg(long, env = "DISCORD_WEBHOOK_URL")]
    pub webhook_url: Url,

    // Shared secret expected in x-secret-header
    #[arg(long, env = "SECRET_HEADER_KEY", hide_env_values = true)]
    pub secret: Option<String>,

    // Rate limit max requests per window
    #[arg(long, env = "RATE_LIMIT", default_value_t = 10)]
    pub rate_limit: u32,

    // Rate limit window in seconds
    #[arg(long, env = "RATE_WINDOW", default_value_t = 60)]
    pub rate_window: u64,

    // Max request body size in bytes
    #[arg(long, env = "BODY_LIMIT", default_value_t = DEFAULT_BODY_LIMIT)]
    pub body_limit: usize,

    // Downstream call timeout in seconds
    #[arg(long, env = "DOWNSTREAM_TIMEOUT", default_value_t = 10)]
    pub downstream_timeout: u64,

    // Log payload sizes instead of payload contents
    #[arg(long, env = "REDACT_PAYLOADS")]
    pub redact_payloads: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid listen address {0}")]
    ListenAddr(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Everything the gateway needs, resolved and validated.
#[derive(Clone)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    pub secret: Option<String>,
    pub downstream_url: Url,
    pub window: Duration,
    pub max_per_window: u32,
    pub body_limit: usize,
    pub downstream_timeout: Duration,
    pub redact_payloads: bool,
}

impl GatewayConfig {
    /// Config with default limits for the given downstream and secret.
    pub fn new(downstream_url: Url, secret: Option<String>) -> Self {
        let policy = RateLimitPolicy::default();
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            secret,
            downstream_url,
            window: policy.window,
            max_per_window: policy.max_per_window,
            body_limit: DEFAULT_BODY_LIMIT,
            downstream_timeout: Duration::from_secs(10),
            redact_payloads: false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.is_zero() {
            return Err(ConfigError::Zero("rate window"));
        }
        if self.max_per_window == 0 {
            return Err(ConfigError::Zero("rate limit"));
        }
        if self.body_limit == 0 {
            return Err(ConfigError::Zero("body limit"));
        }
        if self.downstream_timeout.is_zero() {
            return Err(ConfigError::Zero("downstream timeout"));
        }
        Ok(())
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            window: self.window,
            max_per_window: self.max_per_window,
        }
    }

    pub fn forwarding(&self) -> ForwardingConfig {
        ForwardingConfig {
            base_url: self.downstream_url.clone(),
            timeout: self.downstream_timeout,
            redact_payloads: self.redact_payloads,
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // the webhook url embeds a token, log only its host
        f.debug_struct("GatewayConfig")
            .field("listen_addr", &self.listen_addr)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("downstream_host", &self.downstream_url.host_str())
            .field("window", &self.window)
            .field("max_per_window", &self.max_per_window)
            .field("body_limit", &self.body_limit)
            .field("downstream_timeout", &self.downstream_timeout)
            .field("redact_payloads", &self.redact_payloads)
            .finish()
    }
}

impl TryFrom<Args> for GatewayConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let listen_addr = format!("{}:{}", args.host, args.port);
        let listen_addr = listen_addr
            .parse()
            .map_err(|_| ConfigError::ListenAddr(listen_addr.clone()))?;

        let config = Self {
            listen_addr,
            secret: args.secret.filter(|s| !s.is_empty()),
            downstream_url: args.webhook_url,
            window: Duration::from_secs(args.rate_window),
            max_per_window: args.rate_limit,
            body_limit: args.body_limit,
            downstream_timeout: Duration::from_secs(args.downstream_timeout),
            redact_payloads: args.redact_payloads,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec![
            "webhook-relay",
            "--webhook-url",
            "https://example.com/api/webhooks/1/tok",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).expect("args parse")
    }

    #[test]
    fn defaults_match_documented_limits() {
        let config = GatewayConfig::try_from(parse(&["--secret", "s"])).expect("valid config");
        assert_eq!(config.window, Duration::from_secs(60));
        assert_eq!(config.max_per_window, 10);
        assert_eq!(config.body_limit, 5 * 1024 * 1024);
        assert_eq!(config.downstream_timeout, Duration::from_secs(10));
        assert_eq!(config.secret.as_deref(), Some("s"));
        assert!(!config.redact_payloads);
    }

    #[test]
    fn empty_secret_is_treated_as_missing() {
        let config = GatewayConfig::try_from(parse(&["--secret", ""])).expect("valid config");
        assert!(config.secret.is_none());
    }

    #[test]
    fn zero_window_is_rejected() {
        let err = GatewayConfig::try_from(parse(&["--rate-window", "0"])).unwrap_err();
        assert_eq!(err, ConfigError::Zero("rate window"));
    }

    #[test]
    fn zero_limit_is_rejected() {
        let err = GatewayConfig::try_from(parse(&["--rate-limit", "0"])).unwrap_err();
        assert_eq!(err, ConfigError::Zero("rate limit"));
    }

    #[test]
    fn bad_host_is_rejected() {
        let err = GatewayConfig::try_from(parse(&["--host", "not a host"])).unwrap_err();
        assert!(matches!(err, ConfigError::ListenAddr(_)));
    }

    #[test]
    fn debug_hides_secret_and_webhook_token() {
        let config =
            GatewayConfig::try_from(parse(&["--secret", "hunter2"])).expect("valid config");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("tok"));
    }
}
