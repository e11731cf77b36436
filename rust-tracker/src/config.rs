//! Configuration module for environment variable parsing.
//!
//! Only the binaries call [`Config::from_env`]. Library components receive the
//! typed pieces (`ClientConfig`, `PollConfig`, ...) explicitly at construction.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::error::ConfigError;
use crate::model::CampaignWindow;

/// Connection settings for a remote HTTP collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL; always ends with `/` so relative paths join beneath it
    pub endpoint: Url,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let mut endpoint = Url::parse(endpoint.trim()).map_err(|e| ConfigError::InvalidValue {
            key: "endpoint".to_string(),
            message: e.to_string(),
        })?;

        if endpoint.cannot_be_a_base() {
            return Err(ConfigError::InvalidValue {
                key: "endpoint".to_string(),
                message: format!("{} cannot be used as a base URL", endpoint),
            });
        }

        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        Ok(Self { endpoint, timeout })
    }
}

/// Where tracking entries live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Sqlite(PathBuf),
    Http(ClientConfig),
}

/// Where inbound messages come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxBackend {
    /// External mail CLI (`<program> gmail search ...`)
    Command { program: String },
    /// Directory of raw RFC 5322 messages
    Maildir(PathBuf),
}

/// Poll cycle settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Which sends are eligible for correlation
    pub correlation_window: CampaignWindow,
    /// How far back the mailbox search looks
    pub mailbox_window: CampaignWindow,
    /// Maximum number of inbound messages fetched per cycle
    pub max_results: usize,
    /// Bound on a single mailbox fetch
    pub fetch_timeout: Duration,
    /// Delay between scheduled cycles
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            correlation_window: CampaignWindow::days(30),
            mailbox_window: CampaignWindow::days(7),
            max_results: 50,
            fetch_timeout: Duration::from_secs(30),
            interval: Duration::from_secs(3600),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Tracking store backend (`REPLYTRACK_STORE`: memory, sqlite or http)
    pub store: StoreBackend,

    /// Mailbox source for poll cycles
    pub mailbox: MailboxBackend,

    /// External mail client used to transmit
    pub mail_cli: String,

    /// Bound on a single transmit invocation
    pub transmit_timeout: Duration,

    pub poll: PollConfig,

    // =========================================================================
    // Web Server Configuration
    // =========================================================================

    /// Port for the tracking API to listen on
    pub port: u16,

    /// Shared secret for HMAC verification of inbound reply webhooks
    pub inbound_webhook_secret: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mail_cli = env::var("MAIL_CLI").unwrap_or_else(|_| "gog".to_string());

        let store = match env::var("REPLYTRACK_STORE")
            .unwrap_or_else(|_| "sqlite".to_string())
            .trim()
            .to_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "sqlite" => StoreBackend::Sqlite(
                env::var("REPLYTRACK_STORE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("tracking.db")),
            ),
            "http" => {
                let url = env::var("REPLYTRACK_URL")
                    .unwrap_or_else(|_| "http://localhost:8080/".to_string());
                let timeout = Duration::from_millis(parse_or("REPLYTRACK_TIMEOUT_MS", 10_000));
                StoreBackend::Http(ClientConfig::new(&url, timeout)?)
            }
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "REPLYTRACK_STORE".to_string(),
                    message: format!("unknown store backend {:?}", other),
                })
            }
        };

        let mailbox = match env::var("MAILBOX_BACKEND")
            .unwrap_or_else(|_| "command".to_string())
            .trim()
            .to_lowercase()
            .as_str()
        {
            "command" => MailboxBackend::Command {
                program: mail_cli.clone(),
            },
            "maildir" => {
                let path = env::var("MAILDIR_PATH").map_err(|_| ConfigError::InvalidValue {
                    key: "MAILDIR_PATH".to_string(),
                    message: "required when MAILBOX_BACKEND=maildir".to_string(),
                })?;
                MailboxBackend::Maildir(PathBuf::from(path))
            }
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "MAILBOX_BACKEND".to_string(),
                    message: format!("unknown mailbox backend {:?}", other),
                })
            }
        };

        let defaults = PollConfig::default();
        let poll = PollConfig {
            correlation_window: CampaignWindow::days(parse_or(
                "CORRELATION_WINDOW_DAYS",
                defaults.correlation_window.days,
            )),
            mailbox_window: CampaignWindow::days(parse_or(
                "MAILBOX_WINDOW_DAYS",
                defaults.mailbox_window.days,
            )),
            max_results: parse_or("MAILBOX_MAX_RESULTS", defaults.max_results),
            fetch_timeout: Duration::from_millis(parse_or("MAILBOX_TIMEOUT_MS", 30_000)),
            interval: Duration::from_secs(parse_or("POLL_INTERVAL_SECS", 3600)),
        };

        Ok(Config {
            store,
            mailbox,
            mail_cli,
            transmit_timeout: Duration::from_millis(parse_or("MAIL_CLI_TIMEOUT_MS", 60_000)),
            poll,
            port: parse_or("PORT", 8080),
            inbound_webhook_secret: env::var("INBOUND_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        })
    }

    /// Settings for the tracking API handlers.
    pub fn web(&self) -> WebConfig {
        WebConfig {
            inbound_webhook_secret: self.inbound_webhook_secret.clone(),
            correlation_window: self.poll.correlation_window,
        }
    }
}

/// What the tracking API handlers need from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebConfig {
    pub inbound_webhook_secret: Option<String>,
    /// Sends considered when correlating a pushed inbound reply
    pub correlation_window: CampaignWindow,
}

/// Parse an environment variable, warning and falling back on bad input.
fn parse_or<T>(name: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_valid() {
        env::set_var("TEST_REPLYTRACK_PORT", "9090");
        assert_eq!(parse_or("TEST_REPLYTRACK_PORT", 8080u16), 9090);
        env::remove_var("TEST_REPLYTRACK_PORT");
    }

    #[test]
    fn test_parse_or_invalid_falls_back() {
        env::set_var("TEST_REPLYTRACK_DAYS", "soon");
        assert_eq!(parse_or("TEST_REPLYTRACK_DAYS", 30u32), 30);
        env::remove_var("TEST_REPLYTRACK_DAYS");
    }

    #[test]
    fn test_parse_or_default() {
        assert_eq!(parse_or("NONEXISTENT_REPLYTRACK_VAR", 7u32), 7);
    }

    #[test]
    fn test_client_config_adds_trailing_slash() {
        let config =
            ClientConfig::new("https://tracker.example.com/v1", Duration::from_secs(5)).unwrap();
        assert_eq!(config.endpoint.as_str(), "https://tracker.example.com/v1/");
        assert_eq!(
            config.endpoint.join("api/campaigns/stats").unwrap().as_str(),
            "https://tracker.example.com/v1/api/campaigns/stats"
        );
    }

    #[test]
    fn test_client_config_rejects_garbage() {
        assert!(ClientConfig::new("not a url", Duration::from_secs(5)).is_err());
        assert!(ClientConfig::new("mailto:a@b.com", Duration::from_secs(5)).is_err());
    }
}
