//! Broker configuration
//!
//! The broker is configured entirely through environment variables so it
//! can be launched by dev tooling without a config file:
//!
//! - `LEASH_BIND`: bind address (default `127.0.0.1`)
//! - `LEASH_PORT`: listen port (default `9150`, `0` picks a free port)
//! - `LEASH_TOKEN`: shared auth token; unset generates one, empty string
//!   disables authentication entirely

use tracing::warn;

use leash_protocol::DEFAULT_PORT;
use leash_utils::generate_auth_token;

/// Runtime settings for a broker instance
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address to bind the listener to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Shared secret connections must present; `None` disables auth
    pub token: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            token: None,
        }
    }
}

impl BrokerConfig {
    /// Build a config from the environment, generating an auth token when
    /// none was provided
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(bind) = std::env::var("LEASH_BIND") {
            if !bind.is_empty() {
                config.bind = bind;
            }
        }

        if let Ok(port) = std::env::var("LEASH_PORT") {
            match port.parse() {
                Ok(port) => config.port = port,
                Err(_) => warn!("Ignoring unparseable LEASH_PORT value '{}'", port),
            }
        }

        config.token = match std::env::var("LEASH_TOKEN") {
            Ok(token) if token.is_empty() => None,
            Ok(token) => Some(token),
            Err(_) => Some(generate_auth_token()),
        };

        config
    }

    /// The `host:port` string the listener binds to
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
