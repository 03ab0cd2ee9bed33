//! Socket endpoint configuration from environment variables.

use handbrain_shared::{SocketError, Token};
use url::Url;

/// Which game server deployment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Plain websocket against the local dev server port.
    Development,
    /// TLS websocket against the production host.
    Production,
}

/// Connection endpoint configuration.
///
/// Environment variables:
/// - `HANDBRAIN_ENV`: "production" | "development" (default: "development")
/// - `HANDBRAIN_HOST`: server hostname (default: "localhost")
#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub environment: Environment,
    pub host: String,
}

impl SocketConfig {
    pub fn new(environment: Environment, host: impl Into<String>) -> Self {
        Self {
            environment,
            host: host.into(),
        }
    }

    /// Read configuration from environment variables.
    pub fn from_env() -> Self {
        let environment = match std::env::var("HANDBRAIN_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        };
        let host = std::env::var("HANDBRAIN_HOST").unwrap_or_else(|_| "localhost".to_string());
        Self { environment, host }
    }

    /// Base websocket endpoint for the configured environment.
    ///
    /// Development uses the dedicated socket port; production sits behind
    /// TLS on the default port.
    pub fn endpoint(&self) -> String {
        match self.environment {
            Environment::Development => format!("ws://{}:65080", self.host),
            Environment::Production => format!("wss://{}", self.host),
        }
    }

    /// Full connection URL with the session token as a query parameter.
    pub fn connect_url(&self, token: &Token) -> Result<Url, SocketError> {
        let mut url = Url::parse(&self.endpoint())
            .map_err(|e| SocketError::Transport(format!("invalid endpoint: {e}")))?;
        url.query_pairs_mut().append_pair("token", token.as_str());
        Ok(url)
    }
}
