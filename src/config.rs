//! Gateway configuration and account resolution
//!
//! The gateway maps an opaque account identifier, taken from the
//! WebSocket request path `/websocket/<id>`, to the backend it should
//! connect to and the credentials to use there.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;

/// Path prefix under which gateway sessions are requested.
pub const WS_PATH_PREFIX: &str = "/websocket/";

/// One configured ManageSieve backend.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    /// Backend hostname (also used for TLS server-name verification).
    pub host: String,
    /// Backend ManageSieve port (conventionally 4190).
    pub port: u16,
    /// Authenticate against the backend on the browser's behalf.
    /// When false, AUTHENTICATE is left to the browser-side client.
    #[serde(default)]
    pub proxy_auth: bool,
    /// SASL login name, required when `proxy_auth` is set.
    #[serde(default)]
    pub username: Option<String>,
    /// SASL password, required when `proxy_auth` is set.
    #[serde(default)]
    pub password: Option<String>,
    /// SASL authorization identity; defaults to `username`.
    #[serde(default)]
    pub authorization_id: Option<String>,
    /// Skip backend certificate verification. Opt-in for backends
    /// running with self-signed certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Account {
    /// The credentials for proxy authentication.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when `proxy_auth` is set but the
    /// username or password is missing.
    pub fn credentials(&self) -> Result<(&str, &str, &str)> {
        let username = self
            .username
            .as_deref()
            .ok_or_else(|| Error::Config("proxy_auth account has no username".into()))?;
        let password = self
            .password
            .as_deref()
            .ok_or_else(|| Error::Config("proxy_auth account has no password".into()))?;
        let authzid = self.authorization_id.as_deref().unwrap_or(username);
        Ok((username, password, authzid))
    }
}

/// Full gateway configuration: the listen address and the accounts
/// reachable through this gateway, keyed by their path identifier.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    pub accounts: HashMap<String, Account>,
}

fn default_listen() -> String {
    "127.0.0.1:8087".to_string()
}

impl GatewayConfig {
    /// Parse a configuration from its JSON representation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid config: {e}")))
    }

    /// Load a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the file cannot be read or
    /// parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Build a single-account configuration from environment variables.
    ///
    /// Reads from `.env` if present. Required when `SIEVE_PROXY_AUTH`
    /// is enabled:
    /// - `SIEVE_USERNAME`
    /// - `SIEVE_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `SIEVE_HOST` (default: `127.0.0.1`)
    /// - `SIEVE_PORT` (default: `4190`)
    /// - `SIEVE_PROXY_AUTH` (default: `false`)
    /// - `SIEVE_ACCEPT_INVALID_CERTS` (default: `false`)
    /// - `GATEWAY_LISTEN` (default: `127.0.0.1:8087`)
    /// - `GATEWAY_ACCOUNT_ID` (default: `default`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a variable fails to parse.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let account = Account {
            host: env::var("SIEVE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SIEVE_PORT")
                .unwrap_or_else(|_| "4190".to_string())
                .parse()
                .map_err(|e| Error::Config(format!("invalid SIEVE_PORT: {e}")))?,
            proxy_auth: env_flag("SIEVE_PROXY_AUTH"),
            username: env::var("SIEVE_USERNAME").ok(),
            password: env::var("SIEVE_PASSWORD").ok(),
            authorization_id: env::var("SIEVE_AUTHORIZATION_ID").ok(),
            accept_invalid_certs: env_flag("SIEVE_ACCEPT_INVALID_CERTS"),
        };

        let id = env::var("GATEWAY_ACCOUNT_ID").unwrap_or_else(|_| "default".to_string());

        Ok(Self {
            listen: env::var("GATEWAY_LISTEN").unwrap_or_else(|_| default_listen()),
            accounts: HashMap::from([(id, account)]),
        })
    }

    /// Look up an account by its path identifier.
    #[must_use]
    pub fn account(&self, id: &str) -> Option<&Account> {
        self.accounts.get(id)
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name).is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "yes"))
}

/// Extract the account identifier from a request path.
///
/// Only `GET /websocket/<id>` requests are routed to a gateway
/// session; anything else yields `None`.
#[must_use]
pub fn account_id_from_path(path: &str) -> Option<&str> {
    let id = path.strip_prefix(WS_PATH_PREFIX)?;
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id)
}
