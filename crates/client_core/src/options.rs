use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use shared::domain::Username;
use url::Url;

pub const DEFAULT_API_PREFIX: &str = "/api";

/// Resolved settings for one `RealtimeClient`.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub server_url: Url,
    pub api_prefix: String,
    pub optimistic_group_echo: bool,
    pub roster_refresh_interval: Option<Duration>,
}

impl ClientOptions {
    pub fn new(server_url: Url) -> Self {
        Self {
            server_url,
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            optimistic_group_echo: false,
            roster_refresh_interval: None,
        }
    }

    pub fn parse(server_url: &str) -> Result<Self> {
        let url = Url::parse(server_url)
            .with_context(|| format!("invalid server url: {server_url}"))?;
        match url.scheme() {
            "http" | "https" => Ok(Self::new(url)),
            other => Err(anyhow!(
                "server_url must start with http:// or https:// (got {other}://)"
            )),
        }
    }

    /// Base URL for directory requests: the server URL plus the API prefix.
    pub fn api_base(&self) -> Result<Url> {
        let mut url = self.server_url.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|_| anyhow!("server url cannot be a base: {}", self.server_url))?
            .pop_if_empty()
            .extend(self.api_prefix.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    /// `ws(s)://<server>/ws/{username}`, derived from the HTTP server URL.
    pub fn websocket_url(&self, username: &Username) -> Result<Url> {
        let mut url = self.server_url.clone();
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => return Err(anyhow!("unsupported server url scheme: {other}")),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("failed to derive websocket url from {}", self.server_url))?;
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|_| anyhow!("server url cannot be a base: {}", self.server_url))?
            .pop_if_empty()
            .push("ws")
            .push(username.as_str());
        Ok(url)
    }
}
