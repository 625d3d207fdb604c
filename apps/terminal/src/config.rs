use std::{
    fs, io,
    path::Path,
    time::Duration,
};

use anyhow::{anyhow, Context};
use client_core::{ClientOptions, DEFAULT_API_PREFIX};
use serde::Deserialize;

pub const CONFIG_FILE: &str = "chat.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub api_prefix: String,
    pub username: Option<String>,
    pub access_token: Option<String>,
    pub roster_refresh_secs: Option<u64>,
    pub optimistic_group_echo: bool,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000".into(),
            api_prefix: DEFAULT_API_PREFIX.into(),
            username: None,
            access_token: None,
            roster_refresh_secs: None,
            optimistic_group_echo: false,
            log_filter: "info".into(),
        }
    }
}

/// Shape of `chat.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    server_url: Option<String>,
    api_prefix: Option<String>,
    username: Option<String>,
    access_token: Option<String>,
    roster_refresh_secs: Option<u64>,
    optimistic_group_echo: Option<bool>,
    log_filter: Option<String>,
}

/// Defaults, then the config file, then the environment. An explicitly named
/// file must exist; the default `chat.toml` is optional.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let (path, explicit) = match path {
        Some(path) => (path, true),
        None => (Path::new(CONFIG_FILE), false),
    };
    match fs::read_to_string(path) {
        Ok(raw) => settings
            .apply_file(&raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound && !explicit => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()))
        }
    }

    settings.apply_env(|key| std::env::var(key).ok())?;
    Ok(settings)
}

impl Settings {
    fn apply_file(&mut self, raw: &str) -> anyhow::Result<()> {
        let file: FileSettings = toml::from_str(raw)?;
        if let Some(v) = file.server_url {
            self.server_url = v;
        }
        if let Some(v) = file.api_prefix {
            self.api_prefix = v;
        }
        if let Some(v) = file.username {
            self.username = Some(v);
        }
        if let Some(v) = file.access_token {
            self.access_token = Some(v);
        }
        if let Some(v) = file.roster_refresh_secs {
            self.roster_refresh_secs = Some(v);
        }
        if let Some(v) = file.optimistic_group_echo {
            self.optimistic_group_echo = v;
        }
        if let Some(v) = file.log_filter {
            self.log_filter = v;
        }
        Ok(())
    }

    /// `CHAT_<KEY>` and then `APP__<KEY>`, so the latter wins.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        let var = |key: &str| {
            lookup(&format!("APP__{key}")).or_else(|| lookup(&format!("CHAT_{key}")))
        };

        if let Some(v) = var("SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = var("API_PREFIX") {
            self.api_prefix = v;
        }
        if let Some(v) = var("USERNAME") {
            self.username = Some(v);
        }
        if let Some(v) = var("ACCESS_TOKEN") {
            self.access_token = Some(v);
        }
        if let Some(v) = var("ROSTER_REFRESH_SECS") {
            let secs = v
                .parse::<u64>()
                .with_context(|| format!("ROSTER_REFRESH_SECS must be a number of seconds, got '{v}'"))?;
            self.roster_refresh_secs = Some(secs);
        }
        if let Some(v) = var("OPTIMISTIC_GROUP_ECHO") {
            self.optimistic_group_echo = parse_flag(&v)
                .ok_or_else(|| anyhow!("OPTIMISTIC_GROUP_ECHO must be true or false, got '{v}'"))?;
        }
        if let Some(v) = var("LOG_FILTER") {
            self.log_filter = v;
        }
        Ok(())
    }

    pub fn client_options(&self) -> anyhow::Result<ClientOptions> {
        let mut options = ClientOptions::parse(&self.server_url)?;
        options.api_prefix = self.api_prefix.clone();
        options.optimistic_group_echo = self.optimistic_group_echo;
        options.roster_refresh_interval = self
            .roster_refresh_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        Ok(options)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
