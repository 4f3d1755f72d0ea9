// Local crates
use crate::tailer::models::TailerSettings;
use crate::vsphere::client::ClientOptions;

// External crates
use anyhow::{Context, Result};
use config::{Config, File, FileFormat};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::instrument;

pub const ENV_URL: &str = "VCEL_URL";
pub const ENV_INSECURE: &str = "VCEL_INSECURE";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directives, overridden by `RUST_LOG`.
    pub level: String,
    pub format: LogFormat,
    /// Write a daily rolling file here instead of stderr.
    pub directory: Option<PathBuf>,
    pub tokio_console: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Text,
            directory: None,
            tokio_console: false,
        }
    }
}

/// Event logger settings, resolved once at startup.
///
/// Precedence, highest first: command line flags, `VCEL_*` environment
/// variables, the optional TOML file, built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub url: String,
    pub insecure: bool,
    /// Datacenter to tail; the inventory's only datacenter when unset.
    pub datacenter: Option<String>,
    pub poll_interval_secs: u64,
    pub max_events: u32,
    /// `0` lets the server pick.
    pub page_size: u32,
    pub api_version: String,
    pub request_timeout_secs: u64,
    pub metrics_addr: Option<String>,
    pub log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            url: String::new(),
            insecure: false,
            datacenter: None,
            poll_interval_secs: 10,
            max_events: 10,
            page_size: 0,
            api_version: "7.0".to_string(),
            request_timeout_secs: 60,
            metrics_addr: None,
            log: LogSettings::default(),
        }
    }
}

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub url: Option<String>,
    pub insecure: Option<bool>,
    pub datacenter: Option<String>,
    pub metrics_addr: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("poll_interval_secs must be at least 1")]
    ZeroPollInterval,
    #[error("max_events must be at least 1")]
    ZeroMaxEvents,
    #[error("request_timeout_secs must be at least 1")]
    ZeroRequestTimeout,
    #[error("invalid metrics_addr {0:?}, expected host:port")]
    BadMetricsAddr(String),
}

impl Settings {
    /// Load settings from the process environment.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        Self::load_with_env(config_path, overrides, |key| std::env::var(key).ok())
    }

    #[instrument(
        name = "config_loader",
        target = "helpers::load_config",
        level = "trace",
        skip_all
    )]
    pub fn load_with_env<E>(
        config_path: Option<&Path>,
        overrides: Overrides,
        env: E,
    ) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let mut settings = match config_path {
            Some(path) => {
                tracing::trace!(
                    configuration_file_path = %path.display(),
                    "Loading event logger configuration file"
                );
                Config::builder()
                    .add_source(File::from(path).format(FileFormat::Toml).required(true))
                    .build()
                    .and_then(|raw| raw.try_deserialize::<Settings>())
                    .with_context(|| format!("failed to load config file {}", path.display()))?
            }
            None => Settings::default(),
        };

        if let Some(url) = env(ENV_URL).filter(|v| !v.is_empty()) {
            settings.url = url;
        }
        if let Some(insecure) = env(ENV_INSECURE).filter(|v| !v.is_empty()) {
            settings.insecure = insecure == "1";
        }

        let Overrides {
            url,
            insecure,
            datacenter,
            metrics_addr,
        } = overrides;
        if let Some(url) = url {
            settings.url = url;
        }
        if let Some(insecure) = insecure {
            settings.insecure = insecure;
        }
        if datacenter.is_some() {
            settings.datacenter = datacenter;
        }
        if metrics_addr.is_some() {
            settings.metrics_addr = metrics_addr;
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.poll_interval_secs == 0 {
            return Err(SettingsError::ZeroPollInterval);
        }
        if self.max_events == 0 {
            return Err(SettingsError::ZeroMaxEvents);
        }
        if self.request_timeout_secs == 0 {
            return Err(SettingsError::ZeroRequestTimeout);
        }
        self.metrics_socket_addr()?;
        Ok(())
    }

    pub fn metrics_socket_addr(&self) -> Result<Option<SocketAddr>, SettingsError> {
        self.metrics_addr
            .as_deref()
            .map(|addr| {
                addr.parse()
                    .map_err(|_| SettingsError::BadMetricsAddr(addr.to_string()))
            })
            .transpose()
    }

    pub fn tailer_settings(&self) -> TailerSettings {
        TailerSettings {
            max_events: self.max_events,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            insecure: self.insecure,
            api_version: self.api_version.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    /// Copy with the URL password masked, for printing.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let Ok(mut url) = Url::parse(&self.url) {
            if url.password().is_some() && url.set_password(Some("xxxxx")).is_ok() {
                copy.url = url.to_string();
            }
        }
        copy
    }
}
