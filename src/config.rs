use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "rttmon.yaml";

/// Top-level configuration for the rttmon agent. Immutable for the process
/// lifetime; constructed once at startup and passed by reference.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Target host for round-trip probes.
    #[serde(default = "AppConfig::default_host")]
    pub host: String,
    /// Seconds between ticks of the sampling loop.
    #[serde(default = "AppConfig::default_interval", with = "humantime_serde")]
    pub interval: Duration,
    /// Latency above this value (strictly) raises an alert.
    #[serde(default = "AppConfig::default_threshold_ms")]
    pub threshold_ms: f64,
    /// Minimum spacing between alert notifications. Absent means every
    /// threshold-exceeding sample re-alerts.
    #[serde(default, with = "humantime_serde")]
    pub realert_cooldown: Option<Duration>,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub email: EmailConfig,
}

impl AppConfig {
    fn default_host() -> String {
        "8.8.8.8".to_string()
    }

    const fn default_interval() -> Duration {
        Duration::from_secs(10)
    }

    const fn default_threshold_ms() -> f64 {
        60.0
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            interval: Self::default_interval(),
            threshold_ms: Self::default_threshold_ms(),
            realert_cooldown: None,
            probe: ProbeConfig::default(),
            graph: GraphConfig::default(),
            store: StoreConfig::default(),
            email: EmailConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "ProbeConfig::default_count")]
    pub count: u32,
    /// Per-probe timeout handed to the ping binary.
    #[serde(default = "ProbeConfig::default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl ProbeConfig {
    const fn default_count() -> u32 {
        4
    }

    const fn default_timeout() -> Duration {
        Duration::from_secs(2)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            count: Self::default_count(),
            timeout: Self::default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "GraphConfig::default_width")]
    pub width: u32,
    #[serde(default = "GraphConfig::default_height")]
    pub height: u32,
    #[serde(default = "GraphConfig::default_path")]
    pub path: PathBuf,
}

impl GraphConfig {
    const fn default_width() -> u32 {
        600
    }

    const fn default_height() -> u32 {
        200
    }

    fn default_path() -> PathBuf {
        PathBuf::from("latency_graph.png")
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            width: Self::default_width(),
            height: Self::default_height(),
            path: Self::default_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "StoreConfig::default_path")]
    pub path: PathBuf,
    /// Base resolution of the archive; the collection interval should match.
    #[serde(default = "StoreConfig::default_step", with = "humantime_serde")]
    pub step: Duration,
}

impl StoreConfig {
    fn default_path() -> PathBuf {
        PathBuf::from("latency.json")
    }

    const fn default_step() -> Duration {
        Duration::from_secs(10)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
            step: Self::default_step(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "EmailConfig::default_smtp_port")]
    pub smtp_port: u16,
    /// Never set in YAML; populated from RTTMON_SMTP_PASSWORD.
    #[serde(default)]
    pub password: String,
}

impl EmailConfig {
    const fn default_smtp_port() -> u16 {
        587
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            sender: String::new(),
            recipient: String::new(),
            smtp_host: String::new(),
            smtp_port: Self::default_smtp_port(),
            password: String::new(),
        }
    }
}

/// Load configuration from a YAML file, falling back to defaults plus env
/// overrides. Missing or invalid values fail here, never mid-loop.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let target_path = if let Some(path) = path {
        path.to_path_buf()
    } else if let Ok(env_path) = env::var("RTTMON_CONFIG") {
        PathBuf::from(env_path)
    } else {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    };

    let mut config = match try_parse_file(&target_path)? {
        Some(cfg) => {
            info!(path = %target_path.display(), "loaded configuration");
            cfg
        }
        None => {
            warn!(path = %target_path.display(), "config file not found; using built-in defaults");
            AppConfig::default()
        }
    };

    enforce_yaml_policy(&config)?;
    apply_env_overrides(&mut config)?;
    validate(&config)?;
    Ok(config)
}

fn try_parse_file(path: &Path) -> Result<Option<AppConfig>> {
    match fs::read_to_string(path) {
        Ok(raw) => {
            let cfg = serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse YAML config at {}", path.display()))?;
            Ok(Some(cfg))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            Err(err).with_context(|| format!("failed to read config file at {}", path.display()))
        }
    }
}

fn enforce_yaml_policy(config: &AppConfig) -> Result<()> {
    if !config.email.password.trim().is_empty() {
        bail!(
            "Remove `email.password` from rttmon YAML config; set the SMTP password via the RTTMON_SMTP_PASSWORD environment variable (see .env.sample)."
        );
    }
    Ok(())
}

fn apply_env_overrides(config: &mut AppConfig) -> Result<()> {
    if let Ok(host) = env::var("RTTMON_HOST") {
        if !host.is_empty() {
            config.host = host;
        }
    }

    match env::var("RTTMON_SMTP_PASSWORD") {
        Ok(password) => {
            if password.trim().is_empty() {
                bail!(
                    "Environment variable RTTMON_SMTP_PASSWORD is set but empty; populate it in your .env file."
                );
            }
            config.email.password = password;
        }
        Err(env::VarError::NotPresent) => {}
        Err(err) => return Err(err.into()),
    };

    Ok(())
}

/// Fail-fast validation of the startup parameters.
pub fn validate(config: &AppConfig) -> Result<()> {
    if config.host.trim().is_empty() {
        bail!("`host` must not be empty");
    }
    if config.interval.is_zero() {
        bail!("`interval` must be greater than zero");
    }
    if config.store.step.is_zero() {
        bail!("`store.step` must be greater than zero");
    }
    if !config.threshold_ms.is_finite() || config.threshold_ms <= 0.0 {
        bail!("`threshold_ms` must be a positive number");
    }
    if config.probe.count == 0 {
        bail!("`probe.count` must be at least 1");
    }
    if config.graph.width == 0 || config.graph.height == 0 {
        bail!("`graph.width` and `graph.height` must be greater than zero");
    }
    if config.email.sender.trim().is_empty() || config.email.recipient.trim().is_empty() {
        bail!("`email.sender` and `email.recipient` are required");
    }
    if config.email.smtp_host.trim().is_empty() {
        bail!("`email.smtp_host` is required");
    }
    if config.email.password.trim().is_empty() {
        bail!(
            "Missing SMTP password. Set the RTTMON_SMTP_PASSWORD environment variable (see .env.sample). Secrets must not be stored in YAML."
        );
    }
    Ok(())
}
