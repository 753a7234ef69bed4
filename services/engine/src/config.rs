//! Configuration loading: a TOML file overlaid with a small set of
//! environment variables, following the same raw-then-validate split used
//! throughout this codebase's other services.

use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use stream_protocol::Channel;

const DEFAULT_ACTIVE_USERS_REFRESH_SECS: u64 = 60;
const DEFAULT_SERVER_BIND: &str = "0.0.0.0:4000";

#[derive(Debug)]
pub enum ConfigError {
    Io(String, std::io::Error),
    Parse(toml::de::Error),
    MissingField(&'static str),
    InvalidValue { field: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, err) => write!(f, "failed to read config file {path}: {err}"),
            ConfigError::Parse(err) => write!(f, "failed to parse config: {err}"),
            ConfigError::MissingField(field) => write!(f, "missing required field: {field}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "invalid value for {field}: {value:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Raw (pre-validation) shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    upstream: RawUpstreamConfig,
    #[serde(default)]
    active_users: RawActiveUsersConfig,
    #[serde(default)]
    filters: RawFiltersConfig,
    #[serde(default)]
    server: RawServerConfig,
    #[serde(default)]
    alerts: RawAlertsConfig,
}

#[derive(Debug, Default, Deserialize)]
struct RawUpstreamConfig {
    base_url: Option<String>,
    endpoints: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawActiveUsersConfig {
    base_url: Option<String>,
    refresh_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFiltersConfig {
    users: Option<Vec<String>>,
    keywords: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawServerConfig {
    bind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAlertsConfig {
    enabled: Option<bool>,
}

// ---------------------------------------------------------------------------
// Validated config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub apify_token: String,
    pub upstream_base_url: String,
    pub endpoints: Vec<Channel>,
    pub active_users_base_url: String,
    pub active_users_refresh_interval: Duration,
    pub initial_users: Vec<String>,
    pub initial_keywords: Vec<String>,
    pub server_bind: String,
    pub alerts_enabled: bool,
}

/// Load from `path`, then overlay the environment variables named in the
/// engine's external-interfaces contract.
pub fn load_config_from_path(path: &Path) -> Result<EngineConfig, ConfigError> {
    let text = fs::read_to_string(path)
        .map_err(|err| ConfigError::Io(path.display().to_string(), err))?;
    load_config_from_str(&text)
}

pub fn load_config_from_str(text: &str) -> Result<EngineConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(text).map_err(ConfigError::Parse)?;
    validate(raw)
}

fn validate(raw: RawConfig) -> Result<EngineConfig, ConfigError> {
    let apify_token = env::var("APIFY_TOKEN").map_err(|_| ConfigError::MissingField("APIFY_TOKEN"))?;

    let upstream_base_url = env::var("APIFY_ACTOR_URL")
        .ok()
        .or(raw.upstream.base_url)
        .ok_or(ConfigError::MissingField("upstream.base_url"))?;

    let endpoints = match env::var("ENDPOINT") {
        Ok(value) => parse_channel_list(&value)?,
        Err(_) => match raw.upstream.endpoints {
            Some(values) => parse_channel_list(&values.join(","))?,
            None => vec![Channel::All],
        },
    };
    if endpoints.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "upstream.endpoints",
            value: String::new(),
        });
    }

    let active_users_base_url = raw.active_users.base_url.unwrap_or_else(|| upstream_base_url.clone());
    let active_users_refresh_interval = Duration::from_secs(
        raw.active_users
            .refresh_interval_secs
            .unwrap_or(DEFAULT_ACTIVE_USERS_REFRESH_SECS),
    );

    let initial_users = match env::var("USERS") {
        Ok(value) => split_csv(&value),
        Err(_) => raw.filters.users.unwrap_or_default(),
    };
    let initial_keywords = match env::var("KEYWORDS") {
        Ok(value) => split_csv(&value),
        Err(_) => raw.filters.keywords.unwrap_or_default(),
    };

    let server_bind = raw.server.bind.unwrap_or_else(|| DEFAULT_SERVER_BIND.to_string());
    let alerts_enabled = raw.alerts.enabled.unwrap_or(false);

    Ok(EngineConfig {
        apify_token,
        upstream_base_url,
        endpoints,
        active_users_base_url,
        active_users_refresh_interval,
        initial_users,
        initial_keywords,
        server_bind,
        alerts_enabled,
    })
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_channel_list(value: &str) -> Result<Vec<Channel>, ConfigError> {
    split_csv(value)
        .into_iter()
        .map(|name| {
            Channel::parse(&name).ok_or_else(|| ConfigError::InvalidValue {
                field: "upstream.endpoints",
                value: name,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in ["APIFY_TOKEN", "APIFY_ACTOR_URL", "ENDPOINT", "USERS", "KEYWORDS"] {
            unsafe { env::remove_var(key) };
        }
    }

    #[test]
    fn missing_token_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let result = load_config_from_str("[upstream]\nbase_url = \"https://example.com\"\n");
        assert!(matches!(result, Err(ConfigError::MissingField("APIFY_TOKEN"))));
    }

    #[test]
    fn defaults_endpoint_to_all_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe { env::set_var("APIFY_TOKEN", "secret") };
        let config =
            load_config_from_str("[upstream]\nbase_url = \"https://example.com\"\n").unwrap();
        assert_eq!(config.endpoints, vec![Channel::All]);
        unsafe { env::remove_var("APIFY_TOKEN") };
    }

    #[test]
    fn env_overrides_take_priority_over_file_values() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("APIFY_TOKEN", "secret");
            env::set_var("APIFY_ACTOR_URL", "https://override.example.com");
            env::set_var("ENDPOINT", "tweets,following");
            env::set_var("USERS", "Alice, bob");
        }
        let config = load_config_from_str(
            "[upstream]\nbase_url = \"https://file.example.com\"\nendpoints = [\"all\"]\n",
        )
        .unwrap();
        assert_eq!(config.upstream_base_url, "https://override.example.com");
        assert_eq!(config.endpoints, vec![Channel::Tweets, Channel::Following]);
        assert_eq!(config.initial_users, vec!["Alice", "bob"]);
        clear_env();
    }

    #[test]
    fn invalid_endpoint_name_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("APIFY_TOKEN", "secret");
            env::set_var("ENDPOINT", "bogus");
        }
        let result = load_config_from_str("[upstream]\nbase_url = \"https://example.com\"\n");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        clear_env();
    }
}
