//! Shared configuration for tickstream clients.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `tickstream_core::ClientConfig` -- including the
//! WebSocket-base derivation the product's web client performs when
//! only an HTTP API base is configured.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use tickstream_core::ClientConfig;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no access token configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("unknown profile '{profile}'")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Named backend profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            profiles: HashMap::new(),
        }
    }
}

/// A named backend profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// HTTP API base, e.g. `http://localhost:8080/api`.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// WebSocket base, e.g. `ws://localhost:8080/ws`. Derived from
    /// `api_base` when absent.
    pub ws_base: Option<String>,

    /// Access token (plaintext -- prefer keyring or env var).
    pub access_token: Option<String>,

    /// Environment variable name containing the access token.
    pub access_token_env: Option<String>,

    /// Request timeout in seconds.
    pub timeout: Option<u64>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            ws_base: None,
            access_token: None,
            access_token_env: None,
            timeout: None,
        }
    }
}

fn default_api_base() -> String {
    "http://localhost:8080/api".into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "tickstream", "tickstream").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("tickstream");
    p
}

// ── Config loading / saving ─────────────────────────────────────────

/// Load the full Config from file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    let path = config_path();

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("TICKSTREAM_").split("_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve an access token from the credential chain:
/// profile env var, then system keyring, then plaintext config.
pub fn resolve_access_token(
    profile: &Profile,
    profile_name: &str,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's access_token_env -> env var lookup
    if let Some(ref env_name) = profile.access_token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new("tickstream", &format!("{profile_name}/access-token")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref token) = profile.access_token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

// ── Base URL derivation ─────────────────────────────────────────────

/// Derive the WebSocket base from an HTTP API base the way the web
/// client does: swap the scheme (`http` -> `ws`, `https` -> `wss`) and
/// replace a trailing `/api` path with `/ws`.
pub fn derive_ws_base(api_base: &Url) -> Result<Url, ConfigError> {
    let mut ws = api_base.clone();

    let scheme = match api_base.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(ConfigError::Validation {
                field: "api_base".into(),
                reason: format!("expected http(s) scheme, got '{other}'"),
            });
        }
    };
    ws.set_scheme(scheme).map_err(|()| ConfigError::Validation {
        field: "api_base".into(),
        reason: "scheme swap failed".into(),
    })?;

    let path = api_base.path().trim_end_matches('/');
    let ws_path = match path.strip_suffix("/api") {
        Some(prefix) => format!("{prefix}/ws"),
        None if path.is_empty() => "/ws".to_owned(),
        None => format!("{path}/ws"),
    };
    ws.set_path(&ws_path);
    ws.set_query(None);
    Ok(ws)
}

/// The HTTP origin for REST calls: the API base with a trailing `/api`
/// stripped (endpoint paths carry it themselves).
pub fn http_origin(api_base: &Url) -> Url {
    let mut origin = api_base.clone();
    let path = api_base.path().trim_end_matches('/');
    let stripped = path.strip_suffix("/api").unwrap_or(path);
    origin.set_path(stripped);
    origin.set_query(None);
    origin
}

// ── Translation to ClientConfig ─────────────────────────────────────

/// Build a `ClientConfig` from a profile.
pub fn profile_to_client_config(
    profile: &Profile,
    profile_name: &str,
) -> Result<ClientConfig, ConfigError> {
    let api_base: Url = profile
        .api_base
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "api_base".into(),
            reason: format!("invalid URL: {}", profile.api_base),
        })?;

    let ws_base = match profile.ws_base {
        Some(ref raw) => raw.parse().map_err(|_| ConfigError::Validation {
            field: "ws_base".into(),
            reason: format!("invalid URL: {raw}"),
        })?,
        None => derive_ws_base(&api_base)?,
    };

    let _ = profile_name; // profiles carry no per-name overrides today

    Ok(ClientConfig {
        http_base: http_origin(&api_base),
        ws_base,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(30)),
    })
}

/// Look up a profile by name (or the default) and build its
/// `ClientConfig`.
pub fn client_config_for(
    config: &Config,
    profile_name: Option<&str>,
) -> Result<ClientConfig, ConfigError> {
    let name = profile_name
        .map(str::to_owned)
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".to_owned());

    match config.profiles.get(&name) {
        Some(profile) => profile_to_client_config(profile, &name),
        None if name == "default" => profile_to_client_config(&Profile::default(), &name),
        None => Err(ConfigError::UnknownProfile { profile: name }),
    }
}
