//! Runtime configuration.
//!
//! Environment variables win, then the OS credential store (cloud
//! credentials only), then built-in defaults.

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde_json::Value;
use std::path::PathBuf;

use crate::item_id::DEFAULT_PREFIX;
use crate::storage;

pub const ENV_DATA_DIR: &str = "ANNVI_DATA_DIR";
pub const ENV_SUPABASE_URL: &str = "ANNVI_SUPABASE_URL";
pub const ENV_SUPABASE_ANON_KEY: &str = "ANNVI_SUPABASE_ANON_KEY";
pub const ENV_CONNECTION_STRING: &str = "ANNVI_CONNECTION_STRING";
pub const ENV_ITEM_PREFIX: &str = "ANNVI_ITEM_PREFIX";
pub const ENV_PULL_LIMIT: &str = "ANNVI_PULL_LIMIT";
pub const ENV_ACCESS_PIN: &str = "ANNVI_ACCESS_PIN";

/// Rows fetched per pull. A bound on traffic, not a correctness guarantee.
pub const DEFAULT_PULL_LIMIT: usize = 500;
pub const DEFAULT_ORDER_LIMIT: usize = 200;
pub const DEFAULT_IMAGE_BUCKET: &str = "item-images";
/// Shared PIN used until a hashed one is stored with `auth::setup_pin`.
pub const DEFAULT_ACCESS_PIN: &str = "2828";

/// Cloud endpoint and key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub url: String,
    pub anon_key: String,
}

impl RemoteConfig {
    /// Combine an optional URL with a key or connection string.
    ///
    /// A connection string (JSON or base64url JSON with `url` and `key`)
    /// supplies both; an explicit `url` still takes precedence.
    pub fn resolve(url: Option<&str>, key_or_connection: Option<&str>) -> Option<RemoteConfig> {
        let raw = key_or_connection.map(str::trim).filter(|s| !s.is_empty())?;
        let decoded = decode_connection_string(raw);
        let key = decoded
            .as_ref()
            .and_then(|v| v.get("key").and_then(Value::as_str))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| raw.to_string());
        let url = url
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| {
                decoded
                    .as_ref()
                    .and_then(|v| v.get("url").and_then(Value::as_str))
                    .map(str::to_string)
            })?;
        let url = normalize_remote_url(&url);
        if url.is_empty() || key.is_empty() {
            return None;
        }
        Some(RemoteConfig { url, anon_key: key })
    }
}

/// Normalise the cloud URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
/// - strip a trailing `/rest/v1` segment
pub fn normalize_remote_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/rest/v1") {
        url.truncate(url.len() - "/rest/v1".len());
    }
    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Decode a connection string: plain JSON, or base64/base64url JSON.
pub fn decode_connection_string(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str::<Value>(trimmed).ok();
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() < 20 {
        return None;
    }

    let base64 = compact.replace('-', "+").replace('_', "/");
    let padded = format!(
        "{}{}",
        base64,
        "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
    );
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice::<Value>(&decoded)
        .ok()
        .filter(Value::is_object)
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub remote: Option<RemoteConfig>,
    pub item_prefix: String,
    pub pull_limit: usize,
    pub order_limit: usize,
    pub default_actor: String,
    pub default_place: String,
    pub image_bucket: String,
    pub default_pin: String,
}

impl AppConfig {
    /// Defaults rooted at `data_dir`, no cloud.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> AppConfig {
        AppConfig {
            data_dir: data_dir.into(),
            remote: None,
            item_prefix: DEFAULT_PREFIX.to_string(),
            pull_limit: DEFAULT_PULL_LIMIT,
            order_limit: DEFAULT_ORDER_LIMIT,
            default_actor: "Factory".to_string(),
            default_place: "Local".to_string(),
            image_bucket: DEFAULT_IMAGE_BUCKET.to_string(),
            default_pin: DEFAULT_ACCESS_PIN.to_string(),
        }
    }

    /// Load from the environment, falling back to the credential store.
    pub fn load() -> anyhow::Result<AppConfig> {
        let data_dir = match env_nonempty(ENV_DATA_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir(),
        };
        let mut config = AppConfig::with_data_dir(data_dir);

        if let Some(prefix) = env_nonempty(ENV_ITEM_PREFIX) {
            let prefix = prefix.to_ascii_uppercase();
            anyhow::ensure!(
                prefix.chars().all(|c| c.is_ascii_alphanumeric()),
                "{ENV_ITEM_PREFIX} must be alphanumeric, got {prefix:?}"
            );
            config.item_prefix = prefix;
        }
        if let Some(limit) = env_nonempty(ENV_PULL_LIMIT) {
            config.pull_limit = limit
                .parse::<usize>()
                .with_context(|| format!("{ENV_PULL_LIMIT} must be a positive integer"))?
                .max(1);
        }
        if let Some(pin) = env_nonempty(ENV_ACCESS_PIN) {
            config.default_pin = pin;
        }

        let env_url = env_nonempty(ENV_SUPABASE_URL);
        let env_key =
            env_nonempty(ENV_CONNECTION_STRING).or_else(|| env_nonempty(ENV_SUPABASE_ANON_KEY));
        config.remote = RemoteConfig::resolve(env_url.as_deref(), env_key.as_deref());
        if config.remote.is_none() && env_url.is_none() && env_key.is_none() {
            config.remote = RemoteConfig::resolve(
                storage::get_credential(storage::KEY_SUPABASE_URL).as_deref(),
                storage::get_credential(storage::KEY_SUPABASE_ANON_KEY).as_deref(),
            );
        }

        Ok(config)
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Per-user data directory.
pub fn default_data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("in.annvigold.inventory")
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use serial_test::serial;

    const ALL_ENV: &[&str] = &[
        ENV_DATA_DIR,
        ENV_SUPABASE_URL,
        ENV_SUPABASE_ANON_KEY,
        ENV_CONNECTION_STRING,
        ENV_ITEM_PREFIX,
        ENV_PULL_LIMIT,
        ENV_ACCESS_PIN,
    ];

    fn clear_env() {
        for key in ALL_ENV {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn normalize_adds_scheme_and_strips_suffix() {
        assert_eq!(
            normalize_remote_url("abc.supabase.co/rest/v1/"),
            "https://abc.supabase.co"
        );
        assert_eq!(
            normalize_remote_url("localhost:54321/"),
            "http://localhost:54321"
        );
        assert_eq!(normalize_remote_url("  "), "");
    }

    #[test]
    fn connection_string_json_and_base64() {
        let json = r#"{"url":"abc.supabase.co","key":"anon-key-123"}"#;
        let plain = RemoteConfig::resolve(None, Some(json)).unwrap();
        assert_eq!(plain.url, "https://abc.supabase.co");
        assert_eq!(plain.anon_key, "anon-key-123");

        let encoded = BASE64_STANDARD
            .encode(json)
            .replace('+', "-")
            .replace('/', "_")
            .trim_end_matches('=')
            .to_string();
        assert_eq!(RemoteConfig::resolve(None, Some(&encoded)), Some(plain));

        let explicit =
            RemoteConfig::resolve(Some("https://other.supabase.co"), Some(json)).unwrap();
        assert_eq!(explicit.url, "https://other.supabase.co");
    }

    #[test]
    fn plain_key_needs_url() {
        assert!(RemoteConfig::resolve(None, Some("eyJhbGciOiJIUzI1NiJ9.short")).is_none());
        let cfg = RemoteConfig::resolve(Some("abc.supabase.co"), Some("k")).unwrap();
        assert_eq!(cfg.anon_key, "k");
        assert!(RemoteConfig::resolve(Some("abc.supabase.co"), None).is_none());
    }

    #[test]
    #[serial]
    fn load_reads_environment() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(ENV_DATA_DIR, dir.path());
        std::env::set_var(ENV_SUPABASE_URL, "abc.supabase.co");
        std::env::set_var(ENV_SUPABASE_ANON_KEY, "anon");
        std::env::set_var(ENV_ITEM_PREFIX, "ag");
        std::env::set_var(ENV_PULL_LIMIT, "800");

        let cfg = AppConfig::load().expect("load config");
        assert_eq!(cfg.data_dir, dir.path());
        assert_eq!(cfg.item_prefix, "AG");
        assert_eq!(cfg.pull_limit, 800);
        assert_eq!(
            cfg.remote,
            Some(RemoteConfig {
                url: "https://abc.supabase.co".into(),
                anon_key: "anon".into()
            })
        );
        assert_eq!(cfg.order_limit, DEFAULT_ORDER_LIMIT);
        clear_env();
    }

    #[test]
    #[serial]
    fn load_rejects_bad_values() {
        clear_env();
        std::env::set_var(ENV_SUPABASE_URL, "abc.supabase.co");
        std::env::set_var(ENV_PULL_LIMIT, "lots");
        assert!(AppConfig::load().is_err());

        std::env::set_var(ENV_PULL_LIMIT, "10");
        std::env::set_var(ENV_ITEM_PREFIX, "A-G");
        assert!(AppConfig::load().is_err());
        clear_env();
    }
}
