//! Layered configuration: compiled-in defaults → on-disk config file → process
//! environment → explicit caller overrides. Only the defaults and file
//! layers live on disk; this crate never writes the config file (that is the
//! out-of-scope installer's job), only reads and, on corruption, quarantines
//! it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::keyring;

const DEFAULT_CONCURRENCY: usize = 10;
const DEFAULT_RIPGREP_BINARY: &str = "rg";

/// The on-disk shape. Every field optional: presence in the file overrides
/// the compiled-in default, absence falls through to the next layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    base_url: Option<String>,
    review_model: Option<String>,
    validator_model: Option<String>,
    concurrency: Option<usize>,
    cache_dir: Option<String>,
    ripgrep_binary: Option<String>,
}

/// Explicit overrides passed by the caller (e.g. CLI flags), applied after
/// environment variables.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub review_model: Option<String>,
    pub validator_model: Option<String>,
    pub concurrency: Option<usize>,
    pub cache_dir: Option<PathBuf>,
    pub ripgrep_binary: Option<String>,
    pub api_key: Option<String>,
}

/// The fully-resolved configuration the rest of the engine consumes.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub review_model: String,
    pub validator_model: String,
    pub concurrency: usize,
    pub cache_dir: PathBuf,
    pub ripgrep_binary: String,
    api_key: Option<String>,
}

impl Config {
    /// Resolve the layered configuration. `overrides` are the highest
    /// priority and win over everything else.
    pub fn load(overrides: ConfigOverrides) -> Self {
        let file = load_config_file();

        let base_url = overrides
            .base_url
            .or_else(|| std::env::var("WISP_BASE_URL").ok())
            .or(file.base_url)
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let review_model = overrides
            .review_model
            .or_else(|| std::env::var("WISP_REVIEW_MODEL").ok())
            .or(file.review_model)
            .unwrap_or_else(|| "gpt-4o-mini".to_string());

        let validator_model = overrides
            .validator_model
            .or_else(|| std::env::var("WISP_VALIDATOR_MODEL").ok())
            .or(file.validator_model)
            .unwrap_or_else(|| review_model.clone());

        let concurrency = overrides
            .concurrency
            .or_else(|| std::env::var("WISP_CONCURRENCY").ok().and_then(|v| v.parse().ok()))
            .or(file.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY);

        let cache_dir = overrides
            .cache_dir
            .or_else(|| std::env::var("WISP_CACHE_DIR").ok().map(PathBuf::from))
            .or_else(|| file.cache_dir.map(PathBuf::from))
            .unwrap_or_else(default_cache_dir);

        let ripgrep_binary = overrides
            .ripgrep_binary
            .or_else(|| std::env::var("WISP_RIPGREP_BIN").ok())
            .or(file.ripgrep_binary)
            .unwrap_or_else(|| DEFAULT_RIPGREP_BINARY.to_string());

        let api_key = overrides.api_key.or_else(resolve_api_key);

        Self {
            base_url,
            review_model,
            validator_model,
            concurrency,
            cache_dir,
            ripgrep_binary,
            api_key,
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Keyring-first, environment-fallback credential resolution. Never logged.
fn resolve_api_key() -> Option<String> {
    match keyring::get_api_key() {
        Ok(Some(key)) => return Some(key),
        Ok(None) => {}
        Err(err) => keyring::warn_keychain_error_once("API key", &err),
    }
    std::env::var("WISP_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
}

fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("wisp"))
}

fn config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("config.json"))
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|p| p.join("wisp"))
        .unwrap_or_else(|| PathBuf::from(".wisp-cache"))
}

/// A malformed config file must never abort the process: it is quarantined
/// (renamed aside) and defaults are used, with a structured warning logged
/// instead of printed.
fn load_config_file() -> ConfigFile {
    let Some(path) = config_path() else {
        return ConfigFile::default();
    };
    let Ok(content) = fs::read_to_string(&path) else {
        return ConfigFile::default();
    };
    match serde_json::from_str(&content) {
        Ok(config) => config,
        Err(err) => {
            preserve_corrupt_config(&path, &content);
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "config file was corrupted; quarantined and defaults loaded"
            );
            ConfigFile::default()
        }
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_over_everything_else() {
        std::env::set_var("WISP_REVIEW_MODEL", "env-model");
        let config = Config::load(ConfigOverrides {
            review_model: Some("override-model".to_string()),
            ..Default::default()
        });
        assert_eq!(config.review_model, "override-model");
        std::env::remove_var("WISP_REVIEW_MODEL");
    }

    #[test]
    fn env_wins_over_file_and_defaults() {
        std::env::set_var("WISP_CONCURRENCY", "4");
        let config = Config::load(ConfigOverrides::default());
        assert_eq!(config.concurrency, 4);
        std::env::remove_var("WISP_CONCURRENCY");
    }

    #[test]
    fn defaults_apply_when_nothing_else_is_set() {
        let config = Config::load(ConfigOverrides::default());
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.ripgrep_binary, DEFAULT_RIPGREP_BINARY);
    }

    #[test]
    fn api_key_override_bypasses_keyring_and_env() {
        let config = Config::load(ConfigOverrides {
            api_key: Some("sk-explicit".to_string()),
            ..Default::default()
        });
        assert_eq!(config.api_key(), Some("sk-explicit"));
    }
}
