//! Credential resolution: a keyring/secret-store lookup first, with an
//! environment-variable fallback. Never logs the resolved value.

use std::sync::atomic::{AtomicBool, Ordering};

const KEYRING_SERVICE: &str = "wisp-credentials";
const KEYRING_USERNAME: &str = "default";

static KEYRING_ERROR_WARNED: AtomicBool = AtomicBool::new(false);

fn keyring_disabled() -> bool {
    if cfg!(test) {
        return true;
    }
    matches!(
        std::env::var("WISP_DISABLE_KEYRING")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes"
    )
}

pub fn credentials_store_label() -> &'static str {
    if keyring_disabled() {
        "environment variable"
    } else {
        "system keychain"
    }
}

fn entry() -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

/// Look up the stored API key. `Ok(None)` means nothing is stored yet,
/// distinct from an `Err` which means the backend itself misbehaved.
pub fn get_api_key() -> Result<Option<String>, String> {
    if keyring_disabled() {
        return Ok(None);
    }
    match entry().and_then(|e| e.get_password()) {
        Ok(value) => Ok(Some(value)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err.to_string()),
    }
}

pub fn set_api_key(key: &str) -> Result<(), String> {
    if keyring_disabled() {
        return Err("keyring is disabled; set the API key via environment variable instead".to_string());
    }
    entry()
        .and_then(|e| e.set_password(key))
        .map_err(|e| e.to_string())
}

/// Warn once per process about a keyring backend failure, so a flaky
/// system keychain doesn't spam every lookup.
pub fn warn_keychain_error_once(what: &str, err: &str) {
    if !KEYRING_ERROR_WARNED.swap(true, Ordering::Relaxed) {
        tracing::warn!(what, error = err, "keychain lookup failed; falling back to environment variables");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyring_is_disabled_under_test() {
        assert!(keyring_disabled());
        assert_eq!(get_api_key().unwrap(), None);
    }
}
