//! Cloud credential storage using the OS credential store.
//!
//! On Windows this uses the Credential Manager (via the `keyring` crate), on
//! macOS Keychain, and on Linux the Secret Service API. Only the Supabase
//! URL and anon key live here; everything else is in `local_settings`.

use keyring::Entry;
use tracing::{info, warn};

const SERVICE_NAME: &str = "annvi-inventory";

pub const KEY_SUPABASE_URL: &str = "supabase_url";
pub const KEY_SUPABASE_ANON_KEY: &str = "supabase_anon_key";

/// All credential keys managed by this module.
const ALL_KEYS: &[&str] = &[KEY_SUPABASE_URL, KEY_SUPABASE_ANON_KEY];

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist or the platform store is unavailable.
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

/// Store a credential in the OS keyring.
pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())?;
    Ok(())
}

/// Delete a credential. Silently succeeds if the entry does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

/// Save the cloud URL and key, accepting a combined connection string in
/// place of the key.
pub fn save_remote_credentials(url: Option<&str>, key_or_connection: &str) -> Result<(), String> {
    let resolved = crate::config::RemoteConfig::resolve(url, Some(key_or_connection))
        .ok_or("Missing cloud URL or key")?;
    set_credential(KEY_SUPABASE_URL, &resolved.url)?;
    set_credential(KEY_SUPABASE_ANON_KEY, &resolved.anon_key)?;
    info!(url = %resolved.url, "cloud credentials updated");
    Ok(())
}

/// Delete every stored credential.
pub fn factory_reset() -> Result<(), String> {
    info!("deleting all stored cloud credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(())
}
