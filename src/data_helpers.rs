use reqwest::Url;
use tracing::warn;

use crate::db;
use crate::items::Item;

/// Settings key holding the serialized item collection.
pub(crate) const ITEMS_KEY: &str = "annvi_items_v1";

const EXTERNAL_URL_MAX_LEN: usize = 4096;
const ALLOWED_EXTERNAL_HOSTS: &[&str] = &["wa.me", "api.whatsapp.com", "web.whatsapp.com"];

pub(crate) fn read_local_json(db: &db::DbState, key: &str) -> Result<serde_json::Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let raw = db::get_setting(&conn, "local", key);
    if let Some(raw) = raw {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&raw) {
            return Ok(parsed);
        }
        warn!(key, "local JSON is unreadable, treating as empty");
    }
    Ok(serde_json::Value::Null)
}

pub(crate) fn write_local_json(
    db: &db::DbState,
    key: &str,
    value: &serde_json::Value,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::set_setting(&conn, "local", key, &value.to_string())
}

/// Load the item collection. Records that fail to parse are skipped so one
/// bad entry never hides the rest.
pub(crate) fn load_items(db: &db::DbState) -> Result<Vec<Item>, String> {
    let parsed = read_local_json(db, ITEMS_KEY)?;
    let Some(records) = parsed.as_array() else {
        return Ok(Vec::new());
    };
    let mut items = Vec::with_capacity(records.len());
    for record in records {
        match serde_json::from_value::<Item>(record.clone()) {
            Ok(item) if !item.item_id.trim().is_empty() => items.push(item.normalize()),
            Ok(_) => warn!("skipping local item without itemId"),
            Err(e) => warn!(error = %e, "skipping unreadable local item"),
        }
    }
    Ok(items)
}

/// Overwrite the stored collection with `items`.
pub(crate) fn save_items(db: &db::DbState, items: &[Item]) -> Result<(), String> {
    let value = serde_json::to_value(items).map_err(|e| format!("serialize items: {e}"))?;
    write_local_json(db, ITEMS_KEY, &value)
}

pub(crate) fn clear_items(db: &db::DbState) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::delete_setting(&conn, "local", ITEMS_KEY)
}

pub(crate) fn normalize_phone(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
}

/// Accept only http(s) URLs on the WhatsApp allowlist.
pub(crate) fn validate_external_url(url_raw: &str) -> Result<Url, String> {
    let trimmed = url_raw.trim();
    if trimmed.is_empty() {
        return Err("External URL cannot be empty".into());
    }
    if trimmed.len() > EXTERNAL_URL_MAX_LEN {
        return Err("External URL is too long".into());
    }

    let parsed = Url::parse(trimmed).map_err(|e| format!("Invalid external URL: {e}"))?;
    let scheme = parsed.scheme().to_ascii_lowercase();
    if scheme != "https" && scheme != "http" {
        return Err("Only http/https URLs are allowed".into());
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err("Credentialed URLs are not allowed".into());
    }

    let host = parsed
        .host_str()
        .ok_or("External URL is missing a host")?
        .to_ascii_lowercase();
    if !ALLOWED_EXTERNAL_HOSTS.iter().any(|h| host == *h) {
        return Err(format!("External host is not allowlisted: {host}"));
    }

    Ok(parsed)
}
