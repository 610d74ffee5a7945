//! UI command boundary.
//!
//! Every command takes the raw JSON argument the frontend sent and returns
//! a JSON result or a human-readable error string.

use base64::Engine;
use serde::Deserialize;

use crate::photos::PhotoUpload;
use crate::App;

pub mod auth;
pub mod items;
pub mod orders;

/// A photo as the UI sends it: base64 bytes (optionally a data URL) and
/// the file name the user picked.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PhotoPayload {
    #[serde(alias = "base64", alias = "dataUrl", alias = "data_url")]
    data: String,
    #[serde(default, alias = "file_name", alias = "name")]
    file_name: String,
}

impl PhotoPayload {
    fn decode(self) -> Result<PhotoUpload, String> {
        let encoded = match self.data.split_once(";base64,") {
            Some((_, rest)) => rest,
            None => self.data.as_str(),
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| format!("Invalid photo data for {}: {e}", self.file_name))?;
        Ok(PhotoUpload::new(bytes, self.file_name))
    }
}

/// Pull the optional `photos` array out of a payload.
pub(crate) fn parse_photos(payload: &serde_json::Value) -> Result<Vec<PhotoUpload>, String> {
    let Some(raw) = payload.get("photos").filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    let photos: Vec<PhotoPayload> =
        serde_json::from_value(raw.clone()).map_err(|e| format!("Invalid photos payload: {e}"))?;
    photos.into_iter().map(PhotoPayload::decode).collect()
}

pub(crate) fn require_login(app: &App) -> Result<(), String> {
    if crate::auth::is_authorized(&app.auth) {
        Ok(())
    } else {
        Err("Not logged in".into())
    }
}
