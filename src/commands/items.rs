use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{parse_photos, require_login};
use crate::error::InventoryError;
use crate::item_id::scanned_item_id;
use crate::items::{ItemDraft, ItemPatch, ItemStatus};
use crate::{payload_or_key, value_bool, value_str, App};

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemEditPayload {
    #[serde(alias = "item_id", alias = "id")]
    item_id: String,
    #[serde(flatten)]
    patch: ItemPatch,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemStatusPayload {
    #[serde(default, alias = "item_id", alias = "id")]
    item_id: Option<String>,
    /// Raw text decoded from a QR code; used when `itemId` is absent.
    #[serde(default, alias = "qr", alias = "scanned")]
    qr_text: Option<String>,
    status: String,
    #[serde(default, alias = "by")]
    actor: Option<String>,
    #[serde(default, alias = "location")]
    place: Option<String>,
}

#[derive(Debug)]
struct ItemStatusRequest {
    item_id: String,
    status: ItemStatus,
    actor: Option<String>,
    place: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemovePhotoPayload {
    #[serde(alias = "item_id", alias = "id")]
    item_id: String,
    #[serde(alias = "photo_url", alias = "url")]
    photo_url: String,
}

/// Status text from a button press must name a real state.
fn parse_status_strict(raw: &str) -> Result<ItemStatus, String> {
    let normalized = raw.trim().to_ascii_uppercase().replace(['-', ' '], "_");
    ItemStatus::ALL
        .into_iter()
        .find(|s| s.as_str() == normalized)
        .ok_or_else(|| format!("Unknown status: {raw}"))
}

fn parse_status_payload(arg0: Option<Value>) -> Result<ItemStatusRequest, String> {
    let payload = arg0.unwrap_or_else(|| json!({}));
    let parsed: ItemStatusPayload = serde_json::from_value(payload)
        .map_err(|e| format!("Invalid status payload: {e}"))?;

    let item_id = match (
        parsed.item_id.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        parsed.qr_text.as_deref(),
    ) {
        (Some(id), _) => id.to_string(),
        (None, Some(qr)) => scanned_item_id(qr).map_err(|e| e.to_string())?,
        (None, None) => return Err("Missing itemId".into()),
    };
    let blank_to_none =
        |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    Ok(ItemStatusRequest {
        item_id,
        status: parse_status_strict(&parsed.status)?,
        actor: blank_to_none(parsed.actor),
        place: blank_to_none(parsed.place),
    })
}

fn parse_item_id(arg0: Option<Value>) -> Result<String, String> {
    let payload = payload_or_key(arg0, "itemId");
    value_str(&payload, &["itemId", "item_id", "id"]).ok_or_else(|| "Missing itemId".into())
}

fn ok_with(message: String, mut data: Value) -> Value {
    if let Value::Object(obj) = &mut data {
        obj.insert("success".into(), Value::Bool(true));
        obj.insert("message".into(), Value::String(message));
    }
    data
}

fn err_text(e: InventoryError) -> String {
    e.to_string()
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Local collection in display order, with per-status counts.
pub async fn items_list(_arg0: Option<Value>, app: &App) -> Result<Value, String> {
    require_login(app)?;
    let items = app.inventory.items().map_err(err_text)?;
    let counts = crate::items::status_counts(&items);
    Ok(json!({
        "success": true,
        "items": items,
        "counts": counts,
        "cloud": app.inventory.has_remote(),
    }))
}

/// Pull from the cloud and merge. A newer refresh cancels this one.
pub async fn items_refresh(_arg0: Option<Value>, app: &App) -> Result<Value, String> {
    require_login(app)?;
    let cancel = app.begin_pull();
    let outcome = app
        .inventory
        .pull_and_merge(&cancel)
        .await
        .map_err(err_text)?;
    Ok(json!({
        "success": outcome.remote_error.is_none() && !outcome.cancelled,
        "message": outcome.message(),
        "items": outcome.items,
        "fetched": outcome.fetched,
        "cancelled": outcome.cancelled,
    }))
}

pub async fn items_create(arg0: Option<Value>, app: &App) -> Result<Value, String> {
    require_login(app)?;
    let payload = arg0.unwrap_or_else(|| json!({}));
    let photos = parse_photos(&payload)?;
    let draft: ItemDraft =
        serde_json::from_value(payload).map_err(|e| format!("Invalid item payload: {e}"))?;

    let outcome = app
        .inventory
        .create_item(draft, photos)
        .await
        .map_err(err_text)?;
    info!(item_id = %outcome.item.item_id, synced = outcome.sync.is_synced(), "items_create");
    Ok(ok_with(
        outcome.message(),
        json!({ "item": outcome.item, "sync": outcome.sync, "photos": outcome.photos }),
    ))
}

pub async fn items_edit(arg0: Option<Value>, app: &App) -> Result<Value, String> {
    require_login(app)?;
    let payload = arg0.unwrap_or_else(|| json!({}));
    let photos = parse_photos(&payload)?;
    let parsed: ItemEditPayload =
        serde_json::from_value(payload).map_err(|e| format!("Invalid edit payload: {e}"))?;
    let item_id = parsed.item_id.trim();
    if item_id.is_empty() {
        return Err("Missing itemId".into());
    }

    let outcome = app
        .inventory
        .edit_item(item_id, parsed.patch, photos)
        .await
        .map_err(err_text)?;
    Ok(ok_with(
        outcome.message(),
        json!({ "item": outcome.item, "sync": outcome.sync, "photos": outcome.photos }),
    ))
}

/// Change status by id or by scanned QR text.
pub async fn items_set_status(arg0: Option<Value>, app: &App) -> Result<Value, String> {
    require_login(app)?;
    let req = parse_status_payload(arg0)?;
    let outcome = app
        .inventory
        .set_status(
            &req.item_id,
            req.status,
            req.actor.as_deref(),
            req.place.as_deref(),
        )
        .await
        .map_err(err_text)?;
    Ok(ok_with(
        outcome.message(),
        json!({ "item": outcome.item, "sync": outcome.sync }),
    ))
}

pub async fn items_remove_photo(arg0: Option<Value>, app: &App) -> Result<Value, String> {
    require_login(app)?;
    let parsed: RemovePhotoPayload = serde_json::from_value(arg0.unwrap_or_else(|| json!({})))
        .map_err(|e| format!("Invalid remove-photo payload: {e}"))?;
    let outcome = app
        .inventory
        .remove_photo(parsed.item_id.trim(), &parsed.photo_url)
        .await
        .map_err(err_text)?;
    Ok(ok_with(
        outcome.message(),
        json!({ "item": outcome.item, "sync": outcome.sync }),
    ))
}

pub async fn items_delete(arg0: Option<Value>, app: &App) -> Result<Value, String> {
    require_login(app)?;
    let item_id = parse_item_id(arg0)?;
    let outcome = app
        .inventory
        .delete_item(&item_id)
        .await
        .map_err(err_text)?;
    Ok(ok_with(
        outcome.message(),
        json!({ "itemId": outcome.item_id, "removed": outcome.removed, "sync": outcome.sync }),
    ))
}

/// Wipe local and cloud items. Requires `{ "confirm": true }`.
pub async fn items_clear_all(arg0: Option<Value>, app: &App) -> Result<Value, String> {
    require_login(app)?;
    let payload = arg0.unwrap_or_else(|| json!({}));
    if value_bool(&payload, &["confirm", "confirmed"]) != Some(true) {
        return Err("Confirmation required to delete all items".into());
    }
    let outcome = app.inventory.clear_all().await.map_err(err_text)?;
    Ok(ok_with(
        outcome.message(),
        json!({ "removed": outcome.removed, "sync": outcome.sync }),
    ))
}

/// Point lookup: the cloud first, then the local copy.
pub async fn items_find(arg0: Option<Value>, app: &App) -> Result<Value, String> {
    require_login(app)?;
    let payload = payload_or_key(arg0, "itemId");
    let item_id = match value_str(&payload, &["itemId", "item_id", "id"]) {
        Some(id) => id,
        None => match value_str(&payload, &["qrText", "qr"]) {
            Some(qr) => scanned_item_id(&qr).map_err(|e| e.to_string())?,
            None => return Err("Missing itemId".into()),
        },
    };
    let found = app
        .inventory
        .find_item(&item_id)
        .await
        .map_err(err_text)?;
    Ok(json!({
        "success": found.is_some(),
        "itemId": item_id,
        "item": found,
    }))
}

pub async fn items_search(arg0: Option<Value>, app: &App) -> Result<Value, String> {
    require_login(app)?;
    let payload = payload_or_key(arg0, "query");
    let query = value_str(&payload, &["query", "q"]).unwrap_or_default();
    let items = app.inventory.search(&query).map_err(err_text)?;
    Ok(json!({
        "success": true,
        "query": query,
        "items": items,
    }))
}
