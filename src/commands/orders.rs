use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_photos, require_login};
use crate::orders::{open_external, whatsapp_link, OrderDraft, OrderStatus};
use crate::{payload_or_key, value_bool, value_str, App};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderStatusPayload {
    #[serde(alias = "order_id", alias = "id")]
    order_id: Value,
    status: String,
}

fn parse_order_status_strict(raw: &str) -> Result<OrderStatus, String> {
    let normalized = raw.trim().to_ascii_uppercase().replace(['-', ' '], "_");
    [
        OrderStatus::Received,
        OrderStatus::InProcess,
        OrderStatus::Delivered,
    ]
    .into_iter()
    .find(|s| s.as_str() == normalized)
    .ok_or_else(|| format!("Unknown order status: {raw}"))
}

fn parse_status_payload(arg0: Option<Value>) -> Result<(String, OrderStatus), String> {
    let parsed: OrderStatusPayload = serde_json::from_value(arg0.unwrap_or_else(|| json!({})))
        .map_err(|e| format!("Invalid order status payload: {e}"))?;
    // serial ids arrive as numbers
    let order_id = match parsed.order_id {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    };
    if order_id.is_empty() {
        return Err("Missing orderId".into());
    }
    Ok((order_id, parse_order_status_strict(&parsed.status)?))
}

fn order_id_of(payload: &Value) -> Option<String> {
    value_str(payload, &["orderId", "order_id", "id"]).or_else(|| {
        ["orderId", "order_id", "id"]
            .iter()
            .find_map(|k| payload.get(*k).and_then(Value::as_i64))
            .map(|n| n.to_string())
    })
}

/// Refetch orders. When the cloud fails the cached list comes back with
/// `success: false`.
pub async fn orders_list(_arg0: Option<Value>, app: &App) -> Result<Value, String> {
    require_login(app)?;
    match app.orders.load().await {
        Ok(orders) => Ok(json!({
            "success": true,
            "orders": orders,
        })),
        Err(e) => {
            let cached = app.orders.orders().map_err(|e| e.to_string())?;
            Ok(json!({
                "success": false,
                "message": format!("Could not load orders: {e}"),
                "orders": cached,
            }))
        }
    }
}

pub async fn orders_create(arg0: Option<Value>, app: &App) -> Result<Value, String> {
    require_login(app)?;
    let payload = arg0.unwrap_or_else(|| json!({}));
    let photos = parse_photos(&payload)?;
    let draft: OrderDraft =
        serde_json::from_value(payload).map_err(|e| format!("Invalid order payload: {e}"))?;
    let created = app
        .orders
        .create(draft, photos)
        .await
        .map_err(|e| e.to_string())?;
    Ok(json!({
        "success": true,
        "message": created.message(),
        "order": created.order,
        "photos": created.photos,
    }))
}

pub async fn orders_update_status(arg0: Option<Value>, app: &App) -> Result<Value, String> {
    require_login(app)?;
    let (order_id, status) = parse_status_payload(arg0)?;
    let order = app
        .orders
        .update_status(&order_id, status)
        .await
        .map_err(|e| e.to_string())?;
    Ok(json!({
        "success": true,
        "message": format!("Order marked {}", status.label()),
        "order": order,
    }))
}

/// Build the WhatsApp link for an order; with `open: true` also launch it.
pub async fn orders_whatsapp_link(arg0: Option<Value>, app: &App) -> Result<Value, String> {
    require_login(app)?;
    let payload = payload_or_key(arg0, "orderId");
    let order_id = order_id_of(&payload).ok_or("Missing orderId")?;
    let orders = app.orders.orders().map_err(|e| e.to_string())?;
    let order = orders
        .iter()
        .find(|o| o.id == order_id)
        .ok_or_else(|| format!("Order not found: {order_id}"))?;

    let phone = value_str(&payload, &["phone"]).or_else(|| {
        let stored = order.phone.trim();
        (!stored.is_empty()).then(|| stored.to_string())
    });
    let url = whatsapp_link(phone.as_deref(), order);
    let opened = if value_bool(&payload, &["open"]) == Some(true) {
        open_external(&url)?;
        true
    } else {
        false
    };
    Ok(json!({
        "success": true,
        "url": url,
        "opened": opened,
    }))
}

#[cfg(test)]
mod dto_tests {
    use super::*;

    #[test]
    fn status_payload_accepts_numeric_ids() {
        let (id, status) =
            parse_status_payload(Some(json!({ "id": 7, "status": "in process" }))).unwrap();
        assert_eq!(id, "7");
        assert_eq!(status, OrderStatus::InProcess);

        let (id, status) =
            parse_status_payload(Some(json!({ "orderId": " abc ", "status": "DELIVERED" })))
                .unwrap();
        assert_eq!(id, "abc");
        assert_eq!(status, OrderStatus::Delivered);
    }

    #[test]
    fn status_payload_rejects_bad_input() {
        assert!(parse_status_payload(Some(json!({ "orderId": "1", "status": "LOST" }))).is_err());
        assert_eq!(
            parse_status_payload(Some(json!({ "orderId": "", "status": "RECEIVED" })))
                .unwrap_err(),
            "Missing orderId"
        );
        assert!(parse_status_payload(None).is_err());
    }

    #[test]
    fn order_id_from_string_or_number() {
        assert_eq!(order_id_of(&json!({ "orderId": "12" })).as_deref(), Some("12"));
        assert_eq!(order_id_of(&json!({ "id": 12 })).as_deref(), Some("12"));
        assert_eq!(order_id_of(&json!({})), None);
    }
}
