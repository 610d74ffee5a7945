//! Customer orders.
//!
//! Orders live only in the cloud `orders` table. The book keeps the last
//! fetched list in memory and re-syncs it from the row each write returns.

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::data_helpers::{normalize_phone, validate_external_url};
use crate::error::InventoryError;
use crate::items::{format3, now_iso, KARAT_OPTIONS};
use crate::photos::{safe_file_name, upload_batch, PhotoOutcome, PhotoUpload};
use crate::remote::RemoteStore;

/// Country code prepended to bare 10-digit mobile numbers.
const DEFAULT_COUNTRY_CODE: &str = "91";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Received,
    InProcess,
    Delivered,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 3] = [
        OrderStatus::Received,
        OrderStatus::InProcess,
        OrderStatus::Delivered,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Received => "RECEIVED",
            OrderStatus::InProcess => "IN_PROCESS",
            OrderStatus::Delivered => "DELIVERED",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            OrderStatus::Received => "Received",
            OrderStatus::InProcess => "In Process",
            OrderStatus::Delivered => "Delivered",
        }
    }

    /// Unknown or missing text is `RECEIVED`.
    pub fn parse_lenient(raw: Option<&str>) -> OrderStatus {
        match raw
            .map(|s| s.trim().to_ascii_uppercase().replace(['-', ' '], "_"))
            .as_deref()
        {
            Some("IN_PROCESS") => OrderStatus::InProcess,
            Some("DELIVERED") => OrderStatus::Delivered,
            _ => OrderStatus::Received,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(OrderStatus::parse_lenient(raw.as_deref()))
    }
}

/// An order as shown to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub party_name: String,
    pub order_date: String,
    pub delivery_date: String,
    pub karat: String,
    pub product_type: String,
    pub design_no: String,
    pub weight_required: String,
    pub status: OrderStatus,
    pub photo_urls: Vec<String>,
    pub phone: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A row of the cloud `orders` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRow {
    pub id: Value,
    #[serde(default)]
    pub party_name: Option<String>,
    #[serde(default)]
    pub order_date: Option<String>,
    #[serde(default)]
    pub delivery_date: Option<String>,
    #[serde(default)]
    pub karat: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub design_no: Option<String>,
    #[serde(default)]
    pub weight_required: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub photo_urls: Option<Vec<String>>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl OrderRow {
    /// Primary key as text; the table may use serial or uuid ids.
    pub fn id_text(&self) -> String {
        match &self.id {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    pub fn into_order(self) -> Order {
        let id = self.id_text();
        let weight_required = match self.weight_required {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s,
            _ => String::new(),
        };
        Order {
            id,
            party_name: self.party_name.unwrap_or_default(),
            order_date: self.order_date.unwrap_or_default(),
            delivery_date: self.delivery_date.unwrap_or_default(),
            karat: self.karat.unwrap_or_default(),
            product_type: self.product_type.unwrap_or_default(),
            design_no: self.design_no.unwrap_or_default(),
            weight_required,
            status: OrderStatus::parse_lenient(self.status.as_deref()),
            photo_urls: self.photo_urls.unwrap_or_default(),
            phone: self.phone.unwrap_or_default(),
            created_at: self.created_at.unwrap_or_default(),
            updated_at: self.updated_at.unwrap_or_default(),
        }
    }
}

/// Fields the order form collects.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    #[serde(default, alias = "party_name")]
    pub party_name: String,
    #[serde(default, alias = "order_date")]
    pub order_date: String,
    #[serde(default, alias = "delivery_date")]
    pub delivery_date: String,
    #[serde(default)]
    pub karat: String,
    #[serde(default, alias = "product_type")]
    pub product_type: String,
    #[serde(default, alias = "design_no")]
    pub design_no: String,
    #[serde(default, alias = "weight_required")]
    pub weight_required: String,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub phone: String,
}

impl OrderDraft {
    /// Insert payload for the cloud table.
    fn insert_row(&self, photo_urls: &[String], today: &str) -> Value {
        let order_date = match self.order_date.trim() {
            "" => today.to_string(),
            d => d.to_string(),
        };
        let delivery_date = match self.delivery_date.trim() {
            "" => Value::Null,
            d => Value::String(d.to_string()),
        };
        let karat = match self.karat.trim() {
            "" => KARAT_OPTIONS[0],
            k => k,
        };
        let weight_required = self
            .weight_required
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|w| w.is_finite())
            .map(Value::from)
            .unwrap_or(Value::Null);
        let photo_urls = if photo_urls.is_empty() {
            Value::Null
        } else {
            json!(photo_urls)
        };

        let mut row = json!({
            "party_name": self.party_name.trim(),
            "order_date": order_date,
            "delivery_date": delivery_date,
            "karat": karat,
            "product_type": self.product_type.trim(),
            "design_no": self.design_no.trim(),
            "weight_required": weight_required,
            "status": self.status.unwrap_or_default().as_str(),
            "photo_urls": photo_urls,
        });
        let phone = normalize_phone(&self.phone);
        if !phone.is_empty() {
            row["phone"] = Value::String(phone);
        }
        row
    }
}

/// Result of a successful order create.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order: Order,
    pub photos: PhotoOutcome,
}

impl OrderCreated {
    pub fn message(&self) -> String {
        if self.photos.any_failed() {
            format!(
                "Order saved, {} of {} photos failed to upload",
                self.photos.failed, self.photos.attempted
            )
        } else {
            "Order saved".to_string()
        }
    }
}

// ---------------------------------------------------------------------------
// Order book
// ---------------------------------------------------------------------------

pub struct OrderBook {
    orders: Mutex<Vec<Order>>,
    remote: Option<Arc<dyn RemoteStore>>,
    limit: usize,
}

impl OrderBook {
    pub fn new(remote: Option<Arc<dyn RemoteStore>>, limit: usize) -> OrderBook {
        OrderBook {
            orders: Mutex::new(Vec::new()),
            remote,
            limit: limit.max(1),
        }
    }

    fn remote(&self) -> Result<&dyn RemoteStore, InventoryError> {
        self.remote
            .as_deref()
            .ok_or_else(InventoryError::cloud_not_configured)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Order>>, InventoryError> {
        self.orders
            .lock()
            .map_err(|e| InventoryError::Storage(e.to_string()))
    }

    /// Last fetched list.
    pub fn orders(&self) -> Result<Vec<Order>, InventoryError> {
        Ok(self.lock()?.clone())
    }

    /// Refetch from the cloud. On failure the in-memory list is untouched.
    pub async fn load(&self) -> Result<Vec<Order>, InventoryError> {
        let rows = self.remote()?.list_orders(self.limit).await.map_err(|e| {
            warn!(error = %e, "failed to load orders");
            InventoryError::from(e)
        })?;
        let fresh: Vec<Order> = rows.into_iter().map(OrderRow::into_order).collect();
        info!(count = fresh.len(), "orders loaded");
        let mut orders = self.lock()?;
        *orders = fresh.clone();
        Ok(fresh)
    }

    /// Upload photos, insert the row, prepend the stored order.
    pub async fn create(
        &self,
        draft: OrderDraft,
        photos: Vec<PhotoUpload>,
    ) -> Result<OrderCreated, InventoryError> {
        if draft.party_name.trim().is_empty() {
            return Err(InventoryError::Invalid("Party Name required".into()));
        }
        let remote = self.remote()?;

        let millis = Utc::now().timestamp_millis();
        let batch = photos
            .into_iter()
            .enumerate()
            .map(|(n, p)| {
                let path = format!("orders/{millis}-{n}-{}", safe_file_name(&p.file_name));
                (path, p)
            })
            .collect();
        let (photo_urls, photo_outcome) = upload_batch(remote, batch).await;

        let today = Local::now().date_naive().to_string();
        let row = remote
            .insert_order(draft.insert_row(&photo_urls, &today))
            .await?;
        let order = row.into_order();
        info!(order_id = %order.id, photos = photo_outcome.uploaded, "order created");

        self.lock()?.insert(0, order.clone());
        Ok(OrderCreated {
            order,
            photos: photo_outcome,
        })
    }

    pub async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<Order, InventoryError> {
        let patch = json!({
            "status": status.as_str(),
            "updated_at": now_iso(),
        });
        let row = self.remote()?.update_order(order_id, patch).await?;
        let updated = row.into_order();
        info!(order_id = %order_id, status = %status, "order status updated");

        let mut orders = self.lock()?;
        for existing in orders.iter_mut().filter(|o| o.id == order_id) {
            *existing = updated.clone();
        }
        Ok(updated)
    }
}

// ---------------------------------------------------------------------------
// WhatsApp
// ---------------------------------------------------------------------------

/// Percent-encode like a browser `encodeURIComponent`.
fn encode_component(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 3);
    for b in text.bytes() {
        match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Summary text sent to the customer.
pub fn order_message(order: &Order) -> String {
    let mut lines = vec![format!("Order update for {}", order.party_name.trim())];
    let mut push = |label: &str, value: &str| {
        if !value.trim().is_empty() {
            lines.push(format!("{label}: {}", value.trim()));
        }
    };
    push("Product", &order.product_type);
    push("Design", &order.design_no);
    push("Karat", &order.karat);
    let weight = order
        .weight_required
        .trim()
        .parse::<f64>()
        .map(|w| format!("{} g", format3(w)))
        .unwrap_or_default();
    push("Weight", &weight);
    push("Order date", &order.order_date);
    push("Delivery", &order.delivery_date);
    push("Status", order.status.label());
    lines.join("\n")
}

/// `wa.me` deep link carrying the order summary.
pub fn whatsapp_link(phone: Option<&str>, order: &Order) -> String {
    let mut digits = phone.map(normalize_phone).unwrap_or_default();
    if digits.len() == 10 {
        digits = format!("{DEFAULT_COUNTRY_CODE}{digits}");
    }
    format!(
        "https://wa.me/{digits}?text={}",
        encode_component(&order_message(order))
    )
}

/// Hand an allowlisted URL to the OS browser.
pub fn open_external(url: &str) -> Result<(), String> {
    let parsed = validate_external_url(url)?;
    webbrowser::open(parsed.as_str()).map_err(|e| format!("Failed to open URL: {e}"))?;
    info!(host = parsed.host_str().unwrap_or_default(), "opened external link");
    Ok(())
}
