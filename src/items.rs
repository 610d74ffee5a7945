//! Inventory item model.
//!
//! Local records are camelCase JSON (the shape the UI stores); remote rows
//! are the snake_case `items` table. Weights are kept as 3-decimal strings
//! locally and numbers remotely.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Karat options offered by the add form; the first is the default.
pub const KARAT_OPTIONS: &[&str] = &["22K", "20K", "18K", "14K", "9K"];

/// Timestamp substituted for missing or unparseable `updatedAt` values.
pub const EPOCH_ISO: &str = "1970-01-01T00:00:00.000Z";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    #[default]
    InStock,
    Sold,
    Returned,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 3] = [ItemStatus::InStock, ItemStatus::Sold, ItemStatus::Returned];

    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::InStock => "IN_STOCK",
            ItemStatus::Sold => "SOLD",
            ItemStatus::Returned => "RETURNED",
        }
    }

    /// Lenient parse: unknown or missing text is `IN_STOCK`.
    pub fn parse_lenient(raw: Option<&str>) -> ItemStatus {
        match raw
            .map(|s| s.trim().to_ascii_uppercase().replace(['-', ' '], "_"))
            .as_deref()
        {
            Some("SOLD") => ItemStatus::Sold,
            Some("RETURNED") | Some("RETURN") => ItemStatus::Returned,
            _ => ItemStatus::InStock,
        }
    }

    /// Action text written to the audit log for a transition into this state.
    pub fn event_action(self) -> &'static str {
        match self {
            ItemStatus::InStock => "IN",
            ItemStatus::Sold => "SOLD",
            ItemStatus::Returned => "RETURN",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ItemStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(ItemStatus::parse_lenient(raw.as_deref()))
    }
}

/// One physical inventory piece as stored locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub item_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub design_no: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub category: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub karat: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub gross_wt: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub less_wt: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub net_wt: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub notes: String,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default)]
    pub image_urls: Vec<String>,
    /// Single-photo field written by older builds; folded into `image_urls`.
    #[serde(default, skip_serializing, alias = "image_url")]
    image_url: Option<String>,
    #[serde(default = "epoch_iso")]
    pub created_at: String,
    #[serde(default = "epoch_iso")]
    pub updated_at: String,
}

fn epoch_iso() -> String {
    EPOCH_ISO.to_string()
}

/// Accept strings, numbers and null for free-form text fields.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let v = Value::deserialize(deserializer)?;
    Ok(match v {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

impl Item {
    /// Primary thumbnail (first uploaded photo).
    pub fn primary_image(&self) -> Option<&str> {
        self.image_urls.first().map(String::as_str)
    }

    /// Fold the legacy `imageUrl` field into `image_urls` and default
    /// blank timestamps. Called on every record read from storage.
    pub fn normalize(mut self) -> Item {
        if let Some(legacy) = self.image_url.take() {
            let legacy = legacy.trim().to_string();
            if !legacy.is_empty() && !self.image_urls.contains(&legacy) {
                self.image_urls.insert(0, legacy);
            }
        }
        self.image_urls.retain(|u| !u.trim().is_empty());
        if self.created_at.trim().is_empty() {
            self.created_at = epoch_iso();
        }
        if self.updated_at.trim().is_empty() {
            self.updated_at = self.created_at.clone();
        }
        self
    }

    /// Parsed `updated_at`; missing or unparseable values are the epoch.
    pub fn updated_at_time(&self) -> DateTime<Utc> {
        parse_timestamp(&self.updated_at)
    }

    /// Upgrade a single-photo record written by an older build.
    #[cfg(test)]
    pub(crate) fn with_legacy_image(mut self, url: &str) -> Item {
        self.image_url = Some(url.to_string());
        self
    }
}

/// Fields the add/edit forms collect. `net_wt` is always derived.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDraft {
    #[serde(default, alias = "design_no")]
    pub design_no: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub karat: String,
    #[serde(default, alias = "gross_wt", deserialize_with = "string_or_number")]
    pub gross_wt: String,
    #[serde(default, alias = "less_wt", deserialize_with = "string_or_number")]
    pub less_wt: String,
    #[serde(default)]
    pub notes: String,
}

impl ItemDraft {
    /// Build a fresh `IN_STOCK` item with the given id and timestamp.
    pub fn into_item(self, item_id: String, now: &str) -> Item {
        let gross = self.gross_wt.trim().to_string();
        let less = match self.less_wt.trim() {
            "" => "0".to_string(),
            other => other.to_string(),
        };
        let net_wt = compute_net_wt(&gross, &less);
        let karat = match self.karat.trim() {
            "" => KARAT_OPTIONS[0].to_string(),
            k => k.to_string(),
        };
        Item {
            item_id,
            design_no: self.design_no.trim().to_string(),
            category: self.category.trim().to_string(),
            karat,
            gross_wt: gross,
            less_wt: less,
            net_wt,
            notes: self.notes.trim().to_string(),
            status: ItemStatus::InStock,
            image_urls: Vec::new(),
            image_url: None,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        }
    }
}

/// Partial edit of descriptive fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    #[serde(default, alias = "design_no")]
    pub design_no: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub karat: Option<String>,
    #[serde(default, alias = "gross_wt")]
    pub gross_wt: Option<String>,
    #[serde(default, alias = "less_wt")]
    pub less_wt: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ItemPatch {
    /// Apply to `item`, recomputing `net_wt` when a weight changed.
    pub fn apply(&self, item: &mut Item) {
        if let Some(v) = &self.design_no {
            item.design_no = v.trim().to_string();
        }
        if let Some(v) = &self.category {
            item.category = v.trim().to_string();
        }
        if let Some(v) = &self.karat {
            item.karat = v.trim().to_string();
        }
        if let Some(v) = &self.notes {
            item.notes = v.trim().to_string();
        }
        let mut weights_changed = false;
        if let Some(v) = &self.gross_wt {
            item.gross_wt = v.trim().to_string();
            weights_changed = true;
        }
        if let Some(v) = &self.less_wt {
            item.less_wt = v.trim().to_string();
            weights_changed = true;
        }
        if weights_changed {
            item.net_wt = compute_net_wt(&item.gross_wt, &item.less_wt);
        }
    }
}

// ---------------------------------------------------------------------------
// Weights and timestamps
// ---------------------------------------------------------------------------

/// Parse the leading float of a weight string, like a browser `parseFloat`.
fn parse_weight(raw: &str) -> Option<f64> {
    let s = raw.trim();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    for (i, c) in s.char_indices() {
        match c {
            '+' | '-' if i == 0 => {}
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end = i + c.len_utf8();
    }
    if !seen_digit {
        return None;
    }
    s[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Render a number with exactly three decimals; non-finite is empty.
pub fn format3(value: f64) -> String {
    if !value.is_finite() {
        return String::new();
    }
    let rounded = format!("{value:.3}");
    if rounded == "-0.000" {
        "0.000".to_string()
    } else {
        rounded
    }
}

/// Net weight from gross and less weight strings.
///
/// Non-numeric gross yields `""`; non-numeric less is treated as absent.
pub fn compute_net_wt(gross_wt: &str, less_wt: &str) -> String {
    let Some(gross) = parse_weight(gross_wt) else {
        return String::new();
    };
    match parse_weight(less_wt) {
        Some(less) => format3(gross - less),
        None => format3(gross),
    }
}

/// Numeric weight for the remote row; blanks and junk become 0.
pub(crate) fn weight_number(raw: &str) -> f64 {
    parse_weight(raw).unwrap_or(0.0)
}

/// Parse an ISO-8601 timestamp; anything unparseable is the epoch.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return dt.with_timezone(&Utc);
    }
    // Postgres `timestamptz` text without the `T` separator.
    if let Ok(dt) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return dt.with_timezone(&Utc);
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return naive.and_utc();
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return naive.and_utc();
        }
    }
    DateTime::<Utc>::UNIX_EPOCH
}

/// Current time in the millisecond ISO form written to `updatedAt`.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Remote row mapping
// ---------------------------------------------------------------------------

/// A row of the remote `items` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRow {
    pub item_id: String,
    #[serde(default)]
    pub design_no: Option<Value>,
    #[serde(default)]
    pub category: Option<Value>,
    #[serde(default)]
    pub karat: Option<Value>,
    #[serde(default)]
    pub gross_wt: Option<Value>,
    #[serde(default)]
    pub less_wt: Option<Value>,
    #[serde(default)]
    pub net_wt: Option<Value>,
    #[serde(default)]
    pub notes: Option<Value>,
    #[serde(default, deserialize_with = "text_or_none")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "text_or_none")]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "url_list")]
    pub image_urls: Option<Vec<String>>,
    #[serde(default, deserialize_with = "text_or_none")]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "text_or_none")]
    pub updated_at: Option<String>,
}

/// Strings pass through; any other JSON type reads as absent.
fn text_or_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// String elements of an array; nulls and other junk are dropped.
fn url_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<String>>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(values) => Some(
            values
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    })
}

/// Decode a page of remote rows one by one. Rows without a usable
/// `item_id` are skipped.
pub fn rows_from_page(page: Vec<Value>) -> Vec<ItemRow> {
    let mut rows = Vec::with_capacity(page.len());
    for raw in page {
        match serde_json::from_value::<ItemRow>(raw) {
            Ok(row) if !row.item_id.trim().is_empty() => rows.push(row),
            Ok(_) => warn!("skipping cloud item row with empty item_id"),
            Err(e) => warn!(error = %e, "skipping unreadable cloud item row"),
        }
    }
    rows
}

fn value_text(v: &Option<Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Remote numeric weight back to the local 3-decimal string.
fn weight_text(v: &Option<Value>) -> String {
    match v {
        Some(Value::Number(n)) => n.as_f64().map(format3).unwrap_or_default(),
        Some(Value::String(s)) => parse_weight(s).map(format3).unwrap_or_default(),
        _ => String::new(),
    }
}

impl ItemRow {
    pub fn from_item(item: &Item) -> ItemRow {
        ItemRow {
            item_id: item.item_id.clone(),
            design_no: Some(Value::String(item.design_no.clone())),
            category: Some(Value::String(item.category.clone())),
            karat: Some(Value::String(item.karat.clone())),
            gross_wt: Some(Value::from(weight_number(&item.gross_wt))),
            less_wt: Some(Value::from(weight_number(&item.less_wt))),
            net_wt: Some(Value::from(weight_number(&item.net_wt))),
            notes: Some(Value::String(item.notes.clone())),
            status: Some(item.status.as_str().to_string()),
            image_url: item.primary_image().map(str::to_string),
            image_urls: Some(item.image_urls.clone()),
            created_at: Some(item.created_at.clone()),
            updated_at: Some(item.updated_at.clone()),
        }
    }

    pub fn into_item(self) -> Item {
        let mut image_urls = self.image_urls.unwrap_or_default();
        image_urls.retain(|u| !u.trim().is_empty());
        if image_urls.is_empty() {
            if let Some(single) = self.image_url.filter(|u| !u.trim().is_empty()) {
                image_urls.push(single);
            }
        }
        let created_at = self
            .created_at
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(epoch_iso);
        let updated_at = self
            .updated_at
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(epoch_iso);
        Item {
            item_id: self.item_id,
            design_no: value_text(&self.design_no),
            category: value_text(&self.category),
            karat: value_text(&self.karat),
            gross_wt: weight_text(&self.gross_wt),
            less_wt: weight_text(&self.less_wt),
            net_wt: weight_text(&self.net_wt),
            notes: value_text(&self.notes),
            status: ItemStatus::parse_lenient(self.status.as_deref()),
            image_urls,
            image_url: None,
            created_at,
            updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Views over the collection
// ---------------------------------------------------------------------------

/// Case-insensitive search on item id and design number.
pub fn filter_items<'a>(items: &'a [Item], query: &str) -> Vec<&'a Item> {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return items.iter().collect();
    }
    items
        .iter()
        .filter(|x| {
            x.item_id.to_lowercase().contains(&q) || x.design_no.to_lowercase().contains(&q)
        })
        .collect()
}

/// Number of items in each status; every status is present.
pub fn status_counts(items: &[Item]) -> BTreeMap<ItemStatus, usize> {
    let mut counts: BTreeMap<ItemStatus, usize> =
        ItemStatus::ALL.iter().map(|s| (*s, 0)).collect();
    for item in items {
        *counts.entry(item.status).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
pub(crate) fn test_item(item_id: &str, updated_at: &str) -> Item {
    Item {
        item_id: item_id.to_string(),
        design_no: "8123".into(),
        category: "Ring".into(),
        karat: "22K".into(),
        gross_wt: "5.000".into(),
        less_wt: "0.500".into(),
        net_wt: "4.500".into(),
        notes: String::new(),
        status: ItemStatus::InStock,
        image_urls: Vec::new(),
        image_url: None,
        created_at: updated_at.to_string(),
        updated_at: updated_at.to_string(),
    }
}
