//! Remote store client.
//!
//! The cloud side is a Supabase project: PostgREST tables `items`, `events`
//! and `orders`, plus a public Storage bucket for photos. [`RemoteStore`] is
//! the seam the inventory engine talks to; [`SupabaseStore`] is the HTTP
//! implementation.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::RemoteConfig;
use crate::items::{rows_from_page, ItemRow};
use crate::orders::OrderRow;

/// Default timeout for remote requests (20 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Uploads get longer; phone photos on a slow link take a while.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Cloud not configured: {0}")]
    NotConfigured(String),
    #[error("Cannot reach cloud at {url}")]
    Unreachable { url: String },
    #[error("Connection to {url} timed out")]
    Timeout { url: String },
    #[error("{message} (HTTP {status})")]
    Rejected { status: u16, message: String },
    #[error("Invalid response from cloud: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Cloud has no row for {0}")]
    RowMissing(String),
}

impl RemoteError {
    /// Connectivity problem as opposed to the server saying no.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            RemoteError::Unreachable { .. } | RemoteError::Timeout { .. } | RemoteError::Network(_)
        )
    }

    /// A point update matched nothing; the row was never pushed.
    pub fn is_row_missing(&self) -> bool {
        matches!(self, RemoteError::RowMissing(_))
    }

    /// Row-level security or auth rejection.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, RemoteError::Rejected { status, .. } if *status == 401 || *status == 403)
    }
}

/// One row of the append-only `events` audit table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEvent {
    pub item_id: String,
    pub action: String,
    pub actor: String,
    pub place: String,
    pub created_at: String,
}

/// Operations the inventory and order book need from the cloud.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Most recently updated item rows, newest first, at most `limit`.
    async fn fetch_recent_items(&self, limit: usize) -> Result<Vec<ItemRow>, RemoteError>;

    /// Point lookup by `item_id`.
    async fn find_item(&self, item_id: &str) -> Result<Option<ItemRow>, RemoteError>;

    /// Insert or fully replace the row with the same `item_id`.
    async fn upsert_item(&self, row: &ItemRow) -> Result<(), RemoteError>;

    /// Update selected columns of one item row. Fails with
    /// [`RemoteError::RowMissing`] when no row has that `item_id`.
    async fn update_item(&self, item_id: &str, patch: Value) -> Result<(), RemoteError>;

    async fn delete_item(&self, item_id: &str) -> Result<(), RemoteError>;

    async fn delete_all_items(&self) -> Result<(), RemoteError>;

    async fn insert_event(&self, event: &ItemEvent) -> Result<(), RemoteError>;

    /// Orders, newest `created_at` first, at most `limit`.
    async fn list_orders(&self, limit: usize) -> Result<Vec<OrderRow>, RemoteError>;

    /// Insert an order and return the stored row.
    async fn insert_order(&self, row: Value) -> Result<OrderRow, RemoteError>;

    /// Update one order and return the stored row.
    async fn update_order(&self, order_id: &str, patch: Value) -> Result<OrderRow, RemoteError>;

    /// Store bytes at `path` and return their public URL.
    async fn upload_image(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, RemoteError>;
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-facing error.
fn friendly_error(url: &str, err: &reqwest::Error) -> RemoteError {
    if err.is_connect() {
        return RemoteError::Unreachable {
            url: url.to_string(),
        };
    }
    if err.is_timeout() {
        return RemoteError::Timeout {
            url: url.to_string(),
        };
    }
    if err.is_builder() {
        return RemoteError::NotConfigured(format!("invalid cloud URL: {url}"));
    }
    RemoteError::Network(format!("communicating with {url}: {err}"))
}

/// Convert an HTTP status code into a user-facing message.
fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Cloud key is invalid or expired".to_string(),
        403 => "Cloud refused the change (row-level security)".to_string(),
        404 => "Cloud table or bucket not found".to_string(),
        409 => "Cloud rejected a conflicting row".to_string(),
        s if s >= 500 => "Cloud server error".to_string(),
        _ => "Unexpected response from cloud".to_string(),
    }
}

/// Pull the PostgREST / Storage error text out of a failed response body.
fn rejected(status: StatusCode, body_text: &str) -> RemoteError {
    let detail = serde_json::from_str::<Value>(body_text)
        .ok()
        .and_then(|json| {
            json.get("message")
                .or_else(|| json.get("error"))
                .or_else(|| json.get("msg"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .filter(|s| !s.trim().is_empty());
    let message = match detail {
        Some(d) => format!("{}: {d}", status_message(status)),
        None => status_message(status),
    };
    RemoteError::Rejected {
        status: status.as_u16(),
        message,
    }
}

// ---------------------------------------------------------------------------
// Supabase implementation
// ---------------------------------------------------------------------------

/// Supabase REST + Storage client.
pub struct SupabaseStore {
    base_url: String,
    anon_key: String,
    image_bucket: String,
    client: Client,
}

impl SupabaseStore {
    pub fn new(config: &RemoteConfig, image_bucket: &str) -> Result<SupabaseStore, RemoteError> {
        if config.url.trim().is_empty() {
            return Err(RemoteError::NotConfigured("missing URL".into()));
        }
        if config.anon_key.trim().is_empty() {
            return Err(RemoteError::NotConfigured("missing anon key".into()));
        }
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Network(format!("HTTP client error: {e}")))?;
        Ok(SupabaseStore {
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            image_bucket: image_bucket.to_string(),
            client,
        })
    }

    fn rest_url(&self, table: &str, params: &[(&str, String)]) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&format!("{}/rest/v1/{table}", self.base_url))
            .map_err(|e| RemoteError::NotConfigured(format!("invalid cloud URL: {e}")))?;
        {
            let mut qp = url.query_pairs_mut();
            for (k, v) in params {
                qp.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn authed(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
    }

    /// Send, map transport and status errors, return the body text.
    async fn send(&self, req: RequestBuilder) -> Result<String, RemoteError> {
        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(rejected(status, &body_text));
        }
        Ok(body_text)
    }

    async fn rest_json<T: serde::de::DeserializeOwned>(
        &self,
        req: RequestBuilder,
    ) -> Result<T, RemoteError> {
        let body = self.send(req).await?;
        serde_json::from_str::<T>(&body).map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    }

    /// PostgREST answers `return=representation` writes with an array.
    fn single_row<T>(rows: Vec<T>) -> Result<T, RemoteError> {
        rows.into_iter()
            .next()
            .ok_or_else(|| RemoteError::InvalidResponse("write returned no row".into()))
    }

    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.image_bucket, path
        )
    }
}

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

#[async_trait]
impl RemoteStore for SupabaseStore {
    async fn fetch_recent_items(&self, limit: usize) -> Result<Vec<ItemRow>, RemoteError> {
        let url = self.rest_url(
            "items",
            &[
                ("select", "*".to_string()),
                ("order", "updated_at.desc".to_string()),
                ("limit", limit.to_string()),
            ],
        )?;
        let page: Vec<Value> = self.rest_json(self.authed(Method::GET, url)).await?;
        let received = page.len();
        let rows = rows_from_page(page);
        debug!(received, kept = rows.len(), limit, "fetched recent item rows");
        Ok(rows)
    }

    async fn find_item(&self, item_id: &str) -> Result<Option<ItemRow>, RemoteError> {
        let url = self.rest_url(
            "items",
            &[
                ("select", "*".to_string()),
                ("item_id", eq(item_id)),
                ("limit", "1".to_string()),
            ],
        )?;
        let page: Vec<Value> = self.rest_json(self.authed(Method::GET, url)).await?;
        Ok(rows_from_page(page).into_iter().next())
    }

    async fn upsert_item(&self, row: &ItemRow) -> Result<(), RemoteError> {
        let url = self.rest_url("items", &[("on_conflict", "item_id".to_string())])?;
        let req = self
            .authed(Method::POST, url)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row);
        self.send(req).await?;
        Ok(())
    }

    async fn update_item(&self, item_id: &str, patch: Value) -> Result<(), RemoteError> {
        // PostgREST answers a PATCH that matches nothing with success, so
        // ask for the touched keys back and check there was one.
        let url = self.rest_url(
            "items",
            &[("item_id", eq(item_id)), ("select", "item_id".to_string())],
        )?;
        let req = self
            .authed(Method::PATCH, url)
            .header("Prefer", "return=representation")
            .json(&patch);
        let touched: Vec<Value> = self.rest_json(req).await?;
        if touched.is_empty() {
            return Err(RemoteError::RowMissing(item_id.to_string()));
        }
        Ok(())
    }

    async fn delete_item(&self, item_id: &str) -> Result<(), RemoteError> {
        let url = self.rest_url("items", &[("item_id", eq(item_id))])?;
        self.send(self.authed(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn delete_all_items(&self) -> Result<(), RemoteError> {
        // PostgREST refuses an unfiltered DELETE; match every non-empty id.
        let url = self.rest_url("items", &[("item_id", "neq.".to_string())])?;
        self.send(self.authed(Method::DELETE, url)).await?;
        info!("deleted all cloud item rows");
        Ok(())
    }

    async fn insert_event(&self, event: &ItemEvent) -> Result<(), RemoteError> {
        let url = self.rest_url("events", &[])?;
        let req = self
            .authed(Method::POST, url)
            .header("Prefer", "return=minimal")
            .json(event);
        self.send(req).await?;
        Ok(())
    }

    async fn list_orders(&self, limit: usize) -> Result<Vec<OrderRow>, RemoteError> {
        let url = self.rest_url(
            "orders",
            &[
                ("select", "*".to_string()),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ],
        )?;
        self.rest_json(self.authed(Method::GET, url)).await
    }

    async fn insert_order(&self, row: Value) -> Result<OrderRow, RemoteError> {
        let url = self.rest_url("orders", &[("select", "*".to_string())])?;
        let req = self
            .authed(Method::POST, url)
            .header("Prefer", "return=representation")
            .json(&row);
        let rows: Vec<OrderRow> = self.rest_json(req).await?;
        Self::single_row(rows)
    }

    async fn update_order(&self, order_id: &str, patch: Value) -> Result<OrderRow, RemoteError> {
        let url = self.rest_url(
            "orders",
            &[("id", eq(order_id)), ("select", "*".to_string())],
        )?;
        let req = self
            .authed(Method::PATCH, url)
            .header("Prefer", "return=representation")
            .json(&patch);
        let rows: Vec<OrderRow> = self.rest_json(req).await?;
        Self::single_row(rows)
    }

    async fn upload_image(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, RemoteError> {
        let url = Url::parse(&format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.image_bucket, path
        ))
        .map_err(|e| RemoteError::NotConfigured(format!("invalid storage URL: {e}")))?;
        let size = bytes.len();
        let req = self
            .authed(Method::POST, url)
            .timeout(UPLOAD_TIMEOUT)
            .header("x-upsert", "true")
            .header("Content-Type", content_type)
            .body(bytes);
        self.send(req).await?;
        info!(path = %path, bytes = size, "photo uploaded");
        Ok(self.public_url(path))
    }
}
