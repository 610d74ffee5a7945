//! In-memory `RemoteStore` for tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::items::{parse_timestamp, ItemRow};
use crate::orders::OrderRow;
use crate::remote::{ItemEvent, RemoteError, RemoteStore};

#[derive(Default)]
struct State {
    items: BTreeMap<String, ItemRow>,
    events: Vec<ItemEvent>,
    orders: Vec<OrderRow>,
    uploads: Vec<String>,
    failing_paths: HashSet<String>,
    next_order_id: u64,
}

/// Scripted fake: item rows keyed by id, orders, events and upload paths.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<State>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_events: AtomicBool,
    fail_uploads: AtomicBool,
}

fn offline() -> RemoteError {
    RemoteError::Unreachable {
        url: "https://fake.local".into(),
    }
}

impl FakeRemote {
    pub fn new() -> FakeRemote {
        FakeRemote::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake remote state")
    }

    pub fn public_url(&self, path: &str) -> String {
        format!("https://fake.local/storage/{path}")
    }

    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    /// Item row writes: upsert, update and deletes.
    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    pub fn fail_events(&self, on: bool) {
        self.fail_events.store(on, Ordering::SeqCst);
    }

    pub fn fail_uploads(&self, on: bool) {
        self.fail_uploads.store(on, Ordering::SeqCst);
    }

    pub fn fail_upload_for(&self, path: &str) {
        self.state().failing_paths.insert(path.to_string());
    }

    pub fn put_row(&self, row: ItemRow) {
        self.state().items.insert(row.item_id.clone(), row);
    }

    pub fn row(&self, item_id: &str) -> Option<ItemRow> {
        self.state().items.get(item_id).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.state().items.len()
    }

    pub fn events(&self) -> Vec<ItemEvent> {
        self.state().events.clone()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.state().uploads.clone()
    }

    pub fn orders(&self) -> Vec<OrderRow> {
        self.state().orders.clone()
    }

    fn check(&self, flag: &AtomicBool) -> Result<(), RemoteError> {
        if flag.load(Ordering::SeqCst) {
            Err(offline())
        } else {
            Ok(())
        }
    }
}

/// Shallow-merge `patch` into `target`.
fn merge_json<T>(target: &T, patch: &Value) -> Result<T, RemoteError>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    let mut value =
        serde_json::to_value(target).map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
    if let (Some(obj), Some(fields)) = (value.as_object_mut(), patch.as_object()) {
        for (k, v) in fields {
            obj.insert(k.clone(), v.clone());
        }
    }
    serde_json::from_value(value).map_err(|e| RemoteError::InvalidResponse(e.to_string()))
}

fn not_found() -> RemoteError {
    RemoteError::Rejected {
        status: 404,
        message: "row not found".into(),
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn fetch_recent_items(&self, limit: usize) -> Result<Vec<ItemRow>, RemoteError> {
        self.check(&self.fail_reads)?;
        let mut rows: Vec<ItemRow> = self.state().items.values().cloned().collect();
        rows.sort_by(|a, b| {
            let ta = parse_timestamp(a.updated_at.as_deref().unwrap_or_default());
            let tb = parse_timestamp(b.updated_at.as_deref().unwrap_or_default());
            tb.cmp(&ta)
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn find_item(&self, item_id: &str) -> Result<Option<ItemRow>, RemoteError> {
        self.check(&self.fail_reads)?;
        Ok(self.row(item_id))
    }

    async fn upsert_item(&self, row: &ItemRow) -> Result<(), RemoteError> {
        self.check(&self.fail_writes)?;
        self.put_row(row.clone());
        Ok(())
    }

    async fn update_item(&self, item_id: &str, patch: Value) -> Result<(), RemoteError> {
        self.check(&self.fail_writes)?;
        let mut state = self.state();
        let existing = state
            .items
            .get(item_id)
            .ok_or_else(|| RemoteError::RowMissing(item_id.to_string()))?;
        let merged = merge_json(existing, &patch)?;
        state.items.insert(item_id.to_string(), merged);
        Ok(())
    }

    async fn delete_item(&self, item_id: &str) -> Result<(), RemoteError> {
        self.check(&self.fail_writes)?;
        self.state().items.remove(item_id);
        Ok(())
    }

    async fn delete_all_items(&self) -> Result<(), RemoteError> {
        self.check(&self.fail_writes)?;
        self.state().items.clear();
        Ok(())
    }

    async fn insert_event(&self, event: &ItemEvent) -> Result<(), RemoteError> {
        self.check(&self.fail_events)?;
        self.state().events.push(event.clone());
        Ok(())
    }

    async fn list_orders(&self, limit: usize) -> Result<Vec<OrderRow>, RemoteError> {
        self.check(&self.fail_reads)?;
        let mut rows = self.orders();
        rows.reverse();
        rows.truncate(limit);
        Ok(rows)
    }

    async fn insert_order(&self, row: Value) -> Result<OrderRow, RemoteError> {
        let mut state = self.state();
        state.next_order_id += 1;
        let mut fields = row;
        fields["id"] = json!(state.next_order_id);
        fields["created_at"] = json!(format!("2026-01-01T00:00:{:02}Z", state.next_order_id % 60));
        let stored: OrderRow = serde_json::from_value(fields)
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        state.orders.push(stored.clone());
        Ok(stored)
    }

    async fn update_order(&self, order_id: &str, patch: Value) -> Result<OrderRow, RemoteError> {
        let mut state = self.state();
        let slot = state
            .orders
            .iter_mut()
            .find(|o| o.id_text() == order_id)
            .ok_or_else(not_found)?;
        *slot = merge_json(&*slot, &patch)?;
        Ok(slot.clone())
    }

    async fn upload_image(
        &self,
        path: &str,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, RemoteError> {
        self.check(&self.fail_uploads)?;
        let mut state = self.state();
        if state.failing_paths.contains(path) {
            return Err(RemoteError::Rejected {
                status: 500,
                message: "upload refused".into(),
            });
        }
        state.uploads.push(path.to_string());
        Ok(self.public_url(path))
    }
}
