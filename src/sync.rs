//! Inventory engine: local-first item mutations with opportunistic cloud
//! push, and pull-and-merge from the cloud.
//!
//! Every mutation is applied to the local collection and persisted before
//! the cloud is contacted. A cloud failure never rolls the local change
//! back; it is reported as a [`SyncOutcome`] next to the result. The next
//! successful pull settles the difference with last-write-wins.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::data_helpers;
use crate::db::DbState;
use crate::error::InventoryError;
use crate::item_id::{current_year2, next_item_id};
use crate::items::{
    filter_items, now_iso, status_counts, Item, ItemDraft, ItemPatch, ItemRow, ItemStatus,
};
use crate::photos::{upload_batch, PhotoOutcome, PhotoUpload};
use crate::reconcile::{reconcile, sort_for_display};
use crate::remote::{ItemEvent, RemoteError, RemoteStore};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Cloud side of a mutation whose local side already succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SyncOutcome {
    Synced,
    /// The local copy stays authoritative until the next successful pull.
    PendingNextPull { error: String },
    /// Informational: the cloud row may come back on the next pull.
    Failed { error: String },
}

impl SyncOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced)
    }

    fn pending(err: &RemoteError) -> SyncOutcome {
        SyncOutcome::PendingNextPull {
            error: err.to_string(),
        }
    }

    fn failed(err: &RemoteError) -> SyncOutcome {
        SyncOutcome::Failed {
            error: err.to_string(),
        }
    }
}

/// Result of create, edit, status change and photo removal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemOutcome {
    pub item: Item,
    pub sync: SyncOutcome,
    pub photos: PhotoOutcome,
}

impl ItemOutcome {
    pub fn message(&self) -> String {
        let id = &self.item.item_id;
        match &self.sync {
            SyncOutcome::Synced if self.photos.any_failed() => format!(
                "Saved, photo upload failed for {} of {} ({id})",
                self.photos.failed, self.photos.attempted
            ),
            SyncOutcome::Synced if self.photos.uploaded > 0 => {
                format!("Saved + photo uploaded ({id})")
            }
            SyncOutcome::Synced => format!("Cloud saved ({id})"),
            SyncOutcome::PendingNextPull { error } => {
                format!("Cloud failed/offline ({id}), local saved: {error}")
            }
            SyncOutcome::Failed { error } => format!("Cloud failed ({id}): {error}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub item_id: String,
    /// Whether the item was present locally.
    pub removed: bool,
    pub sync: SyncOutcome,
}

impl DeleteOutcome {
    pub fn message(&self) -> String {
        match &self.sync {
            SyncOutcome::Synced => format!("Deleted {} (local + cloud)", self.item_id),
            SyncOutcome::PendingNextPull { error } | SyncOutcome::Failed { error } => format!(
                "Local deleted; cloud delete failed ({}): {error}",
                self.item_id
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearOutcome {
    pub removed: usize,
    pub sync: SyncOutcome,
}

impl ClearOutcome {
    pub fn message(&self) -> String {
        match &self.sync {
            SyncOutcome::Synced => "All items deleted (local + cloud)".to_string(),
            SyncOutcome::PendingNextPull { error } | SyncOutcome::Failed { error } => {
                format!("Local cleared. Cloud delete failed: {error}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullOutcome {
    pub items: Vec<Item>,
    /// Rows received from the cloud.
    pub fetched: usize,
    /// Set when the cloud could not be read; `items` is the local data.
    pub remote_error: Option<String>,
    pub cancelled: bool,
}

impl PullOutcome {
    fn local_only(items: Vec<Item>, remote_error: Option<String>, cancelled: bool) -> PullOutcome {
        PullOutcome {
            items,
            fetched: 0,
            remote_error,
            cancelled,
        }
    }

    pub fn message(&self) -> String {
        if self.cancelled {
            return "Cloud sync cancelled".to_string();
        }
        match &self.remote_error {
            Some(e) => format!("Cloud sync failed, showing local data: {e}"),
            None => format!("Cloud sync done ({} items)", self.items.len()),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Clears the create flag on every exit path.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Inventory {
    db: Arc<DbState>,
    remote: Option<Arc<dyn RemoteStore>>,
    item_prefix: String,
    pull_limit: usize,
    default_actor: String,
    default_place: String,
    /// Serializes load-modify-save of the local collection.
    write_lock: Mutex<()>,
    creating: AtomicBool,
}

/// Move `item` to the front, dropping any entry with the same id.
pub(crate) fn insert_front(items: &mut Vec<Item>, item: Item) {
    items.retain(|x| x.item_id != item.item_id);
    items.insert(0, item);
}

fn image_patch(item: &Item) -> Value {
    json!({
        "image_urls": item.image_urls,
        "image_url": item.primary_image(),
        "updated_at": item.updated_at,
    })
}

impl Inventory {
    pub fn new(
        db: Arc<DbState>,
        remote: Option<Arc<dyn RemoteStore>>,
        config: &AppConfig,
    ) -> Inventory {
        Inventory {
            db,
            remote,
            item_prefix: config.item_prefix.clone(),
            pull_limit: config.pull_limit.max(1),
            default_actor: config.default_actor.clone(),
            default_place: config.default_place.clone(),
            write_lock: Mutex::new(()),
            creating: AtomicBool::new(false),
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    fn remote(&self) -> Result<&dyn RemoteStore, RemoteError> {
        self.remote
            .as_deref()
            .ok_or_else(|| RemoteError::NotConfigured("no cloud URL or key".into()))
    }

    /// Load, change and persist the local collection atomically with
    /// respect to other mutations.
    fn mutate_local<R>(
        &self,
        f: impl FnOnce(&mut Vec<Item>) -> Result<R, InventoryError>,
    ) -> Result<R, InventoryError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| InventoryError::Storage(e.to_string()))?;
        let mut items = data_helpers::load_items(&self.db).map_err(InventoryError::Storage)?;
        let result = f(&mut items)?;
        data_helpers::save_items(&self.db, &items).map_err(InventoryError::Storage)?;
        Ok(result)
    }

    /// Apply `f` to one item, bump `updated_at`, persist, return a copy.
    fn update_one(
        &self,
        item_id: &str,
        f: impl FnOnce(&mut Item) -> Result<(), InventoryError>,
    ) -> Result<Item, InventoryError> {
        self.mutate_local(|items| {
            let item = items
                .iter_mut()
                .find(|x| x.item_id == item_id)
                .ok_or_else(|| InventoryError::NotFound(item_id.to_string()))?;
            f(item)?;
            item.updated_at = now_iso();
            Ok(item.clone())
        })
    }

    async fn log_event(
        &self,
        remote: &dyn RemoteStore,
        item_id: &str,
        action: &str,
        actor: Option<&str>,
        place: Option<&str>,
    ) {
        let event = ItemEvent {
            item_id: item_id.to_string(),
            action: action.to_string(),
            actor: actor
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(self.default_actor.as_str())
                .to_string(),
            place: place
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(self.default_place.as_str())
                .to_string(),
            created_at: now_iso(),
        };
        if let Err(e) = remote.insert_event(&event).await {
            warn!(item_id = %item_id, action, error = %e, "audit event not recorded");
        }
    }

    /// Point-update the cloud row, pushing the whole item when the cloud
    /// never received it (created while offline).
    async fn push_patch(
        &self,
        remote: &dyn RemoteStore,
        item: &Item,
        patch: Value,
    ) -> Result<(), RemoteError> {
        match remote.update_item(&item.item_id, patch).await {
            Err(e) if e.is_row_missing() => {
                info!(item_id = %item.item_id, "cloud row missing, pushing full item");
                remote.upsert_item(&ItemRow::from_item(item)).await
            }
            other => other,
        }
    }

    // -- reads --------------------------------------------------------------

    /// Local collection, newest change first.
    pub fn items(&self) -> Result<Vec<Item>, InventoryError> {
        let mut items = data_helpers::load_items(&self.db).map_err(InventoryError::Storage)?;
        sort_for_display(&mut items);
        Ok(items)
    }

    pub fn search(&self, query: &str) -> Result<Vec<Item>, InventoryError> {
        let items = self.items()?;
        Ok(filter_items(&items, query).into_iter().cloned().collect())
    }

    pub fn counts(&self) -> Result<BTreeMap<ItemStatus, usize>, InventoryError> {
        Ok(status_counts(&self.items()?))
    }

    // -- pull ---------------------------------------------------------------

    /// Fetch the newest cloud rows, merge them into the local collection
    /// and persist the result.
    ///
    /// A cancelled pull writes nothing. A failed fetch returns the local
    /// collection with `remote_error` set.
    pub async fn pull_and_merge(
        &self,
        cancel: &CancellationToken,
    ) -> Result<PullOutcome, InventoryError> {
        let remote = match self.remote() {
            Ok(r) => r,
            Err(e) => {
                return Ok(PullOutcome::local_only(
                    self.items()?,
                    Some(e.to_string()),
                    false,
                ))
            }
        };

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = remote.fetch_recent_items(self.pull_limit) => Some(res),
        };
        let rows = match fetched {
            None => {
                debug!("pull cancelled before the cloud answered");
                return Ok(PullOutcome::local_only(self.items()?, None, true));
            }
            Some(Err(e)) => {
                warn!(error = %e, "cloud pull failed, keeping local data");
                return Ok(PullOutcome::local_only(
                    self.items()?,
                    Some(e.to_string()),
                    false,
                ));
            }
            Some(Ok(rows)) => rows,
        };
        if cancel.is_cancelled() {
            debug!("pull cancelled before merge");
            return Ok(PullOutcome::local_only(self.items()?, None, true));
        }

        let fetched = rows.len();
        if fetched >= self.pull_limit {
            debug!(limit = self.pull_limit, "pull hit the row cap; older rows not fetched");
        }
        let remote_items: Vec<Item> = rows.into_iter().map(ItemRow::into_item).collect();
        let merged = self.mutate_local(|items| {
            *items = reconcile(std::mem::take(items), remote_items);
            Ok(items.clone())
        })?;
        info!(fetched, total = merged.len(), "cloud pull merged");
        Ok(PullOutcome {
            items: merged,
            fetched,
            remote_error: None,
            cancelled: false,
        })
    }

    // -- create ---------------------------------------------------------------

    /// Create an item with the next free id, push it, then upload photos.
    ///
    /// Rejected with [`InventoryError::Busy`] while another create is in
    /// flight, so two creates never allocate the same id.
    pub async fn create_item(
        &self,
        draft: ItemDraft,
        photos: Vec<PhotoUpload>,
    ) -> Result<ItemOutcome, InventoryError> {
        if self
            .creating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(InventoryError::Busy);
        }
        let _busy = BusyGuard(&self.creating);

        let year2 = current_year2();
        let now = now_iso();
        let item = self.mutate_local(|items| {
            let item_id = next_item_id(
                &self.item_prefix,
                &year2,
                items.iter().map(|x| x.item_id.as_str()),
            );
            let item = draft.into_item(item_id, &now);
            insert_front(items, item.clone());
            Ok(item)
        })?;
        info!(item_id = %item.item_id, "item created locally");

        let remote = match self.remote() {
            Ok(r) => r,
            Err(e) => {
                return Ok(ItemOutcome {
                    item,
                    sync: SyncOutcome::pending(&e),
                    photos: PhotoOutcome::default(),
                })
            }
        };
        if let Err(e) = remote.upsert_item(&ItemRow::from_item(&item)).await {
            warn!(item_id = %item.item_id, error = %e, "cloud upsert failed");
            return Ok(ItemOutcome {
                item,
                sync: SyncOutcome::pending(&e),
                photos: PhotoOutcome::default(),
            });
        }
        self.log_event(remote, &item.item_id, "CREATE", None, None).await;

        let batch = photos
            .into_iter()
            .enumerate()
            .map(|(n, p)| (format!("items/{}-{}.jpg", item.item_id, n + 1), p))
            .collect();
        let (urls, photo_outcome) = upload_batch(remote, batch).await;
        let (item, sync) = self.attach_photos(remote, item, urls).await?;
        Ok(ItemOutcome {
            item,
            sync,
            photos: photo_outcome,
        })
    }

    /// Append uploaded URLs locally, then point-update the cloud row.
    async fn attach_photos(
        &self,
        remote: &dyn RemoteStore,
        item: Item,
        urls: Vec<String>,
    ) -> Result<(Item, SyncOutcome), InventoryError> {
        if urls.is_empty() {
            return Ok((item, SyncOutcome::Synced));
        }
        let item = self.update_one(&item.item_id, |x| {
            for url in urls {
                if !x.image_urls.contains(&url) {
                    x.image_urls.push(url);
                }
            }
            Ok(())
        })?;
        let sync = match self.push_patch(remote, &item, image_patch(&item)).await {
            Ok(()) => SyncOutcome::Synced,
            Err(e) => {
                warn!(item_id = %item.item_id, error = %e, "cloud photo update failed");
                SyncOutcome::pending(&e)
            }
        };
        Ok((item, sync))
    }

    // -- edit -----------------------------------------------------------------

    /// Change descriptive fields and append new photos.
    pub async fn edit_item(
        &self,
        item_id: &str,
        patch: ItemPatch,
        new_photos: Vec<PhotoUpload>,
    ) -> Result<ItemOutcome, InventoryError> {
        let item = self.update_one(item_id, |x| {
            patch.apply(x);
            Ok(())
        })?;
        info!(item_id = %item_id, "item edited locally");

        let remote = match self.remote() {
            Ok(r) => r,
            Err(e) => {
                return Ok(ItemOutcome {
                    item,
                    sync: SyncOutcome::pending(&e),
                    photos: PhotoOutcome::default(),
                })
            }
        };

        if let Err(e) = remote.upsert_item(&ItemRow::from_item(&item)).await {
            warn!(item_id = %item_id, error = %e, "cloud edit failed");
            return Ok(ItemOutcome {
                item,
                sync: SyncOutcome::pending(&e),
                photos: PhotoOutcome::default(),
            });
        }
        self.log_event(remote, item_id, "EDIT", None, None).await;

        let millis = Utc::now().timestamp_millis();
        let batch = new_photos
            .into_iter()
            .enumerate()
            .map(|(n, p)| (format!("items/{item_id}-{millis}-{}.jpg", n + 1), p))
            .collect();
        let (urls, photo_outcome) = upload_batch(remote, batch).await;
        let (item, sync) = self.attach_photos(remote, item, urls).await?;
        Ok(ItemOutcome {
            item,
            sync,
            photos: photo_outcome,
        })
    }

    // -- status ---------------------------------------------------------------

    /// Move an item to `status`. Every transition is allowed.
    pub async fn set_status(
        &self,
        item_id: &str,
        status: ItemStatus,
        actor: Option<&str>,
        place: Option<&str>,
    ) -> Result<ItemOutcome, InventoryError> {
        let item = self.update_one(item_id, |x| {
            x.status = status;
            Ok(())
        })?;
        info!(item_id = %item_id, status = %status, "status changed locally");

        let sync = match self.remote() {
            Err(e) => SyncOutcome::pending(&e),
            Ok(remote) => {
                let patch = json!({
                    "status": status.as_str(),
                    "updated_at": item.updated_at,
                });
                match self.push_patch(remote, &item, patch).await {
                    Ok(()) => {
                        self.log_event(remote, item_id, status.event_action(), actor, place)
                            .await;
                        SyncOutcome::Synced
                    }
                    Err(e) => {
                        warn!(item_id = %item_id, error = %e, "cloud status update failed");
                        SyncOutcome::pending(&e)
                    }
                }
            }
        };
        Ok(ItemOutcome {
            item,
            sync,
            photos: PhotoOutcome::default(),
        })
    }

    // -- photos ---------------------------------------------------------------

    /// Drop one photo URL from an item. The stored object is left in place.
    pub async fn remove_photo(
        &self,
        item_id: &str,
        url: &str,
    ) -> Result<ItemOutcome, InventoryError> {
        let item = self.update_one(item_id, |x| {
            let before = x.image_urls.len();
            x.image_urls.retain(|u| u != url);
            if x.image_urls.len() == before {
                return Err(InventoryError::Invalid(format!(
                    "Photo is not attached to {item_id}"
                )));
            }
            Ok(())
        })?;

        let sync = match self.remote() {
            Err(e) => SyncOutcome::pending(&e),
            Ok(remote) => match self.push_patch(remote, &item, image_patch(&item)).await {
                Ok(()) => {
                    self.log_event(remote, item_id, "PHOTO_REMOVED", None, None)
                        .await;
                    SyncOutcome::Synced
                }
                Err(e) => {
                    warn!(item_id = %item_id, error = %e, "cloud photo removal failed");
                    SyncOutcome::pending(&e)
                }
            },
        };
        Ok(ItemOutcome {
            item,
            sync,
            photos: PhotoOutcome::default(),
        })
    }

    // -- delete ---------------------------------------------------------------

    pub async fn delete_item(&self, item_id: &str) -> Result<DeleteOutcome, InventoryError> {
        let removed = self.mutate_local(|items| {
            let before = items.len();
            items.retain(|x| x.item_id != item_id);
            Ok(items.len() != before)
        })?;

        let sync = match self.remote() {
            Err(e) => SyncOutcome::failed(&e),
            Ok(remote) => match remote.delete_item(item_id).await {
                Ok(()) => {
                    self.log_event(remote, item_id, "DELETE", None, None).await;
                    SyncOutcome::Synced
                }
                Err(e) => {
                    warn!(item_id = %item_id, error = %e, "cloud delete failed");
                    SyncOutcome::failed(&e)
                }
            },
        };
        info!(item_id = %item_id, removed, synced = sync.is_synced(), "item deleted");
        Ok(DeleteOutcome {
            item_id: item_id.to_string(),
            removed,
            sync,
        })
    }

    /// Wipe every item locally and in the cloud.
    pub async fn clear_all(&self) -> Result<ClearOutcome, InventoryError> {
        let removed = {
            let _guard = self
                .write_lock
                .lock()
                .map_err(|e| InventoryError::Storage(e.to_string()))?;
            let count = data_helpers::load_items(&self.db)
                .map_err(InventoryError::Storage)?
                .len();
            data_helpers::clear_items(&self.db).map_err(InventoryError::Storage)?;
            count
        };
        warn!(removed, "local items cleared");

        let sync = match self.remote() {
            Err(e) => SyncOutcome::failed(&e),
            Ok(remote) => match remote.delete_all_items().await {
                Ok(()) => SyncOutcome::Synced,
                Err(e) => {
                    warn!(error = %e, "cloud bulk delete failed");
                    SyncOutcome::failed(&e)
                }
            },
        };
        Ok(ClearOutcome { removed, sync })
    }

    // -- lookup ---------------------------------------------------------------

    /// Look an item up in the cloud first, then locally.
    ///
    /// A cloud hit is merged into the local collection, which makes items
    /// beyond the pull cap known locally.
    pub async fn find_item(&self, item_id: &str) -> Result<Option<Item>, InventoryError> {
        let item_id = item_id.trim();
        if item_id.is_empty() {
            return Ok(None);
        }

        if let Ok(remote) = self.remote() {
            match remote.find_item(item_id).await {
                Ok(Some(row)) => {
                    let found = row.into_item();
                    let merged = self.mutate_local(|items| {
                        *items = reconcile(std::mem::take(items), vec![found]);
                        Ok(items.iter().find(|x| x.item_id == item_id).cloned())
                    })?;
                    debug!(item_id = %item_id, "cloud lookup hit");
                    return Ok(merged);
                }
                Ok(None) => debug!(item_id = %item_id, "not in cloud, checking local"),
                Err(e) => {
                    warn!(item_id = %item_id, error = %e, "cloud lookup failed, checking local")
                }
            }
        }

        Ok(self.items()?.into_iter().find(|x| x.item_id == item_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::test_item;
    use crate::testing::FakeRemote;

    fn setup(pull_limit: usize) -> (Inventory, Arc<FakeRemote>) {
        let db = Arc::new(DbState::open_in_memory().expect("db"));
        let remote = Arc::new(FakeRemote::new());
        let mut config = AppConfig::with_data_dir("unused");
        config.pull_limit = pull_limit;
        let inv = Inventory::new(db, Some(remote.clone()), &config);
        (inv, remote)
    }

    fn offline_inventory() -> Inventory {
        let db = Arc::new(DbState::open_in_memory().expect("db"));
        Inventory::new(db, None, &AppConfig::with_data_dir("unused"))
    }

    fn draft(design: &str) -> ItemDraft {
        ItemDraft {
            design_no: design.into(),
            category: "Ring".into(),
            karat: "22K".into(),
            gross_wt: "5".into(),
            less_wt: "0.5".into(),
            notes: String::new(),
        }
    }

    fn id(seq: u32) -> String {
        format!("AG-{}-{seq:06}", current_year2())
    }

    fn seed_local(inv: &Inventory, items: &[Item]) {
        data_helpers::save_items(&inv.db, items).unwrap();
    }

    #[tokio::test]
    async fn pull_merges_and_persists() {
        let (inv, remote) = setup(500);
        remote.put_row(ItemRow::from_item(&test_item("AG-24-000001", "2024-01-01T00:00:00Z")));
        remote.put_row(ItemRow::from_item(&test_item("AG-24-000002", "2024-06-01T00:00:00Z")));

        let out = inv.pull_and_merge(&CancellationToken::new()).await.unwrap();
        assert_eq!(out.fetched, 2);
        assert!(out.remote_error.is_none());
        let ids: Vec<&str> = out.items.iter().map(|x| x.item_id.as_str()).collect();
        assert_eq!(ids, vec!["AG-24-000002", "AG-24-000001"]);
        assert_eq!(inv.items().unwrap(), out.items);
    }

    #[tokio::test]
    async fn pull_failure_keeps_local_data() {
        let (inv, remote) = setup(500);
        let local = vec![test_item("AG-26-000001", "2026-01-01T00:00:00Z")];
        seed_local(&inv, &local);
        remote.put_row(ItemRow::from_item(&test_item("AG-26-000002", "2026-01-02T00:00:00Z")));
        remote.fail_reads(true);

        let out = inv.pull_and_merge(&CancellationToken::new()).await.unwrap();
        assert!(out.remote_error.is_some());
        assert!(out.message().contains("showing local data"));
        assert_eq!(out.items, local);
        assert_eq!(inv.items().unwrap(), local);
    }

    #[tokio::test]
    async fn cancelled_pull_writes_nothing() {
        let (inv, remote) = setup(500);
        remote.put_row(ItemRow::from_item(&test_item("AG-26-000002", "2026-01-02T00:00:00Z")));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let out = inv.pull_and_merge(&cancel).await.unwrap();
        assert!(out.cancelled);
        assert!(out.items.is_empty());
        assert!(inv.items().unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_allocates_sequential_ids_and_pushes() {
        let (inv, remote) = setup(500);
        let first = inv.create_item(draft("8123"), Vec::new()).await.unwrap();
        let second = inv.create_item(draft("8124"), Vec::new()).await.unwrap();

        assert_eq!(first.item.item_id, id(1));
        assert_eq!(second.item.item_id, id(2));
        assert_eq!(first.item.net_wt, "4.500");
        assert!(second.sync.is_synced());
        assert_eq!(second.message(), format!("Cloud saved ({})", id(2)));

        let local = inv.items().unwrap();
        assert_eq!(local[0].item_id, id(2));
        assert_eq!(remote.row_count(), 2);
        let actions: Vec<String> = remote.events().into_iter().map(|e| e.action).collect();
        assert_eq!(actions, vec!["CREATE", "CREATE"]);
        assert_eq!(remote.events()[0].actor, "Factory");
        assert_eq!(remote.events()[0].place, "Local");
    }

    #[tokio::test]
    async fn create_skips_deleted_ids() {
        let (inv, _remote) = setup(500);
        for n in 1..=3 {
            inv.create_item(draft(&n.to_string()), Vec::new()).await.unwrap();
        }
        inv.delete_item(&id(2)).await.unwrap();
        let next = inv.create_item(draft("4"), Vec::new()).await.unwrap();
        assert_eq!(next.item.item_id, id(4));
    }

    #[tokio::test]
    async fn create_offline_is_pending_and_kept_locally() {
        let (inv, remote) = setup(500);
        remote.fail_writes(true);
        let out = inv
            .create_item(draft("8123"), vec![PhotoUpload::new(vec![1], "a.jpg")])
            .await
            .unwrap();
        assert!(matches!(out.sync, SyncOutcome::PendingNextPull { .. }));
        assert!(out.message().contains("local saved"));
        assert_eq!(out.photos, PhotoOutcome::default());
        assert!(remote.uploads().is_empty());
        assert_eq!(inv.items().unwrap(), vec![out.item]);
    }

    #[tokio::test]
    async fn create_without_cloud_is_pending() {
        let inv = offline_inventory();
        let out = inv.create_item(draft("1"), Vec::new()).await.unwrap();
        assert!(matches!(out.sync, SyncOutcome::PendingNextPull { .. }));
        assert_eq!(inv.items().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_photo_failure_still_saves() {
        let (inv, remote) = setup(500);
        remote.fail_upload_for(&format!("items/{}-2.jpg", id(1)));
        let out = inv
            .create_item(
                draft("8123"),
                vec![
                    PhotoUpload::new(vec![1], "a.jpg"),
                    PhotoUpload::new(vec![2], "b.jpg"),
                ],
            )
            .await
            .unwrap();
        assert!(out.sync.is_synced());
        assert_eq!(out.photos.uploaded, 1);
        assert_eq!(out.photos.failed, 1);
        assert!(out.message().starts_with("Saved, photo upload failed for 1 of 2"));

        let expected = remote.public_url(&format!("items/{}-1.jpg", id(1)));
        assert_eq!(out.item.image_urls, vec![expected.clone()]);
        assert_eq!(inv.items().unwrap()[0].image_urls, vec![expected.clone()]);
        let row = remote.row(&id(1)).unwrap();
        assert_eq!(row.image_urls, Some(vec![expected.clone()]));
        assert_eq!(row.image_url, Some(expected));
    }

    #[tokio::test]
    async fn concurrent_create_is_rejected() {
        let (inv, _remote) = setup(500);
        inv.creating.store(true, Ordering::SeqCst);
        assert!(matches!(
            inv.create_item(draft("1"), Vec::new()).await,
            Err(InventoryError::Busy)
        ));
        inv.creating.store(false, Ordering::SeqCst);
        inv.create_item(draft("1"), Vec::new()).await.unwrap();
        assert!(!inv.creating.load(Ordering::SeqCst));
    }

    #[test]
    fn insert_front_dedupes() {
        let mut items = vec![
            test_item("AG-26-000002", "2026-01-02T00:00:00Z"),
            test_item("AG-26-000001", "2026-01-01T00:00:00Z"),
        ];
        let mut replacement = test_item("AG-26-000001", "2026-01-03T00:00:00Z");
        replacement.notes = "new".into();
        insert_front(&mut items, replacement.clone());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], replacement);
    }

    #[tokio::test]
    async fn edit_recomputes_and_appends_photos() {
        let (inv, remote) = setup(500);
        let created = inv
            .create_item(draft("8123"), vec![PhotoUpload::new(vec![1], "a.jpg")])
            .await
            .unwrap();
        let item_id = created.item.item_id.clone();

        let out = inv
            .edit_item(
                &item_id,
                ItemPatch {
                    gross_wt: Some("6".into()),
                    notes: Some("resized".into()),
                    ..ItemPatch::default()
                },
                vec![PhotoUpload::new(vec![2], "b.jpg")],
            )
            .await
            .unwrap();
        assert!(out.sync.is_synced());
        assert_eq!(out.item.net_wt, "5.500");
        assert_eq!(out.item.image_urls.len(), 2);
        assert_eq!(out.item.image_urls[0], created.item.image_urls[0]);
        assert!(out.item.updated_at_time() >= created.item.updated_at_time());

        let row = remote.row(&item_id).unwrap().into_item();
        assert_eq!(row.notes, "resized");
        assert_eq!(row.image_urls, out.item.image_urls);
        assert!(remote.events().iter().any(|e| e.action == "EDIT"));
    }

    #[tokio::test]
    async fn edit_unknown_item_is_not_found() {
        let (inv, _remote) = setup(500);
        let err = inv
            .edit_item("AG-26-999999", ItemPatch::default(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn edit_offline_uploads_no_photos() {
        let (inv, remote) = setup(500);
        let created = inv.create_item(draft("8123"), Vec::new()).await.unwrap();
        remote.fail_writes(true);

        let out = inv
            .edit_item(
                &created.item.item_id,
                ItemPatch {
                    notes: Some("offline".into()),
                    ..ItemPatch::default()
                },
                vec![PhotoUpload::new(vec![9], "late.jpg")],
            )
            .await
            .unwrap();
        assert!(matches!(out.sync, SyncOutcome::PendingNextPull { .. }));
        assert_eq!(out.photos, PhotoOutcome::default());
        assert!(remote.uploads().is_empty());
        assert!(out.item.image_urls.is_empty());
        assert_eq!(inv.items().unwrap()[0].notes, "offline");
    }

    #[tokio::test]
    async fn status_change_pushes_item_created_offline() {
        let (inv, remote) = setup(500);
        remote.fail_writes(true);
        let created = inv.create_item(draft("8123"), Vec::new()).await.unwrap();
        assert!(remote.row(&created.item.item_id).is_none());
        remote.fail_writes(false);

        let sold = inv
            .set_status(&created.item.item_id, ItemStatus::Sold, None, None)
            .await
            .unwrap();
        assert!(sold.sync.is_synced());
        let row = remote.row(&created.item.item_id).expect("row pushed");
        assert_eq!(row.status.as_deref(), Some("SOLD"));
        assert_eq!(row.design_no, Some(Value::String("8123".into())));
    }

    #[tokio::test]
    async fn remove_photo_pushes_item_missing_from_cloud() {
        let (inv, remote) = setup(500);
        let mut item = test_item(&id(1), "2026-01-01T00:00:00Z");
        item.image_urls = vec!["https://cdn/a.jpg".into(), "https://cdn/b.jpg".into()];
        seed_local(&inv, &[item]);

        let out = inv.remove_photo(&id(1), "https://cdn/a.jpg").await.unwrap();
        assert!(out.sync.is_synced());
        let row = remote.row(&id(1)).expect("row pushed");
        assert_eq!(row.image_urls, Some(vec!["https://cdn/b.jpg".to_string()]));
    }

    #[tokio::test]
    async fn items_follow_display_order_after_a_change() {
        let (inv, _remote) = setup(500);
        seed_local(
            &inv,
            &[
                test_item(&id(2), "2026-01-02T00:00:00Z"),
                test_item(&id(1), "2026-01-01T00:00:00Z"),
            ],
        );
        inv.set_status(&id(1), ItemStatus::Sold, None, None)
            .await
            .unwrap();
        let ids: Vec<String> = inv.items().unwrap().into_iter().map(|x| x.item_id).collect();
        assert_eq!(ids, vec![id(1), id(2)]);
    }

    #[tokio::test]
    async fn status_change_pushes_and_logs() {
        let (inv, remote) = setup(500);
        let created = inv.create_item(draft("8123"), Vec::new()).await.unwrap();
        let item_id = created.item.item_id;

        let sold = inv
            .set_status(&item_id, ItemStatus::Sold, Some("Counter"), Some("Shop"))
            .await
            .unwrap();
        assert_eq!(sold.item.status, ItemStatus::Sold);
        assert!(sold.sync.is_synced());
        let row = remote.row(&item_id).unwrap();
        assert_eq!(row.status.as_deref(), Some("SOLD"));
        assert_eq!(row.updated_at.as_deref(), Some(sold.item.updated_at.as_str()));
        let last = remote.events().pop().unwrap();
        assert_eq!(last.action, "SOLD");
        assert_eq!(last.actor, "Counter");
        assert_eq!(last.place, "Shop");

        // sold -> in stock is allowed
        let back = inv
            .set_status(&item_id, ItemStatus::InStock, None, None)
            .await
            .unwrap();
        assert_eq!(back.item.status, ItemStatus::InStock);
        assert_eq!(remote.events().pop().unwrap().action, "IN");
    }

    #[tokio::test]
    async fn status_change_offline_is_pending() {
        let (inv, remote) = setup(500);
        let created = inv.create_item(draft("8123"), Vec::new()).await.unwrap();
        remote.fail_writes(true);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let out = inv
            .set_status(&created.item.item_id, ItemStatus::Returned, None, None)
            .await
            .unwrap();
        assert!(matches!(out.sync, SyncOutcome::PendingNextPull { .. }));
        assert_eq!(inv.items().unwrap()[0].status, ItemStatus::Returned);
        assert_eq!(
            remote.row(&created.item.item_id).unwrap().status.as_deref(),
            Some("IN_STOCK")
        );

        // the newer local copy survives the next pull
        remote.fail_writes(false);
        let pulled = inv.pull_and_merge(&CancellationToken::new()).await.unwrap();
        assert_eq!(pulled.items[0].status, ItemStatus::Returned);
    }

    #[tokio::test]
    async fn remove_photo_updates_both_sides() {
        let (inv, remote) = setup(500);
        let created = inv
            .create_item(
                draft("8123"),
                vec![
                    PhotoUpload::new(vec![1], "a.jpg"),
                    PhotoUpload::new(vec![2], "b.jpg"),
                ],
            )
            .await
            .unwrap();
        let item_id = created.item.item_id.clone();
        let first = created.item.image_urls[0].clone();
        let second = created.item.image_urls[1].clone();

        let out = inv.remove_photo(&item_id, &first).await.unwrap();
        assert_eq!(out.item.image_urls, vec![second.clone()]);
        let row = remote.row(&item_id).unwrap();
        assert_eq!(row.image_url, Some(second));
        assert!(remote.events().iter().any(|e| e.action == "PHOTO_REMOVED"));

        assert!(matches!(
            inv.remove_photo(&item_id, &first).await,
            Err(InventoryError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn delete_failure_is_informational() {
        let (inv, remote) = setup(500);
        let created = inv.create_item(draft("8123"), Vec::new()).await.unwrap();
        let item_id = created.item.item_id;
        remote.fail_writes(true);

        let out = inv.delete_item(&item_id).await.unwrap();
        assert!(out.removed);
        assert!(matches!(out.sync, SyncOutcome::Failed { .. }));
        assert!(out.message().contains("cloud delete failed"));
        assert!(inv.items().unwrap().is_empty());

        // the cloud row comes back on the next pull
        remote.fail_writes(false);
        let pulled = inv.pull_and_merge(&CancellationToken::new()).await.unwrap();
        assert_eq!(pulled.items.len(), 1);
    }

    #[tokio::test]
    async fn delete_logs_event() {
        let (inv, remote) = setup(500);
        let created = inv.create_item(draft("8123"), Vec::new()).await.unwrap();
        let out = inv.delete_item(&created.item.item_id).await.unwrap();
        assert!(out.sync.is_synced());
        assert_eq!(remote.row_count(), 0);
        assert_eq!(remote.events().pop().unwrap().action, "DELETE");
    }

    #[tokio::test]
    async fn clear_all_wipes_local_and_cloud() {
        let (inv, remote) = setup(500);
        inv.create_item(draft("1"), Vec::new()).await.unwrap();
        inv.create_item(draft("2"), Vec::new()).await.unwrap();

        let out = inv.clear_all().await.unwrap();
        assert_eq!(out.removed, 2);
        assert!(out.sync.is_synced());
        assert!(inv.items().unwrap().is_empty());
        assert_eq!(remote.row_count(), 0);

        remote.fail_writes(true);
        inv.create_item(draft("3"), Vec::new()).await.unwrap();
        let out = inv.clear_all().await.unwrap();
        assert!(matches!(out.sync, SyncOutcome::Failed { .. }));
        assert!(out.message().starts_with("Local cleared."));
    }

    #[tokio::test]
    async fn point_lookup_merges_item_beyond_pull_cap() {
        let (inv, remote) = setup(1);
        remote.put_row(ItemRow::from_item(&test_item("AG-25-000001", "2025-01-01T00:00:00Z")));
        remote.put_row(ItemRow::from_item(&test_item("AG-25-000002", "2025-02-01T00:00:00Z")));

        let pulled = inv.pull_and_merge(&CancellationToken::new()).await.unwrap();
        assert_eq!(pulled.items.len(), 1);
        assert_eq!(pulled.items[0].item_id, "AG-25-000002");

        let found = inv.find_item(" AG-25-000001 ").await.unwrap().unwrap();
        assert_eq!(found.item_id, "AG-25-000001");
        assert_eq!(inv.items().unwrap().len(), 2);
        assert!(inv.find_item("AG-25-000404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lookup_falls_back_to_local() {
        let (inv, remote) = setup(500);
        let local = test_item("AG-26-000007", "2026-01-01T00:00:00Z");
        seed_local(&inv, &[local.clone()]);
        remote.fail_reads(true);
        assert_eq!(inv.find_item("AG-26-000007").await.unwrap(), Some(local));
        assert!(inv.find_item("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_and_counts_read_local() {
        let (inv, _remote) = setup(500);
        let a = inv.create_item(draft("RING-55"), Vec::new()).await.unwrap();
        inv.create_item(draft("CHAIN-9"), Vec::new()).await.unwrap();
        inv.set_status(&a.item.item_id, ItemStatus::Sold, None, None)
            .await
            .unwrap();

        let hits = inv.search("ring").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].design_no, "RING-55");
        let counts = inv.counts().unwrap();
        assert_eq!(counts[&ItemStatus::Sold], 1);
        assert_eq!(counts[&ItemStatus::InStock], 1);
    }

    #[tokio::test]
    async fn event_failure_does_not_fail_the_mutation() {
        let (inv, remote) = setup(500);
        remote.fail_events(true);
        let out = inv.create_item(draft("1"), Vec::new()).await.unwrap();
        assert!(out.sync.is_synced());
        assert!(remote.events().is_empty());
    }
}
