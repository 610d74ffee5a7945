//! Annvi Inventory backend.
//!
//! Item records with computed net weight, photos and status changes, kept
//! in a local SQLite store and opportunistically synchronized with a
//! Supabase project; plus a cloud-only order book and a shared-PIN gate.
//! The UI shell calls the functions in [`commands`] with JSON payloads, the
//! same way an IPC frontend invokes backend commands.

use anyhow::Context;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod auth;
pub mod commands;
pub mod config;
mod data_helpers;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod item_id;
pub mod items;
pub mod orders;
pub mod photos;
pub mod reconcile;
pub mod remote;
pub mod storage;
pub mod sync;
#[cfg(test)]
mod testing;

pub use config::AppConfig;
pub use error::InventoryError;
pub use items::{Item, ItemDraft, ItemPatch, ItemStatus};
pub use orders::{Order, OrderBook, OrderDraft, OrderStatus};
pub use remote::{RemoteError, RemoteStore, SupabaseStore};
pub use sync::{Inventory, SyncOutcome};

pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub(crate) fn value_bool(v: &serde_json::Value, keys: &[&str]) -> Option<bool> {
    for key in keys {
        if let Some(b) = v.get(*key).and_then(|x| x.as_bool()) {
            return Some(b);
        }
    }
    None
}

/// Normalise a command argument: a bare string becomes `{ key: string }`,
/// a missing argument becomes `{}`.
pub(crate) fn payload_or_key(arg0: Option<serde_json::Value>, key: &str) -> serde_json::Value {
    match arg0 {
        Some(serde_json::Value::String(s)) => serde_json::json!({ key: s }),
        Some(v) => v,
        None => serde_json::json!({}),
    }
}

// ============================================================================
// Application state
// ============================================================================

/// Everything the command layer needs, built once at startup.
pub struct App {
    pub config: AppConfig,
    pub db: Arc<db::DbState>,
    pub inventory: Inventory,
    pub orders: OrderBook,
    pub auth: auth::AuthState,
    /// Token of the pull in flight; a new refresh cancels the previous one.
    pull_cancel: Mutex<CancellationToken>,
}

impl App {
    /// Open the local database under `config.data_dir` and connect the
    /// cloud store when credentials are configured.
    pub fn open(config: AppConfig) -> anyhow::Result<App> {
        let db = db::init(&config.data_dir)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("opening database in {}", config.data_dir.display()))?;

        let remote: Option<Arc<dyn RemoteStore>> = match &config.remote {
            Some(remote_config) => {
                let store = SupabaseStore::new(remote_config, &config.image_bucket)
                    .context("configuring cloud store")?;
                info!(url = %remote_config.url, "cloud sync enabled");
                Some(Arc::new(store))
            }
            None => {
                warn!("no cloud credentials; running local-only");
                None
            }
        };

        info!(
            version = env!("CARGO_PKG_VERSION"),
            git_sha = env!("BUILD_GIT_SHA"),
            built = env!("BUILD_TIMESTAMP"),
            "Annvi Inventory ready"
        );
        Ok(App::with_remote(config, Arc::new(db), remote))
    }

    /// Assemble from parts.
    pub fn with_remote(
        config: AppConfig,
        db: Arc<db::DbState>,
        remote: Option<Arc<dyn RemoteStore>>,
    ) -> App {
        let inventory = Inventory::new(db.clone(), remote.clone(), &config);
        let orders = OrderBook::new(remote, config.order_limit);
        let auth = auth::AuthState::new(&config.default_pin);
        App {
            config,
            db,
            inventory,
            orders,
            auth,
            pull_cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Cancel any pull in flight and hand out a token for a new one.
    pub fn begin_pull(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        let mut current = self
            .pull_cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        current.cancel();
        *current = fresh.clone();
        fresh
    }

    /// Cancel the pull in flight, if any. Call when the UI goes away.
    pub fn cancel_pull(&self) {
        self.pull_cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .cancel();
    }
}
