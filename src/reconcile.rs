//! Last-write-wins merge of the local item collection with a remote page.
//!
//! Pure and free of I/O. The pull wrapper in `sync` feeds it the remote
//! page and persists the result.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::items::Item;

/// Merge `remote` into `local` keyed by item id.
///
/// A remote entry replaces the local one when its `updated_at` is greater
/// than or equal to the local `updated_at`; ties go to the remote copy.
/// Unparseable timestamps compare as the epoch. The result is ordered by
/// [`display_order`].
pub fn reconcile(local: Vec<Item>, remote: Vec<Item>) -> Vec<Item> {
    let mut by_id: HashMap<String, Item> = HashMap::with_capacity(local.len() + remote.len());
    for item in local {
        by_id.insert(item.item_id.clone(), item);
    }

    for incoming in remote {
        match by_id.get(&incoming.item_id) {
            Some(existing) if incoming.updated_at_time() < existing.updated_at_time() => {}
            _ => {
                by_id.insert(incoming.item_id.clone(), incoming);
            }
        }
    }

    let mut merged: Vec<Item> = by_id.into_values().collect();
    sort_for_display(&mut merged);
    merged
}

/// Newest `updated_at` first, then larger item id first.
pub fn display_order(a: &Item, b: &Item) -> Ordering {
    b.updated_at_time()
        .cmp(&a.updated_at_time())
        .then_with(|| b.item_id.cmp(&a.item_id))
}

pub fn sort_for_display(items: &mut [Item]) {
    items.sort_by(display_order);
}
