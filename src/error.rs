use thiserror::Error;

use crate::remote::RemoteError;

/// Failures the inventory and order book report to their caller.
///
/// Remote failures of item mutations are not errors; they travel as a
/// `SyncOutcome` next to the locally applied result.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Another save is still in progress")]
    Busy,
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Invalid(String),
    #[error("Local storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl InventoryError {
    pub(crate) fn cloud_not_configured() -> InventoryError {
        InventoryError::Remote(RemoteError::NotConfigured(
            "no cloud URL or key".to_string(),
        ))
    }
}
