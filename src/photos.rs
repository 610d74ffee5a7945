//! Photo uploads shared by items and orders.
//!
//! Photos arrive already compressed to JPEG by the UI. Uploads are
//! best-effort: a failed photo is counted and skipped, never fatal.

use serde::Serialize;
use tracing::warn;

use crate::remote::RemoteStore;

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// One photo handed over by the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoUpload {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

impl PhotoUpload {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>) -> PhotoUpload {
        PhotoUpload {
            bytes,
            file_name: file_name.into(),
        }
    }
}

/// Tally of a photo batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoOutcome {
    pub attempted: usize,
    pub uploaded: usize,
    pub failed: usize,
}

impl PhotoOutcome {
    pub fn any_failed(&self) -> bool {
        self.failed > 0
    }
}

/// Storage path segment from a user file name: whitespace runs become `_`.
pub fn safe_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_space = false;
    for c in name.trim().chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    if out.is_empty() {
        "photo.jpg".to_string()
    } else {
        out
    }
}

/// Upload each `(path, photo)` in order and return the public URLs of the
/// ones that succeeded.
pub(crate) async fn upload_batch(
    remote: &dyn RemoteStore,
    batch: Vec<(String, PhotoUpload)>,
) -> (Vec<String>, PhotoOutcome) {
    let mut outcome = PhotoOutcome {
        attempted: batch.len(),
        ..PhotoOutcome::default()
    };
    let mut urls = Vec::with_capacity(batch.len());
    for (path, photo) in batch {
        if photo.bytes.is_empty() {
            warn!(path = %path, "skipping empty photo");
            outcome.failed += 1;
            continue;
        }
        match remote
            .upload_image(&path, photo.bytes, JPEG_CONTENT_TYPE)
            .await
        {
            Ok(url) => {
                urls.push(url);
                outcome.uploaded += 1;
            }
            Err(e) => {
                warn!(path = %path, error = %e, "photo upload failed");
                outcome.failed += 1;
            }
        }
    }
    (urls, outcome)
}
