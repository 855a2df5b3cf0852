/*!
 * Deterministic enumeration of the objects under a prefix
 */

use crate::backend::{ObjectClient, ObjectKey};
use crate::error::ListError;

/// List every key under `prefix`, ascending by byte-wise comparison
///
/// Keys in `exclude` and directory placeholders (keys ending in `/`) are
/// dropped. The store's enumeration order never leaks into the result.
pub async fn list_objects(
    client: &dyn ObjectClient,
    bucket: &str,
    prefix: &str,
    exclude: &[String],
) -> Result<Vec<ObjectKey>, ListError> {
    let mut keys = client
        .list(bucket, prefix)
        .await
        .map_err(|source| ListError {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            source,
        })?;

    keys.retain(|key| {
        key.starts_with(prefix) && !key.ends_with('/') && !exclude.iter().any(|e| e == key)
    });
    keys.sort_unstable();
    keys.dedup();

    tracing::debug!(bucket, prefix, count = keys.len(), "Listed objects");
    Ok(keys)
}
