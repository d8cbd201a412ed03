//! JSON documents on disk, replaced atomically.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::OrdersError;

/// Serializes `value` to a sibling temp file and renames it over `path`,
/// so readers only ever see the old or the new document.
///
/// # Errors
///
/// Returns [`OrdersError::Snapshot`] on any filesystem failure and
/// [`OrdersError::SnapshotFormat`] if `value` cannot be serialized.
pub async fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), OrdersError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| OrdersError::SnapshotFormat {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| io_error(parent, source))?;
    }

    let tmp = temp_path(path);
    if let Err(source) = tokio::fs::write(&tmp, &bytes).await {
        return Err(io_error(&tmp, source));
    }
    if let Err(source) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_error(path, source));
    }
    Ok(())
}

/// Reads a JSON document. A missing file is `Ok(None)`.
///
/// # Errors
///
/// Returns [`OrdersError::Snapshot`] on read failures other than not-found,
/// and [`OrdersError::SnapshotFormat`] if the content does not parse.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, OrdersError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(io_error(path, source)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| OrdersError::SnapshotFormat {
            path: path.to_path_buf(),
            source,
        })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    path.with_file_name(name)
}

fn io_error(path: &Path, source: std::io::Error) -> OrdersError {
    OrdersError::Snapshot {
        path: path.to_path_buf(),
        source,
    }
}
