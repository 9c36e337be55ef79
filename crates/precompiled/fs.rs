//! Filesystem-style directory helpers over the table store.
//!
//! Directories are rows in their parent directory's table plus a backing
//! table of their own; `/` and `/apps` are seeded at block-context
//! creation.

use tabrex_common::constants::{
    FS_FIELDS, FS_FIELD_ACCESS, FS_FIELD_EXTRA, FS_FIELD_GID, FS_FIELD_OWNER, FS_FIELD_TYPE,
    FS_KEY_NAME, FS_PATH_MAX_DEPTH, FS_PATH_MAX_LENGTH, FS_ROOT, FS_TYPE_DIR,
};
use tabrex_common::{Entry, TableSchema};
use tabrex_storage::{StateStorage, StoreError};
use tracing::debug;

use crate::error::PrecompiledError;

pub fn fs_schema() -> TableSchema {
    TableSchema::new(FS_KEY_NAME, &FS_FIELDS)
}

/// Path rules: at most 56 bytes, at most 6 segments, segment characters
/// `[A-Za-z0-9_]` with no leading underscore.
pub fn check_path_valid(path: &str) -> bool {
    if path.is_empty() || path.len() > FS_PATH_MAX_LENGTH {
        return false;
    }
    if path == FS_ROOT {
        return true;
    }
    let trimmed = path.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        return false;
    }
    let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() || segments.len() > FS_PATH_MAX_DEPTH {
        return false;
    }
    segments.iter().all(|segment| {
        !segment.starts_with('_')
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

/// `/usr/test` → `/usr`; the root is its own parent.
pub fn parent_dir(path: &str) -> String {
    if path == FS_ROOT || path.is_empty() {
        return path.to_string();
    }
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => FS_ROOT.to_string(),
        Some(pos) => trimmed[..pos].to_string(),
        None => FS_ROOT.to_string(),
    }
}

/// `/usr/test` → `test`.
pub fn base_name(path: &str) -> String {
    if path == FS_ROOT || path.is_empty() {
        return path.to_string();
    }
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => trimmed[pos + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

fn dir_entry() -> Entry {
    let mut entry = Entry::from_schema(&fs_schema());
    entry.set_field(FS_FIELD_TYPE, FS_TYPE_DIR.as_bytes().to_vec());
    entry.set_field(FS_FIELD_ACCESS, Vec::new());
    entry.set_field(FS_FIELD_OWNER, Vec::new());
    entry.set_field(FS_FIELD_GID, Vec::new());
    entry.set_field(FS_FIELD_EXTRA, Vec::new());
    entry
}

/// Walks `path` from the root, creating a directory row and a backing
/// table for each missing segment. Fails when a segment collides with a
/// non-directory row.
pub async fn recursive_build_dir(
    storage: &StateStorage,
    path: &str,
) -> Result<(), PrecompiledError> {
    if !check_path_valid(path) {
        return Err(PrecompiledError::PathInvalid(path.to_string()));
    }
    let trimmed = path.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(());
    }

    let mut parent = FS_ROOT.to_string();
    for segment in trimmed.split('/') {
        let child = if parent == FS_ROOT {
            format!("/{segment}")
        } else {
            format!("{parent}/{segment}")
        };

        match storage.get_row(&parent, segment).await {
            Ok(Some(row)) => {
                if row.field_str(FS_FIELD_TYPE) != FS_TYPE_DIR {
                    debug!(%parent, segment, "existing name is not a directory");
                    return Err(PrecompiledError::PathInvalid(child));
                }
            }
            Ok(None) => {
                storage.set_row(&parent, segment, dir_entry()).await?;
                match storage.create_table(&child, fs_schema()).await {
                    Ok(()) | Err(StoreError::TableExists(_)) => {}
                    Err(e) => return Err(e.into()),
                }
                debug!(%parent, segment, "directory created");
            }
            Err(e) => return Err(e.into()),
        }
        parent = child;
    }
    Ok(())
}

/// Lists a directory: `(name, entry)` pairs in ascending name order.
pub async fn list_dir(
    storage: &StateStorage,
    path: &str,
) -> Result<Vec<(String, Entry)>, PrecompiledError> {
    if !check_path_valid(path) {
        return Err(PrecompiledError::PathInvalid(path.to_string()));
    }
    let names = storage.get_primary_keys(path, None).await?;
    let rows = storage.get_rows(path, &names).await?;
    Ok(names
        .into_iter()
        .zip(rows)
        .filter_map(|(name, entry)| entry.map(|e| (name, e)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tabrex_storage::MemoryBackend;

    async fn rooted_storage() -> Arc<StateStorage> {
        let backend = MemoryBackend::new();
        let storage = StateStorage::with_backend(backend);
        storage
            .create_table(FS_ROOT, fs_schema())
            .await
            .expect("root created");
        storage
    }

    #[test]
    fn path_rules() {
        assert!(check_path_valid("/"));
        assert!(check_path_valid("/usr/local"));
        assert!(check_path_valid("/apps/token_v2"));
        assert!(!check_path_valid(""));
        assert!(!check_path_valid("/_hidden"));
        assert!(!check_path_valid("/has space"));
        assert!(!check_path_valid("/a/b/c/d/e/f/g"));
        assert!(!check_path_valid(&format!("/{}", "x".repeat(60))));
    }

    #[test]
    fn parent_and_base() {
        assert_eq!(parent_dir("/usr/test"), "/usr");
        assert_eq!(parent_dir("/usr"), "/");
        assert_eq!(parent_dir("/"), "/");
        assert_eq!(base_name("/usr/test"), "test");
        assert_eq!(base_name("/"), "/");
    }

    #[tokio::test]
    async fn builds_nested_directories() {
        let storage = rooted_storage().await;
        recursive_build_dir(&storage, "/usr/local/bin")
            .await
            .expect("built");

        let usr = storage.get_row("/", "usr").await.expect("read").expect("row");
        assert_eq!(usr.field_str(FS_FIELD_TYPE), FS_TYPE_DIR);
        let local = storage
            .get_row("/usr", "local")
            .await
            .expect("read")
            .expect("row");
        assert_eq!(local.field_str(FS_FIELD_TYPE), FS_TYPE_DIR);
        assert!(storage
            .open_table("/usr/local/bin")
            .await
            .expect("read")
            .is_some());
    }

    #[tokio::test]
    async fn list_dir_returns_sorted_entries() {
        let storage = rooted_storage().await;
        recursive_build_dir(&storage, "/usr/local").await.expect("built");
        recursive_build_dir(&storage, "/usr/share").await.expect("built");

        let listing = list_dir(&storage, "/usr").await.expect("listed");
        let names: Vec<&str> = listing.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["local", "share"]);
        assert!(listing
            .iter()
            .all(|(_, entry)| entry.field_str(FS_FIELD_TYPE) == FS_TYPE_DIR));
    }

    #[tokio::test]
    async fn rebuild_is_idempotent() {
        let storage = rooted_storage().await;
        recursive_build_dir(&storage, "/usr/local").await.expect("built");
        recursive_build_dir(&storage, "/usr/local").await.expect("rebuilt");
    }

    #[tokio::test]
    async fn non_directory_collision_fails() {
        let storage = rooted_storage().await;
        let mut file_row = Entry::from_schema(&fs_schema());
        file_row.set_field(FS_FIELD_TYPE, b"file".to_vec());
        storage.set_row("/", "usr", file_row).await.expect("written");

        assert!(matches!(
            recursive_build_dir(&storage, "/usr/local").await,
            Err(PrecompiledError::PathInvalid(_))
        ));
    }
}
