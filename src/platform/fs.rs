use crate::platform::error::{PlatformError, PlatformResult};
use crate::wire::{FileInfo, FileList};
use std::path::Path;
use std::time::Duration;

pub async fn file_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

pub async fn folder_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// Size of a regular file, `None` if it does not exist
pub async fn file_size(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() => Some(m.len()),
        _ => None,
    }
}

/// Remove `path` if present, retrying while another handle holds it
pub async fn delete_if_exists(path: &Path, attempts: u32) -> PlatformResult<()> {
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match tokio::fs::remove_file(path).await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) if attempt >= attempts => {
                return Err(PlatformError::DeleteFailed {
                    path: path.display().to_string(),
                    attempts,
                    source: e,
                })
            }
            Err(e) => {
                tracing::debug!("Delete of {} failed ({}), retrying", path.display(), e);
                tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
            }
        }
    }
}

/// Regular files directly inside `folder`, sorted by name
pub async fn list_folder(folder: &Path) -> PlatformResult<FileList> {
    let mut entries = match tokio::fs::read_dir(folder).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PlatformError::FolderNotFound(folder.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            files.push(FileInfo::new(
                entry.file_name().to_string_lossy().into_owned(),
                metadata.len(),
            ));
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(FileList::new(files))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_folder_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("b.txt"), b"12345").await.unwrap();
        tokio::fs::write(dir.path().join("a.bin"), b"").await.unwrap();
        tokio::fs::create_dir(dir.path().join("nested")).await.unwrap();

        let list = list_folder(dir.path()).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.files[0], FileInfo::new("a.bin", 0));
        assert_eq!(list.files[1], FileInfo::new("b.txt", 5));
    }

    #[tokio::test]
    async fn test_missing_folder_is_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_folder(&dir.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, PlatformError::FolderNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_if_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.bin");
        tokio::fs::write(&path, b"x").await.unwrap();

        assert!(file_exists(&path).await);
        assert_eq!(file_size(&path).await, Some(1));
        delete_if_exists(&path, 3).await.unwrap();
        assert!(!file_exists(&path).await);

        // Already absent
        delete_if_exists(&path, 3).await.unwrap();
        assert!(folder_exists(dir.path()).await);
    }
}
