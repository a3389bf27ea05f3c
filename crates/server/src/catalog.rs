//! Catalog of completed files.

use dashmap::DashMap;
use parcel_core::{FileId, FileInfo, Fingerprint};

/// In-memory index of assembled files by [`FileId`].
#[derive(Default)]
pub struct FileCatalog {
    files: DashMap<FileId, FileInfo>,
}

impl FileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, info: FileInfo) {
        self.files.insert(info.file_id, info);
    }

    pub fn get(&self, file_id: &FileId) -> Option<FileInfo> {
        self.files.get(file_id).map(|entry| entry.value().clone())
    }

    /// Find the file assembled from a fingerprint, if any.
    pub fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Option<FileInfo> {
        self.files
            .iter()
            .find(|entry| entry.fingerprint == *fingerprint)
            .map(|entry| entry.value().clone())
    }

    pub fn remove(&self, file_id: &FileId) -> Option<FileInfo> {
        self.files.remove(file_id).map(|(_, info)| info)
    }

    /// All files, most recently completed first.
    pub fn list(&self) -> Vec<FileInfo> {
        let mut files: Vec<FileInfo> = self.files.iter().map(|e| e.value().clone()).collect();
        files.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Duration, OffsetDateTime};

    fn info(content: &[u8], completed_at: OffsetDateTime) -> FileInfo {
        FileInfo {
            file_id: FileId::new(),
            fingerprint: Fingerprint::compute(content),
            file_name: None,
            mime_type: None,
            size: content.len() as u64,
            created_at: completed_at,
            completed_at,
        }
    }

    #[test]
    fn test_list_newest_first() {
        let catalog = FileCatalog::new();
        let now = OffsetDateTime::now_utc();
        let older = info(b"old", now - Duration::minutes(5));
        let newer = info(b"new", now);
        catalog.insert(older.clone());
        catalog.insert(newer.clone());

        let listed = catalog.list();
        assert_eq!(listed, vec![newer.clone(), older]);
        assert_eq!(
            catalog.find_by_fingerprint(&newer.fingerprint).unwrap().file_id,
            newer.file_id
        );

        assert!(catalog.remove(&newer.file_id).is_some());
        assert!(catalog.get(&newer.file_id).is_none());
        assert_eq!(catalog.len(), 1);
    }
}
