use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::storage::DatasetReader;
use crate::table::Table;

/// Memoises datasets by id so repeated interactions do not re-read storage.
///
/// Failed reads are never cached.
#[derive(Default)]
pub struct DatasetCache {
    entries: RwLock<HashMap<String, Arc<Table>>>,
}

impl DatasetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(&self, reader: &dyn DatasetReader, dataset_id: &str) -> Result<Arc<Table>> {
        if let Some(table) = self.get(dataset_id) {
            return Ok(table);
        }

        log::info!("dataset cache miss: {}", dataset_id);
        let table = Arc::new(reader.read_dataset(dataset_id)?);

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        // Another request may have loaded it meanwhile; keep the first copy.
        let cached = entries
            .entry(dataset_id.to_string())
            .or_insert_with(|| table.clone());
        Ok(cached.clone())
    }

    pub fn get(&self, dataset_id: &str) -> Option<Arc<Table>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(dataset_id).cloned()
    }

    pub fn invalidate(&self, dataset_id: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(dataset_id).is_some()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

lazy_static! {
    static ref DATASET_CACHE: DatasetCache = DatasetCache::new();
}

/// Read a dataset through the process-wide cache.
pub fn get_cached_dataset(reader: &dyn DatasetReader, dataset_id: &str) -> Result<Arc<Table>> {
    DATASET_CACHE.get_or_load(reader, dataset_id)
}

pub fn clear_dataset_cache() {
    DATASET_CACHE.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DashboardError;
    use crate::table::{Column, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReader {
        reads: AtomicUsize,
    }

    impl DatasetReader for CountingReader {
        fn read_dataset(&self, dataset_id: &str) -> Result<Table> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if dataset_id == "broken" {
                return Err(DashboardError::DatasetFileNotFound {
                    path: "s3://test/broken".to_string(),
                    dataset_id: Some(dataset_id.to_string()),
                });
            }
            Table::new(vec![Column::new("id", vec![Value::from(dataset_id)])])
        }
    }

    #[test]
    fn second_read_is_served_from_cache() {
        let cache = DatasetCache::new();
        let reader = CountingReader {
            reads: AtomicUsize::new(0),
        };

        let first = cache.get_or_load(&reader, "a").unwrap();
        let second = cache.get_or_load(&reader, "a").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);

        cache.get_or_load(&reader, "b").unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn errors_are_not_cached() {
        let cache = DatasetCache::new();
        let reader = CountingReader {
            reads: AtomicUsize::new(0),
        };

        assert!(cache.get_or_load(&reader, "broken").is_err());
        assert!(cache.get_or_load(&reader, "broken").is_err());
        assert_eq!(reader.reads.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_forces_reload() {
        let cache = DatasetCache::new();
        let reader = CountingReader {
            reads: AtomicUsize::new(0),
        };

        cache.get_or_load(&reader, "a").unwrap();
        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        cache.get_or_load(&reader, "a").unwrap();
        assert_eq!(reader.reads.load(Ordering::SeqCst), 2);

        cache.clear();
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn global_cache_memoises() {
        let reader = CountingReader {
            reads: AtomicUsize::new(0),
        };
        let id = "global-cache-test-dataset";
        get_cached_dataset(&reader, id).unwrap();
        get_cached_dataset(&reader, id).unwrap();
        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);
    }
}
