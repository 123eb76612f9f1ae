use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use cod_types::Generation;

use crate::error::{StoreError, StoreResult};
use crate::traits::BlobStore;

/// A stored blob plus its current generation.
#[derive(Debug, Clone)]
struct BlobRecord {
    data: Vec<u8>,
    generation: Generation,
}

/// In-memory, HashMap-based blob store.
///
/// Intended for tests and embedding. All objects are held in memory behind a
/// `RwLock`; generations come from a single monotonic counter, so no
/// generation is ever reused for any path.
pub struct InMemoryBlobStore {
    objects: RwLock<HashMap<String, BlobRecord>>,
    next_generation: AtomicU64,
}

impl InMemoryBlobStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Return a sorted list of all object paths in the store.
    pub fn all_paths(&self) -> Vec<String> {
        let map = self.objects.read().expect("lock poisoned");
        let mut paths: Vec<String> = map.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn issue_generation(&self) -> Generation {
        Generation::from_raw(self.next_generation.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn create_if_absent(&self, path: &str, data: &[u8]) -> StoreResult<Generation> {
        let mut map = self.objects.write().expect("lock poisoned");
        if map.contains_key(path) {
            return Err(StoreError::AlreadyExists(path.to_string()));
        }
        let generation = self.issue_generation();
        map.insert(
            path.to_string(),
            BlobRecord {
                data: data.to_vec(),
                generation,
            },
        );
        Ok(generation)
    }

    fn delete_if_generation_matches(
        &self,
        path: &str,
        generation: Generation,
    ) -> StoreResult<bool> {
        let mut map = self.objects.write().expect("lock poisoned");
        match map.get(path) {
            Some(record) if record.generation == generation => {
                map.remove(path);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn exists(&self, path: &str) -> StoreResult<bool> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.contains_key(path))
    }

    fn read(&self, path: &str) -> StoreResult<Option<Vec<u8>>> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(path).map(|record| record.data.clone()))
    }

    fn write(&self, path: &str, data: &[u8]) -> StoreResult<Generation> {
        let mut map = self.objects.write().expect("lock poisoned");
        let generation = self.issue_generation();
        map.insert(
            path.to_string(),
            BlobRecord {
                data: data.to_vec(),
                generation,
            },
        );
        Ok(generation)
    }

    fn generation(&self, path: &str) -> StoreResult<Option<Generation>> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(path).map(|record| record.generation))
    }

    fn delete(&self, path: &str) -> StoreResult<bool> {
        let mut map = self.objects.write().expect("lock poisoned");
        Ok(map.remove(path).is_some())
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("object_count", &self.len())
            .finish()
    }
}
