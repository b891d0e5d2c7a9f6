//! Media store collaborator
//!
//! The codec never ships raw media through the data model: inbound inline
//! photos are written here and replaced by a reference, outbound photos are
//! read back in a bounded, recompressed form before embedding.

use crate::{Error, Result};

/// Storage for incident media referenced by incidents.
pub trait MediaStore: Send + Sync {
    /// Persist received media bytes, returning a local reference.
    fn write_bytes(&self, bytes: &[u8]) -> Result<String>;

    /// Read media for inline embedding. Implementations must bound the
    /// output size (downsampled, recompressed) so wire messages stay small.
    fn read_for_embedding(&self, media_ref: &str) -> Result<Vec<u8>>;
}

/// In-memory media store for tests.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// A media store backed by a map, handing out `mem:N` references.
    pub struct MemoryMediaStore {
        entries: Mutex<HashMap<String, Vec<u8>>>,
        next_id: Mutex<u64>,
    }

    impl MemoryMediaStore {
        pub fn new() -> Self {
            Self {
                entries: Mutex::new(HashMap::new()),
                next_id: Mutex::new(0),
            }
        }

        /// Seed an entry under a caller-chosen reference.
        pub fn insert(&self, media_ref: impl Into<String>, bytes: Vec<u8>) {
            self.entries.lock().unwrap().insert(media_ref.into(), bytes);
        }

        /// Number of stored entries.
        pub fn len(&self) -> usize {
            self.entries.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// Fetch raw stored bytes (test inspection).
        pub fn get(&self, media_ref: &str) -> Option<Vec<u8>> {
            self.entries.lock().unwrap().get(media_ref).cloned()
        }
    }

    impl Default for MemoryMediaStore {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MediaStore for MemoryMediaStore {
        fn write_bytes(&self, bytes: &[u8]) -> Result<String> {
            let mut next = self.next_id.lock().unwrap();
            let media_ref = format!("mem:{}", *next);
            *next += 1;
            self.entries
                .lock()
                .unwrap()
                .insert(media_ref.clone(), bytes.to_vec());
            Ok(media_ref)
        }

        fn read_for_embedding(&self, media_ref: &str) -> Result<Vec<u8>> {
            self.entries
                .lock()
                .unwrap()
                .get(media_ref)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("media ref {media_ref}")))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_write_then_read() {
            let store = MemoryMediaStore::new();
            let media_ref = store.write_bytes(b"jpeg bytes").unwrap();
            assert_eq!(store.read_for_embedding(&media_ref).unwrap(), b"jpeg bytes");
        }

        #[test]
        fn test_missing_ref() {
            let store = MemoryMediaStore::new();
            assert!(store.read_for_embedding("mem:42").is_err());
        }
    }
}
