// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-side image cache: the controller-assigned id alongside the
//! runtime-assigned reference produced by `RuntimeGateway::load_image`
//! (§4.6, §3).

use std::sync::Arc;

use dmzero_core::{CoreError, ImageId};
use indexmap::IndexMap;
use parking_lot::RwLock;

#[derive(Debug, Clone)]
pub struct LocalImage {
    pub id: ImageId,
    pub name: String,
    pub size: usize,
    /// The runtime's own handle for this image, used to launch containers
    /// and to remove it later.
    pub reference: String,
    /// Kept so `GetImage` can serve the same bytes back (§6 Image RPC).
    pub blob: Vec<u8>,
}

#[derive(Default)]
pub struct LocalImageRegistry {
    images: RwLock<IndexMap<ImageId, Arc<LocalImage>>>,
}

impl LocalImageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: ImageId, name: impl Into<String>, reference: impl Into<String>, blob: Vec<u8>) -> Arc<LocalImage> {
        let record = Arc::new(LocalImage { id, name: name.into(), size: blob.len(), reference: reference.into(), blob });
        self.images.write().insert(id, record.clone());
        record
    }

    pub fn get(&self, id: ImageId) -> Result<Arc<LocalImage>, CoreError> {
        self.images.read().get(&id).cloned().ok_or_else(|| CoreError::not_found(format!("no such image: {id}")))
    }

    pub fn contains(&self, id: ImageId) -> bool {
        self.images.read().contains_key(&id)
    }

    pub fn list(&self) -> Vec<Arc<LocalImage>> {
        self.images.read().values().cloned().collect()
    }

    pub fn remove(&self, id: ImageId) -> Option<Arc<LocalImage>> {
        self.images.write().shift_remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_and_removes() {
        let registry = LocalImageRegistry::new();
        let id = ImageId::new();
        registry.insert(id, "worker:latest", "sha256:deadbeef", vec![1, 2, 3, 4]);
        assert!(registry.contains(id));
        assert_eq!(registry.get(id).unwrap().reference, "sha256:deadbeef");
        assert_eq!(registry.get(id).unwrap().size, 4);

        registry.remove(id);
        assert!(!registry.contains(id));
        assert!(registry.get(id).is_err());
    }
}
