//! Handle-keyed surface storage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

static SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque reference to a surface in a [`SurfaceRegistry`].
///
/// Ids are unique for the life of the process and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle {
    id: u64,
}

impl SurfaceHandle {
    fn next() -> Self {
        Self {
            id: SURFACE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Registry mapping handles to backend surfaces.
pub struct SurfaceRegistry<S> {
    surfaces: HashMap<u64, S>,
}

impl<S> SurfaceRegistry<S> {
    pub fn new() -> Self {
        Self {
            surfaces: HashMap::new(),
        }
    }

    pub fn insert(&mut self, surface: S) -> SurfaceHandle {
        let handle = SurfaceHandle::next();
        self.surfaces.insert(handle.id, surface);
        handle
    }

    pub fn get(&self, handle: SurfaceHandle) -> Option<&S> {
        self.surfaces.get(&handle.id)
    }

    pub fn get_mut(&mut self, handle: SurfaceHandle) -> Option<&mut S> {
        self.surfaces.get_mut(&handle.id)
    }

    pub fn remove(&mut self, handle: SurfaceHandle) -> Option<S> {
        self.surfaces.remove(&handle.id)
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }
}

impl<S> Default for SurfaceRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut registry = SurfaceRegistry::new();
        let a = registry.insert("a");
        let b = registry.insert("b");
        assert_ne!(a, b);
        assert!(b.id() > a.id());
        assert_eq!(registry.get(a), Some(&"a"));

        *registry.get_mut(b).unwrap() = "c";
        assert_eq!(registry.remove(b), Some("c"));
        assert!(registry.get(b).is_none());
        assert_eq!(registry.len(), 1);
    }
}
