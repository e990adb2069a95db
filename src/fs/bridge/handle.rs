//! Registry of open handles keyed by the `fh` numbers given to the kernel

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Manages open file handles between `open`/`create` and `release`
pub struct HandleRegistry<H> {
    next_fh: AtomicU64,
    handles: RwLock<HashMap<u64, H>>,
}

impl<H> HandleRegistry<H> {
    pub fn new() -> Self {
        Self {
            next_fh: AtomicU64::new(1),
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Take ownership of a handle and return its fh
    pub fn register(&self, handle: H) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        self.handles.write().insert(fh, handle);
        fh
    }

    /// Run `f` against a registered handle
    pub fn with_handle<F, R>(&self, fh: u64, f: F) -> Option<R>
    where
        F: FnOnce(&H) -> R,
    {
        self.handles.read().get(&fh).map(f)
    }

    /// Remove a handle, handing ownership back for release
    pub fn remove(&self, fh: u64) -> Option<H> {
        self.handles.write().remove(&fh)
    }

    /// Take every open handle, leaving the registry empty
    pub fn drain(&self) -> Vec<(u64, H)> {
        self.handles.write().drain().collect()
    }
}

impl<H> Default for HandleRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
