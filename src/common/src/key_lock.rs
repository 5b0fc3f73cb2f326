use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// A set of exclusively held string keys.
///
/// Acquisition never waits: a key that is already held is reported as busy and
/// the caller decides how to reject. The key is released when the returned
/// [`KeyGuard`] is dropped, including when the owning future is cancelled.
#[derive(Clone, Default, Debug)]
pub struct KeyLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, key: &str) -> Option<KeyGuard> {
        let mut held = lock(&self.held);
        if !held.insert(key.to_string()) {
            return None;
        }
        Some(KeyGuard {
            held: Arc::clone(&self.held),
            key: key.to_string(),
        })
    }

    pub fn is_held(&self, key: &str) -> bool {
        lock(&self.held).contains(key)
    }
}

#[derive(Debug)]
pub struct KeyGuard {
    held: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        lock(&self.held).remove(&self.key);
    }
}

// The set stays consistent even if a holder panicked mid-insert.
fn lock(m: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
