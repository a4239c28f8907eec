use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// One mutex per derived-file path.
///
/// Every write or read of a path runs while holding that path's lock, so a
/// read never overlaps a write of the same file.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: RwLock<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the lock for a path
    pub fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(lock) = locks.get(path) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Acquire a path lock. A poisoned lock is still usable: it guards no data.
pub fn acquire(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_same_path_same_lock() {
        let locks = PathLocks::new();
        let a = locks.lock_for(Path::new("a.py"));
        let b = locks.lock_for(Path::new("a.py"));
        let c = locks.lock_for(Path::new("c.py"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_lock_serializes_threads() {
        let locks = Arc::new(PathLocks::new());
        let counter = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let locks = locks.clone();
                let counter = counter.clone();
                thread::spawn(move || {
                    let lock = locks.lock_for(Path::new("shared.py"));
                    let _guard = acquire(&lock);
                    counter.lock().unwrap().push(i);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.lock().unwrap().len(), 4);
        assert_eq!(locks.len(), 1);
    }
}
