//! Extension trait to ignore mutex poisoning.
//!
//! The task registry and the virtual device keep plain bookkeeping behind a `Mutex`.
//! A panic on the worker thread leaves that data consistent, so poison carries no
//! information for us and `.lock_ignore_poison()` replaces the `unwrap_or_else` dance.

use std::sync::{Mutex, MutexGuard};

pub trait IgnorePoison<T> {
    /// Locks the mutex, recovering the guard if another thread panicked while holding it.
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T>;
}

impl<T> IgnorePoison<T> for Mutex<T> {
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_lock_survives_poisoned_mutex() {
        let counter = Arc::new(Mutex::new(0u32));
        let poisoner = Arc::clone(&counter);
        let _ = std::thread::spawn(move || {
            let mut guard = poisoner.lock_ignore_poison();
            *guard += 1;
            panic!("poison the lock");
        })
        .join();

        assert!(counter.is_poisoned());
        assert_eq!(*counter.lock_ignore_poison(), 1);
    }
}
