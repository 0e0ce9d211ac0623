use std::sync::{Mutex, MutexGuard};

/// Locks a mutex, recovering the guarded data if a previous holder panicked.
///
/// NB: every structure guarded this way is updated in single statements, so a poisoned lock
///      never exposes a half-applied change
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};
    use super::*;

    #[test]
    fn test_lock_recovers_from_poison() {
        let mutex = Arc::new(Mutex::new(5));

        let cloned = mutex.clone();
        let _ = std::thread::spawn(move || {
            let _guard = cloned.lock().unwrap();
            panic!("poisoning the lock");
        }).join();

        assert!(mutex.is_poisoned());
        assert_eq!(*lock(&mutex), 5);
    }
}
