use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock ignoring poisoning; the guarded data stays consistent across panics
/// because every critical section is a single insert/remove/append.
#[inline]
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
