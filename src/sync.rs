use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Locks a mutex, recovering the guard if a handler thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Waits on `condvar` until `done` holds or `timeout` elapses. Returns the guard and whether `done` held.
pub(crate) fn wait_until<'a, T>(
    condvar: &Condvar,
    mut guard: MutexGuard<'a, T>,
    timeout: Duration,
    mut done: impl FnMut(&mut T) -> bool,
) -> (MutexGuard<'a, T>, bool) {
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if done(&mut guard) {
            return (guard, true);
        }
        let remaining = match deadline {
            Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return (guard, false),
            },
            None => Duration::from_secs(3600),
        };
        guard = condvar
            .wait_timeout(guard, remaining)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_until_times_out() {
        let state = Mutex::new(0u32);
        let condvar = Condvar::new();
        let start = Instant::now();
        let done = wait_until(&condvar, lock(&state), Duration::from_millis(30), |v| *v > 0).1;
        assert!(!done);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_until_wakes_on_notify() {
        let pair = Arc::new((Mutex::new(false), Condvar::new()));
        let remote = Arc::clone(&pair);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            *lock(&remote.0) = true;
            remote.1.notify_all();
        });
        let (guard, done) = wait_until(&pair.1, lock(&pair.0), Duration::from_secs(5), |v| *v);
        assert!(done && *guard);
        drop(guard);
        handle.join().unwrap();
    }
}
