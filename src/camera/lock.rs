use crate::common::error::{RollcallError, Result};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Handle to an exclusive resource such as a capture device. Clones share the
/// same lock; at most one [`DeviceGuard`] exists at a time.
#[derive(Debug, Clone, Default)]
pub struct DeviceLock {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl DeviceLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `timeout` for the resource.
    pub fn acquire(&self, timeout: Duration) -> Result<DeviceGuard> {
        let (held, released) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut busy = held.lock().unwrap_or_else(PoisonError::into_inner);

        while *busy {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RollcallError::DeviceBusy(timeout));
            }
            let (guard, _) = released
                .wait_timeout(busy, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            busy = guard;
        }

        *busy = true;
        Ok(DeviceGuard { lock: self.clone() })
    }

    pub fn is_held(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof of exclusive access; released when dropped, on every exit path.
#[derive(Debug)]
pub struct DeviceGuard {
    lock: DeviceLock,
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        let (held, released) = &*self.lock.inner;
        *held.lock().unwrap_or_else(PoisonError::into_inner) = false;
        released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn second_acquire_times_out_while_held() {
        let lock = DeviceLock::new();
        let _guard = lock.acquire(Duration::from_millis(10)).unwrap();
        let err = lock.acquire(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, RollcallError::DeviceBusy(_)));
    }

    #[test]
    fn drop_releases() {
        let lock = DeviceLock::new();
        {
            let _guard = lock.acquire(Duration::ZERO).unwrap();
            assert!(lock.is_held());
        }
        assert!(!lock.is_held());
        assert!(lock.acquire(Duration::ZERO).is_ok());
    }

    #[test]
    fn released_on_error_path() {
        fn failing_session(lock: &DeviceLock) -> Result<()> {
            let _guard = lock.acquire(Duration::from_millis(10))?;
            Err(RollcallError::Camera("device vanished".into()))
        }
        let lock = DeviceLock::new();
        assert!(failing_session(&lock).is_err());
        assert!(!lock.is_held());
    }

    #[test]
    fn waiter_gets_lock_after_release() {
        let lock = DeviceLock::new();
        let guard = lock.acquire(Duration::ZERO).unwrap();

        let waiter = {
            let lock = lock.clone();
            thread::spawn(move || lock.acquire(Duration::from_secs(5)).map(|_| ()))
        };
        thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert!(waiter.join().unwrap().is_ok());
    }
}
