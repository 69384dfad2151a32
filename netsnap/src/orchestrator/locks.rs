//! Per-device exclusivity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = HashMap<String, Arc<AsyncMutex<()>>>;

/// One async lock per device id, created on demand and dropped when
/// nobody holds or waits for it.
#[derive(Debug, Clone, Default)]
pub(crate) struct DeviceLocks {
    table: Arc<Mutex<LockTable>>,
}

/// Held while a task works on a device.
#[derive(Debug)]
pub(crate) struct DeviceGuard {
    device: String,
    table: Arc<Mutex<LockTable>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl DeviceLocks {
    /// Wait until no other task holds `device`.
    pub(crate) async fn acquire(&self, device: &str) -> DeviceGuard {
        let lock = match self.table.lock() {
            Ok(mut table) => table.entry(device.to_string()).or_default().clone(),
            Err(poisoned) => poisoned.into_inner().entry(device.to_string()).or_default().clone(),
        };
        let guard = lock.lock_owned().await;
        DeviceGuard {
            device: device.to_string(),
            table: self.table.clone(),
            guard: Some(guard),
        }
    }

    /// Devices currently locked or waited for.
    pub(crate) fn len(&self) -> usize {
        self.table.lock().map(|t| t.len()).unwrap_or(0)
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        let guard = self.guard.take();
        if let Ok(mut table) = self.table.lock() {
            // One reference in the table, one in our guard: nobody is waiting.
            if table
                .get(&self.device)
                .is_some_and(|lock| Arc::strong_count(lock) <= 2)
            {
                table.remove(&self.device);
            }
        }
        drop(guard);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_same_device_is_exclusive() {
        let locks = DeviceLocks::default();
        let first = locks.acquire("r1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("r1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        // Other devices are independent
        let other = locks.acquire("r2").await;
        assert_eq!(locks.len(), 2);
        drop(other);

        drop(first);
        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_no_entry() {
        let locks = DeviceLocks::default();
        let first = locks.acquire("r1").await;
        let pending = tokio::time::timeout(Duration::from_millis(20), locks.acquire("r1")).await;
        assert!(pending.is_err());

        drop(first);
        assert_eq!(locks.len(), 0);
    }
}
