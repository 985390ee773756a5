//! Per-fingerprint request coalescing.
//!
//! When several tasks miss the same fingerprint at once, only one of them
//! performs the upstream fetch; the rest wait on its gate and then re-read
//! the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Default)]
pub struct Singleflight {
    inflight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Guard for one coalesced fetch. Dropping it releases waiters.
pub struct FlightGuard<'a> {
    flight: &'a Singleflight,
    key: String,
    permit: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Singleflight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the gate for `key`. The first caller gets it immediately;
    /// concurrent callers suspend here until the holder drops its guard,
    /// after which they should re-check the cache before fetching.
    pub async fn acquire(&self, key: &str) -> FlightGuard<'_> {
        let gate = {
            let mut inflight = match self.inflight.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(inflight.entry(key.to_string()).or_default())
        };
        let permit = gate.lock_owned().await;
        FlightGuard {
            flight: self,
            key: key.to_string(),
            permit: Some(permit),
        }
    }

    fn release(&self, key: &str) {
        let mut inflight = match self.inflight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Only drop the map entry once nobody else holds a clone of the
        // gate; late waiters still queued on it keep it alive.
        if let Some(gate) = inflight.get(key) {
            if Arc::strong_count(gate) == 1 {
                inflight.remove(key);
            }
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        // Release the lock before inspecting the refcount; the owned guard
        // itself keeps the gate alive.
        self.permit.take();
        self.flight.release(&self.key);
    }
}
