//! Per-creator mutation locks.
//!
//! Mutations for one creator run one at a time; different creators never
//! contend. Acquisition is bounded by a timeout so a stuck holder surfaces as
//! `ConcurrentModification` instead of a hung request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::ProgressionError;

#[derive(Default)]
pub struct CreatorLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl CreatorLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, creator_id: &str) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        // Drop slots nobody holds or waits on
        if slots.len() > 1024 {
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        }
        Arc::clone(
            slots
                .entry(creator_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Acquire the creator's lock, waiting at most `timeout`.
    pub async fn acquire(
        &self,
        creator_id: &str,
        timeout: Duration,
    ) -> Result<OwnedMutexGuard<()>, ProgressionError> {
        let slot = self.slot(creator_id);
        match tokio::time::timeout(timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                debug!(creator_id, ?timeout, "Creator lock timed out");
                Err(ProgressionError::ConcurrentModification {
                    creator_id: creator_id.to_string(),
                    reason: format!("another update is in progress (waited {timeout:?})"),
                })
            }
        }
    }

    /// Number of tracked creators.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
