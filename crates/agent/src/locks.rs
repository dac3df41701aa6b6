use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use colloquy_core::domain::session::SessionId;

/// Per-session mutual exclusion for the write phase of a turn.
#[derive(Default)]
pub struct SessionLocks {
    slots: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_id: SessionId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.retain(|id, slot| *id == session_id || Arc::strong_count(slot) > 1);
            slots.entry(session_id).or_default().clone()
        };
        slot.lock_owned().await
    }

    pub async fn tracked(&self) -> usize {
        self.slots.lock().await.len()
    }
}
