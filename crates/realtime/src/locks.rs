use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;

/// Hands out per-game mutexes. Entries hold weak references so a lock dies
/// with its last holder; `evict_released` sweeps the dead entries to keep
/// the map bounded over long uptimes.
#[derive(Default)]
pub struct GameLocks {
    locks: DashMap<String, Weak<Mutex<()>>>,
}

impl GameLocks {
    pub fn new() -> Self {
        GameLocks::default()
    }

    pub fn acquire(&self, game_id: &str) -> Arc<Mutex<()>> {
        match self.locks.entry(game_id.to_string()) {
            Entry::Occupied(mut entry) => match entry.get().upgrade() {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(Mutex::new(()));
                    entry.insert(Arc::downgrade(&lock));
                    lock
                }
            },
            Entry::Vacant(entry) => {
                let lock = Arc::new(Mutex::new(()));
                entry.insert(Arc::downgrade(&lock));
                lock
            }
        }
    }

    pub fn evict_released(&self) {
        self.locks.retain(|_, weak| weak.strong_count() > 0);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }
}
