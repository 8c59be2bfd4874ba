//! Process-wide index of live rooms, plus a background reaper that frees
//! rooms nobody has used in a while.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::room::Room;

/// How often the reaper sweeps the registry for empty rooms.
pub const REAP_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
/// How long a room must stay empty before it is removed.
pub const REAP_GRACE_PERIOD: Duration = Duration::from_secs(120);

pub struct Registry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the room for `stream_id`, creating it on first use.
    pub async fn get_or_create(&self, stream_id: &str) -> Arc<Room> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(stream_id) {
                return room.clone();
            }
        }
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(stream_id.to_string())
            .or_insert_with(|| Arc::new(Room::new(stream_id)))
            .clone()
    }

    /// Runs forever, removing rooms that have been empty for at least
    /// `grace` across consecutive sweeps spaced `sweep` apart. Intended to
    /// be spawned as its own task and aborted on shutdown.
    pub async fn run_reaper(self: Arc<Self>, sweep: Duration, grace: Duration) {
        let mut ticker = tokio::time::interval(sweep);
        let mut empty_since: HashMap<String, Instant> = HashMap::new();
        loop {
            ticker.tick().await;

            let snapshot: Vec<(String, Arc<Room>)> = {
                let rooms = self.rooms.read().await;
                rooms.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            };

            let mut candidates = Vec::new();
            for (id, room) in &snapshot {
                if room.is_empty().await {
                    let since = *empty_since.entry(id.clone()).or_insert_with(Instant::now);
                    if since.elapsed() >= grace {
                        candidates.push(id.clone());
                    }
                } else {
                    empty_since.remove(id);
                }
            }

            if candidates.is_empty() {
                continue;
            }

            let mut rooms = self.rooms.write().await;
            for id in candidates {
                // Re-check under the write lock: a client may have joined
                // between the snapshot above and acquiring this lock.
                let still_empty = match rooms.get(&id) {
                    Some(room) => room.is_empty().await,
                    None => false,
                };
                if still_empty {
                    rooms.remove(&id);
                    empty_since.remove(&id);
                    log::info!("reaped empty room {id}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ClientSession, Role};

    #[tokio::test]
    async fn get_or_create_returns_the_same_room_on_repeat_lookups() {
        let registry = Registry::new();
        let a = registry.get_or_create("s1").await;
        let b = registry.get_or_create("s1").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn get_or_create_gives_distinct_streams_distinct_rooms() {
        let registry = Registry::new();
        let a = registry.get_or_create("s1").await;
        let b = registry.get_or_create("s2").await;
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn reaper_removes_a_room_only_after_it_has_been_empty_for_the_grace_period() {
        let registry = Registry::new();
        let room = registry.get_or_create("s1").await;
        let reaper = tokio::spawn(registry.clone().run_reaper(Duration::from_millis(10), Duration::from_millis(30)));

        // Before the grace period elapses the room must survive at least
        // one sweep.
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(Arc::ptr_eq(&room, &registry.get_or_create("s1").await));

        tokio::time::sleep(Duration::from_millis(60)).await;
        let recreated = registry.get_or_create("s1").await;
        assert!(
            !Arc::ptr_eq(&room, &recreated),
            "room should have been reaped and a fresh one created on lookup"
        );

        reaper.abort();
    }

    #[tokio::test]
    async fn reaper_leaves_non_empty_rooms_alone() {
        let registry = Registry::new();
        let room = registry.get_or_create("s1").await;
        let session = ClientSession::new("broadcaster", "s1", Role::Broadcaster);
        room.set_broadcaster(session.handle.clone()).await;

        let reaper = tokio::spawn(registry.clone().run_reaper(Duration::from_millis(10), Duration::from_millis(20)));
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(Arc::ptr_eq(&room, &registry.get_or_create("s1").await));
        reaper.abort();
    }
}
