//! Per-stream rendezvous: one broadcaster, many viewers, many chat clients.
//!
//! All mutation goes through a single `RwLock`. The one rule that matters
//! for correctness under load: never hold the lock across a blocking send
//! to a peer. [`Room::route_signaling`] snapshots the target handle under
//! a read lock, releases it, then sends — the naive version of this (send
//! while still holding the lock) is exactly the bug this design fixes.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;

use crate::session::{ClientHandle, Role};
use crate::signaling::{self, SignalingFrame};

#[derive(Default)]
struct RoomState {
    broadcaster: Option<ClientHandle>,
    viewers: HashMap<String, ClientHandle>,
    chat_clients: HashMap<String, ClientHandle>,
}

pub struct Room {
    pub id: String,
    state: RwLock<RoomState>,
}

impl Room {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: RwLock::new(RoomState::default()),
        }
    }

    pub async fn is_empty(&self) -> bool {
        let state = self.state.read().await;
        state.broadcaster.is_none() && state.viewers.is_empty() && state.chat_clients.is_empty()
    }

    /// Registers a broadcaster, evicting any prior one first.
    pub async fn set_broadcaster(&self, client: ClientHandle) {
        let mut state = self.state.write().await;
        if let Some(prev) = state.broadcaster.take() {
            log::info!(
                "room {}: replacing broadcaster (evicting previous connection)",
                self.id
            );
            prev.evict();
        }
        state.broadcaster = Some(client);
    }

    /// Registers a viewer and, if a broadcaster is present, returns a
    /// handle the caller should notify with `viewer-joined` outside any
    /// lock.
    pub async fn add_viewer(&self, token: String, client: ClientHandle) -> Option<ClientHandle> {
        let mut state = self.state.write().await;
        state.viewers.insert(token, client);
        state.broadcaster.clone()
    }

    pub async fn add_chat(&self, id: String, client: ClientHandle) {
        let mut state = self.state.write().await;
        state.chat_clients.insert(id, client);
    }

    /// Removes a departed client and performs the role-specific cleanup
    /// described in the room's mutation rules. Returns the frames (and
    /// their targets) the caller should deliver outside the lock, plus the
    /// set of viewer handles to evict on broadcaster departure.
    ///
    /// `client` must be the handle the departing connection was given at
    /// registration. Every branch first checks that `client` is still the
    /// handle actually occupying its slot/map entry before mutating
    /// anything: a broadcaster (or a viewer token, or a chat id) can be
    /// replaced by a newer connection while the old connection's cleanup
    /// is still in flight, and that newer connection already owns whatever
    /// state a stale cleanup would otherwise tear down. When `client` has
    /// already been superseded, this is a no-op.
    pub async fn remove_client(&self, client: &ClientHandle) -> RemovalEffects {
        let mut state = self.state.write().await;
        match client.role {
            Role::Broadcaster => {
                let still_current = state
                    .broadcaster
                    .as_ref()
                    .is_some_and(|current| current.same_connection(client));
                if !still_current {
                    return RemovalEffects::none();
                }
                state.broadcaster = None;
                let departing_viewers: Vec<ClientHandle> =
                    state.viewers.drain().map(|(_, v)| v).collect();
                RemovalEffects {
                    broadcaster_left_targets: departing_viewers,
                    viewer_left_notice: None,
                }
            }
            Role::Viewer => {
                let still_current = state
                    .viewers
                    .get(&client.id)
                    .is_some_and(|current| current.same_connection(client));
                if !still_current {
                    return RemovalEffects::none();
                }
                state.viewers.remove(&client.id);
                let notice = state
                    .broadcaster
                    .clone()
                    .map(|b| (b, signaling::SignalingFrame::viewer_left(client.id.clone())));
                RemovalEffects {
                    broadcaster_left_targets: Vec::new(),
                    viewer_left_notice: notice,
                }
            }
            Role::Chat => {
                let still_current = state
                    .chat_clients
                    .get(&client.id)
                    .is_some_and(|current| current.same_connection(client));
                if still_current {
                    state.chat_clients.remove(&client.id);
                }
                RemovalEffects::none()
            }
        }
    }

    /// Dispatches an inbound signaling frame from `sender` per the routing
    /// table: `offer`/`ice-candidate` from the broadcaster go to the named
    /// viewer; `answer`/`ice-candidate` from a viewer go to the
    /// broadcaster with `viewerId` stamped to the sender's id.
    pub async fn route_signaling(&self, sender_role: Role, sender_id: &str, mut frame: SignalingFrame) {
        let target = match (sender_role, frame.kind.as_str()) {
            (Role::Broadcaster, signaling::OFFER) | (Role::Broadcaster, signaling::ICE_CANDIDATE) => {
                let Some(viewer_id) = frame.viewer_id.clone() else {
                    log::warn!("room {}: {} from broadcaster missing viewerId", self.id, frame.kind);
                    return;
                };
                let state = self.state.read().await;
                state.viewers.get(&viewer_id).cloned()
            }
            (Role::Viewer, signaling::ANSWER) | (Role::Viewer, signaling::ICE_CANDIDATE) => {
                frame.viewer_id = Some(sender_id.to_string());
                let state = self.state.read().await;
                state.broadcaster.clone()
            }
            _ => {
                log::warn!(
                    "room {}: unexpected frame type {} from {}",
                    self.id,
                    frame.kind,
                    sender_role
                );
                return;
            }
        };

        let Some(target) = target else {
            log::debug!("room {}: routing miss for {} frame", self.id, frame.kind);
            return;
        };

        let Ok(encoded) = serde_json::to_string(&frame) else {
            log::error!("room {}: failed to encode {} frame", self.id, frame.kind);
            return;
        };
        target.send(Message::Text(encoded)).await;
    }

    /// Notifies the broadcaster (if present) that a viewer joined.
    pub async fn notify_viewer_joined(&self, broadcaster: ClientHandle, viewer_id: &str) {
        let frame = SignalingFrame::viewer_joined(viewer_id.to_string());
        if let Ok(encoded) = serde_json::to_string(&frame) {
            broadcaster.send(Message::Text(encoded)).await;
        }
    }

    /// Fans a chat frame out to every current subscriber, including the
    /// sender (echo). Subscribers whose queue is full are evicted.
    pub async fn broadcast_chat(&self, raw: Message) {
        let mut state = self.state.write().await;
        let mut stalled = Vec::new();
        for (id, client) in state.chat_clients.iter() {
            if !client.try_send(raw.clone()) {
                stalled.push(id.clone());
            }
        }
        for id in stalled {
            if let Some(client) = state.chat_clients.remove(&id) {
                log::warn!("room {}: evicting slow chat consumer {id}", self.id);
                client.evict();
            }
        }
    }
}

pub struct RemovalEffects {
    /// Viewers to notify with `broadcaster-left` and then evict, in the
    /// broadcaster-departure case.
    pub broadcaster_left_targets: Vec<ClientHandle>,
    /// A `viewer-left` frame to deliver to the broadcaster, in the
    /// viewer-departure case.
    pub viewer_left_notice: Option<(ClientHandle, SignalingFrame)>,
}

impl RemovalEffects {
    /// No notifications to deliver — the departing connection had already
    /// been superseded, or its role never produces a departure notice.
    fn none() -> Self {
        Self {
            broadcaster_left_targets: Vec::new(),
            viewer_left_notice: None,
        }
    }

    /// Delivers the notifications computed by `remove_client`. Split out
    /// of the lock-holding call so no send happens while the room lock is
    /// held.
    pub async fn apply(self) {
        if !self.broadcaster_left_targets.is_empty() {
            let frame = SignalingFrame::broadcaster_left();
            let Ok(encoded) = serde_json::to_string(&frame) else {
                return;
            };
            for viewer in self.broadcaster_left_targets {
                viewer.send(Message::Text(encoded.clone())).await;
                viewer.evict();
            }
        }
        if let Some((broadcaster, frame)) = self.viewer_left_notice {
            if let Ok(encoded) = serde_json::to_string(&frame) {
                broadcaster.send(Message::Text(encoded)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ClientSession;

    fn handle(id: &str, role: Role) -> (ClientSession, ClientHandle) {
        let session = ClientSession::new(id, "s1", role);
        let handle = session.handle.clone();
        (session, handle)
    }

    #[tokio::test]
    async fn at_most_one_broadcaster_and_replacement_evicts_prior() {
        let room = Room::new("s1");
        let (_first_session, first) = handle("broadcaster", Role::Broadcaster);
        room.set_broadcaster(first.clone()).await;

        let (_second_session, second) = handle("broadcaster", Role::Broadcaster);
        room.set_broadcaster(second.clone()).await;

        assert!(first.is_evicted());
        assert!(!second.is_evicted());
    }

    #[tokio::test]
    async fn viewer_before_broadcaster_gets_no_joined_notice() {
        let room = Room::new("s1");
        let (_viewer_session, viewer) = handle("v1", Role::Viewer);
        let broadcaster_present = room.add_viewer("v1".to_string(), viewer).await;
        assert!(broadcaster_present.is_none());
    }

    #[tokio::test]
    async fn broadcaster_departure_empties_viewers_and_evicts_them() {
        let room = Room::new("s1");
        let (_b_session, broadcaster) = handle("broadcaster", Role::Broadcaster);
        room.set_broadcaster(broadcaster.clone()).await;

        let (_v1_session, v1) = handle("v1", Role::Viewer);
        let (_v2_session, v2) = handle("v2", Role::Viewer);
        room.add_viewer("v1".to_string(), v1.clone()).await;
        room.add_viewer("v2".to_string(), v2.clone()).await;

        let effects = room.remove_client(&broadcaster).await;
        assert_eq!(effects.broadcaster_left_targets.len(), 2);
        effects.apply().await;

        assert!(room.is_empty().await);
        assert!(v1.is_evicted());
        assert!(v2.is_evicted());
    }

    #[tokio::test]
    async fn superseded_broadcaster_cleanup_does_not_touch_the_replacement() {
        // Reproduces the eviction race: the old broadcaster's connection
        // notices it was cancelled and runs its own `remove_client` cleanup
        // *after* a new broadcaster has already taken the slot and a viewer
        // has already joined it. That stale cleanup must be a no-op.
        let room = Room::new("s1");
        let (_old_session, old_broadcaster) = handle("broadcaster", Role::Broadcaster);
        room.set_broadcaster(old_broadcaster.clone()).await;

        let (_new_session, new_broadcaster) = handle("broadcaster", Role::Broadcaster);
        room.set_broadcaster(new_broadcaster.clone()).await;
        assert!(old_broadcaster.is_evicted());

        let (_viewer_session, viewer) = handle("v1", Role::Viewer);
        let joined_broadcaster = room.add_viewer("v1".to_string(), viewer.clone()).await;
        assert!(joined_broadcaster.is_some());

        // The old broadcaster's reader task runs its departure cleanup late.
        let effects = room.remove_client(&old_broadcaster).await;
        assert!(effects.broadcaster_left_targets.is_empty());
        effects.apply().await;

        assert!(!viewer.is_evicted(), "the new broadcaster's viewer must survive a stale cleanup");
        assert!(!room.is_empty().await, "the new broadcaster's room state must be untouched");
    }

    #[tokio::test]
    async fn chat_fanout_evicts_only_the_full_queue() {
        let room = Room::new("s1");
        let (_c1_session, c1) = handle("c1", Role::Chat);
        let (mut c2_session, c2) = handle("c2", Role::Chat);
        let (_c3_session, c3) = handle("c3", Role::Chat);

        room.add_chat("c1".to_string(), c1.clone()).await;
        room.add_chat("c2".to_string(), c2.clone()).await;
        room.add_chat("c3".to_string(), c3.clone()).await;

        // Fill c2's queue so the next broadcast finds it full.
        let rx = c2_session.take_receiver();
        drop(rx); // closing the receiver makes try_send fail immediately

        room.broadcast_chat(Message::Text("hi".into())).await;

        assert!(!c2.try_send(Message::Text("after".into())));
        assert!(c1.try_send(Message::Text("after".into())));
        assert!(c3.try_send(Message::Text("after".into())));
    }
}
