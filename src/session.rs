//! Per-connection state for signaling and chat clients.
//!
//! Mirrors the read/write task-pair split used for socket clients
//! elsewhere in this codebase: every connection owns a reader task that
//! decodes frames and a writer task that drains an outbound queue. The
//! two communicate with the rest of the process only through that queue
//! and through [`Room`](crate::room::Room) method calls — never by
//! sharing the transport directly.

use std::fmt;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Role a session plays within its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Broadcaster,
    Viewer,
    Chat,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Broadcaster => "broadcaster",
            Role::Viewer => "viewer",
            Role::Chat => "chat",
        };
        f.write_str(s)
    }
}

/// Outbound queue capacity for broadcaster/viewer sessions.
pub const SIGNALING_QUEUE_CAPACITY: usize = 512;
/// Outbound queue capacity for chat sessions.
pub const CHAT_QUEUE_CAPACITY: usize = 256;

/// A lightweight, cloneable reference to a connected client.
///
/// Rooms store these in their membership maps rather than the session
/// itself, so a room never needs to reach across to the connection's
/// reader/writer tasks directly.
#[derive(Clone)]
pub struct ClientHandle {
    pub id: String,
    pub stream_id: String,
    pub role: Role,
    outbound_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl ClientHandle {
    /// Non-blocking enqueue. Returns `false` if the queue is full or closed.
    pub fn try_send(&self, msg: Message) -> bool {
        self.outbound_tx.try_send(msg).is_ok()
    }

    /// Blocking enqueue, used for point-to-point signaling delivery where
    /// loss is not acceptable within the room's lifetime.
    ///
    /// Must never be called while holding a room lock.
    pub async fn send(&self, msg: Message) -> bool {
        self.outbound_tx.send(msg).await.is_ok()
    }

    /// Closes the queue and tears down the underlying transport once the
    /// writer task notices. Safe to call more than once.
    pub fn evict(&self) {
        self.cancel.cancel();
    }

    /// Whether this handle has been evicted. Mainly useful for tests —
    /// the writer task itself reacts to the cancellation token directly.
    pub fn is_evicted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether `self` and `other` are handles to the very same connection,
    /// as opposed to two different connections that happen to share an id
    /// (e.g. a broadcaster reconnect, or a viewer token reused before the
    /// old connection noticed it was replaced). Rooms use this to avoid
    /// tearing down a newer connection's state while cleaning up after an
    /// older one.
    pub fn same_connection(&self, other: &ClientHandle) -> bool {
        self.outbound_tx.same_channel(&other.outbound_tx)
    }
}

/// Owns the reader/writer task pair for one connection.
pub struct ClientSession {
    pub handle: ClientHandle,
    outbound_rx: Option<mpsc::Receiver<Message>>,
    cancel: CancellationToken,
}

impl ClientSession {
    /// Creates a session with a queue sized for its role. The returned
    /// session still owns the receive half — call
    /// [`ClientSession::take_receiver`] once the transport is ready to
    /// spawn the writer task.
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>, role: Role) -> Self {
        let capacity = match role {
            Role::Chat => CHAT_QUEUE_CAPACITY,
            Role::Broadcaster | Role::Viewer => SIGNALING_QUEUE_CAPACITY,
        };
        let (tx, rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        Self {
            handle: ClientHandle {
                id: id.into(),
                stream_id: stream_id.into(),
                role,
                outbound_tx: tx,
                cancel: cancel.clone(),
            },
            outbound_rx: Some(rx),
            cancel,
        }
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Hands the receive half to the caller, which owns writer-task setup.
    ///
    /// # Panics
    ///
    /// Panics if called more than once for the same session.
    pub fn take_receiver(&mut self) -> mpsc::Receiver<Message> {
        self.outbound_rx
            .take()
            .expect("outbound receiver already taken")
    }
}

/// Generates a chat client id as a cryptographically random 16-byte hex
/// token. Unlike a counter-plus-weak-random scheme, collisions are not a
/// practical concern even without checking the room's existing ids.
pub fn generate_chat_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    let mut hex = String::with_capacity(bytes.len() * 2 + 7);
    hex.push_str("client_");
    for b in bytes {
        hex.push_str(&format!("{b:02x}"));
    }
    hex
}
