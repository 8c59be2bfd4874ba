//! Shared WebSocket transport configuration.
//!
//! Centralizes the handful of transport knobs the spec cares about — no
//! coalescing delay, small buffers, no compression — so every endpoint
//! gets the same tuned socket rather than each accept call repeating it.

use anyhow::{Context, Result};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::WebSocketStream;

/// Concrete WebSocket stream type for accepted server-side connections.
pub type WsStream = WebSocketStream<TcpStream>;

/// Read/write buffer size used by every accepted connection.
pub const BUFFER_SIZE: usize = 1024;

/// Disables Nagle's algorithm so small signaling frames aren't delayed.
pub fn tune(stream: &TcpStream) -> Result<()> {
    stream.set_nodelay(true).context("failed to set TCP_NODELAY")
}

/// Transport config shared by every accepted connection: small buffers,
/// no `permessage-deflate` (this crate does not enable tungstenite's
/// `deflate` feature, so compression is already off at compile time —
/// the explicit buffer sizes are what's left to tune).
pub fn config() -> WebSocketConfig {
    WebSocketConfig {
        write_buffer_size: BUFFER_SIZE,
        max_write_buffer_size: BUFFER_SIZE * 4,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn config_sizes_the_write_buffer_off_the_shared_constant() {
        let cfg = config();
        assert_eq!(cfg.write_buffer_size, BUFFER_SIZE);
        assert_eq!(cfg.max_write_buffer_size, BUFFER_SIZE * 4);
    }

    #[tokio::test]
    async fn tune_enables_tcp_nodelay_on_a_real_socket() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let (connected, (accepted, _addr)) =
            tokio::try_join!(TcpStream::connect(addr), async { listener.accept().await }).expect("loopback pair");

        tune(&accepted).expect("tune accepted stream");
        tune(&connected).expect("tune connected stream");

        assert!(accepted.nodelay().expect("read nodelay"));
        assert!(connected.nodelay().expect("read nodelay"));
    }
}
