//! Per-endpoint connection lifecycles: wires a session's reader/writer
//! tasks to its room, the way [`SocketClientConn`] wires a socket client
//! to the rest of the process — read loop decodes and dispatches, write
//! loop drains the outbound queue, and the session cleans up its room
//! membership on the way out regardless of which side closed first.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::notify::NotificationSink;
use crate::registry::Registry;
use crate::room::Room;
use crate::session::{generate_chat_id, ClientSession, Role};
use crate::signaling::SignalingFrame;
use crate::ws::WsStream;

const BROADCASTER_ID: &str = "broadcaster";

/// Bounds how long a single outbound write may block on a wedged peer
/// before the writer task gives up on the connection.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run_broadcaster(
    ws: WsStream,
    stream_id: String,
    registry: Arc<Registry>,
    notifier: Arc<dyn NotificationSink>,
) -> Result<()> {
    let room = registry.get_or_create(&stream_id).await;
    let mut session = ClientSession::new(BROADCASTER_ID, stream_id.clone(), Role::Broadcaster);
    let rx = session.take_receiver();
    let cancel = session.cancellation();

    room.set_broadcaster(session.handle.clone()).await;
    notifier.stream_created(&stream_id).await;
    log::info!("stream {stream_id}: broadcaster connected");

    let (sink, stream) = ws.split();
    let writer = tokio::spawn(write_loop(sink, rx, cancel.clone()));
    read_loop_signaling(stream, Role::Broadcaster, BROADCASTER_ID, &room, &cancel).await;

    let effects = room.remove_client(&session.handle).await;
    effects.apply().await;
    notifier.stream_ended(&stream_id).await;
    log::info!("stream {stream_id}: broadcaster disconnected");

    finish(cancel, writer).await;
    Ok(())
}

pub async fn run_viewer(
    ws: WsStream,
    stream_id: String,
    viewer_id: String,
    registry: Arc<Registry>,
) -> Result<()> {
    let room = registry.get_or_create(&stream_id).await;
    let mut session = ClientSession::new(viewer_id.clone(), stream_id.clone(), Role::Viewer);
    let rx = session.take_receiver();
    let cancel = session.cancellation();

    if let Some(broadcaster) = room.add_viewer(viewer_id.clone(), session.handle.clone()).await {
        room.notify_viewer_joined(broadcaster, &viewer_id).await;
    }
    log::info!("stream {stream_id}: viewer {viewer_id} connected");

    let (sink, stream) = ws.split();
    let writer = tokio::spawn(write_loop(sink, rx, cancel.clone()));
    read_loop_signaling(stream, Role::Viewer, &viewer_id, &room, &cancel).await;

    let effects = room.remove_client(&session.handle).await;
    effects.apply().await;
    log::info!("stream {stream_id}: viewer {viewer_id} disconnected");

    finish(cancel, writer).await;
    Ok(())
}

pub async fn run_chat(ws: WsStream, stream_id: String, registry: Arc<Registry>) -> Result<()> {
    let room = registry.get_or_create(&stream_id).await;
    let chat_id = generate_chat_id();
    let mut session = ClientSession::new(chat_id.clone(), stream_id.clone(), Role::Chat);
    let rx = session.take_receiver();
    let cancel = session.cancellation();

    room.add_chat(chat_id.clone(), session.handle.clone()).await;
    log::info!("stream {stream_id}: chat client {chat_id} connected");

    let (sink, stream) = ws.split();
    let writer = tokio::spawn(write_loop(sink, rx, cancel.clone()));
    read_loop_chat(stream, &room, &cancel).await;

    let effects = room.remove_client(&session.handle).await;
    effects.apply().await;
    log::info!("stream {stream_id}: chat client {chat_id} disconnected");

    finish(cancel, writer).await;
    Ok(())
}

async fn finish(cancel: CancellationToken, writer: JoinHandle<()>) {
    cancel.cancel();
    let _ = writer.await;
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            maybe = rx.recv() => {
                match maybe {
                    Some(msg) => {
                        match tokio::time::timeout(WRITE_TIMEOUT, sink.send(msg)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                log::warn!("write error: {e}");
                                break;
                            }
                            Err(_) => {
                                log::warn!("write timed out after {WRITE_TIMEOUT:?}, dropping wedged peer");
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }
        }
    }
    let _ = sink.close().await;
}

async fn read_loop_signaling(
    mut stream: SplitStream<WsStream>,
    role: Role,
    sender_id: &str,
    room: &Room,
    cancel: &CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            next = stream.next() => {
                match next {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<SignalingFrame>(&text) {
                            Ok(frame) => room.route_signaling(role, sender_id, frame).await,
                            Err(e) => log::warn!("{sender_id}: failed to parse signaling frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("{sender_id}: read error: {e}");
                        break;
                    }
                }
            }
        }
    }
}

async fn read_loop_chat(mut stream: SplitStream<WsStream>, room: &Room, cancel: &CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            next = stream.next() => {
                match next {
                    Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                        room.broadcast_chat(msg).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("chat read error: {e}");
                        break;
                    }
                }
            }
        }
    }
}
