//! WebSocket edge: accept loop and per-connection pumps.
//!
//! Each connection gets two tasks. The reader parses JSON frames and routes
//! them to the hub or the participant's session; the writer drains the
//! participant's outbound queue and keeps the connection alive with pings.
//! Document state is never touched here; that is the session's job.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_tungstenite::WebSocketStream;

use super::hub::Hub;
use super::message::{ClientMessage, ServerMessage};
use super::participant::Participant;
use super::session::OpSubmission;

const WRITE_WAIT: Duration = Duration::from_secs(10);
const PONG_WAIT: Duration = Duration::from_secs(60);
const PING_PERIOD: Duration = Duration::from_secs(54);
const MAX_MSG_SIZE: usize = 64 * 1024;

/// Bind `addr` and serve WebSocket connections forever.
pub async fn serve(addr: &str, hub: Arc<Hub>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("listening on {}", listener.local_addr()?);
    run_listener(listener, hub).await
}

/// Accept loop over an already-bound listener.
pub async fn run_listener(listener: TcpListener, hub: Arc<Hub>) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let hub = hub.clone();
        tokio::spawn(async move {
            log::debug!("connection from {peer}");
            if let Err(e) = handle_connection(stream, hub).await {
                log::debug!("connection {peer}: {e}");
            }
            log::debug!("connection {peer} closed");
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    hub: Arc<Hub>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let config = WebSocketConfig::default().max_message_size(Some(MAX_MSG_SIZE));
    let ws = tokio_tungstenite::accept_async_with_config(stream, Some(config)).await?;
    let (sink, stream) = ws.split();

    let (participant, outbound_rx) = Participant::connect();
    log::info!(
        "participant {} ({}) connected",
        participant.name(),
        participant.id()
    );

    let writer = tokio::spawn(write_pump(sink, outbound_rx));
    read_pump(stream, participant.clone(), hub).await;

    // Reader is done: tell the session, then close the outbound queue so the
    // writer drains and exits even if the session is already gone.
    if let Some(session) = participant.session() {
        session.leave(participant.id()).await;
    }
    participant.close_outbound();
    let _ = writer.await;

    log::info!("participant {} disconnected", participant.id());
    Ok(())
}

/// Drain the outbound queue into the socket; ping on an interval. Exits
/// when the queue closes or the socket dies.
async fn write_pump(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbound: mpsc::Receiver<ServerMessage>,
) {
    let mut ping = tokio::time::interval(PING_PERIOD);
    ping.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            msg = outbound.recv() => match msg {
                Some(msg) => {
                    let text = match serde_json::to_string(&msg) {
                        Ok(text) => text,
                        Err(e) => {
                            log::error!("encoding outbound message failed: {e}");
                            continue;
                        }
                    };
                    match timeout(WRITE_WAIT, sink.send(Message::Text(text.into()))).await {
                        Ok(Ok(())) => {}
                        _ => return,
                    }
                }
                None => {
                    let _ = timeout(WRITE_WAIT, sink.send(Message::Close(None))).await;
                    return;
                }
            },
            _ = ping.tick() => {
                match timeout(WRITE_WAIT, sink.send(Message::Ping(Bytes::new()))).await {
                    Ok(Ok(())) => {}
                    _ => return,
                }
            }
        }
    }
}

/// Read frames until the connection dies or the read deadline expires.
/// Any inbound frame (including pongs) refreshes the deadline.
async fn read_pump(
    mut stream: SplitStream<WebSocketStream<TcpStream>>,
    participant: Arc<Participant>,
    hub: Arc<Hub>,
) {
    loop {
        let frame = match timeout(PONG_WAIT, stream.next()).await {
            Err(_) => {
                log::debug!("participant {}: read deadline expired", participant.id());
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(e))) => {
                log::debug!("participant {}: read error: {e}", participant.id());
                return;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => handle_client_message(text.as_str(), &participant, &hub).await,
            Message::Close(_) => return,
            // Pings are answered by tungstenite; pongs only refresh the
            // deadline.
            _ => {}
        }
    }
}

async fn handle_client_message(text: &str, participant: &Arc<Participant>, hub: &Arc<Hub>) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            participant.send_error(format!("invalid message: {e}"));
            return;
        }
    };

    match msg {
        ClientMessage::Join { doc_id } => {
            if participant.session().is_some() {
                participant.send_error("already joined to a document");
                return;
            }
            hub.join_doc(participant.clone(), doc_id).await;
        }
        ClientMessage::Op { revision, op, .. } => {
            let Some(session) = participant.session() else {
                participant.send_error("not joined to a document");
                return;
            };
            session
                .submit(OpSubmission {
                    participant_id: participant.id(),
                    revision,
                    op,
                })
                .await;
        }
    }
}
