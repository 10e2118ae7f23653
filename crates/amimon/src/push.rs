//! WebSocket push listener
//!
//! One persistent duplex connection per subscriber at `/ws`. Each socket
//! gets a channel registered in the broadcast hub; a forwarding task
//! drains it onto the wire. Inbound subscriber messages are accepted and
//! ignored. There is no replay: a subscriber sees only snapshots
//! published after it joined.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info};

use amimon_monitor_engine::BroadcastHub;

#[derive(Clone)]
struct PushState {
    hub: Arc<BroadcastHub>,
    shutdown: watch::Receiver<bool>,
}

/// Run the push listener until the shutdown signal fires. Open subscriber
/// connections are drained and closed as part of the graceful shutdown.
pub async fn serve(
    listen: String,
    hub: Arc<BroadcastHub>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut signal = shutdown.clone();
    let state = PushState { hub, shutdown };
    let app = Router::new().route("/ws", get(ws_handler)).with_state(state);
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!("push listener on ws://{}/ws", listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = signal.changed().await;
        })
        .await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<PushState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: PushState) {
    let (mut sender, mut receiver) = socket.split();
    let (id, mut rx) = state.hub.subscribe();
    let mut shutdown = state.shutdown.clone();
    info!(
        "subscriber {} connected ({} total)",
        id,
        state.hub.subscriber_count()
    );

    // Forward published snapshots onto the wire until the hub side or the
    // socket goes away.
    let forward = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sender.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    // Subscriber messages carry no meaning; drain until close or
    // shutdown.
    loop {
        tokio::select! {
            message = receiver.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(other)) => debug!("ignoring subscriber {} message: {:?}", id, other),
            },
            _ = shutdown.changed() => break,
        }
    }

    state.hub.unsubscribe(id);
    forward.abort();
    info!(
        "subscriber {} disconnected ({} total)",
        id,
        state.hub.subscriber_count()
    );
}
