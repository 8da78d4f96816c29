use crate::AppState;
use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, State},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use office_core::OfficeEvent;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    /// Zero disables keepalive pings.
    pub ping_interval: Duration,
    pub write_timeout: Duration,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut subscription = state.hub.subscribe();
    let sub_id = subscription.id;
    let config = state.relay;
    info!(event = "client_connected", subscriber = %sub_id);

    let pings = !config.ping_interval.is_zero();
    let mut ticker = tokio::time::interval(if pings {
        config.ping_interval
    } else {
        Duration::from_secs(3600)
    });
    ticker.tick().await;

    let reason = loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else {
                    break "hub_closed";
                };
                let Some(text) = encode(&event) else {
                    continue;
                };
                let send = ws_sender.send(Message::Text(text));
                match tokio::time::timeout(config.write_timeout, send).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(event = "send_failed", subscriber = %sub_id, error = %err);
                        break "send_failed";
                    }
                    Err(_) => {
                        warn!(event = "send_timeout", subscriber = %sub_id, kind = event.kind());
                        break "send_timeout";
                    }
                }
            }
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break "client_close",
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(event = "read_error", subscriber = %sub_id, error = %err);
                    break "read_error";
                }
            },
            _ = ticker.tick(), if pings => {
                let ping = ws_sender.send(Message::Ping(Vec::new()));
                if !matches!(tokio::time::timeout(config.write_timeout, ping).await, Ok(Ok(()))) {
                    warn!(event = "ping_failed", subscriber = %sub_id);
                    break "ping_failed";
                }
            }
        }
    };

    state.hub.unsubscribe(sub_id);
    let _ = ws_sender.close().await;
    info!(event = "client_disconnected", subscriber = %sub_id, reason);
}

fn encode(event: &OfficeEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(text) => Some(text),
        Err(err) => {
            debug!(event = "encode_failed", kind = event.kind(), error = %err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use office_core::{AgentFiles, EventHub, Snapshot};
    use serde_json::Value;
    use tokio_tungstenite::{connect_async, tungstenite};

    async fn next_json<S>(client: &mut S) -> Value
    where
        S: futures_util::Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("frame in time")
            .expect("open stream")
            .expect("valid frame");
        let tungstenite::Message::Text(text) = frame else {
            panic!("expected text frame, got {frame:?}")
        };
        serde_json::from_str(&text).expect("json frame")
    }

    #[tokio::test]
    async fn client_gets_cached_init_then_live_events_and_is_dropped_on_close() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hub = EventHub::default();
        hub.publish(OfficeEvent::Init(Snapshot::default()));
        let state = AppState {
            hub: hub.clone(),
            files: AgentFiles::new(dir.path()),
            relay: RelayConfig {
                ping_interval: Duration::ZERO,
                write_timeout: Duration::from_secs(1),
            },
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move { axum::serve(listener, crate::router(state)).await });

        let (mut client, _) = connect_async(format!("ws://{addr}/ws"))
            .await
            .expect("connect");
        let first = next_json(&mut client).await;
        assert_eq!(first["type"], "init");
        assert_eq!(hub.subscriber_count(), 1);

        hub.publish(OfficeEvent::removed("ghost"));
        let live = next_json(&mut client).await;
        assert_eq!(live["type"], "agent_removed");
        assert_eq!(live["payload"]["agentId"], "ghost");

        client.close(None).await.expect("close");
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while hub.subscriber_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hub.subscriber_count(), 0);
    }
}
