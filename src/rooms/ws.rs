use std::{sync::Arc, time::Duration};

use axum::{
    debug_handler,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    rooms::{
        msg::{self, Ack, ServerEvent},
        RoomService,
    },
    session::ConnectionHandle,
};

/// How long queued events may take to flush once the connection is closing.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

#[debug_handler(state = crate::AppState)]
pub async fn room_ws(State(service): State<Arc<RoomService>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, service))
}

async fn handle_socket(socket: WebSocket, service: Arc<RoomService>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(service.connection_buffer());
    let closer = CancellationToken::new();
    let handle = ConnectionHandle::new(tx, closer.clone());
    let connection_id = handle.id;

    service.connect(handle.clone()).await;
    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(connection_id = %connection_id, error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    loop {
        tokio::select! {
            _ = closer.cancelled() => {
                tracing::info!(connection_id = %connection_id, "Connection evicted");
                break;
            }
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_frame(&service, &handle, text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(connection_id = %connection_id, "WebSocket closed by client");
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(connection_id = %connection_id, error = %e, "WebSocket error");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    service.disconnect(connection_id).await;

    // once every sender is gone the writer drains what is queued and stops
    drop(handle);
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }
    tracing::info!(connection_id = %connection_id, "WebSocket connection terminated");
}

async fn handle_frame(service: &RoomService, handle: &ConnectionHandle, text: &str) {
    let frame = match msg::parse_frame(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(connection_id = %handle.id, error = %e, "Failed to parse frame");
            handle.send(ServerEvent::error(&e));
            return;
        }
    };

    let result = match frame.command {
        Ok(command) => {
            let name = command.name();
            let result = service.execute(handle.id, command).await;
            if let Err(e) = &result {
                tracing::info!(connection_id = %handle.id, command = name, error = %e, code = ?e.kind(), "Command rejected");
            }
            result
        }
        Err(e) => {
            tracing::warn!(connection_id = %handle.id, error = %e, "Malformed command");
            Err(e)
        }
    };

    match (frame.id, result) {
        (Some(id), Ok(())) => {
            handle.send(ServerEvent::Ack(Ack::ok(id)));
        }
        (Some(id), Err(e)) => {
            handle.send(ServerEvent::Ack(Ack::failed(id, &e)));
        }
        (None, Err(e)) => {
            handle.send(ServerEvent::error(&e));
        }
        (None, Ok(())) => {}
    }
}
