//! WebSocket event feed
//!
//! Each socket registers a channel-backed connection with the broadcaster.
//! A writer task drains the channel into the socket, so broadcast never
//! waits on a slow client.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use log::{debug, info};
use mirror::{Connection, DeliveryError, MailEvent};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{ApiError, ApiResult};
use crate::routes::{AppState, blocking};

const PONG: &str = r#"{"type":"pong"}"#;

/// Connection that queues serialized events for the socket writer
struct ChannelConnection {
    tx: mpsc::UnboundedSender<String>,
}

impl Connection for ChannelConnection {
    fn deliver(&self, event: &MailEvent) -> Result<(), DeliveryError> {
        let text = serde_json::to_string(event).map_err(|_| DeliveryError)?;
        self.tx.send(text).map_err(|_| DeliveryError)
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Ping,
}

#[derive(Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

pub async fn ws_handler(
    State(service): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let token = params.token.ok_or(ApiError::Unauthorized)?;
    let svc = service.clone();
    let email = blocking(move || Ok(svc.authenticate(&token)?)).await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, service, email)))
}

async fn handle_socket(socket: WebSocket, service: AppState, email: String) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let id = service
        .broadcaster()
        .register(Arc::new(ChannelConnection { tx: tx.clone() }));
    info!("WebSocket {} opened for {}", id, email);

    let mut writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(ClientMessage::Ping) => {
                            if tx.send(PONG.to_string()).is_err() {
                                break;
                            }
                        }
                        Err(_) => debug!("Ignoring client message on {}: {}", id, text.as_str()),
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = &mut writer => break,
        }
    }

    service.broadcaster().unregister(id);
    writer.abort();
    info!("WebSocket {} closed", id);
}
