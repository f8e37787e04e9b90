use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use futures::stream::SplitSink;
use futures::SinkExt;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{Actor, Role};
use crate::engine::booking::ensure_party;
use crate::engine::tracking::{self, LocationUpdateRequest};
use crate::error::AppError;
use crate::realtime::bus::{Channel, ServerEvent};
use crate::state::AppState;

type Subscriptions = StreamMap<Channel, BroadcastStream<ServerEvent>>;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Join(ChannelSelector),
    Leave(ChannelSelector),
    #[serde(alias = "locationUpdate")]
    LocationUpdate(LocationUpdateRequest),
}

#[derive(Debug, Default, Deserialize)]
pub struct ChannelSelector {
    #[serde(default, alias = "userId")]
    pub user_id: Option<Uuid>,
    #[serde(default, alias = "courierId")]
    pub courier_id: Option<Uuid>,
    #[serde(default, alias = "bookingId")]
    pub booking_id: Option<Uuid>,
}

impl ChannelSelector {
    fn channels(&self) -> Vec<Channel> {
        [
            self.user_id.map(Channel::User),
            self.courier_id.map(Channel::Courier),
            self.booking_id.map(Channel::Booking),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Joined { channels: Vec<String> },
    Left { channels: Vec<String> },
    LocationAck { timestamp: DateTime<Utc> },
    Error { message: String },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, actor))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, actor: Actor) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscriptions = Subscriptions::new();

    info!(actor_id = %actor.id, role = ?actor.role, "websocket client connected");

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };

                let reply = handle_frame(&state, &actor, &mut subscriptions, &text);
                if send_json(&mut sender, &reply).await.is_err() {
                    break;
                }
            }
            Some((channel, event)) = subscriptions.next(), if !subscriptions.is_empty() => {
                match event {
                    Ok(event) => {
                        if send_json(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(%channel, skipped, "websocket subscriber lagged");
                    }
                }
            }
        }
    }

    let joined: Vec<Channel> = subscriptions.keys().copied().collect();
    drop(subscriptions);
    for channel in &joined {
        state.bus.release(channel);
    }

    info!(actor_id = %actor.id, channels = joined.len(), "websocket client disconnected");
}

fn handle_frame(
    state: &AppState,
    actor: &Actor,
    subscriptions: &mut Subscriptions,
    text: &str,
) -> ServerFrame {
    let result = serde_json::from_str::<ClientFrame>(text)
        .map_err(|err| AppError::BadRequest(format!("invalid frame: {err}")))
        .and_then(|frame| apply_frame(state, actor, subscriptions, frame));

    result.unwrap_or_else(|err| {
        debug!(actor_id = %actor.id, error = %err, "websocket frame rejected");
        ServerFrame::Error {
            message: err.to_string(),
        }
    })
}

fn apply_frame(
    state: &AppState,
    actor: &Actor,
    subscriptions: &mut Subscriptions,
    frame: ClientFrame,
) -> Result<ServerFrame, AppError> {
    match frame {
        ClientFrame::Join(selector) => {
            let channels = selector.channels();
            if channels.is_empty() {
                return Err(AppError::BadRequest(
                    "join needs user_id, courier_id or booking_id".to_string(),
                ));
            }
            for channel in &channels {
                authorize_join(state, actor, channel)?;
            }

            for channel in &channels {
                let stream = BroadcastStream::new(state.bus.subscribe(*channel));
                subscriptions.insert(*channel, stream);
            }
            Ok(ServerFrame::Joined {
                channels: channels.iter().map(Channel::to_string).collect(),
            })
        }
        ClientFrame::Leave(selector) => {
            let mut left = Vec::new();
            for channel in selector.channels() {
                if subscriptions.remove(&channel).is_some() {
                    state.bus.release(&channel);
                    left.push(channel.to_string());
                }
            }
            Ok(ServerFrame::Left { channels: left })
        }
        ClientFrame::LocationUpdate(request) => {
            let fix = tracking::push_location(state, actor, request, Utc::now())?;
            Ok(ServerFrame::LocationAck {
                timestamp: fix.timestamp,
            })
        }
    }
}

fn authorize_join(state: &AppState, actor: &Actor, channel: &Channel) -> Result<(), AppError> {
    if actor.is_admin() {
        return Ok(());
    }

    match *channel {
        Channel::User(id) if actor.role == Role::User && id == actor.id => Ok(()),
        Channel::Courier(id) if actor.role == Role::Courier && id == actor.id => Ok(()),
        Channel::Booking(id) => {
            let booking = state
                .store
                .booking(id)
                .ok_or_else(|| AppError::NotFound(format!("booking {id} not found")))?;
            ensure_party(actor, &booking)
        }
        other => Err(AppError::Forbidden(format!("cannot join {other}"))),
    }
}

async fn send_json<T: Serialize>(
    sender: &mut SplitSink<WebSocket, Message>,
    payload: &T,
) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(payload) {
        Ok(json) => json,
        Err(err) => {
            warn!(error = %err, "failed to serialize websocket frame");
            return Ok(());
        }
    };

    sender.send(Message::Text(json)).await
}
