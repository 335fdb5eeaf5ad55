use std::time::Duration;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::IntoResponse,
};
use axum_extra::extract::cookie::CookieJar;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::AppState;
use crate::chat::{ClientEvent, ConnectionId, RouteOutcome, ServerEvent};
use crate::common::MapLocation;
use crate::error::ChatError;
use crate::identity::Identity;
use crate::middleware::connection_context;

/// 每个连接的发送缓冲区大小
pub const OUTBOUND_BUFFER: usize = 64;

/// 断开时等待发送任务写完剩余事件的时间
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// 浏览器无法为 WebSocket 设置请求头，允许通过查询参数传 token
    pub token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ChatError> {
    let mut ctx = connection_context(&headers, &jar);
    if ctx.bearer_token.is_none() {
        ctx.bearer_token = query.token;
    }
    let identity = state.identity.resolve(&ctx).await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, identity)))
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: Option<Identity>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);
    let connection_id = Uuid::new_v4();

    let identity = match state
        .presence
        .register(connection_id, identity.as_ref(), tx.clone())
    {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!("Rejected websocket connection: {}", e);
            let rejected = ServerEvent::Rejected {
                reason: e.to_string(),
            };
            if let Ok(json) = serde_json::to_string(&rejected) {
                let _ = sink.send(Message::Text(json.into())).await;
            }
            let _ = sink.close().await;
            return;
        }
    };
    tracing::info!(
        "User {} connected as {} ({} live connections)",
        identity.user_id,
        connection_id,
        state.presence.len()
    );

    // 发送任务：把事件序列化后写入 socket
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
        let _ = sink.close().await;
    });

    send_join_snapshot(&state, &identity, &tx).await;

    // 同一连接上的事件按到达顺序逐个处理
    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                handle_text(&state, connection_id, &identity, text.as_str(), &tx).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // 注销后发送端全部释放，发送任务写完队列中的事件后退出
    state.presence.unregister(connection_id);
    drop(tx);
    if tokio::time::timeout(DRAIN_TIMEOUT, &mut send_task).await.is_err() {
        tracing::warn!("Writer for {} did not drain in time", connection_id);
        send_task.abort();
    }
    tracing::info!("User {} disconnected ({})", identity.user_id, connection_id);
}

async fn send_join_snapshot(
    state: &AppState,
    identity: &Identity,
    tx: &mpsc::Sender<ServerEvent>,
) {
    let _ = tx
        .send(ServerEvent::ChatState(state.retention.chat_state()))
        .await;

    match state.router.history(&identity.user_id).await {
        Ok(messages) => {
            let _ = tx.send(ServerEvent::PastMessages { messages }).await;
        }
        Err(e) => reject(tx, e).await,
    }
}

async fn handle_text(
    state: &AppState,
    connection_id: ConnectionId,
    identity: &Identity,
    text: &str,
    tx: &mpsc::Sender<ServerEvent>,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            reject(tx, ChatError::invalid(format!("malformed event: {}", e))).await;
            return;
        }
    };

    match event {
        ClientEvent::UpdateLocation {
            latitude,
            longitude,
        } => {
            let coords = MapLocation::new(latitude, longitude);
            match state
                .router
                .update_location(Some(connection_id), identity, coords)
                .await
            {
                Ok(users) => {
                    let _ = tx.send(ServerEvent::NearbyUpdate { users }).await;
                }
                Err(e) => reject(tx, e).await,
            }
        }
        ClientEvent::Message { text } => {
            match state
                .router
                .route(&identity.user_id, &identity.nickname, &text)
                .await
            {
                Ok(RouteOutcome::Delivered { recipients, .. }) => {
                    tracing::debug!("{} -> {} connections", identity.user_id, recipients);
                }
                Ok(outcome) => {
                    tracing::debug!(
                        "Message from {} not delivered: {:?}",
                        identity.user_id,
                        outcome
                    );
                }
                Err(e) => reject(tx, e).await,
            }
        }
    }
}

async fn reject(tx: &mpsc::Sender<ServerEvent>, error: ChatError) {
    match &error {
        ChatError::StoreUnavailable(_) => {
            tracing::error!("Websocket request failed: {}", error);
        }
        _ => tracing::warn!("Websocket request rejected: {}", error),
    }
    let _ = tx
        .send(ServerEvent::Rejected {
            reason: error.to_string(),
        })
        .await;
}
