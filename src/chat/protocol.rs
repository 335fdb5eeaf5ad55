//! WebSocket 消息格式，JSON 文本帧，用 `event` 字段区分类型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::retention::ChatState;
use crate::store::{ChatMessage, NearbyUser};

/// 客户端发往服务端
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientEvent {
    UpdateLocation { latitude: f64, longitude: f64 },
    Message { text: String },
}

/// 服务端发往客户端
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerEvent {
    NearbyUpdate {
        users: Vec<NearbyPeer>,
    },
    Message {
        nickname: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    PastMessages {
        messages: Vec<ChatMessage>,
    },
    ChatState(ChatState),
    Rejected {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NearbyPeer {
    pub id: String,
    pub nickname: String,
}

impl From<&NearbyUser> for NearbyPeer {
    fn from(user: &NearbyUser) -> Self {
        NearbyPeer {
            id: user.user_id.clone(),
            nickname: user.nickname.clone(),
        }
    }
}
