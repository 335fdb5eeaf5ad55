//! 消息扇出
//!
//! 发送者所在位置半径内的每个用户、每个在线连接各收到一份。
//! 发送者自己也在半径内（距离为0），所以回显走的是同一条路径。

use std::sync::Arc;

use chrono::Utc;

use super::presence::{ConnectionId, PresenceRegistry};
use super::protocol::{NearbyPeer, ServerEvent};
use super::proximity::ProximityResolver;
use crate::common::MapLocation;
use crate::error::{ChatError, ChatResult};
use crate::identity::Identity;
use crate::store::{ChatMessage, MessageStore, NewMessage};

/// 单条消息最大字符数
pub const MAX_MESSAGE_CHARS: usize = 1000;

#[derive(Debug)]
pub enum RouteOutcome {
    Delivered {
        message: ChatMessage,
        recipients: usize,
    },
    /// 半径内没有任何用户，不保存也不投递
    Suppressed,
    /// 发送者没有可用的位置
    NoLocation,
}

pub struct FanoutRouter {
    presence: Arc<PresenceRegistry>,
    proximity: ProximityResolver,
    messages: Arc<dyn MessageStore>,
}

impl FanoutRouter {
    pub fn new(
        presence: Arc<PresenceRegistry>,
        proximity: ProximityResolver,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            presence,
            proximity,
            messages,
        }
    }

    pub async fn route(
        &self,
        sender_id: &str,
        nickname: &str,
        text: &str,
    ) -> ChatResult<RouteOutcome> {
        if text.trim().is_empty() {
            return Err(ChatError::invalid("message text is empty"));
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ChatError::invalid(format!(
                "message longer than {} characters",
                MAX_MESSAGE_CHARS
            )));
        }

        let Some(origin) = self.resolve_location(sender_id).await? else {
            tracing::debug!("User {} has no location, message dropped", sender_id);
            return Ok(RouteOutcome::NoLocation);
        };

        let neighbours = self
            .proximity
            .find_nearby(origin, self.proximity.chat_radius())
            .await?;
        if neighbours.is_empty() {
            tracing::debug!("Nobody near {}, message not stored", sender_id);
            return Ok(RouteOutcome::Suppressed);
        }

        let message = self
            .messages
            .create(NewMessage {
                user_id: sender_id.to_string(),
                nickname: nickname.to_string(),
                content: text.to_string(),
                created_at: Utc::now(),
            })
            .await
            .inspect_err(|e| tracing::error!("Failed to store message: {}", e))?;

        let event = ServerEvent::Message {
            nickname: message.nickname.clone(),
            content: message.content.clone(),
            timestamp: message.created_at,
        };

        let mut recipients = 0;
        for user in &neighbours {
            for connection_id in self.presence.connections_for_user(&user.user_id) {
                if self.presence.send(connection_id, event.clone()) {
                    recipients += 1;
                }
            }
        }

        tracing::debug!(
            "Message {} from {} delivered to {} connections ({} users in range)",
            message.message_id,
            sender_id,
            recipients,
            neighbours.len()
        );

        Ok(RouteOutcome::Delivered { message, recipients })
    }

    /// 先持久化位置，再刷新连接缓存，最后查询附近用户
    pub async fn update_location(
        &self,
        connection_id: Option<ConnectionId>,
        identity: &Identity,
        coords: MapLocation,
    ) -> ChatResult<Vec<NearbyPeer>> {
        let coords = coords.validate()?;

        self.proximity
            .persist_location(&identity.user_id, &identity.nickname, coords)
            .await?;

        if let Some(connection_id) = connection_id {
            self.presence.update_coords(connection_id, coords);
        }

        let nearby = self
            .proximity
            .find_nearby(coords, self.proximity.chat_radius())
            .await?;

        Ok(nearby.iter().map(NearbyPeer::from).collect())
    }

    /// 历史消息：历史半径内用户发过的消息，按时间升序。不受开放时段限制
    pub async fn history(&self, user_id: &str) -> ChatResult<Vec<ChatMessage>> {
        let Some(origin) = self.resolve_location(user_id).await? else {
            return Ok(Vec::new());
        };

        let nearby = self
            .proximity
            .find_nearby(origin, self.proximity.history_radius())
            .await?;
        let user_ids: Vec<String> = nearby.into_iter().map(|u| u.user_id).collect();

        self.messages.find_by_sender_in(&user_ids).await
    }

    // 优先使用在线缓存，没有时回退到位置存储
    async fn resolve_location(&self, user_id: &str) -> ChatResult<Option<MapLocation>> {
        if let Some(coords) = self.presence.coords_for_user(user_id) {
            return Ok(Some(coords));
        }
        self.proximity.stored_location(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LocationStore, MemoryLocationStore, MemoryMessageStore};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct Fixture {
        presence: Arc<PresenceRegistry>,
        locations: Arc<MemoryLocationStore>,
        messages: Arc<MemoryMessageStore>,
        router: FanoutRouter,
    }

    fn fixture() -> Fixture {
        let presence = Arc::new(PresenceRegistry::new());
        let locations = Arc::new(MemoryLocationStore::new());
        let messages = Arc::new(MemoryMessageStore::new());
        let router = FanoutRouter::new(
            presence.clone(),
            ProximityResolver::new(locations.clone(), 3000.0, 500.0),
            messages.clone(),
        );
        Fixture {
            presence,
            locations,
            messages,
            router,
        }
    }

    fn who(user_id: &str) -> Identity {
        Identity {
            user_id: user_id.to_string(),
            nickname: format!("{}-nick", user_id),
        }
    }

    fn connect(f: &Fixture, user_id: &str) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let id = Uuid::new_v4();
        f.presence.register(id, Some(&who(user_id)), tx).unwrap();
        (id, rx)
    }

    #[tokio::test]
    async fn empty_text_is_rejected_without_side_effects() {
        let f = fixture();
        let result = f.router.route("alice", "Alice", "   ").await;
        assert!(matches!(result, Err(ChatError::InvalidInput(_))));
        assert!(f.messages.is_empty().await);
    }

    #[tokio::test]
    async fn sender_without_location_is_a_noop() {
        let f = fixture();
        f.locations.insert_user("alice", "Alice");
        let outcome = f.router.route("alice", "Alice", "hello").await.unwrap();
        assert!(matches!(outcome, RouteOutcome::NoLocation));
        assert!(f.messages.is_empty().await);
    }

    #[tokio::test]
    async fn sender_echo_comes_through_fanout() {
        let f = fixture();
        let (conn, mut rx) = connect(&f, "alice");
        f.router
            .update_location(Some(conn), &who("alice"), MapLocation::new(51.5, -0.12))
            .await
            .unwrap();

        let outcome = f.router.route("alice", "alice-nick", "hi").await.unwrap();
        assert!(matches!(outcome, RouteOutcome::Delivered { recipients: 1, .. }));
        match rx.recv().await.unwrap() {
            ServerEvent::Message { nickname, content, .. } => {
                assert_eq!(nickname, "alice-nick");
                assert_eq!(content, "hi");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn far_users_do_not_receive() {
        let f = fixture();
        let (a, mut alice_rx) = connect(&f, "alice");
        let (b, mut bob_rx) = connect(&f, "bob");
        f.router
            .update_location(Some(a), &who("alice"), MapLocation::new(48.85, 2.35))
            .await
            .unwrap();
        f.router
            .update_location(Some(b), &who("bob"), MapLocation::new(48.95, 2.35))
            .await
            .unwrap();

        f.router.route("alice", "Alice", "bonjour").await.unwrap();
        assert!(matches!(alice_rx.try_recv(), Ok(ServerEvent::Message { .. })));
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn location_update_returns_nearby_peers_including_self() {
        let f = fixture();
        let (a, _rx) = connect(&f, "alice");
        f.locations
            .upsert_location("bob", "Bob", MapLocation::new(35.0001, 139.0))
            .await
            .unwrap();

        let peers = f
            .router
            .update_location(Some(a), &who("alice"), MapLocation::new(35.0, 139.0))
            .await
            .unwrap();
        let ids: Vec<_> = peers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob"]);
        assert_eq!(f.presence.coords_for_user("alice"), Some(MapLocation::new(35.0, 139.0)));
    }

    #[tokio::test]
    async fn invalid_coordinates_are_not_persisted() {
        let f = fixture();
        let result = f
            .router
            .update_location(None, &who("alice"), MapLocation::new(120.0, 0.0))
            .await;
        assert!(matches!(result, Err(ChatError::InvalidInput(_))));
        assert!(f.locations.find_user("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_uses_the_smaller_radius() {
        let f = fixture();
        // bob 约1.1km外：在聊天半径内，但不在历史半径内
        f.router
            .update_location(None, &who("alice"), MapLocation::new(10.0, 10.0))
            .await
            .unwrap();
        f.router
            .update_location(None, &who("bob"), MapLocation::new(10.01, 10.0))
            .await
            .unwrap();

        f.router.route("bob", "Bob", "from bob").await.unwrap();
        f.router.route("alice", "Alice", "from alice").await.unwrap();

        let history = f.router.history("alice").await.unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["from alice"]);

        assert!(f.router.history("nobody").await.unwrap().is_empty());
    }
}
