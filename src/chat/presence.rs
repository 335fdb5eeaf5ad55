//! 在线连接表
//!
//! 连接ID -> 连接信息，另维护用户ID -> 连接ID集合的索引。
//! 两张表都是分片锁的 DashMap，任何操作都不会跨 `.await` 持有锁。

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use super::protocol::ServerEvent;
use crate::common::MapLocation;
use crate::error::{ChatError, ChatResult};
use crate::identity::Identity;

pub type ConnectionId = Uuid;

#[derive(Debug)]
pub struct Connection {
    pub user_id: String,
    pub nickname: String,
    /// 最后一次上报的坐标及时间，可能落后于位置存储
    pub coords: Option<(MapLocation, DateTime<Utc>)>,
    sender: mpsc::Sender<ServerEvent>,
}

#[derive(Default)]
pub struct PresenceRegistry {
    connections: DashMap<ConnectionId, Connection>,
    by_user: DashMap<String, HashSet<ConnectionId>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记连接；同一连接ID重复登记时覆盖旧记录
    pub fn register(
        &self,
        connection_id: ConnectionId,
        identity: Option<&Identity>,
        sender: mpsc::Sender<ServerEvent>,
    ) -> ChatResult<Identity> {
        let identity = identity.ok_or(ChatError::Unauthorized)?;

        let previous = self.connections.insert(
            connection_id,
            Connection {
                user_id: identity.user_id.clone(),
                nickname: identity.nickname.clone(),
                coords: None,
                sender,
            },
        );
        if let Some(previous) = previous {
            if previous.user_id != identity.user_id {
                self.detach(&previous.user_id, connection_id);
            }
        }

        self.by_user
            .entry(identity.user_id.clone())
            .or_default()
            .insert(connection_id);

        tracing::debug!(
            "Connection {} registered for user {}",
            connection_id,
            identity.user_id
        );
        Ok(identity.clone())
    }

    /// 未知连接直接忽略，返回是否更新成功
    pub fn update_coords(&self, connection_id: ConnectionId, coords: MapLocation) -> bool {
        match self.connections.get_mut(&connection_id) {
            Some(mut connection) => {
                connection.coords = Some((coords, Utc::now()));
                true
            }
            None => false,
        }
    }

    pub fn unregister(&self, connection_id: ConnectionId) {
        if let Some((_, connection)) = self.connections.remove(&connection_id) {
            self.detach(&connection.user_id, connection_id);
            tracing::debug!(
                "Connection {} of user {} unregistered",
                connection_id,
                connection.user_id
            );
        }
    }

    pub fn connections_for_user(&self, user_id: &str) -> HashSet<ConnectionId> {
        self.by_user
            .get(user_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    /// 该用户所有连接中最新的缓存坐标
    pub fn coords_for_user(&self, user_id: &str) -> Option<MapLocation> {
        self.connections_for_user(user_id)
            .into_iter()
            .filter_map(|id| self.connections.get(&id).and_then(|c| c.coords))
            .max_by_key(|(_, updated_at)| *updated_at)
            .map(|(coords, _)| coords)
    }

    /// 非阻塞投递；连接不存在、已关闭或缓冲区满时返回 false
    pub fn send(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        let Some(sender) = self
            .connections
            .get(&connection_id)
            .map(|c| c.sender.clone())
        else {
            return false;
        };

        match sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Outbound buffer full, dropping event for {}", connection_id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Connection {} already closed", connection_id);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn detach(&self, user_id: &str, connection_id: ConnectionId) {
        if let Some(mut ids) = self.by_user.get_mut(user_id) {
            ids.remove(&connection_id);
        }
        self.by_user.remove_if(user_id, |_, ids| ids.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(user_id: &str) -> Identity {
        Identity {
            user_id: user_id.to_string(),
            nickname: user_id.to_uppercase(),
        }
    }

    fn channel() -> (mpsc::Sender<ServerEvent>, mpsc::Receiver<ServerEvent>) {
        mpsc::channel(8)
    }

    #[test]
    fn register_without_identity_is_unauthorized() {
        let registry = PresenceRegistry::new();
        let (tx, _rx) = channel();
        let result = registry.register(Uuid::new_v4(), None, tx);
        assert!(matches!(result, Err(ChatError::Unauthorized)));
        assert!(registry.is_empty());
    }

    #[test]
    fn tracks_multiple_connections_per_user() {
        let registry = PresenceRegistry::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        registry.register(a, Some(&identity("alice")), channel().0).unwrap();
        registry.register(b, Some(&identity("alice")), channel().0).unwrap();

        let ids = registry.connections_for_user("alice");
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a) && ids.contains(&b));

        registry.unregister(a);
        assert_eq!(registry.connections_for_user("alice"), HashSet::from([b]));
        registry.unregister(a);
        registry.unregister(b);
        assert!(registry.connections_for_user("alice").is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn re_register_moves_connection_to_new_user() {
        let registry = PresenceRegistry::new();
        let id = Uuid::new_v4();
        registry.register(id, Some(&identity("alice")), channel().0).unwrap();
        registry.register(id, Some(&identity("bob")), channel().0).unwrap();

        assert!(registry.connections_for_user("alice").is_empty());
        assert_eq!(registry.connections_for_user("bob"), HashSet::from([id]));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn update_coords_on_unknown_connection_is_noop() {
        let registry = PresenceRegistry::new();
        assert!(!registry.update_coords(Uuid::new_v4(), MapLocation::new(1.0, 1.0)));
        assert!(registry.is_empty());
    }

    #[test]
    fn coords_are_per_connection() {
        let registry = PresenceRegistry::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        registry.register(a, Some(&identity("alice")), channel().0).unwrap();
        registry.register(b, Some(&identity("alice")), channel().0).unwrap();

        assert!(registry.update_coords(a, MapLocation::new(10.0, 20.0)));
        assert!(registry.connections.get(&b).unwrap().coords.is_none());
        assert_eq!(
            registry.coords_for_user("alice"),
            Some(MapLocation::new(10.0, 20.0))
        );
    }

    #[tokio::test]
    async fn send_to_missing_or_closed_connection_returns_false() {
        let registry = PresenceRegistry::new();
        let event = ServerEvent::Rejected {
            reason: "test".into(),
        };
        assert!(!registry.send(Uuid::new_v4(), event.clone()));

        let id = Uuid::new_v4();
        let (tx, rx) = channel();
        registry.register(id, Some(&identity("carol")), tx).unwrap();
        drop(rx);
        assert!(!registry.send(id, event.clone()));

        let live = Uuid::new_v4();
        let (tx, mut rx) = channel();
        registry.register(live, Some(&identity("carol")), tx).unwrap();
        assert!(registry.send(live, event.clone()));
        assert_eq!(rx.recv().await, Some(event));
    }
}
