use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{
    ChatMessage, LocationStore, MessageStore, NearbyUser, NewMessage, UserLocation,
    sort_by_distance,
};
use crate::common::{MapLocation, bounding_box};
use crate::error::ChatResult;

#[derive(Clone)]
pub struct PgLocationStore {
    pool: PgPool,
}

impl PgLocationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// 定义原始数据结构，用于从数据库查询
#[derive(FromRow)]
struct RawLocatedUser {
    user_id: String,
    nickname: String,
    latitude: f64,
    longitude: f64,
}

#[derive(FromRow)]
struct RawUserLocation {
    user_id: String,
    nickname: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    updated_at: Option<DateTime<Utc>>,
}

#[async_trait]
impl LocationStore for PgLocationStore {
    async fn near(&self, center: MapLocation, radius: f64) -> ChatResult<Vec<NearbyUser>> {
        // 先用包围盒在数据库里粗筛
        let (lat_range, lon_range) = bounding_box(&center, radius);

        let rows = sqlx::query_as::<_, RawLocatedUser>(
            r#"
            SELECT user_id, nickname, latitude, longitude
            FROM user_locations
            WHERE
                latitude IS NOT NULL
                AND longitude IS NOT NULL
                AND latitude BETWEEN ($1 - $3::float8) AND ($1 + $3::float8)
                AND ($4::float8 IS NULL OR longitude BETWEEN ($2 - $4::float8) AND ($2 + $4::float8))
            "#,
        )
        .bind(center.latitude)
        .bind(center.longitude)
        .bind(lat_range)
        .bind(lon_range)
        .fetch_all(&self.pool)
        .await?;

        // 计算距离并过滤
        let mut nearby: Vec<NearbyUser> = rows
            .into_iter()
            .filter_map(|row| {
                let location = MapLocation::new(row.latitude, row.longitude);
                let distance = center.distance_to(&location);
                (distance <= radius).then(|| NearbyUser {
                    user_id: row.user_id,
                    nickname: row.nickname,
                    location,
                    distance,
                })
            })
            .collect();

        sort_by_distance(&mut nearby);
        Ok(nearby)
    }

    async fn upsert_location(
        &self,
        user_id: &str,
        nickname: &str,
        location: MapLocation,
    ) -> ChatResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_locations
                (user_id, nickname, latitude, longitude, updated_at)
            VALUES
                ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id)
            DO UPDATE SET
                nickname = EXCLUDED.nickname,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(nickname)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_user(&self, user_id: &str) -> ChatResult<Option<UserLocation>> {
        let row = sqlx::query_as::<_, RawUserLocation>(
            r#"
            SELECT user_id, nickname, latitude, longitude, updated_at
            FROM user_locations
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| UserLocation {
            user_id: r.user_id,
            nickname: r.nickname,
            location: match (r.latitude, r.longitude) {
                (Some(lat), Some(lon)) => Some(MapLocation::new(lat, lon)),
                _ => None,
            },
            updated_at: r.updated_at,
        }))
    }
}

#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct RawMessage {
    message_id: String,
    user_id: String,
    nickname: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl From<RawMessage> for ChatMessage {
    fn from(m: RawMessage) -> Self {
        ChatMessage {
            message_id: m.message_id,
            user_id: m.user_id,
            nickname: m.nickname,
            content: m.content,
            created_at: m.created_at,
        }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn create(&self, message: NewMessage) -> ChatResult<ChatMessage> {
        let message_id = Uuid::new_v4().to_string();

        let row = sqlx::query_as::<_, RawMessage>(
            r#"
            INSERT INTO messages (message_id, user_id, nickname, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING message_id, user_id, nickname, content, created_at
            "#,
        )
        .bind(&message_id)
        .bind(&message.user_id)
        .bind(&message.nickname)
        .bind(&message.content)
        .bind(message.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn delete_all(&self) -> ChatResult<u64> {
        let result = sqlx::query("DELETE FROM messages")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn find_by_sender_in(&self, user_ids: &[String]) -> ChatResult<Vec<ChatMessage>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, RawMessage>(
            r#"
            SELECT message_id, user_id, nickname, content, created_at
            FROM messages
            WHERE user_id = ANY($1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_ids.to_vec())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ChatMessage::from).collect())
    }
}
