use std::collections::HashMap;

use serde::Serialize;
use sqlx::{types::Json, SqliteConnection};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{auth::find_user, db::Store, AppError, AppResult};

use super::model::{Message, Room, RoomRow};

/// The slice of a user's profile shown next to a room.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberProfile {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub gender: i64,
    pub domain: String,
    pub major: String,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
    pub role: i64,
    pub email: String,
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: String,
    gender: i64,
    domain: String,
    major: String,
    photo_url: String,
    role: i64,
    email: String,
}

impl TryFrom<ProfileRow> for MemberProfile {
    type Error = AppError;

    fn try_from(row: ProfileRow) -> AppResult<MemberProfile> {
        Ok(MemberProfile {
            id: Uuid::parse_str(&row.id)?,
            gender: row.gender,
            domain: row.domain,
            major: row.major,
            photo_url: row.photo_url,
            role: row.role,
            email: row.email,
        })
    }
}

/// A room joined with its members' profiles and its most recent messages.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDetail {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub members: Vec<MemberProfile>,
    pub messages: Vec<Message>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub is_group: bool,
    pub group_name: Option<String>,
    pub group_photo_url: Option<String>,
}

#[derive(Clone)]
pub struct RoomProjector {
    store: Store,
    preview_messages: usize,
}

impl RoomProjector {
    pub fn new(store: Store, preview_messages: usize) -> RoomProjector {
        RoomProjector { store, preview_messages }
    }

    /// Previews of the rooms `user` belongs to, newest activity first.
    ///
    /// `only` narrows the result to the given room ids.
    pub async fn list_for_user(
        &self,
        user: Uuid,
        only: Option<&[Uuid]>,
        skip: usize,
        limit: Option<usize>,
    ) -> AppResult<Vec<RoomDetail>> {
        let only = only
            .map(|ids| serde_json::to_string(&ids))
            .transpose()?;

        let mut conn = self.store.pool.acquire().await?;
        let rows = sqlx::query_as::<_, RoomRow>(
            "SELECT id, members, \
                    (SELECT json_group_array(json(value)) FROM json_each(rooms.messages) \
                      WHERE key >= json_array_length(rooms.messages) - ?) AS messages, \
                    created_at, is_group, group_name, group_photo_url \
             FROM rooms \
             WHERE EXISTS (SELECT 1 FROM json_each(rooms.members) WHERE value=?) \
               AND (? IS NULL OR id IN (SELECT value FROM json_each(?)))",
        )
        .bind(self.preview_messages as i64)
        .bind(user.to_string())
        .bind(only.as_deref())
        .bind(only.as_deref())
        .fetch_all(&mut *conn)
        .await?;

        let mut rooms = rows.into_iter().map(Room::try_from).collect::<AppResult<Vec<_>>>()?;
        rooms.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));

        let rooms: Vec<Room> = rooms
            .into_iter()
            .skip(skip)
            .take(limit.unwrap_or(usize::MAX))
            .collect();

        let details = self.join_profiles(&mut conn, rooms).await?;
        tracing::debug!(%user, rooms = details.len(), skip, ?limit, "listed rooms");
        Ok(details)
    }

    /// Preview of the user's current random-match room, if they have one.
    pub async fn single_random_room_for_user(&self, user: Uuid) -> AppResult<Option<RoomDetail>> {
        let mut conn = self.store.pool.acquire().await?;
        let Some(room) = find_user(&mut conn, user).await?.and_then(|u| u.random_chat_room) else {
            return Ok(None);
        };
        drop(conn);

        let mut details = self.list_for_user(user, Some(std::slice::from_ref(&room)), 0, Some(1)).await?;
        Ok(details.pop())
    }

    async fn join_profiles(&self, conn: &mut SqliteConnection, rooms: Vec<Room>) -> AppResult<Vec<RoomDetail>> {
        let mut wanted: Vec<Uuid> = rooms.iter().flat_map(|r| r.members.iter().copied()).collect();
        wanted.sort_unstable();
        wanted.dedup();

        let rows: Vec<ProfileRow> = sqlx::query_as(
            "SELECT id,gender,domain,major,photo_url,role,email FROM users WHERE id IN (SELECT value FROM json_each(?))",
        )
        .bind(Json(&wanted))
        .fetch_all(conn)
        .await?;
        let profiles = rows
            .into_iter()
            .map(|row| MemberProfile::try_from(row).map(|p| (p.id, p)))
            .collect::<AppResult<HashMap<_, _>>>()?;

        Ok(rooms
            .into_iter()
            .map(|room| RoomDetail {
                id: room.id,
                members: room.members.iter().filter_map(|m| profiles.get(m).cloned()).collect(),
                messages: room.messages,
                created_at: room.created_at,
                is_group: room.is_group,
                group_name: room.group_name,
                group_photo_url: room.group_photo_url,
            })
            .collect())
    }
}
