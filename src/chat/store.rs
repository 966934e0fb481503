use sqlx::{types::Json, SqliteConnection};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{User, UserRow, USER_COLUMNS},
    changes::{ChangeEvent, Collection},
    db::{begin_write, to_millis, Store},
    AppError, AppResult,
};

use super::model::{NewRoom, Room, RoomPatch, RoomRow, ROOM_COLUMNS};

/// Persistence for room documents.
#[derive(Clone)]
pub struct RoomStore {
    store: Store,
}

impl RoomStore {
    pub fn new(store: Store) -> RoomStore {
        RoomStore { store }
    }

    /// Create a room. Creating a direct room that already exists hands back
    /// the existing one.
    pub async fn create(&self, new: NewRoom) -> AppResult<Room> {
        let id = new.room_id()?;
        let mut conn = self.store.pool.acquire().await?;

        let room = match insert_room(&mut conn, id, &new).await? {
            Some(room) => {
                tracing::info!(room = %room.id, members = room.members.len(), group = room.is_group, "created room");
                self.store.feed.publish(ChangeEvent::insert(Collection::Rooms, room.id, serde_json::to_value(&room)?));
                room
            }
            None => {
                tracing::debug!(room = %id, "direct room already exists");
                fetch_room(&mut conn, id).await?.ok_or_else(|| room_not_found(id))?
            }
        };
        Ok(room)
    }

    pub async fn update_fields(&self, id: Uuid, patch: RoomPatch) -> AppResult<Room> {
        if patch.is_empty() {
            return Err(AppError::Validation("nothing to update".to_owned()));
        }

        let row = sqlx::query_as::<_, RoomRow>(&format!(
            "UPDATE rooms SET group_name=CASE WHEN ? THEN ? ELSE group_name END, \
                              group_photo_url=CASE WHEN ? THEN ? ELSE group_photo_url END \
             WHERE id=? RETURNING {ROOM_COLUMNS}"
        ))
        .bind(patch.group_name.is_some())
        .bind(patch.group_name.clone().flatten())
        .bind(patch.group_photo_url.is_some())
        .bind(patch.group_photo_url.clone().flatten())
        .bind(id.to_string())
        .fetch_optional(&self.store.pool)
        .await?;
        let room = Room::try_from(row.ok_or_else(|| room_not_found(id))?)?;

        let (updated, removed) = patch.fields();
        tracing::info!(room = %id, set = ?updated.keys().collect::<Vec<_>>(), cleared = ?removed, "updated room");
        self.store
            .feed
            .publish(ChangeEvent::update(Collection::Rooms, id, updated).with_removed_fields(removed));
        Ok(room)
    }

    /// Delete a room outright, clearing any random-match back-references to it.
    pub async fn delete(&self, id: Uuid) -> AppResult<bool> {
        let mut tx = begin_write(&self.store.pool).await?;

        let deleted = sqlx::query("DELETE FROM rooms WHERE id=?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected()
            == 1;
        let released = clear_random_room_refs(&mut tx, id).await?;

        tx.commit().await?;

        if deleted {
            tracing::info!(room = %id, released = released.len(), "deleted room");
            self.store.feed.publish(ChangeEvent::delete(Collection::Rooms, id));
        }
        self.store.feed.publish_all(released);
        Ok(deleted)
    }

    /// Delete the room only once nobody is left in it. Returns how many rooms
    /// were deleted (0 or 1).
    pub async fn delete_if_empty(&self, id: Uuid) -> AppResult<u64> {
        let deleted = sqlx::query("DELETE FROM rooms WHERE id=? AND json_array_length(members)=0")
            .bind(id.to_string())
            .execute(&self.store.pool)
            .await?
            .rows_affected();

        if deleted > 0 {
            tracing::info!(room = %id, "deleted empty room");
            self.store.feed.publish(ChangeEvent::delete(Collection::Rooms, id));
        }
        Ok(deleted)
    }

    pub async fn fetch(&self, id: Uuid) -> AppResult<Room> {
        let mut conn = self.store.pool.acquire().await?;
        fetch_room(&mut conn, id).await?.ok_or_else(|| room_not_found(id))
    }

    /// Ids of every room `user` is currently a member of.
    pub async fn room_ids_for_member(&self, user: Uuid) -> AppResult<Vec<Uuid>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM rooms WHERE EXISTS (SELECT 1 FROM json_each(rooms.members) WHERE value=?) ORDER BY created_at",
        )
        .bind(user.to_string())
        .fetch_all(&self.store.pool)
        .await?;

        ids.into_iter()
            .map(|(id,)| Ok(Uuid::parse_str(&id)?))
            .collect()
    }
}

pub(crate) fn room_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("room {id} not found"))
}

pub(crate) async fn fetch_room(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Option<Room>> {
    sqlx::query_as::<_, RoomRow>(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id=?"))
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?
        .map(Room::try_from)
        .transpose()
}

/// Insert a room with an empty message ledger. `None` if the id is taken.
pub(crate) async fn insert_room(conn: &mut SqliteConnection, id: Uuid, new: &NewRoom) -> AppResult<Option<Room>> {
    sqlx::query_as::<_, RoomRow>(&format!(
        "INSERT INTO rooms (id,members,messages,created_at,is_group,group_name,group_photo_url) \
         VALUES (?,?,'[]',?,?,?,?) ON CONFLICT(id) DO NOTHING RETURNING {ROOM_COLUMNS}"
    ))
    .bind(id.to_string())
    .bind(Json(&new.members))
    .bind(to_millis(OffsetDateTime::now_utc()))
    .bind(new.is_group)
    .bind(new.group_name.as_deref())
    .bind(new.group_photo_url.as_deref())
    .fetch_optional(conn)
    .await?
    .map(Room::try_from)
    .transpose()
}

/// Drop `user` from the room's member list. Returns the remaining members,
/// or `None` when nothing was removed: the room is gone or `user` was not in it.
pub(crate) async fn remove_member(conn: &mut SqliteConnection, room: Uuid, user: Uuid) -> AppResult<Option<Vec<Uuid>>> {
    let members: Option<(Json<Vec<Uuid>>,)> = sqlx::query_as(
        "UPDATE rooms SET members=(SELECT json_group_array(value) FROM json_each(rooms.members) WHERE value<>?) \
         WHERE id=? AND EXISTS (SELECT 1 FROM json_each(rooms.members) WHERE value=?) RETURNING members",
    )
    .bind(user.to_string())
    .bind(room.to_string())
    .bind(user.to_string())
    .fetch_optional(conn)
    .await?;

    Ok(members.map(|(Json(members),)| members))
}

async fn clear_random_room_refs(conn: &mut SqliteConnection, room: Uuid) -> AppResult<Vec<ChangeEvent>> {
    let rows = sqlx::query_as::<_, UserRow>(&format!(
        "UPDATE users SET random_chat_room=NULL WHERE random_chat_room=? RETURNING {USER_COLUMNS}"
    ))
    .bind(room.to_string())
    .fetch_all(conn)
    .await?;

    rows.into_iter()
        .map(|row| User::try_from(row)?.changed(&["randomChatRoom"]))
        .collect()
}
