use std::ops::Range;

use serde_json::Map;
use sqlx::{types::Json, SqliteConnection};
use uuid::Uuid;

use crate::{
    changes::{ChangeEvent, Collection},
    db::Store,
    AppError, AppResult,
};

use super::{model::Message, store::room_not_found};

/// Where a window ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// The newest messages.
    Latest,
    /// Strictly before the message at this index.
    Before(usize),
    /// The cursor is not in this room; the window clamps to the start.
    Missing,
}

/// Index range of a `count`-sized window over a ledger of `len` messages.
///
/// Never reaches past either end of the ledger and never includes the cursor.
pub fn window_range(len: usize, anchor: Anchor, count: usize) -> Range<usize> {
    match anchor {
        Anchor::Latest => len.saturating_sub(count)..len,
        Anchor::Before(i) => {
            let end = i.min(len);
            end.saturating_sub(count)..end
        }
        Anchor::Missing => 0..count.min(len),
    }
}

/// The append-only message sequence embedded in each room.
#[derive(Clone)]
pub struct MessageLedger {
    store: Store,
}

impl MessageLedger {
    pub fn new(store: Store) -> MessageLedger {
        MessageLedger { store }
    }

    /// Push one message onto the end of the room's ledger.
    pub async fn append(&self, room: Uuid, message: &Message) -> AppResult<()> {
        let mut conn = self.store.pool.acquire().await?;
        let event = push_message(&mut conn, room, message).await?;
        self.store.feed.publish(event);
        Ok(())
    }

    /// Up to `count` messages ending just before `cursor`, or the newest
    /// `count` without one. `user` must be a member of the room.
    pub async fn fetch_window(
        &self,
        user: Uuid,
        room: Uuid,
        cursor: Option<Uuid>,
        count: usize,
    ) -> AppResult<Vec<Message>> {
        let mut tx = self.store.pool.begin().await?;

        let found: Option<(i64, bool)> = sqlx::query_as(
            "SELECT json_array_length(messages), EXISTS (SELECT 1 FROM json_each(rooms.members) WHERE value=?) \
             FROM rooms WHERE id=?",
        )
        .bind(user.to_string())
        .bind(room.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((len, is_member)) = found else {
            return Err(room_not_found(room));
        };
        if !is_member {
            return Err(AppError::Authorization(format!("user {user} is not a member of room {room}")));
        }
        let len = len as usize;

        let anchor = match cursor {
            None => Anchor::Latest,
            Some(cursor) => match cursor_index(&mut tx, room, cursor).await? {
                Some(i) => Anchor::Before(i),
                None => Anchor::Missing,
            },
        };

        let range = window_range(len, anchor, count);
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<(Json<Message>,)> = sqlx::query_as(
            "SELECT json_each.value FROM rooms, json_each(rooms.messages) \
             WHERE rooms.id=? AND json_each.key>=? AND json_each.key<? ORDER BY json_each.key",
        )
        .bind(room.to_string())
        .bind(range.start as i64)
        .bind(range.end as i64)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(%room, %user, ?anchor, ?range, returned = rows.len(), "fetched message window");
        Ok(rows.into_iter().map(|(Json(m),)| m).collect())
    }
}

async fn cursor_index(conn: &mut SqliteConnection, room: Uuid, cursor: Uuid) -> AppResult<Option<usize>> {
    let key: Option<(i64,)> = sqlx::query_as(
        "SELECT json_each.key FROM rooms, json_each(rooms.messages) \
         WHERE rooms.id=? AND json_extract(json_each.value,'$._id')=? LIMIT 1",
    )
    .bind(room.to_string())
    .bind(cursor.to_string())
    .fetch_optional(conn)
    .await?;

    Ok(key.map(|(k,)| k as usize))
}

/// Append inside an existing connection or transaction. The caller publishes
/// the returned event once its writes are durable.
pub(crate) async fn push_message(conn: &mut SqliteConnection, room: Uuid, message: &Message) -> AppResult<ChangeEvent> {
    let index: Option<(i64,)> = sqlx::query_as(
        "UPDATE rooms SET messages=json_insert(messages,'$[#]',json(?)) WHERE id=? \
         RETURNING json_array_length(messages)-1",
    )
    .bind(Json(message))
    .bind(room.to_string())
    .fetch_optional(conn)
    .await?;

    let Some((index,)) = index else {
        return Err(room_not_found(room));
    };

    tracing::debug!(%room, message = %message.id, author = %message.author, index, "appended message");
    let updated = Map::from_iter([(format!("messages.{index}"), serde_json::to_value(message)?)]);
    Ok(ChangeEvent::update(Collection::Rooms, room, updated))
}
