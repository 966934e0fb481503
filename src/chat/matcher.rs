use serde::Serialize;
use uuid::Uuid;

use crate::{
    auth::{find_user, User, UserRow, USER_COLUMNS},
    changes::{ChangeEvent, Collection},
    db::{begin_write, Store},
    AppError, AppResult,
};

use super::{
    ledger::push_message,
    model::{Message, NewRoom, Room},
    store::{insert_room, remove_member, RoomStore},
};

/// What happened when a user walked out of their random room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveOutcome {
    pub room_id: Uuid,
    pub room_deleted: bool,
}

/// Pairs unmatched users into throwaway two-person rooms.
///
/// A user holds at most one random room at a time, tracked by the
/// `random_chat_room` column on their user row.
#[derive(Clone)]
pub struct MatchCoordinator {
    store: Store,
    rooms: RoomStore,
}

impl MatchCoordinator {
    pub fn new(store: Store) -> MatchCoordinator {
        let rooms = RoomStore::new(store.clone());
        MatchCoordinator { store, rooms }
    }

    pub async fn request_match(&self, user: Uuid) -> AppResult<Room> {
        let mut tx = begin_write(&self.store.pool).await?;

        let requester = find_user(&mut tx, user)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {user} not found")))?;
        if let Some(room) = requester.random_chat_room {
            return Err(AppError::Validation(format!("user {user} is already in random room {room}")));
        }

        let candidate: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM users WHERE random_chat_room IS NULL AND id<>? AND email_verified=1 \
             ORDER BY last_seen DESC LIMIT 1",
        )
        .bind(user.to_string())
        .fetch_optional(&mut *tx)
        .await?;
        let Some((candidate,)) = candidate else {
            return Err(AppError::NotFound("no one is available to match with".to_owned()));
        };
        let candidate = Uuid::parse_str(&candidate)?;

        let room_id = Uuid::now_v7();
        let new = NewRoom { members: vec![user, candidate], ..NewRoom::default() };
        let Some(room) = insert_room(&mut tx, room_id, &new).await? else {
            return Err(AppError::Consistency(format!("random room {room_id} already exists")));
        };

        let stamped = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET random_chat_room=? WHERE id IN (?,?) AND random_chat_room IS NULL \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(room_id.to_string())
        .bind(user.to_string())
        .bind(candidate.to_string())
        .fetch_all(&mut *tx)
        .await?;
        if stamped.len() != 2 {
            // tx drops here and takes the room insert with it
            return Err(AppError::Consistency(format!(
                "expected to stamp 2 users with room {room_id}, stamped {}",
                stamped.len()
            )));
        }

        let greeting = Message::system(user, "connected");
        let appended = push_message(&mut tx, room_id, &greeting).await?;

        tx.commit().await?;

        tracing::info!(room = %room_id, %user, %candidate, "matched users");
        let mut events = vec![ChangeEvent::insert(Collection::Rooms, room_id, serde_json::to_value(&room)?), appended];
        for row in stamped {
            events.push(User::try_from(row)?.changed(&["randomChatRoom"])?);
        }
        self.store.feed.publish_all(events);

        let mut room = room;
        room.messages.push(greeting);
        Ok(room)
    }

    pub async fn leave(&self, user: Uuid) -> AppResult<LeaveOutcome> {
        let mut tx = begin_write(&self.store.pool).await?;

        let room_id = find_user(&mut tx, user)
            .await?
            .and_then(|u| u.random_chat_room)
            .ok_or_else(|| AppError::NotFound(format!("user {user} has no random room")))?;

        // a stale back-reference still gets cleared, but posts no notice
        let remaining = remove_member(&mut tx, room_id, user).await?;

        let cleared = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET random_chat_room=NULL WHERE id=? RETURNING {USER_COLUMNS}"
        ))
        .bind(user.to_string())
        .fetch_one(&mut *tx)
        .await?;

        let mut events = vec![User::try_from(cleared)?.changed(&["randomChatRoom"])?];
        if let Some(members) = &remaining {
            events.push(ChangeEvent::update(
                Collection::Rooms,
                room_id,
                serde_json::Map::from_iter([("members".to_owned(), serde_json::to_value(members)?)]),
            ));
            events.push(push_message(&mut tx, room_id, &Message::system(user, "left")).await?);
        }

        tx.commit().await?;
        self.store.feed.publish_all(events);

        let room_deleted = match &remaining {
            Some(_) => self.rooms.delete_if_empty(room_id).await? > 0,
            None => false,
        };

        tracing::info!(room = %room_id, %user, was_member = remaining.is_some(), room_deleted, "left random room");
        Ok(LeaveOutcome { room_id, room_deleted })
    }
}

#[cfg(test)]
mod tests {
    use time::{Duration, OffsetDateTime};

    use super::*;
    use crate::{
        auth::{NewUser, UserDirectory},
        db,
    };

    async fn setup() -> (UserDirectory, MatchCoordinator) {
        let store = db::in_memory(64).await.unwrap();
        (UserDirectory::new(store.clone()), MatchCoordinator::new(store))
    }

    #[tokio::test]
    async fn unverified_users_are_never_matched() {
        let (users, matcher) = setup().await;
        let x = users.register(NewUser::new("x@uq.edu.au").verified()).await.unwrap();
        users.register(NewUser::new("y@uq.edu.au")).await.unwrap();

        let err = matcher.request_match(x.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn match_announces_itself_with_a_system_message() {
        let (users, matcher) = setup().await;
        let now = OffsetDateTime::now_utc();
        let x = users.register(NewUser::new("x@uq.edu.au").verified()).await.unwrap();
        let y = users
            .register(NewUser::new("y@uq.edu.au").verified().last_seen(now - Duration::minutes(1)))
            .await
            .unwrap();

        let room = matcher.request_match(x.id).await.unwrap();
        assert!(!room.is_group);
        assert_eq!(room.members, vec![x.id, y.id]);
        assert_eq!(room.messages.len(), 1);
        assert!(room.messages[0].is_system());
        assert_eq!(room.messages[0].author, x.id);

        let err = matcher.request_match(x.id).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn stale_room_reference_is_cleared_without_a_notice() {
        let store = db::in_memory(64).await.unwrap();
        let users = UserDirectory::new(store.clone());
        let rooms = RoomStore::new(store.clone());
        let matcher = MatchCoordinator::new(store.clone());

        let a = users.register(NewUser::new("a@uq.edu.au").verified()).await.unwrap();
        let b = users.register(NewUser::new("b@uq.edu.au").verified()).await.unwrap();
        let c = users.register(NewUser::new("c@uq.edu.au").verified()).await.unwrap();
        let room = rooms.create(NewRoom::direct(a.id, b.id)).await.unwrap();

        sqlx::query("UPDATE users SET random_chat_room=? WHERE id=?")
            .bind(room.id.to_string())
            .bind(c.id.to_string())
            .execute(&store.pool)
            .await
            .unwrap();

        let outcome = matcher.leave(c.id).await.unwrap();
        assert_eq!(outcome, LeaveOutcome { room_id: room.id, room_deleted: false });

        let room = rooms.fetch(room.id).await.unwrap();
        assert_eq!(room.members, vec![a.id, b.id]);
        assert!(room.messages.is_empty());
        assert_eq!(users.lookup_by_id(c.id).await.unwrap().random_chat_room, None);
    }

    #[tokio::test]
    async fn leaving_without_a_room_is_not_found() {
        let (users, matcher) = setup().await;
        let x = users.register(NewUser::new("x@uq.edu.au").verified()).await.unwrap();

        let err = matcher.leave(x.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
