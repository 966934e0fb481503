use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{db::from_millis, AppError, AppResult};

/// `messageType` of server-generated notices (joins, leaves).
pub const SYSTEM_MESSAGE: i64 = 0;
pub const TEXT_MESSAGE: i64 = 1;

/// Namespace for direct-room ids; a direct room's id is a v5 UUID over its
/// two member ids in ascending order.
const DIRECT_ROOM_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_3a52_9d4e_4b8a_a0f7_2e5d_c9b1_0834);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub author: Uuid,
    pub message_type: i64,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub like_by: Vec<Uuid>,
    pub read_by: Vec<Uuid>,
}

impl Message {
    pub fn new(author: Uuid, message_type: i64, content: impl Into<String>) -> Message {
        Message {
            id: Uuid::now_v7(),
            author,
            message_type,
            content: content.into(),
            created_at: OffsetDateTime::now_utc(),
            like_by: Vec::new(),
            read_by: Vec::new(),
        }
    }

    pub fn system(author: Uuid, content: impl Into<String>) -> Message {
        Message::new(author, SYSTEM_MESSAGE, content)
    }

    pub fn is_system(&self) -> bool {
        self.message_type == SYSTEM_MESSAGE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub members: Vec<Uuid>,
    pub messages: Vec<Message>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub is_group: bool,
    pub group_name: Option<String>,
    pub group_photo_url: Option<String>,
}

impl Room {
    pub fn has_member(&self, user: Uuid) -> bool {
        self.members.contains(&user)
    }

    /// Time of the newest message, or creation time for an empty room.
    pub fn last_activity(&self) -> OffsetDateTime {
        self.messages.last().map_or(self.created_at, |m| m.created_at)
    }
}

/// A room creation request, before an id or timestamp is assigned.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewRoom {
    pub members: Vec<Uuid>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub group_photo_url: Option<String>,
}

impl NewRoom {
    pub fn direct(a: Uuid, b: Uuid) -> NewRoom {
        NewRoom { members: vec![a, b], ..NewRoom::default() }
    }

    pub fn group(name: impl Into<String>, members: Vec<Uuid>) -> NewRoom {
        NewRoom {
            members,
            is_group: true,
            group_name: Some(name.into()),
            group_photo_url: None,
        }
    }

    /// Check the member invariants and pick the room id.
    ///
    /// Direct rooms get the canonical pair id; group rooms a fresh one.
    pub fn room_id(&self) -> AppResult<Uuid> {
        let distinct: HashSet<_> = self.members.iter().collect();
        if distinct.len() != self.members.len() {
            return Err(AppError::Validation("room members must be distinct".to_owned()));
        }

        if self.is_group {
            if self.members.is_empty() {
                return Err(AppError::Validation("a group room needs at least one member".to_owned()));
            }
            return Ok(Uuid::now_v7());
        }

        match self.members.as_slice() {
            [a, b] => Ok(direct_room_id(*a, *b)),
            members => Err(AppError::Validation(format!(
                "a direct room needs exactly 2 members, got {}",
                members.len()
            ))),
        }
    }
}

pub fn direct_room_id(a: Uuid, b: Uuid) -> Uuid {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut name = [0u8; 32];
    name[..16].copy_from_slice(lo.as_bytes());
    name[16..].copy_from_slice(hi.as_bytes());
    Uuid::new_v5(&DIRECT_ROOM_NAMESPACE, &name)
}

/// Mutable room fields. Anything else in a patch body is rejected.
///
/// An absent field is left alone; an explicit `null` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RoomPatch {
    #[serde(default, deserialize_with = "present")]
    pub group_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub group_photo_url: Option<Option<String>>,
}

/// Marks a field as present, so `null` decodes to `Some(None)`.
fn present<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(de).map(Some)
}

impl RoomPatch {
    pub fn is_empty(&self) -> bool {
        self.group_name.is_none() && self.group_photo_url.is_none()
    }

    /// Split into `(set, cleared)` document fields, as a change event reports them.
    pub fn fields(&self) -> (Map<String, Value>, Vec<String>) {
        let mut set = Map::new();
        let mut cleared = Vec::new();
        for (field, value) in [("groupName", &self.group_name), ("groupPhotoUrl", &self.group_photo_url)] {
            match value {
                Some(Some(v)) => {
                    set.insert(field.to_owned(), Value::from(v.as_str()));
                }
                Some(None) => cleared.push(field.to_owned()),
                None => {}
            }
        }
        (set, cleared)
    }
}

pub(crate) const ROOM_COLUMNS: &str = "id,members,messages,created_at,is_group,group_name,group_photo_url";

#[derive(sqlx::FromRow)]
pub(crate) struct RoomRow {
    id: String,
    members: Json<Vec<Uuid>>,
    messages: Json<Vec<Message>>,
    created_at: i64,
    is_group: bool,
    group_name: Option<String>,
    group_photo_url: Option<String>,
}

impl TryFrom<RoomRow> for Room {
    type Error = AppError;

    fn try_from(row: RoomRow) -> AppResult<Room> {
        Ok(Room {
            id: Uuid::parse_str(&row.id)?,
            members: row.members.0,
            messages: row.messages.0,
            created_at: from_millis(row.created_at)?,
            is_group: row.is_group,
            group_name: row.group_name,
            group_photo_url: row.group_photo_url,
        })
    }
}
