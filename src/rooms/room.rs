use axum::{
    debug_handler,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::CurrentUser,
    chat::{RoomPatch, RoomProjector, RoomStore},
    ApiResult, AppError, AppResult, Echo,
};

use super::{decode, member_room, path, query};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn patch_room(
    State(rooms): State<RoomStore>,
    CurrentUser(user): CurrentUser,
    rid: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let rid = path(rid)?;
    let patch: RoomPatch = decode(payload)?;

    let updated = async {
        member_room(&rooms, rid, user.id).await?;
        rooms.update_fields(rid, patch).await
    };
    let room = updated.await.echo(json!({ "rid": rid }))?;
    Ok(Json(json!({ "chatRoom": room })))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn delete_room(
    State(rooms): State<RoomStore>,
    CurrentUser(user): CurrentUser,
    rid: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let rid = path(rid)?;
    let deleted = async {
        member_room(&rooms, rid, user.id).await?;
        rooms.delete(rid).await
    };
    let deleted = deleted.await.echo(json!({ "rid": rid }))?;
    Ok(Json(json!({ "rid": rid, "deleted": deleted })))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListQuery {
    #[serde(default)]
    skip: usize,
    limit: Option<usize>,
    /// Comma-separated room ids.
    ids: Option<String>,
}

fn parse_ids(raw: &str) -> AppResult<Vec<Uuid>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Uuid::parse_str(s).map_err(|_| AppError::Validation(format!("{s:?} is not a room id"))))
        .collect()
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn list_rooms(
    State(projector): State<RoomProjector>,
    CurrentUser(user): CurrentUser,
    list: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let list = query(list)?;
    let echo = json!({ "skip": list.skip, "limit": list.limit, "ids": list.ids });

    let listed = async {
        let ids = list.ids.as_deref().map(parse_ids).transpose()?;
        projector.list_for_user(user.id, ids.as_deref(), list.skip, list.limit).await
    };
    let rooms = listed.await.echo(echo)?;
    Ok(Json(json!({ "chatRooms": rooms })))
}
