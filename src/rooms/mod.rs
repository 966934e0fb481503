mod msg;
mod new;
mod random;
mod room;
mod ws;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query,
    },
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    chat::{Room, RoomStore},
    ApiError, ApiResult, AppError, AppResult, AppState, Echo,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(new::create_room))
        .route("/rooms", get(room::list_rooms))
        .route("/subscribe", get(ws::rooms_feed))
        .route("/{rid}", patch(room::patch_room).delete(room::delete_room))
        .route("/message/{rid}", post(msg::post_message).get(msg::get_messages))
        .route("/random", delete(random::leave))
        .route("/random/connect", post(random::connect))
        .route("/random/room", get(random::random_room))
        .route("/random/message", get(random::random_messages))
        .route("/random/subscribe", get(ws::random_feed))
}

/// Decode a JSON body, reporting anything malformed as a validation error
/// that echoes the body back.
pub(crate) fn decode<T: DeserializeOwned>(payload: Result<Json<Value>, JsonRejection>) -> ApiResult<T> {
    let Json(body) = payload.map_err(|rej| ApiError::from(AppError::Validation(rej.body_text())))?;
    serde_json::from_value(body.clone())
        .map_err(|err| AppError::Validation(err.to_string()))
        .echo(body)
}

/// Unwrap a path parameter, reporting a malformed one as a validation error.
pub(crate) fn path<T>(path: Result<Path<T>, PathRejection>) -> ApiResult<T> {
    path.map(|Path(value)| value)
        .map_err(|rej| AppError::Validation(rej.body_text()).into())
}

/// Unwrap query parameters, reporting malformed ones as a validation error.
pub(crate) fn query<T>(query: Result<Query<T>, QueryRejection>) -> ApiResult<T> {
    query
        .map(|Query(value)| value)
        .map_err(|rej| AppError::Validation(rej.body_text()).into())
}

/// Fetch a room on behalf of `user`, who must be in it.
pub(crate) async fn member_room(rooms: &RoomStore, rid: Uuid, user: Uuid) -> AppResult<Room> {
    let room = rooms.fetch(rid).await?;
    if !room.has_member(user) {
        return Err(AppError::Authorization(format!("user {user} is not a member of room {rid}")));
    }
    Ok(room)
}
