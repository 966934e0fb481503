use axum::{debug_handler, extract::State, Json};
use serde_json::{json, Value};

use crate::{auth::CurrentUser, chat::RoomStore, ApiResult};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn me(
    State(rooms): State<RoomStore>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Value>> {
    let chat_rooms = rooms.room_ids_for_member(user.id).await?;
    Ok(Json(json!({ "user": user, "chatRooms": chat_rooms })))
}
