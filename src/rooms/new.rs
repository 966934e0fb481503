use axum::{
    debug_handler,
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde_json::{json, Value};

use crate::{
    auth::CurrentUser,
    chat::{NewRoom, RoomStore},
    ApiResult, AppError, Echo,
};

use super::decode;

#[debug_handler(state = crate::AppState)]
pub(crate) async fn create_room(
    State(rooms): State<RoomStore>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let new: NewRoom = decode(payload)?;

    let members = new.members.clone();
    let created = async {
        if !new.members.contains(&user.id) {
            return Err(AppError::Authorization("the creator must be a member of the room".to_owned()));
        }
        rooms.create(new).await
    };
    let room = created.await.echo(json!({ "members": members }))?;
    Ok(Json(json!({ "chatRoom": room })))
}
