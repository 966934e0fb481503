use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use serde_json::{json, Value};

use crate::{
    auth::CurrentUser,
    chat::{MatchCoordinator, MessageLedger, RoomProjector},
    config::Config,
    ApiResult, AppError, Echo,
};

use super::{msg::WindowQuery, query};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn connect(
    State(matcher): State<MatchCoordinator>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Value>> {
    let room = matcher.request_match(user.id).await.echo(json!({ "user": user.id }))?;
    Ok(Json(json!({ "chatRoom": room })))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn random_room(
    State(projector): State<RoomProjector>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Value>> {
    let room = projector.single_random_room_for_user(user.id).await?;
    Ok(Json(json!({ "chatRoom": room })))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn random_messages(
    State(ledger): State<MessageLedger>,
    State(config): State<Arc<Config>>,
    CurrentUser(user): CurrentUser,
    window: Result<Query<WindowQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let WindowQuery { sid, num } = query(window)?;
    let fetched = async {
        let rid = user
            .random_chat_room
            .ok_or_else(|| AppError::NotFound("no active random room".to_owned()))?;
        ledger.fetch_window(user.id, rid, sid, config.window(num)).await
    };
    let messages = fetched.await.echo(json!({ "sid": sid, "num": num }))?;
    Ok(Json(json!({ "messages": messages })))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn leave(
    State(matcher): State<MatchCoordinator>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Value>> {
    let outcome = matcher.leave(user.id).await.echo(json!({ "user": user.id }))?;
    Ok(Json(json!({ "rid": outcome.room_id, "deleted": outcome.room_deleted })))
}
