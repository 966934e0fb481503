use std::sync::Arc;

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
    chat::{model::TEXT_MESSAGE, Message, MessageLedger, RoomStore},
    config::Config,
    ApiResult, AppError, Echo,
};

use super::{decode, member_room, path, query};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct SendMessage {
    content: String,
    #[serde(default = "text_message")]
    message_type: i64,
}

fn text_message() -> i64 {
    TEXT_MESSAGE
}

#[derive(Debug, Deserialize)]
pub(crate) struct WindowQuery {
    /// Cursor: return messages strictly before this one.
    pub sid: Option<Uuid>,
    pub num: Option<usize>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn post_message(
    State(rooms): State<RoomStore>,
    State(ledger): State<MessageLedger>,
    CurrentUser(user): CurrentUser,
    rid: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let rid = path(rid)?;
    let SendMessage { content, message_type } = decode(payload)?;

    let sent = async {
        if message_type < TEXT_MESSAGE {
            return Err(AppError::Validation(format!("messageType {message_type} is reserved")));
        }
        if content.trim().is_empty() {
            return Err(AppError::Validation("message content is empty".to_owned()));
        }
        member_room(&rooms, rid, user.id).await?;

        let message = Message::new(user.id, message_type, content);
        ledger.append(rid, &message).await?;
        Ok::<_, AppError>(message)
    };
    let message = sent.await.echo(json!({ "rid": rid, "messageType": message_type }))?;
    Ok(Json(json!({ "id": rid, "message": message })))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn get_messages(
    State(ledger): State<MessageLedger>,
    State(config): State<Arc<Config>>,
    CurrentUser(user): CurrentUser,
    rid: Result<Path<Uuid>, PathRejection>,
    window: Result<Query<WindowQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let rid = path(rid)?;
    let WindowQuery { sid, num } = query(window)?;
    let messages = ledger
        .fetch_window(user.id, rid, sid, config.window(num))
        .await
        .echo(json!({ "rid": rid, "sid": sid, "num": num }))?;
    Ok(Json(json!({ "messages": messages })))
}
