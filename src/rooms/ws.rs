use std::collections::HashSet;

use axum::{
    debug_handler,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        State,
    },
    response::Response,
};

use crate::{
    auth::CurrentUser,
    changes::{ChangeFeed, ChangeFilter},
    chat::{relay, FeedView, RoomStore},
    ApiResult, AppError,
};

/// Lift an upgrade failure into the error envelope.
pub(crate) fn upgrade(ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>) -> ApiResult<WebSocketUpgrade> {
    ws.map_err(|rej| AppError::Connection(rej.body_text()).into())
}

/// Every change to a room the caller is in when the socket opens.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn rooms_feed(
    State(rooms): State<RoomStore>,
    State(feed): State<ChangeFeed>,
    CurrentUser(user): CurrentUser,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ApiResult<Response> {
    let ws = upgrade(ws)?;
    let ids: HashSet<_> = rooms.room_ids_for_member(user.id).await?.into_iter().collect();

    tracing::debug!(user = %user.id, rooms = ids.len(), "opening rooms feed");
    let sub = feed.subscribe(ChangeFilter::Rooms(ids));
    Ok(ws.on_upgrade(move |socket| relay::serve(socket, sub, FeedView::Event)))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn random_feed(
    State(feed): State<ChangeFeed>,
    CurrentUser(user): CurrentUser,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ApiResult<Response> {
    let ws = upgrade(ws)?;
    let Some(rid) = user.random_chat_room else {
        return Err(AppError::NotFound("no active random room".to_owned()).into());
    };

    let sub = feed.subscribe(ChangeFilter::Room(rid));
    Ok(ws.on_upgrade(move |socket| relay::serve(socket, sub, FeedView::Event)))
}
