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
    chat::{relay, FeedView},
    ApiResult, AppError,
};

/// The caller's own user document, re-sent whole on every change.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn user_feed(
    State(feed): State<ChangeFeed>,
    CurrentUser(user): CurrentUser,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ApiResult<Response> {
    let ws = ws.map_err(|rej| AppError::Connection(rej.body_text()))?;

    let sub = feed.subscribe(ChangeFilter::User(user.id));
    Ok(ws.on_upgrade(move |socket| relay::serve(socket, sub, FeedView::FullDocument)))
}
