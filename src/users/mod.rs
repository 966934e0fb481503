mod me;
mod ws;

use axum::{routing::get, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me", get(me::me))
        .route("/subscribe", get(ws::user_feed))
}
