pub mod appresult;
pub mod auth;
pub mod changes;
pub mod chat;
pub mod config;
pub mod db;
pub mod rooms;
pub mod users;

use std::sync::Arc;

use axum::{extract::FromRef, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use appresult::*;

use crate::{
    auth::UserDirectory,
    changes::ChangeFeed,
    chat::{MatchCoordinator, MessageLedger, RoomProjector, RoomStore},
    config::Config,
    db::Store,
};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub config: Arc<Config>,
    pub users: UserDirectory,
    pub rooms: RoomStore,
    pub ledger: MessageLedger,
    pub projector: RoomProjector,
    pub matcher: MatchCoordinator,
    pub feed: ChangeFeed,
}

impl AppState {
    pub fn new(store: Store, config: Config) -> AppState {
        AppState {
            users: UserDirectory::new(store.clone()),
            rooms: RoomStore::new(store.clone()),
            ledger: MessageLedger::new(store.clone()),
            projector: RoomProjector::new(store.clone(), config.preview_messages),
            matcher: MatchCoordinator::new(store.clone()),
            feed: store.feed().clone(),
            config: Arc::new(config),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/chat-room", rooms::router())
        .nest("/user", users::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
