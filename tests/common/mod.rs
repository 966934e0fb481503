#![allow(dead_code)]

use chatterbox::{
    auth::{NewUser, User},
    config::Config,
    db, AppState,
};
use time::{Duration, OffsetDateTime};

pub async fn state() -> AppState {
    let store = db::in_memory(256).await.unwrap();
    AppState::new(store, Config::default())
}

/// A verified user, last seen `minutes_ago`.
pub async fn user(state: &AppState, email: &str, minutes_ago: i64) -> User {
    let seen = OffsetDateTime::now_utc() - Duration::minutes(minutes_ago);
    state
        .users
        .register(NewUser::new(email).verified().last_seen(seen))
        .await
        .unwrap()
}

pub async fn unverified(state: &AppState, email: &str) -> User {
    state.users.register(NewUser::new(email)).await.unwrap()
}
