mod common;

use std::{net::SocketAddr, time::Duration};

use chatterbox::{app, AppState};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;

async fn serve(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state);
    tokio::spawn(async move { axum::serve(listener, router).await });
    addr
}

async fn wait_for_subscriptions(state: &AppState, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.feed.active_subscriptions() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected {expected} live subscriptions"));
}

#[tokio::test]
async fn user_feed_pushes_the_whole_document_and_releases_on_close() {
    let state = common::state().await;
    let amy = common::user(&state, "amy@uq.edu.au", 0).await;
    common::user(&state, "ben@uq.edu.au", 1).await;
    let token = state.users.issue_credential(amy.id).await.unwrap();
    let addr = serve(state.clone()).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/user/subscribe?token={token}")).await.unwrap();
    wait_for_subscriptions(&state, 1).await;

    let room = state.matcher.request_match(amy.id).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let doc: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(doc["_id"], json!(amy.id));
    assert_eq!(doc["randomChatRoom"], json!(room.id));

    ws.close(None).await.unwrap();
    wait_for_subscriptions(&state, 0).await;
}

#[tokio::test]
async fn upgrade_without_a_credential_is_refused() {
    let state = common::state().await;
    let addr = serve(state.clone()).await;

    assert!(connect_async(format!("ws://{addr}/user/subscribe")).await.is_err());
    assert_eq!(state.feed.active_subscriptions(), 0);
}
