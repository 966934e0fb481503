//! Pushes change-feed events down a WebSocket until either end goes away.

use std::fmt::Display;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{future, Sink, SinkExt, StreamExt};
use serde_json::{Map, Value};

use crate::changes::{RawChange, Subscription};

/// What a client receives for each change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedView {
    /// The whole change event.
    Event,
    /// Only the post-change document.
    FullDocument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    StreamClosed,
    SinkClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("undecodable change event: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("change event carries no full document")]
    MissingFullDocument,
}

fn render(change: &RawChange, view: FeedView) -> Result<String, RelayError> {
    let mut event: Map<String, Value> = serde_json::from_slice(&change.payload)?;
    let out = match view {
        FeedView::Event => Value::Object(event),
        FeedView::FullDocument => event.remove("fullDocument").ok_or(RelayError::MissingFullDocument)?,
    };
    Ok(out.to_string())
}

/// Forward matching changes into `sink` until the feed ends or the sink
/// refuses a frame. Frames that fail to render are skipped.
pub async fn pump<S>(mut sub: Subscription, mut sink: S, view: FeedView) -> PumpExit
where
    S: Sink<String> + Unpin,
    S::Error: Display,
{
    while let Some(change) = sub.next().await {
        let frame = match render(&change, view) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(%err, key = %change.document_key, "skipping change event");
                continue;
            }
        };

        if let Err(err) = sink.send(frame).await {
            tracing::debug!(%err, filter = ?sub.filter(), "feed client went away");
            return PumpExit::SinkClosed;
        }
    }
    PumpExit::StreamClosed
}

/// Drive one upgraded socket. Returns once the client disconnects or the
/// feed closes; the subscription is released either way.
pub async fn serve(socket: WebSocket, sub: Subscription, view: FeedView) {
    let (sender, mut receiver) = socket.split();
    let sender = sender.with(|text: String| future::ready(Ok::<_, axum::Error>(WsMessage::Text(text.into()))));

    let mut pump_task = tokio::spawn(pump(sub, Box::pin(sender), view));
    let mut read_task = tokio::spawn(async move {
        // push-only: anything the client sends is ignored
        while let Some(Ok(msg)) = receiver.next().await {
            if let WsMessage::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        exit = &mut pump_task => {
            read_task.abort();
            tracing::debug!(?exit, "feed pump finished");
        }
        _ = &mut read_task => {
            pump_task.abort();
            tracing::debug!("feed client disconnected");
        }
    }
}
