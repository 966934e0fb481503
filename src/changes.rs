//! In-process change stream over room and user documents.
//!
//! Every mutating store operation publishes one event per touched document
//! after it commits. Subscribers receive the raw JSON payload and decide for
//! themselves how to decode it (see [`crate::chat::relay`]).

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Rooms,
    Users,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Serialize)]
pub struct Namespace {
    pub coll: Collection,
}

#[derive(Debug, Serialize)]
pub struct DocumentKey {
    #[serde(rename = "_id")]
    pub id: Uuid,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDescription {
    pub updated_fields: Map<String, Value>,
    pub removed_fields: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub operation_type: OperationType,
    pub ns: Namespace,
    pub document_key: DocumentKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_document: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_description: Option<UpdateDescription>,
    #[serde(with = "time::serde::rfc3339")]
    pub cluster_time: OffsetDateTime,
}

impl ChangeEvent {
    fn new(coll: Collection, operation_type: OperationType, key: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            operation_type,
            ns: Namespace { coll },
            document_key: DocumentKey { id: key },
            full_document: None,
            update_description: None,
            cluster_time: OffsetDateTime::now_utc(),
        }
    }

    pub fn insert(coll: Collection, key: Uuid, document: Value) -> Self {
        Self { full_document: Some(document), ..Self::new(coll, OperationType::Insert, key) }
    }

    pub fn update(coll: Collection, key: Uuid, updated_fields: Map<String, Value>) -> Self {
        Self {
            update_description: Some(UpdateDescription { updated_fields, removed_fields: Vec::new() }),
            ..Self::new(coll, OperationType::Update, key)
        }
    }

    pub fn delete(coll: Collection, key: Uuid) -> Self {
        Self::new(coll, OperationType::Delete, key)
    }

    /// Record fields the update unset. No-op on non-update events.
    pub fn with_removed_fields(mut self, removed: Vec<String>) -> Self {
        if let Some(desc) = self.update_description.as_mut() {
            desc.removed_fields = removed;
        }
        self
    }

    /// Attach the post-image of the document, as a full-document lookup would.
    pub fn with_full_document(mut self, document: Value) -> Self {
        self.full_document = Some(document);
        self
    }
}

/// An encoded change, routed by collection and document key without decoding.
#[derive(Debug, Clone)]
pub struct RawChange {
    pub collection: Collection,
    pub document_key: Uuid,
    pub payload: Arc<[u8]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeFilter {
    Rooms(HashSet<Uuid>),
    Room(Uuid),
    User(Uuid),
}

impl ChangeFilter {
    pub fn matches(&self, change: &RawChange) -> bool {
        use ChangeFilter::*;
        match self {
            Rooms(ids) => change.collection == Collection::Rooms && ids.contains(&change.document_key),
            Room(id) => change.collection == Collection::Rooms && change.document_key == *id,
            User(id) => change.collection == Collection::Users && change.document_key == *id,
        }
    }
}

#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<RawChange>,
    active: Arc<AtomicUsize>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> ChangeFeed {
        ChangeFeed {
            tx: broadcast::channel(capacity).0,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn publish(&self, event: ChangeEvent) {
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(%err, key = %event.document_key.id, "dropping unencodable change event");
                return;
            }
        };
        self.publish_raw(RawChange {
            collection: event.ns.coll,
            document_key: event.document_key.id,
            payload: payload.into(),
        });
    }

    pub(crate) fn publish_raw(&self, change: RawChange) {
        // no receivers is not an error, nobody is watching
        let _ = self.tx.send(change);
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = ChangeEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        let live = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(?filter, live, "change feed subscription opened");
        Subscription {
            rx: self.tx.subscribe(),
            filter,
            active: self.active.clone(),
        }
    }

    /// Subscriptions currently held open.
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// A filtered view of the feed. Dropping it releases the subscription.
pub struct Subscription {
    rx: broadcast::Receiver<RawChange>,
    filter: ChangeFilter,
    active: Arc<AtomicUsize>,
}

impl Subscription {
    /// Next matching change, or `None` once the feed is gone.
    pub async fn next(&mut self) -> Option<RawChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if self.filter.matches(&change) => return Some(change),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, filter = ?self.filter, "change feed subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let live = self.active.fetch_sub(1, Ordering::AcqRel) - 1;
        tracing::debug!(filter = ?self.filter, live, "change feed subscription released");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw(collection: Collection, key: Uuid) -> RawChange {
        RawChange { collection, document_key: key, payload: Arc::from(&b"{}"[..]) }
    }

    #[test]
    fn filters_route_by_collection_and_key() {
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let rooms = ChangeFilter::Rooms(HashSet::from([a]));

        assert!(rooms.matches(&raw(Collection::Rooms, a)));
        assert!(!rooms.matches(&raw(Collection::Rooms, b)));
        assert!(!rooms.matches(&raw(Collection::Users, a)));

        assert!(ChangeFilter::Room(b).matches(&raw(Collection::Rooms, b)));
        assert!(ChangeFilter::User(a).matches(&raw(Collection::Users, a)));
        assert!(!ChangeFilter::User(a).matches(&raw(Collection::Rooms, a)));
    }

    #[tokio::test]
    async fn subscription_skips_unrelated_changes() {
        let feed = ChangeFeed::new(16);
        let (mine, other) = (Uuid::now_v7(), Uuid::now_v7());
        let mut sub = feed.subscribe(ChangeFilter::Room(mine));

        feed.publish(ChangeEvent::delete(Collection::Rooms, other));
        feed.publish(ChangeEvent::insert(Collection::Rooms, mine, json!({ "_id": mine })));

        let change = sub.next().await.unwrap();
        assert_eq!(change.document_key, mine);

        let event: Value = serde_json::from_slice(&change.payload).unwrap();
        assert_eq!(event["operationType"], "insert");
        assert_eq!(event["ns"]["coll"], "rooms");
        assert_eq!(event["fullDocument"]["_id"], json!(mine));
    }

    #[tokio::test]
    async fn dropping_the_feed_ends_subscriptions() {
        let feed = ChangeFeed::new(4);
        let mut sub = feed.subscribe(ChangeFilter::User(Uuid::now_v7()));
        drop(feed);
        assert!(sub.next().await.is_none());
    }

    #[test]
    fn gauge_tracks_live_subscriptions() {
        let feed = ChangeFeed::new(4);
        let a = feed.subscribe(ChangeFilter::Room(Uuid::now_v7()));
        let b = feed.subscribe(ChangeFilter::Room(Uuid::now_v7()));
        assert_eq!(feed.active_subscriptions(), 2);
        drop(a);
        assert_eq!(feed.active_subscriptions(), 1);
        drop(b);
        assert_eq!(feed.active_subscriptions(), 0);
    }
}
