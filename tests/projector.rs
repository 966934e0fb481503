mod common;

use std::time::Duration;

use chatterbox::chat::{Message, NewRoom};
use uuid::Uuid;

#[tokio::test]
async fn rooms_are_listed_by_latest_activity() {
    let state = common::state().await;
    let a = common::user(&state, "a@uq.edu.au", 0).await;
    let b = common::user(&state, "b@uq.edu.au", 0).await;
    let c = common::user(&state, "c@uq.edu.au", 0).await;

    let ab = state.rooms.create(NewRoom::direct(a.id, b.id)).await.unwrap();
    let ac = state.rooms.create(NewRoom::direct(a.id, c.id)).await.unwrap();
    let group = state.rooms.create(NewRoom::group("all", vec![a.id, b.id, c.id])).await.unwrap();
    let bc = state.rooms.create(NewRoom::direct(b.id, c.id)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    state.ledger.append(ab.id, &Message::new(b.id, 1, "hey")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    state.ledger.append(group.id, &Message::new(c.id, 1, "hi all")).await.unwrap();

    let listed = state.projector.list_for_user(a.id, None, 0, None).await.unwrap();
    let ids: Vec<Uuid> = listed.iter().map(|r| r.id).collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(&ids[..2], &[group.id, ab.id]);
    assert_eq!(ids[2], ac.id);
    assert!(!ids.contains(&bc.id));

    let page = state.projector.list_for_user(a.id, None, 1, Some(1)).await.unwrap();
    assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ab.id]);

    let only = state.projector.list_for_user(a.id, Some(&[ac.id, bc.id][..]), 0, None).await.unwrap();
    assert_eq!(only.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ac.id]);
}

#[tokio::test]
async fn members_are_joined_with_profiles_in_member_order() {
    let state = common::state().await;
    let a = common::user(&state, "a@uq.edu.au", 0).await;
    let b = common::user(&state, "b@other.edu", 0).await;
    let ghost = Uuid::now_v7();

    let room = state.rooms.create(NewRoom::group("g", vec![b.id, ghost, a.id])).await.unwrap();

    let listed = state.projector.list_for_user(a.id, None, 0, None).await.unwrap();
    assert_eq!(listed.len(), 1);
    let detail = &listed[0];
    assert_eq!(detail.id, room.id);
    assert_eq!(detail.group_name.as_deref(), Some("g"));

    let members: Vec<(Uuid, &str)> = detail.members.iter().map(|m| (m.id, m.domain.as_str())).collect();
    assert_eq!(members, vec![(b.id, "other.edu"), (a.id, "uq.edu.au")]);

    let json = serde_json::to_value(&detail.members[0]).unwrap();
    for key in ["_id", "gender", "domain", "major", "photoURL", "role", "email"] {
        assert!(json.get(key).is_some(), "missing {key}");
    }
}

#[tokio::test]
async fn previews_keep_only_the_newest_messages() {
    let state = common::state().await;
    let a = common::user(&state, "a@uq.edu.au", 0).await;
    let b = common::user(&state, "b@uq.edu.au", 0).await;
    let room = state.rooms.create(NewRoom::direct(a.id, b.id)).await.unwrap();

    for i in 1..=25 {
        state.ledger.append(room.id, &Message::new(a.id, 1, format!("m{i}"))).await.unwrap();
    }

    let listed = state.projector.list_for_user(b.id, None, 0, None).await.unwrap();
    let contents: Vec<&str> = listed[0].messages.iter().map(|m| m.content.as_str()).collect();
    let expected: Vec<String> = (6..=25).map(|i| format!("m{i}")).collect();
    assert_eq!(contents, expected);
}

#[tokio::test]
async fn random_room_projection() {
    let state = common::state().await;
    let x = common::user(&state, "x@uq.edu.au", 0).await;
    let y = common::user(&state, "y@uq.edu.au", 0).await;
    state.rooms.create(NewRoom::direct(x.id, y.id)).await.unwrap();

    assert!(state.projector.single_random_room_for_user(x.id).await.unwrap().is_none());

    let room = state.matcher.request_match(x.id).await.unwrap();
    let detail = state.projector.single_random_room_for_user(y.id).await.unwrap().unwrap();
    assert_eq!(detail.id, room.id);
    assert_eq!(detail.members.len(), 2);
    assert_eq!(detail.messages.len(), 1);
}
