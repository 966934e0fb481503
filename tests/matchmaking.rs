mod common;

use chatterbox::AppError;

#[tokio::test]
async fn picks_the_most_recently_seen_unmatched_user() {
    let state = common::state().await;

    // z is taken before anyone else shows up
    let w = common::user(&state, "w@uq.edu.au", 0).await;
    let z = common::user(&state, "z@uq.edu.au", 0).await;
    let wz = state.matcher.request_match(w.id).await.unwrap();
    assert_eq!(wz.members, vec![w.id, z.id]);

    let x = common::user(&state, "x@uq.edu.au", 30).await;
    let y = common::user(&state, "y@uq.edu.au", 1).await;
    common::user(&state, "old@uq.edu.au", 60).await;
    common::unverified(&state, "fresh@uq.edu.au").await;

    let room = state.matcher.request_match(x.id).await.unwrap();
    assert_eq!(room.members, vec![x.id, y.id]);
    assert!(!room.is_group);

    let x = state.users.lookup_by_id(x.id).await.unwrap();
    let y = state.users.lookup_by_id(y.id).await.unwrap();
    let z = state.users.lookup_by_id(z.id).await.unwrap();
    assert_eq!(x.random_chat_room, Some(room.id));
    assert_eq!(y.random_chat_room, Some(room.id));
    assert_eq!(z.random_chat_room, Some(wz.id));

    let stored = state.rooms.fetch(room.id).await.unwrap();
    assert_eq!(stored.messages.len(), 1);
    assert!(stored.messages[0].is_system());
}

#[tokio::test]
async fn nobody_to_match_with() {
    let state = common::state().await;
    let x = common::user(&state, "x@uq.edu.au", 0).await;

    let err = state.matcher.request_match(x.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let x = state.users.lookup_by_id(x.id).await.unwrap();
    assert_eq!(x.random_chat_room, None);
    assert!(state.rooms.room_ids_for_member(x.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn room_goes_away_after_both_leave() {
    let state = common::state().await;
    let x = common::user(&state, "x@uq.edu.au", 0).await;
    let y = common::user(&state, "y@uq.edu.au", 0).await;
    let room = state.matcher.request_match(x.id).await.unwrap();

    let first = state.matcher.leave(x.id).await.unwrap();
    assert_eq!(first.room_id, room.id);
    assert!(!first.room_deleted);

    let stored = state.rooms.fetch(room.id).await.unwrap();
    assert_eq!(stored.members, vec![y.id]);
    let farewell = stored.messages.last().unwrap();
    assert!(farewell.is_system());
    assert_eq!(farewell.author, x.id);
    assert_eq!(state.users.lookup_by_id(x.id).await.unwrap().random_chat_room, None);

    let err = state.matcher.leave(x.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let second = state.matcher.leave(y.id).await.unwrap();
    assert!(second.room_deleted);
    assert!(matches!(state.rooms.fetch(room.id).await.unwrap_err(), AppError::NotFound(_)));
    assert_eq!(state.users.lookup_by_id(y.id).await.unwrap().random_chat_room, None);
}

#[tokio::test]
async fn leaving_frees_both_users_to_match_again() {
    let state = common::state().await;
    let x = common::user(&state, "x@uq.edu.au", 0).await;
    let y = common::user(&state, "y@uq.edu.au", 0).await;

    let first = state.matcher.request_match(x.id).await.unwrap();
    state.matcher.leave(x.id).await.unwrap();

    // y still holds the old room, so x has nobody
    let err = state.matcher.request_match(x.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    state.matcher.leave(y.id).await.unwrap();
    let second = state.matcher.request_match(y.id).await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(second.members, vec![y.id, x.id]);
}

#[tokio::test]
async fn deleting_a_random_room_releases_its_members() {
    let state = common::state().await;
    let x = common::user(&state, "x@uq.edu.au", 0).await;
    let y = common::user(&state, "y@uq.edu.au", 0).await;
    let room = state.matcher.request_match(x.id).await.unwrap();

    assert!(state.rooms.delete(room.id).await.unwrap());
    for id in [x.id, y.id] {
        assert_eq!(state.users.lookup_by_id(id).await.unwrap().random_chat_room, None);
    }
}
