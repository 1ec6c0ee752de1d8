//! Conversation resolution under concurrency

mod common;

use common::TestHarness;
use realtime_chat_core::error::AppError;
use realtime_chat_core::models::UserId;
use std::collections::HashSet;

#[tokio::test]
async fn test_concurrent_private_resolution_yields_one_conversation() {
    let harness = TestHarness::new();
    let (alice, bob) = (UserId::random(), UserId::random());

    let mut tasks = Vec::new();
    for i in 0..32 {
        let conversations = harness.state.conversations.clone();
        let (a, b) = if i % 2 == 0 { (alice, bob) } else { (bob, alice) };
        tasks.push(tokio::spawn(
            async move { conversations.resolve_private(a, b).await },
        ));
    }

    let mut ids = HashSet::new();
    for task in tasks {
        let conversation = task.await.unwrap().unwrap();
        assert!(!conversation.is_group);
        assert_eq!(conversation.members.len(), 2);
        ids.insert(conversation.id);
    }
    assert_eq!(ids.len(), 1);
    assert_eq!(
        harness.state.conversations.list_for_member(alice).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_concurrent_group_resolution_ignores_member_order() {
    let harness = TestHarness::new();
    let members = [UserId::random(), UserId::random(), UserId::random()];

    let mut tasks = Vec::new();
    for i in 0..12 {
        let conversations = harness.state.conversations.clone();
        let mut order = members.to_vec();
        order.rotate_left(i % 3);
        if i % 2 == 1 {
            // duplicates collapse
            order.push(order[0]);
        }
        tasks.push(tokio::spawn(async move {
            conversations.resolve_group(order, Some("crew".into())).await
        }));
    }

    let mut ids = HashSet::new();
    for task in tasks {
        ids.insert(task.await.unwrap().unwrap().id);
    }
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn test_group_of_two_never_collides_with_private_pair() {
    let harness = TestHarness::new();
    let (alice, bob) = (UserId::random(), UserId::random());

    let private = harness
        .state
        .conversations
        .resolve_private(alice, bob)
        .await
        .unwrap();
    let group = harness
        .state
        .conversations
        .resolve_group([alice, bob], Some("duo".into()))
        .await
        .unwrap();

    assert_ne!(private.id, group.id);
    assert!(group.is_group);
    assert_eq!(group.name.as_deref(), Some("duo"));
}

#[tokio::test]
async fn test_invalid_memberships_are_rejected() {
    let harness = TestHarness::new();
    let alice = UserId::random();

    assert!(matches!(
        harness.state.conversations.resolve_private(alice, alice).await,
        Err(AppError::InvalidMembership(_))
    ));
    assert!(matches!(
        harness
            .state
            .conversations
            .resolve_group([alice, alice], None)
            .await,
        Err(AppError::InvalidMembership(_))
    ));
}

#[tokio::test]
async fn test_for_member_hides_conversations_from_outsiders() {
    let harness = TestHarness::new();
    let (alice, bob, eve) = (UserId::random(), UserId::random(), UserId::random());
    let conversation = harness
        .state
        .conversations
        .resolve_private(alice, bob)
        .await
        .unwrap();

    assert_eq!(
        harness
            .state
            .conversations
            .for_member(conversation.id, bob)
            .await
            .unwrap()
            .id,
        conversation.id
    );
    assert_eq!(
        harness.state.conversations.for_member(conversation.id, eve).await,
        Err(AppError::Forbidden)
    );
}
