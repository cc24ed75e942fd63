//! PostgreSQL invitation store integration tests

#![cfg(feature = "postgres")]

use sqlx::PgPool;
use vidcall::domain::invitation::{InvitationStatus, InvitationStore, NewInvitation, StatusChange};
use vidcall::domain::shared::value_objects::{CallId, InvitationId, SessionId, UserId};
use vidcall::infrastructure::persistence::{create_pool, run_migrations, PgInvitationStore, PoolSettings};
use vidcall::DomainError;

#[tokio::test]
#[ignore] // Requires database
async fn test_create_and_list_pending() {
    let pool = setup_database().await;
    let store = PgInvitationStore::new(pool.clone(), chrono::Duration::hours(24));
    let (caller, recipient) = users("create");

    let invitation = store.create(new_invitation(&caller, &recipient)).await.unwrap();
    assert_eq!(invitation.status, InvitationStatus::Pending);

    let pending = store.list_pending(&recipient).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, invitation.id);
    assert_eq!(pending[0].provider_payload["provider"], "peer_link");

    // either direction of the pair conflicts while the first is pending
    let result = store.create(new_invitation(&recipient, &caller)).await;
    assert!(matches!(result, Err(DomainError::Conflict(_))));

    cleanup_database(pool, &caller).await;
}

#[tokio::test]
#[ignore] // Requires database
async fn test_status_updates_are_monotonic() {
    let pool = setup_database().await;
    let store = PgInvitationStore::new(pool.clone(), chrono::Duration::hours(24));
    let (caller, recipient) = users("status");

    let invitation = store.create(new_invitation(&caller, &recipient)).await.unwrap();
    let change = store
        .update_status(&invitation.id, InvitationStatus::Declined)
        .await
        .unwrap();
    assert_eq!(change, StatusChange::Applied);

    let change = store
        .update_status(&invitation.id, InvitationStatus::Declined)
        .await
        .unwrap();
    assert_eq!(change, StatusChange::Unchanged);

    let result = store.update_status(&invitation.id, InvitationStatus::Accepted).await;
    assert!(matches!(result, Err(DomainError::InvalidTransition(_))));

    let result = store
        .update_status(&InvitationId::new(), InvitationStatus::Expired)
        .await;
    assert!(matches!(result, Err(DomainError::NotFound(_))));

    cleanup_database(pool, &caller).await;
}

#[tokio::test]
#[ignore] // Requires database
async fn test_active_until_session_closed() {
    let pool = setup_database().await;
    let store = PgInvitationStore::new(pool.clone(), chrono::Duration::hours(24));
    let (caller, recipient) = users("active");

    let invitation = store.create(new_invitation(&caller, &recipient)).await.unwrap();
    store
        .update_status(&invitation.id, InvitationStatus::Accepted)
        .await
        .unwrap();

    let active = store.list_active(&caller).await.unwrap();
    assert_eq!(active.len(), 1);
    assert!(store.list_pending(&recipient).await.unwrap().is_empty());

    store.close_session(&invitation.session_id).await.unwrap();
    assert!(store.list_active(&caller).await.unwrap().is_empty());

    // the pair is free again
    store.create(new_invitation(&caller, &recipient)).await.unwrap();

    cleanup_database(pool, &caller).await;
}

#[tokio::test]
#[ignore] // Requires database
async fn test_closed_pending_invitation_frees_pair() {
    let pool = setup_database().await;
    let store = PgInvitationStore::new(pool.clone(), chrono::Duration::hours(24));
    let (caller, recipient) = users("closed");

    let invitation = store.create(new_invitation(&caller, &recipient)).await.unwrap();
    store.close_session(&invitation.session_id).await.unwrap();

    assert!(store.list_pending(&recipient).await.unwrap().is_empty());
    store.create(new_invitation(&caller, &recipient)).await.unwrap();

    cleanup_database(pool, &caller).await;
}

#[tokio::test]
#[ignore] // Requires database
async fn test_expired_invitation_is_not_pending() {
    let pool = setup_database().await;
    let store = PgInvitationStore::new(pool.clone(), chrono::Duration::seconds(-1));
    let (caller, recipient) = users("ttl");

    let invitation = store.create(new_invitation(&caller, &recipient)).await.unwrap();
    assert!(store.list_pending(&recipient).await.unwrap().is_empty());

    let stored = store.get(&invitation.id).await.unwrap().unwrap();
    assert_eq!(stored.status, InvitationStatus::Expired);

    cleanup_database(pool, &caller).await;
}

// Helper functions

fn users(test: &str) -> (UserId, UserId) {
    let run = uuid::Uuid::new_v4().simple().to_string();
    (
        UserId::new(format!("test-{test}-caller-{run}")),
        UserId::new(format!("test-{test}-recipient-{run}")),
    )
}

fn new_invitation(caller: &UserId, recipient: &UserId) -> NewInvitation {
    NewInvitation {
        conversation_id: "conv-1".to_string(),
        caller_id: caller.clone(),
        caller_name: "Caller".to_string(),
        recipient_id: recipient.clone(),
        session_id: SessionId::new(),
        call_id: CallId::new(),
        provider_payload: serde_json::json!({"provider": "peer_link"}),
    }
}

async fn setup_database() -> PgPool {
    let db_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://postgres@localhost/vidcall_test".to_string());

    let pool = create_pool(&PoolSettings::new(db_url))
        .await
        .expect("Failed to create pool");
    run_migrations(&pool).await.expect("Failed to run migrations");
    pool
}

async fn cleanup_database(pool: PgPool, caller: &UserId) {
    // Clean up test data
    sqlx::query("DELETE FROM call_invitations WHERE caller_id = $1 OR recipient_id = $1")
        .bind(caller.as_str())
        .execute(&pool)
        .await
        .ok();
    pool.close().await;
}
