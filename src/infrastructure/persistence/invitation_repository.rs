//! PostgreSQL implementation of the invitation store

use crate::domain::invitation::{
    CallInvitation, InvitationStatus, InvitationStore, NewInvitation, StatusChange,
};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallId, InvitationId, SessionId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, error};
use uuid::Uuid;

const SELECT_COLUMNS: &str = r#"
    SELECT id, conversation_id, caller_id, caller_name, recipient_id, session_id,
           call_id, created_at, status, provider_payload, closed_at
    FROM call_invitations
"#;

#[derive(FromRow)]
struct InvitationRow {
    id: Uuid,
    conversation_id: String,
    caller_id: String,
    caller_name: String,
    recipient_id: String,
    session_id: Uuid,
    call_id: Uuid,
    created_at: DateTime<Utc>,
    status: String,
    provider_payload: serde_json::Value,
    closed_at: Option<DateTime<Utc>>,
}

impl InvitationRow {
    fn into_invitation(self, now: DateTime<Utc>, ttl: Duration) -> Result<CallInvitation> {
        let mut invitation = CallInvitation {
            id: InvitationId::from_uuid(self.id),
            conversation_id: self.conversation_id,
            caller_id: UserId::new(self.caller_id),
            caller_name: self.caller_name,
            recipient_id: UserId::new(self.recipient_id),
            session_id: SessionId::from_uuid(self.session_id),
            call_id: CallId::from_uuid(self.call_id),
            created_at: self.created_at,
            status: self.status.parse()?,
            provider_payload: self.provider_payload,
            closed_at: self.closed_at,
        };
        invitation.status = invitation.effective_status(now, ttl);
        Ok(invitation)
    }
}

fn db_error(e: sqlx::Error) -> DomainError {
    error!("Invitation store database error: {}", e);
    DomainError::Unavailable(format!("database error: {e}"))
}

pub struct PgInvitationStore {
    pool: PgPool,
    ttl: Duration,
}

impl PgInvitationStore {
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    /// Serialize writers touching the same unordered pair
    async fn lock_pair(tx: &mut Transaction<'_, Postgres>, a: &UserId, b: &UserId) -> Result<()> {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("{low}|{high}"))
            .execute(&mut **tx)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

#[async_trait]
impl InvitationStore for PgInvitationStore {
    async fn create(&self, new: NewInvitation) -> Result<CallInvitation> {
        let now = Utc::now();
        let invitation = CallInvitation::new(new, now)?;
        let cutoff = now - self.ttl;

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        Self::lock_pair(&mut tx, &invitation.caller_id, &invitation.recipient_id).await?;

        let active: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM call_invitations
            WHERE LEAST(caller_id, recipient_id) = LEAST($1, $2)
              AND GREATEST(caller_id, recipient_id) = GREATEST($1, $2)
              AND created_at > $3
              AND status IN ('pending', 'accepted') AND closed_at IS NULL
            "#,
        )
        .bind(invitation.caller_id.as_str())
        .bind(invitation.recipient_id.as_str())
        .bind(cutoff)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

        if active > 0 {
            return Err(DomainError::Conflict(format!(
                "an active session already exists for {}",
                invitation.pair()
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO call_invitations
            (id, conversation_id, caller_id, caller_name, recipient_id, session_id,
             call_id, created_at, status, provider_payload, closed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NULL)
            "#,
        )
        .bind(invitation.id.as_uuid())
        .bind(&invitation.conversation_id)
        .bind(invitation.caller_id.as_str())
        .bind(&invitation.caller_name)
        .bind(invitation.recipient_id.as_str())
        .bind(invitation.session_id.as_uuid())
        .bind(invitation.call_id.as_uuid())
        .bind(invitation.created_at)
        .bind(invitation.status.as_str())
        .bind(&invitation.provider_payload)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => DomainError::Conflict(
                format!("session {} already has an invitation", invitation.session_id),
            ),
            other => db_error(other),
        })?;

        tx.commit().await.map_err(db_error)?;
        debug!(invitation_id = %invitation.id, "Invitation persisted");
        Ok(invitation)
    }

    async fn list_pending(&self, user_id: &UserId) -> Result<Vec<CallInvitation>> {
        let now = Utc::now();
        let rows: Vec<InvitationRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE (caller_id = $1 OR recipient_id = $1) \
             AND status = 'pending' AND closed_at IS NULL AND created_at > $2 ORDER BY created_at"
        ))
        .bind(user_id.as_str())
        .bind(now - self.ttl)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter()
            .map(|r| r.into_invitation(now, self.ttl))
            .collect()
    }

    async fn list_active(&self, user_id: &UserId) -> Result<Vec<CallInvitation>> {
        let now = Utc::now();
        let rows: Vec<InvitationRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE (caller_id = $1 OR recipient_id = $1) \
             AND status = 'accepted' AND closed_at IS NULL AND created_at > $2"
        ))
        .bind(user_id.as_str())
        .bind(now - self.ttl)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter()
            .map(|r| r.into_invitation(now, self.ttl))
            .collect()
    }

    async fn get(&self, id: &InvitationId) -> Result<Option<CallInvitation>> {
        let row: Option<InvitationRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(|r| r.into_invitation(Utc::now(), self.ttl)).transpose()
    }

    async fn update_status(&self, id: &InvitationId, status: InvitationStatus) -> Result<StatusChange> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let row: Option<InvitationRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = $1 FOR UPDATE"))
                .bind(id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error)?;

        let row = row.ok_or_else(|| DomainError::NotFound(format!("invitation {id}")))?;
        let stored_status = row.status.clone();
        let mut invitation = row.into_invitation(now, self.ttl)?;
        // re-apply against the stored status so lazy expiry is materialised
        invitation.status = stored_status.parse()?;
        let change = invitation.apply_status(status, now, self.ttl)?;

        if invitation.status.as_str() != stored_status {
            sqlx::query("UPDATE call_invitations SET status = $2 WHERE id = $1")
                .bind(id.as_uuid())
                .bind(invitation.status.as_str())
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(change)
    }

    async fn close_session(&self, session_id: &SessionId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE call_invitations SET closed_at = COALESCE(closed_at, $2) WHERE session_id = $1",
        )
        .bind(session_id.as_uuid())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound(format!(
                "invitation for session {session_id}"
            )));
        }
        Ok(())
    }
}
