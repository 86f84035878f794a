//! Conversation repository.
//!
//! Every method takes the owning [`TenantId`] and every query filters on it,
//! so a session or message id alone never resolves across tenants.

use crate::error::{tenant_reference, StoreError};
use crate::models::{ChatMessage, ChatSession, EndUser, Role, TenantId};
use crate::storage::{from_millis, now_millis, parse_uuid, Database};
use uuid::Uuid;

/// Default upper bound for `list_recent_messages`.
pub const DEFAULT_MAX_PAGE_SIZE: u32 = 100;

#[derive(sqlx::FromRow)]
struct EndUserRow {
    id: String,
    tenant_id: String,
    external_id: String,
    created_at: i64,
}

impl TryFrom<EndUserRow> for EndUser {
    type Error = StoreError;

    fn try_from(row: EndUserRow) -> Result<Self, Self::Error> {
        Ok(EndUser {
            id: parse_uuid(&row.id, "end user id")?,
            tenant_id: parse_uuid(&row.tenant_id, "end user tenant id")?.into(),
            external_id: row.external_id,
            created_at: from_millis(row.created_at, "end_users.created_at")?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    tenant_id: String,
    end_user_id: String,
    created_at: i64,
    last_activity_at: i64,
}

impl TryFrom<SessionRow> for ChatSession {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(ChatSession {
            id: parse_uuid(&row.id, "session id")?,
            tenant_id: parse_uuid(&row.tenant_id, "session tenant id")?.into(),
            end_user_id: parse_uuid(&row.end_user_id, "session end user id")?,
            created_at: from_millis(row.created_at, "chat_sessions.created_at")?,
            last_activity_at: from_millis(row.last_activity_at, "chat_sessions.last_activity_at")?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    session_id: String,
    role: String,
    content: String,
    created_at: i64,
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(ChatMessage {
            id: parse_uuid(&row.id, "message id")?,
            session_id: parse_uuid(&row.session_id, "message session id")?,
            role: row.role.parse().map_err(StoreError::Corrupt)?,
            content: row.content,
            created_at: from_millis(row.created_at, "chat_messages.created_at")?,
        })
    }
}

pub struct ConversationRepository<'a> {
    db: &'a Database,
    max_page_size: u32,
}

impl<'a> ConversationRepository<'a> {
    pub fn new(db: &'a Database, max_page_size: u32) -> Self {
        Self {
            db,
            max_page_size: max_page_size.max(1),
        }
    }

    /// Appends a message to the visitor's session, creating the EndUser and the
    /// ChatSession on first contact.
    ///
    /// All rows are written in one transaction. End users and sessions are
    /// found-or-created through their unique keys, so concurrent first-contact
    /// calls for one visitor share a single EndUser and ChatSession.
    pub async fn append_message(
        &self,
        tenant_id: TenantId,
        visitor_external_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ChatMessage, StoreError> {
        let visitor_external_id = require_visitor(visitor_external_id)?;
        if content.trim().is_empty() {
            return Err(StoreError::Validation(
                "message content must not be empty".to_string(),
            ));
        }

        let tenant = tenant_id.to_string();
        let now = now_millis();
        let mut tx = self.db.pool().begin().await?;

        // The first statement is a write so a competing writer waits on the
        // busy timeout instead of failing on a stale read snapshot.
        sqlx::query(
            r#"
            INSERT INTO end_users (id, tenant_id, external_id, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(tenant_id, external_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&tenant)
        .bind(visitor_external_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| tenant_reference(e, tenant_id))?;

        let end_user_id: String =
            sqlx::query_scalar("SELECT id FROM end_users WHERE tenant_id = ? AND external_id = ?")
                .bind(&tenant)
                .bind(visitor_external_id)
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query(
            r#"
            INSERT INTO chat_sessions (id, tenant_id, end_user_id, created_at, last_activity_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id, end_user_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&tenant)
        .bind(&end_user_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let session_id: String =
            sqlx::query_scalar("SELECT id FROM chat_sessions WHERE tenant_id = ? AND end_user_id = ?")
                .bind(&tenant)
                .bind(&end_user_id)
                .fetch_one(&mut *tx)
                .await?;

        // Keep created_at non-decreasing within the session even if the clock steps back.
        let last: Option<i64> =
            sqlx::query_scalar("SELECT MAX(created_at) FROM chat_messages WHERE session_id = ?")
                .bind(&session_id)
                .fetch_one(&mut *tx)
                .await?;
        let created_at = last.map_or(now, |last| last.max(now));

        let message_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, tenant_id, session_id, role, content, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(message_id.to_string())
        .bind(&tenant)
        .bind(&session_id)
        .bind(role.as_str())
        .bind(content)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE chat_sessions SET last_activity_at = ? WHERE id = ?")
            .bind(created_at)
            .bind(&session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        log::debug!(
            "Saved {} message {} to session {} (tenant {})",
            role,
            message_id,
            session_id,
            tenant_id
        );

        Ok(ChatMessage {
            id: message_id,
            session_id: parse_uuid(&session_id, "session id")?,
            role,
            content: content.to_string(),
            created_at: from_millis(created_at, "chat_messages.created_at")?,
        })
    }

    /// Most recent messages first, at most `limit` of them.
    ///
    /// `limit` must lie in `1..=max_page_size`. An unknown tenant is
    /// `NotFound`; a known tenant with no session for the visitor yields an
    /// empty list.
    pub async fn list_recent_messages(
        &self,
        tenant_id: TenantId,
        visitor_external_id: &str,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        if limit == 0 || limit > self.max_page_size {
            return Err(StoreError::Validation(format!(
                "limit must be between 1 and {}, got {}",
                self.max_page_size, limit
            )));
        }
        let visitor_external_id = require_visitor(visitor_external_id)?;
        self.db.require_tenant(tenant_id).await?;

        let tenant = tenant_id.to_string();
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT m.id, m.session_id, m.role, m.content, m.created_at
            FROM chat_messages m
            JOIN chat_sessions s ON s.id = m.session_id AND s.tenant_id = ?
            JOIN end_users u ON u.id = s.end_user_id AND u.tenant_id = ?
            WHERE m.tenant_id = ? AND u.external_id = ?
            ORDER BY m.created_at DESC, m.seq DESC
            LIMIT ?
            "#,
        )
        .bind(&tenant)
        .bind(&tenant)
        .bind(&tenant)
        .bind(visitor_external_id)
        .bind(i64::from(limit))
        .fetch_all(self.db.pool())
        .await?;

        let messages = rows
            .into_iter()
            .map(ChatMessage::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!(
            "Fetched {} messages for visitor '{}' (tenant {})",
            messages.len(),
            visitor_external_id,
            tenant_id
        );
        Ok(messages)
    }

    pub async fn find_end_user(
        &self,
        tenant_id: TenantId,
        visitor_external_id: &str,
    ) -> Result<Option<EndUser>, StoreError> {
        let visitor_external_id = require_visitor(visitor_external_id)?;
        let row: Option<EndUserRow> = sqlx::query_as(
            "SELECT id, tenant_id, external_id, created_at FROM end_users WHERE tenant_id = ? AND external_id = ?",
        )
        .bind(tenant_id.to_string())
        .bind(visitor_external_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(EndUser::try_from).transpose()
    }

    /// The visitor's session, if they have written anything yet.
    pub async fn find_session(
        &self,
        tenant_id: TenantId,
        visitor_external_id: &str,
    ) -> Result<Option<ChatSession>, StoreError> {
        let visitor_external_id = require_visitor(visitor_external_id)?;
        let tenant = tenant_id.to_string();
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT s.id, s.tenant_id, s.end_user_id, s.created_at, s.last_activity_at
            FROM chat_sessions s
            JOIN end_users u ON u.id = s.end_user_id AND u.tenant_id = ?
            WHERE s.tenant_id = ? AND u.external_id = ?
            "#,
        )
        .bind(&tenant)
        .bind(&tenant)
        .bind(visitor_external_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(ChatSession::try_from).transpose()
    }

    /// Resolves a session id, but only within its owning tenant.
    pub async fn get_session(
        &self,
        tenant_id: TenantId,
        session_id: Uuid,
    ) -> Result<ChatSession, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, end_user_id, created_at, last_activity_at
            FROM chat_sessions
            WHERE id = ? AND tenant_id = ?
            "#,
        )
        .bind(session_id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(ChatSession::try_from)
            .transpose()?
            .ok_or_else(|| StoreError::not_found("chat session", session_id))
    }

    pub async fn count_messages(
        &self,
        tenant_id: TenantId,
        visitor_external_id: &str,
    ) -> Result<u64, StoreError> {
        let visitor_external_id = require_visitor(visitor_external_id)?;
        let tenant = tenant_id.to_string();
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM chat_messages m
            JOIN chat_sessions s ON s.id = m.session_id AND s.tenant_id = ?
            JOIN end_users u ON u.id = s.end_user_id AND u.tenant_id = ?
            WHERE m.tenant_id = ? AND u.external_id = ?
            "#,
        )
        .bind(&tenant)
        .bind(&tenant)
        .bind(&tenant)
        .bind(visitor_external_id)
        .fetch_one(self.db.pool())
        .await?;

        Ok(count.max(0) as u64)
    }
}

fn require_visitor(visitor_external_id: &str) -> Result<&str, StoreError> {
    let trimmed = visitor_external_id.trim();
    if trimmed.is_empty() {
        Err(StoreError::Validation(
            "visitor id must not be empty".to_string(),
        ))
    } else {
        Ok(trimmed)
    }
}
