use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::RepositoryError;
use crate::models::payments::Tariff;
use crate::models::users::{RegistrationState, User};

/// Identity and subscription store. Phone number is the cross-channel join
/// key between chat-originated and web-originated payments.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, user_id: i64) -> Result<Option<User>, RepositoryError>;

    async fn get_user_by_phone(&self, phone: &str) -> Result<Option<User>, RepositoryError>;

    /// Creates or refreshes a pre-active row. The referrer is set-once: an
    /// already recorded referrer phone is never overwritten.
    async fn upsert_draft(
        &self,
        user_id: i64,
        username: Option<&str>,
        first_name: Option<&str>,
        referrer_phone: Option<&str>,
        state: RegistrationState,
    ) -> Result<(), RepositoryError>;

    async fn set_registration_state(
        &self,
        user_id: i64,
        state: RegistrationState,
    ) -> Result<(), RepositoryError>;

    async fn record_consent(&self, user_id: i64, consent: bool) -> Result<(), RepositoryError>;

    /// Promotes a draft row to a permanent identity. Fails with `Conflict`
    /// when the phone is already bound to a different identity.
    async fn bind_phone(&self, user_id: i64, phone: &str) -> Result<(), RepositoryError>;

    /// Single writer of subscription state. Sets the new expiry and tariff,
    /// marks the row as paid, and bumps the drip counter when asked to.
    async fn update_subscription(
        &self,
        phone: &str,
        tariff: Tariff,
        new_end: DateTime<Utc>,
        bump_drip: bool,
    ) -> Result<(), RepositoryError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    conn: PgPool,
}

impl PgUserStore {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn get_user(&self, user_id: i64) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(user)
    }

    async fn get_user_by_phone(&self, phone: &str) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE phone_number = $1")
            .bind(phone)
            .fetch_optional(&self.conn)
            .await?;

        Ok(user)
    }

    async fn upsert_draft(
        &self,
        user_id: i64,
        username: Option<&str>,
        first_name: Option<&str>,
        referrer_phone: Option<&str>,
        state: RegistrationState,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, username, first_name, referrer_phone, registration_state)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE SET
                username = EXCLUDED.username,
                first_name = EXCLUDED.first_name,
                referrer_phone = COALESCE(users.referrer_phone, EXCLUDED.referrer_phone),
                registration_state = EXCLUDED.registration_state
            "#,
        )
        .bind(user_id)
        .bind(username)
        .bind(first_name)
        .bind(referrer_phone)
        .bind(state.as_str())
        .execute(&self.conn)
        .await?;

        Ok(())
    }

    async fn set_registration_state(
        &self,
        user_id: i64,
        state: RegistrationState,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE users SET registration_state = $1 WHERE user_id = $2")
            .bind(state.as_str())
            .bind(user_id)
            .execute(&self.conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("user {}", user_id)));
        }

        Ok(())
    }

    async fn record_consent(&self, user_id: i64, consent: bool) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET privacy_consent = $1, privacy_consent_at = CURRENT_TIMESTAMP
            WHERE user_id = $2
            "#,
        )
        .bind(consent)
        .bind(user_id)
        .execute(&self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("user {}", user_id)));
        }

        Ok(())
    }

    async fn bind_phone(&self, user_id: i64, phone: &str) -> Result<(), RepositoryError> {
        if let Some(existing) = self.get_user_by_phone(phone).await? {
            if existing.user_id != user_id {
                return Err(RepositoryError::Conflict(format!(
                    "phone {} already bound to another identity",
                    phone
                )));
            }
        }

        // The pre-check above can race with a concurrent bind; the UNIQUE
        // constraint on phone_number is the real guard, so a violation is
        // still a Conflict, not a database error.
        let result = sqlx::query(
            r#"
            UPDATE users
            SET phone_number = $1, registration_state = 'active'
            WHERE user_id = $2
            "#,
        )
        .bind(phone)
        .bind(user_id)
        .execute(&self.conn)
        .await
        .map_err(|e| {
            if e.as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                RepositoryError::Conflict(format!(
                    "phone {} already bound to another identity",
                    phone
                ))
            } else {
                RepositoryError::Database(e)
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("user {}", user_id)));
        }

        Ok(())
    }

    async fn update_subscription(
        &self,
        phone: &str,
        tariff: Tariff,
        new_end: DateTime<Utc>,
        bump_drip: bool,
    ) -> Result<(), RepositoryError> {
        let query = if bump_drip {
            r#"
            UPDATE users
            SET subscription_end = $1, tariff_type = $2, has_paid = TRUE,
                tariff2_counter = tariff2_counter + 1
            WHERE phone_number = $3
            "#
        } else {
            r#"
            UPDATE users
            SET subscription_end = $1, tariff_type = $2, has_paid = TRUE
            WHERE phone_number = $3
            "#
        };

        let result = sqlx::query(query)
            .bind(new_end)
            .bind(tariff.code())
            .bind(phone)
            .execute(&self.conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("phone {}", phone)));
        }

        Ok(())
    }
}
