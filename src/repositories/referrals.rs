use async_trait::async_trait;
use sqlx::PgPool;

use super::RepositoryError;

/// Referral balance accrual and spend-down, tied 1:1 to phone identities.
/// Every credit leaves an audit row; balances never go negative.
#[async_trait]
pub trait ReferralLedger: Send + Sync {
    /// Adds `amount` to the referrer's balance and appends an audit entry.
    /// Negative amounts are rejected.
    async fn credit(
        &self,
        referrer_phone: &str,
        referred_phone: &str,
        amount: i64,
    ) -> Result<(), RepositoryError>;

    /// Subtracts `amount` from the balance. Fails without mutation when the
    /// balance does not cover it.
    async fn debit(&self, phone: &str, amount: i64) -> Result<(), RepositoryError>;
}

#[derive(Clone)]
pub struct PgReferralLedger {
    conn: PgPool,
}

impl PgReferralLedger {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ReferralLedger for PgReferralLedger {
    async fn credit(
        &self,
        referrer_phone: &str,
        referred_phone: &str,
        amount: i64,
    ) -> Result<(), RepositoryError> {
        if amount < 0 {
            return Err(RepositoryError::Validation(format!(
                "negative bonus amount {}",
                amount
            )));
        }

        let mut tx = self.conn.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE users SET referral_balance = referral_balance + $1
            WHERE phone_number = $2
            "#,
        )
        .bind(amount)
        .bind(referrer_phone)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!(
                "phone {}",
                referrer_phone
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO referrals (referrer_phone, referred_phone, bonus_amount)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(referrer_phone)
        .bind(referred_phone)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn debit(&self, phone: &str, amount: i64) -> Result<(), RepositoryError> {
        if amount < 0 {
            return Err(RepositoryError::Validation(format!(
                "negative debit amount {}",
                amount
            )));
        }

        if amount == 0 {
            return Ok(());
        }

        // The balance guard is part of the statement so a concurrent debit
        // cannot take the balance below zero.
        let result = sqlx::query(
            r#"
            UPDATE users SET referral_balance = referral_balance - $1
            WHERE phone_number = $2 AND referral_balance >= $1
            "#,
        )
        .bind(amount)
        .bind(phone)
        .execute(&self.conn)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM users WHERE phone_number = $1")
                .bind(phone)
                .fetch_optional(&self.conn)
                .await?
                .is_some();

            if exists {
                return Err(RepositoryError::Conflict(format!(
                    "insufficient referral balance for {}",
                    phone
                )));
            }
            return Err(RepositoryError::NotFound(format!("phone {}", phone)));
        }

        Ok(())
    }
}
