use async_trait::async_trait;
use sqlx::PgPool;

use super::RepositoryError;
use crate::models::payments::{Payment, Tariff};

mod cloudpay;

pub use cloudpay::CloudPaymentsApi;

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn create_payment(
        &self,
        payment_id: &str,
        user_id: i64,
        amount: i64,
        discount: i64,
        tariff: Tariff,
    ) -> Result<Payment, RepositoryError>;

    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>, RepositoryError>;

    /// Atomically claims a pending payment and marks it completed, returning
    /// the claimed record. `None` means there was no pending row to claim,
    /// which is how duplicate settlement notifications are detected.
    async fn complete_payment(&self, payment_id: &str)
        -> Result<Option<Payment>, RepositoryError>;
}

#[derive(Clone)]
pub struct PgPaymentStore {
    conn: PgPool,
}

impl PgPaymentStore {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn create_payment(
        &self,
        payment_id: &str,
        user_id: i64,
        amount: i64,
        discount: i64,
        tariff: Tariff,
    ) -> Result<Payment, RepositoryError> {
        if amount < 0 || discount < 0 {
            return Err(RepositoryError::Validation(format!(
                "negative payment amount {} / discount {}",
                amount, discount
            )));
        }

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (payment_id, user_id, amount, discount, tariff_type, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING *
            "#,
        )
        .bind(payment_id)
        .bind(user_id)
        .bind(amount)
        .bind(discount)
        .bind(tariff.code())
        .fetch_one(&self.conn)
        .await?;

        Ok(payment)
    }

    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>, RepositoryError> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE payment_id = $1")
            .bind(payment_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(payment)
    }

    async fn complete_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<Payment>, RepositoryError> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments SET status = 'completed'
            WHERE payment_id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(payment)
    }
}
