//! In-memory store doubles used by service tests. Semantics mirror the
//! Postgres implementations, including the guarded debit and the atomic
//! pending -> completed payment claim.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::payments::PaymentStore;
use super::referrals::ReferralLedger;
use super::users::UserStore;
use super::RepositoryError;
use crate::models::payments::{Payment, PaymentStatus, Tariff};
use crate::models::referrals::ReferralEntry;
use crate::models::users::{RegistrationState, User};

#[derive(Default)]
struct Inner {
    users: HashMap<i64, User>,
    payments: HashMap<String, Payment>,
    ledger: Vec<ReferralEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blank_user(user_id: i64) -> User {
        User {
            user_id,
            username: None,
            first_name: None,
            phone_number: None,
            registration_state: RegistrationState::New,
            referrer_phone: None,
            referral_balance: 0,
            subscription_end: None,
            tariff_type: None,
            tariff2_counter: 0,
            has_paid: false,
            privacy_consent: false,
            privacy_consent_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn seed_user(&self, user: User) {
        self.inner.lock().unwrap().users.insert(user.user_id, user);
    }

    pub fn user(&self, user_id: i64) -> Option<User> {
        self.inner.lock().unwrap().users.get(&user_id).cloned()
    }

    pub fn user_by_phone(&self, phone: &str) -> Option<User> {
        self.inner
            .lock()
            .unwrap()
            .users
            .values()
            .find(|u| u.phone_number.as_deref() == Some(phone))
            .cloned()
    }

    pub fn payment(&self, payment_id: &str) -> Option<Payment> {
        self.inner.lock().unwrap().payments.get(payment_id).cloned()
    }

    pub fn ledger(&self) -> Vec<ReferralEntry> {
        self.inner.lock().unwrap().ledger.clone()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, user_id: i64) -> Result<Option<User>, RepositoryError> {
        Ok(self.user(user_id))
    }

    async fn get_user_by_phone(&self, phone: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self.user_by_phone(phone))
    }

    async fn upsert_draft(
        &self,
        user_id: i64,
        username: Option<&str>,
        first_name: Option<&str>,
        referrer_phone: Option<&str>,
        state: RegistrationState,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let user = inner
            .users
            .entry(user_id)
            .or_insert_with(|| Self::blank_user(user_id));

        user.username = username.map(str::to_string);
        user.first_name = first_name.map(str::to_string);
        if user.referrer_phone.is_none() {
            user.referrer_phone = referrer_phone.map(str::to_string);
        }
        user.registration_state = state;

        Ok(())
    }

    async fn set_registration_state(
        &self,
        user_id: i64,
        state: RegistrationState,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", user_id)))?;

        user.registration_state = state;
        Ok(())
    }

    async fn record_consent(&self, user_id: i64, consent: bool) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", user_id)))?;

        user.privacy_consent = consent;
        user.privacy_consent_at = Some(Utc::now());
        Ok(())
    }

    async fn bind_phone(&self, user_id: i64, phone: &str) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();

        let taken = inner
            .users
            .values()
            .any(|u| u.phone_number.as_deref() == Some(phone) && u.user_id != user_id);
        if taken {
            return Err(RepositoryError::Conflict(format!(
                "phone {} already bound to another identity",
                phone
            )));
        }

        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", user_id)))?;

        user.phone_number = Some(phone.to_string());
        user.registration_state = RegistrationState::Active;
        Ok(())
    }

    async fn update_subscription(
        &self,
        phone: &str,
        tariff: Tariff,
        new_end: DateTime<Utc>,
        bump_drip: bool,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let user = inner
            .users
            .values_mut()
            .find(|u| u.phone_number.as_deref() == Some(phone))
            .ok_or_else(|| RepositoryError::NotFound(format!("phone {}", phone)))?;

        user.subscription_end = Some(new_end);
        user.tariff_type = Some(tariff);
        user.has_paid = true;
        if bump_drip {
            user.tariff2_counter += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
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

        let mut inner = self.inner.lock().unwrap();
        if inner.payments.contains_key(payment_id) {
            return Err(RepositoryError::Conflict(format!(
                "payment {} already exists",
                payment_id
            )));
        }

        let payment = Payment {
            payment_id: payment_id.to_string(),
            user_id,
            amount,
            discount,
            tariff,
            status: PaymentStatus::Pending,
            created_at: Utc::now(),
        };
        inner
            .payments
            .insert(payment_id.to_string(), payment.clone());

        Ok(payment)
    }

    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>, RepositoryError> {
        Ok(self.payment(payment_id))
    }

    async fn complete_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<Payment>, RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.payments.get_mut(payment_id) {
            Some(payment) if payment.status == PaymentStatus::Pending => {
                payment.status = PaymentStatus::Completed;
                Ok(Some(payment.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl ReferralLedger for MemoryStore {
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

        let mut inner = self.inner.lock().unwrap();
        let user = inner
            .users
            .values_mut()
            .find(|u| u.phone_number.as_deref() == Some(referrer_phone))
            .ok_or_else(|| RepositoryError::NotFound(format!("phone {}", referrer_phone)))?;

        user.referral_balance += amount;

        let entry = ReferralEntry {
            id: inner.ledger.len() as i64 + 1,
            referrer_phone: referrer_phone.to_string(),
            referred_phone: referred_phone.to_string(),
            bonus_amount: amount,
            created_at: Utc::now(),
        };
        inner.ledger.push(entry);

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

        let mut inner = self.inner.lock().unwrap();
        let user = inner
            .users
            .values_mut()
            .find(|u| u.phone_number.as_deref() == Some(phone))
            .ok_or_else(|| RepositoryError::NotFound(format!("phone {}", phone)))?;

        if user.referral_balance < amount {
            return Err(RepositoryError::Conflict(format!(
                "insufficient referral balance for {}",
                phone
            )));
        }

        user.referral_balance -= amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_balance(balance: i64) -> MemoryStore {
        let store = MemoryStore::new();
        let mut user = MemoryStore::blank_user(1);
        user.phone_number = Some("+79123456789".to_string());
        user.referral_balance = balance;
        store.seed_user(user);
        store
    }

    #[tokio::test]
    async fn debit_over_balance_is_rejected_without_mutation() {
        let store = store_with_balance(100);

        let err = store.debit("+79123456789", 150).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(store.user(1).unwrap().referral_balance, 100);
    }

    #[tokio::test]
    async fn negative_amounts_are_rejected() {
        let store = store_with_balance(100);

        let err = store
            .credit("+79123456789", "+79100000002", -5)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
        assert!(store.ledger().is_empty());
        assert_eq!(store.user(1).unwrap().referral_balance, 100);

        let err = store.debit("+79123456789", -5).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
        assert_eq!(store.user(1).unwrap().referral_balance, 100);
    }
}
