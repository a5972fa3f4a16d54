use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use super::notifier::Notifier;
use super::{RequestHandler, Service, ServiceError};
use crate::models::payments::{PaymentLink, Tariff};
use crate::models::users::User;
use crate::repositories::course::CourseContent;
use crate::repositories::payments::{CloudPaymentsApi, PaymentStore};
use crate::repositories::referrals::ReferralLedger;
use crate::repositories::users::UserStore;
use crate::settings::Tariffs;

pub enum SubscriptionRequest {
    /// Purchase initiation from the chat flow: price the tariff, apply the
    /// referral discount, persist a pending payment, hand back the link.
    CreatePaymentLink {
        user_id: i64,
        tariff: Tariff,
        response: oneshot::Sender<Result<PaymentLink, ServiceError>>,
    },
    /// Gateway settlement notification for a stored payment.
    PaymentCompleted {
        payment_id: String,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    /// Payment made on the website, joined to an identity by phone number.
    WebsitePayment {
        phone: String,
        tariff: Tariff,
        amount: i64,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
}

/// Single writer of subscription state and the only trigger point for
/// referral attribution and drip delivery.
#[derive(Clone)]
pub struct SubscriptionRequestHandler {
    users: Arc<dyn UserStore>,
    payments: Arc<dyn PaymentStore>,
    referrals: Arc<dyn ReferralLedger>,
    course: Arc<CourseContent>,
    gateway: Arc<CloudPaymentsApi>,
    notifier: Arc<dyn Notifier>,
    tariffs: Tariffs,
    /// Per-phone reconciliation locks. The read-modify-write over
    /// subscription_end and has_paid is not atomic in the store, so two
    /// notifications for the same payer must serialize here. Entries are
    /// never pruned; the map grows to one `Arc<Mutex>` per distinct payer.
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SubscriptionRequestHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserStore>,
        payments: Arc<dyn PaymentStore>,
        referrals: Arc<dyn ReferralLedger>,
        course: Arc<CourseContent>,
        gateway: Arc<CloudPaymentsApi>,
        notifier: Arc<dyn Notifier>,
        tariffs: Tariffs,
    ) -> Self {
        SubscriptionRequestHandler {
            users,
            payments,
            referrals,
            course,
            gateway,
            notifier,
            tariffs,
            locks: Arc::new(DashMap::new()),
        }
    }

    async fn create_payment_link(
        &self,
        user_id: i64,
        tariff: Tariff,
    ) -> Result<PaymentLink, ServiceError> {
        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", user_id)))?;

        if user.phone_number.is_none() {
            return Err(ServiceError::Validation(
                "registration is not finished".to_string(),
            ));
        }

        let price = self.tariffs.price(tariff);
        let discount = user.referral_balance.min(price);
        let amount = price - discount;

        let payment_id = Uuid::new_v4().hyphenated().to_string();
        self.payments
            .create_payment(&payment_id, user_id, amount, discount, tariff)
            .await?;

        let url = self
            .gateway
            .payment_link(
                amount,
                &format!("{} for user {}", tariff.name(), user_id),
                &payment_id,
                user_id,
            )
            .map_err(|e| {
                ServiceError::Communication("CloudPayments".to_string(), e.to_string())
            })?;

        log::info!(
            "Created payment {} for user {}: {} - {} discount",
            payment_id,
            user_id,
            price,
            discount
        );

        Ok(PaymentLink {
            payment_id,
            url,
            amount,
            discount,
        })
    }

    /// Settles a stored payment once. Tariff, amount and discount come from
    /// the payment record, not from the notification; replays find no
    /// pending row to claim and are ignored.
    async fn payment_completed(&self, payment_id: &str) -> Result<(), ServiceError> {
        let Some(payment) = self.payments.complete_payment(payment_id).await? else {
            if self.payments.get_payment(payment_id).await?.is_some() {
                log::warn!("Duplicate settlement notification for payment {}", payment_id);
                return Ok(());
            }
            return Err(ServiceError::NotFound(format!("payment {}", payment_id)));
        };

        let user = self
            .users
            .get_user(payment.user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", payment.user_id)))?;

        let Some(phone) = user.phone_number else {
            return Err(ServiceError::Validation(format!(
                "payer {} has no phone on record",
                payment.user_id
            )));
        };

        self.process_successful_payment(&phone, payment.tariff, payment.amount, payment.discount)
            .await
    }

    async fn website_payment(
        &self,
        phone: &str,
        tariff: Tariff,
        amount: i64,
    ) -> Result<(), ServiceError> {
        if self.users.get_user_by_phone(phone).await?.is_none() {
            return Err(ServiceError::NotFound(format!("phone {}", phone)));
        }

        self.process_successful_payment(phone, tariff, amount, 0)
            .await
    }

    /// The reconciliation workflow: monotonic subscription extension,
    /// first-payment referral bonus attribution, drip-content delivery.
    /// Aborts before any mutation when the payer is unknown.
    async fn process_successful_payment(
        &self,
        phone: &str,
        tariff: Tariff,
        amount: i64,
        discount_used: i64,
    ) -> Result<(), ServiceError> {
        let lock = self.locks.entry(phone.to_string()).or_default().clone();
        let _guard = lock.lock().await;

        let before = self
            .users
            .get_user_by_phone(phone)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("phone {}", phone)))?;

        // Snapshot taken before any mutation; has_paid is the sole
        // first-payment signal.
        let is_first_payment = !before.has_paid;

        let now = Utc::now();
        let base = match before.subscription_end {
            Some(end) if end > now => end,
            _ => now,
        };
        let new_end = base + Duration::days(self.tariffs.duration_days);

        self.users
            .update_subscription(phone, tariff, new_end, tariff == Tariff::Premium)
            .await?;

        log::info!(
            "Payment of {} settled for {}: {:?} until {}, first payment: {}",
            amount,
            phone,
            tariff,
            new_end,
            is_first_payment
        );

        if discount_used > 0 {
            // The spend happens regardless of who referred the payer. The
            // discount was bounded by the balance at purchase time; if the
            // balance moved since, keep the settled subscription and log.
            if let Err(e) = self.referrals.debit(phone, discount_used).await {
                log::warn!("Could not debit discount {} from {}: {}", discount_used, phone, e);
            }
        }

        if is_first_payment {
            self.attribute_referral_bonus(&before, phone).await;
        } else if before.referrer_phone.is_some() {
            log::info!("{} already paid before, no referral bonus", phone);
        }

        if tariff == Tariff::Premium {
            let after = self
                .users
                .get_user_by_phone(phone)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("phone {}", phone)))?;
            self.deliver_lesson(&after).await;
        }

        Ok(())
    }

    /// Credits the configured bonus to the referrer, but only when the
    /// referrer exists and has itself converted. Best-effort side path: a
    /// failure here never rolls back the settled payment.
    async fn attribute_referral_bonus(&self, payer: &User, payer_phone: &str) {
        let Some(referrer_phone) = payer.referrer_phone.as_deref() else {
            return;
        };

        let referrer = match self.users.get_user_by_phone(referrer_phone).await {
            Ok(Some(referrer)) => referrer,
            Ok(None) => {
                log::warn!("Referrer {} not found, no bonus", referrer_phone);
                return;
            }
            Err(e) => {
                log::error!("Could not look up referrer {}: {}", referrer_phone, e);
                return;
            }
        };

        if !referrer.has_paid {
            log::info!(
                "Referrer {} has not paid for a subscription yet, no bonus",
                referrer_phone
            );
            return;
        }

        let bonus = self.tariffs.referral_bonus;
        if let Err(e) = self.referrals.credit(referrer_phone, payer_phone, bonus).await {
            log::error!("Could not credit bonus to {}: {}", referrer_phone, e);
            return;
        }

        log::info!("Credited referral bonus {} to {}", bonus, referrer_phone);

        let text = format!(
            "🎉 <b>Referral bonus credited!</b>\n\n\
             💰 +{} for inviting a friend\n📱 Number: {}\n\n\
             Use the bonus as a discount on your next subscription payment!",
            bonus, payer_phone
        );
        if let Err(e) = self.notifier.notify(referrer.user_id, &text).await {
            log::warn!("Could not notify referrer {}: {}", referrer.user_id, e);
        }
    }

    /// Sends the drip unit indexed by the post-increment counter, or an
    /// "exhausted" notice once the inventory runs out.
    async fn deliver_lesson(&self, user: &User) {
        let number = user.tariff2_counter;

        let text = match self.course.lesson(number) {
            Some(content) => format!(
                "🎓 <b>A new lesson is available!</b>\n\n📚 <b>Lesson {}</b>\n\n{}",
                number, content
            ),
            None => {
                log::info!(
                    "No lesson {} for user {}, inventory of {} exhausted",
                    number,
                    user.user_id,
                    self.course.len()
                );
                "📚 <b>You have received every course lesson!</b>\n\n\
                 🎉 Congratulations, the full course is yours.\n\
                 💡 Watch this space, new lessons may appear later."
                    .to_string()
            }
        };

        if let Err(e) = self.notifier.notify(user.user_id, &text).await {
            log::warn!("Could not deliver lesson {} to {}: {}", number, user.user_id, e);
        }
    }
}

#[async_trait]
impl RequestHandler<SubscriptionRequest> for SubscriptionRequestHandler {
    async fn handle_request(&self, request: SubscriptionRequest) {
        match request {
            SubscriptionRequest::CreatePaymentLink {
                user_id,
                tariff,
                response,
            } => {
                let result = self.create_payment_link(user_id, tariff).await;
                let _ = response.send(result);
            }
            SubscriptionRequest::PaymentCompleted {
                payment_id,
                response,
            } => {
                let result = self.payment_completed(&payment_id).await;
                let _ = response.send(result);
            }
            SubscriptionRequest::WebsitePayment {
                phone,
                tariff,
                amount,
                response,
            } => {
                let result = self.website_payment(&phone, tariff, amount).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct SubscriptionService;

impl SubscriptionService {
    pub fn new() -> Self {
        SubscriptionService {}
    }
}

#[async_trait]
impl Service<SubscriptionRequest, SubscriptionRequestHandler> for SubscriptionService {}
