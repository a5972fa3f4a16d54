use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

use super::chat::ChatBackend;
use super::notifier::Notifier;
use super::subscriptions::SubscriptionRequest;
use super::{RequestHandler, Service, ServiceError};
use crate::models::events::{self, ChatUser, InboundEvent};
use crate::models::payments::Tariff;
use crate::models::users::{self, RegistrationState, User};
use crate::repositories::users::UserStore;
use crate::settings::Tariffs;

pub struct RegistrationRequest {
    pub user: ChatUser,
    pub event: InboundEvent,
}

/// Consumes inbound chat events and drives the registration state machine:
/// NEW -> AWAITING_REFERRER_CHOICE -> (AWAITING_REFERRER_PHONE | skipped)
/// -> AWAITING_CONSENT -> AWAITING_PHONE -> ACTIVE.
#[derive(Clone)]
pub struct RegistrationRequestHandler {
    users: Arc<dyn UserStore>,
    notifier: Arc<dyn Notifier>,
    chat: Arc<dyn ChatBackend>,
    subscription_channel: mpsc::Sender<SubscriptionRequest>,
    tariffs: Tariffs,
    bot_username: String,
    policy_url: String,
}

impl RegistrationRequestHandler {
    pub fn new(
        users: Arc<dyn UserStore>,
        notifier: Arc<dyn Notifier>,
        chat: Arc<dyn ChatBackend>,
        subscription_channel: mpsc::Sender<SubscriptionRequest>,
        tariffs: Tariffs,
        bot_username: String,
        policy_url: String,
    ) -> Self {
        RegistrationRequestHandler {
            users,
            notifier,
            chat,
            subscription_channel,
            tariffs,
            bot_username,
            policy_url,
        }
    }

    async fn send(&self, user_id: i64, text: &str) {
        if let Err(e) = self.notifier.notify(user_id, text).await {
            log::warn!("Could not notify user {}: {}", user_id, e);
        }
    }

    async fn on_start(
        &self,
        user: &ChatUser,
        deep_link: Option<&str>,
    ) -> Result<(), ServiceError> {
        if let Some(existing) = self.users.get_user(user.user_id).await? {
            if existing.phone_number.is_some() {
                self.send_main_menu(&existing).await;
                return Ok(());
            }
        }

        // A deep-link referrer is accepted only when it names an existing
        // permanent identity; otherwise fall back to asking.
        let referrer = match deep_link.and_then(events::referrer_phone_from_param) {
            Some(phone) => match self.users.get_user_by_phone(&phone).await? {
                Some(_) => Some(phone),
                None => {
                    log::info!("Deep-link referrer {} unknown, ignoring", phone);
                    None
                }
            },
            None => None,
        };

        match referrer {
            Some(phone) => {
                self.users
                    .upsert_draft(
                        user.user_id,
                        user.username.as_deref(),
                        user.first_name.as_deref(),
                        Some(&phone),
                        RegistrationState::AwaitingConsent,
                    )
                    .await?;
                self.send(
                    user.user_id,
                    &format!("🎉 Welcome! You were invited by {}.", phone),
                )
                .await;
                self.send_consent_prompt(user.user_id).await;
            }
            None => {
                self.users
                    .upsert_draft(
                        user.user_id,
                        user.username.as_deref(),
                        user.first_name.as_deref(),
                        None,
                        RegistrationState::AwaitingReferrerChoice,
                    )
                    .await?;
                self.send(
                    user.user_id,
                    "👋 Welcome!\n\n🤝 Did a friend invite you?\n\n\
                     Reply \"yes\" if you came by invitation, or \"no\" if you found us yourself.",
                )
                .await;
            }
        }

        Ok(())
    }

    async fn on_referrer_confirmed(&self, user: &ChatUser) -> Result<(), ServiceError> {
        self.users
            .upsert_draft(
                user.user_id,
                user.username.as_deref(),
                user.first_name.as_deref(),
                None,
                RegistrationState::AwaitingReferrerPhone,
            )
            .await?;

        self.send(
            user.user_id,
            "🤝 Great!\n\n📱 Send me your friend's phone number in the format\n\
             <code>+79123456789</code>\n\nor skip this step.",
        )
        .await;

        Ok(())
    }

    async fn on_referrer_skipped(&self, user: &ChatUser) -> Result<(), ServiceError> {
        self.users
            .upsert_draft(
                user.user_id,
                user.username.as_deref(),
                user.first_name.as_deref(),
                None,
                RegistrationState::AwaitingConsent,
            )
            .await?;

        self.send(user.user_id, "👍 Got it, you found us yourself!").await;
        self.send_consent_prompt(user.user_id).await;

        Ok(())
    }

    async fn on_referrer_phone(&self, user: &ChatUser, phone: &str) -> Result<(), ServiceError> {
        let Some(row) = self.users.get_user(user.user_id).await? else {
            return Ok(());
        };
        if row.registration_state != RegistrationState::AwaitingReferrerPhone {
            // Free text while we are not waiting for a referrer number.
            return Ok(());
        }

        let phone = phone.trim();
        if !users::is_phone_number(phone) {
            self.send(
                user.user_id,
                "❌ That does not look like a phone number.\n\n\
                 Use the format <code>+79123456789</code>, or skip this step.",
            )
            .await;
            return Ok(());
        }

        match self.users.get_user_by_phone(phone).await? {
            Some(_) => {
                self.users
                    .upsert_draft(
                        user.user_id,
                        user.username.as_deref(),
                        user.first_name.as_deref(),
                        Some(phone),
                        RegistrationState::AwaitingConsent,
                    )
                    .await?;

                self.send(
                    user.user_id,
                    &format!(
                        "✅ Your friend {} was found.\n\
                         They will receive a bonus after you pay for a subscription!",
                        phone
                    ),
                )
                .await;
                self.send_consent_prompt(user.user_id).await;
            }
            None => {
                self.send(
                    user.user_id,
                    &format!(
                        "❌ No user with the number {} was found.\n\n\
                         Maybe your friend has not registered yet, or the number is wrong.\n\
                         Try again or skip this step.",
                        phone
                    ),
                )
                .await;
            }
        }

        Ok(())
    }

    /// Consent answers are meaningful only while we are actually asking.
    async fn awaiting_consent(&self, user_id: i64) -> Result<bool, ServiceError> {
        Ok(self
            .users
            .get_user(user_id)
            .await?
            .is_some_and(|row| row.registration_state == RegistrationState::AwaitingConsent))
    }

    async fn send_consent_prompt(&self, user_id: i64) {
        self.send(
            user_id,
            &format!(
                "📋 <b>Personal data consent</b>\n\n\
                 To use the bot we need your consent to process personal data \
                 and your phone number.\n\n\
                 📄 Full privacy policy: {}\n\n\
                 Reply \"agree\" to continue or \"decline\" to stop here.",
                self.policy_url
            ),
        )
        .await;
    }

    async fn on_consent_agreed(&self, user: &ChatUser) -> Result<(), ServiceError> {
        if !self.awaiting_consent(user.user_id).await? {
            return Ok(());
        }

        self.users.record_consent(user.user_id, true).await?;
        self.users
            .set_registration_state(user.user_id, RegistrationState::AwaitingPhone)
            .await?;

        self.send(
            user.user_id,
            "✅ Thank you!\n\n📱 Now share your phone number to finish registration.",
        )
        .await;

        Ok(())
    }

    async fn on_consent_declined(&self, user: &ChatUser) -> Result<(), ServiceError> {
        if !self.awaiting_consent(user.user_id).await? {
            return Ok(());
        }

        self.users.record_consent(user.user_id, false).await?;
        self.users
            .set_registration_state(user.user_id, RegistrationState::AwaitingConsent)
            .await?;

        self.send(
            user.user_id,
            "❌ <b>Consent not given</b>\n\n\
             Without consent to process personal data the bot cannot be used.\n\
             If you change your mind, send /start.",
        )
        .await;

        Ok(())
    }

    async fn on_phone_shared(
        &self,
        user: &ChatUser,
        phone: &str,
        contact_owner_id: i64,
    ) -> Result<(), ServiceError> {
        if contact_owner_id != user.user_id {
            self.send(
                user.user_id,
                "❌ Please share your own phone number, not someone else's.",
            )
            .await;
            return Ok(());
        }

        let Some(row) = self.users.get_user(user.user_id).await? else {
            self.send(
                user.user_id,
                "❌ You are not registered yet.\n\nPlease send /start first.",
            )
            .await;
            return Ok(());
        };

        if !row.privacy_consent {
            self.send(
                user.user_id,
                "❌ No personal data consent on record.\n\n\
                 Please give consent first via /start.",
            )
            .await;
            return Ok(());
        }

        let phone = users::normalize_phone(phone);

        match self.users.bind_phone(user.user_id, &phone).await {
            Ok(()) => {}
            Err(crate::repositories::RepositoryError::Conflict(_)) => {
                self.send(
                    user.user_id,
                    "❌ This phone number is already used by another account.\n\n\
                     If this is your number, please contact support.",
                )
                .await;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let mut text = "✅ Phone number linked, registration complete!\n\n\
                        📋 Your personal data consent is on record.\n\n"
            .to_string();
        if row.referrer_phone.as_deref().is_some_and(|r| r != phone) {
            text.push_str(
                "🎉 You registered through a referral!\n\
                 After you pay for a subscription, the friend who invited you gets a bonus.\n\n",
            );
        }
        self.send(user.user_id, &text).await;

        if let Some(updated) = self.users.get_user(user.user_id).await? {
            self.send_main_menu(&updated).await;
        }

        Ok(())
    }

    async fn on_chat_message(&self, user: &ChatUser, text: &str) -> Result<(), ServiceError> {
        let row = self.users.get_user(user.user_id).await?;
        let active = row
            .as_ref()
            .map(|u| u.subscription_active(Utc::now()))
            .unwrap_or(false);

        if !active {
            self.send(
                user.user_id,
                "❌ You have no active subscription!\n\n\
                 Send /start to pick a tariff and subscribe.",
            )
            .await;
            return Ok(());
        }

        match self.chat.respond(user.user_id, text).await {
            Ok(answer) => self.send(user.user_id, &answer).await,
            Err(e) => {
                log::error!("Chat backend error for user {}: {}", user.user_id, e);
                self.send(
                    user.user_id,
                    "😔 Something went wrong while processing your message.\n\
                     Please try again in a few seconds.",
                )
                .await;
            }
        }

        Ok(())
    }

    async fn on_buy_tariff(&self, user: &ChatUser, tariff: Tariff) -> Result<(), ServiceError> {
        let (tx, rx) = oneshot::channel();

        self.subscription_channel
            .send(SubscriptionRequest::CreatePaymentLink {
                user_id: user.user_id,
                tariff,
                response: tx,
            })
            .await
            .map_err(|e| {
                ServiceError::Communication("Registration => Subscription".to_string(), e.to_string())
            })?;

        let link = rx.await.map_err(|e| {
            ServiceError::Communication("Subscription => Registration".to_string(), e.to_string())
        })?;

        match link {
            Ok(link) => {
                let price = self.tariffs.price(tariff);
                let mut text = format!(
                    "💳 <b>Subscription payment</b>\n\n📦 {}\n💰 Price: {}\n",
                    tariff.name(),
                    price
                );
                if link.discount > 0 {
                    text.push_str(&format!("🎁 Your discount: -{}\n", link.discount));
                }
                text.push_str(&format!(
                    "💸 To pay: <b>{}</b>\n\n🔗 Pay here: {}",
                    link.amount, link.url
                ));
                self.send(user.user_id, &text).await;
            }
            Err(ServiceError::NotFound(_)) | Err(ServiceError::Validation(_)) => {
                self.send(
                    user.user_id,
                    "❌ Please finish registration first: send /start.",
                )
                .await;
            }
            Err(e) => {
                log::error!("Could not create payment for user {}: {}", user.user_id, e);
                self.send(
                    user.user_id,
                    "❌ Could not create the payment. Please try again later \
                     or contact support.",
                )
                .await;
            }
        }

        Ok(())
    }

    async fn on_profile(&self, user: &ChatUser) -> Result<(), ServiceError> {
        let Some(row) = self.users.get_user(user.user_id).await? else {
            self.send(user.user_id, "❌ You are not registered yet. Send /start.")
                .await;
            return Ok(());
        };

        let mut text = format!(
            "👤 <b>Your profile</b>\n\n🆔 ID: <code>{}</code>\n📱 Phone: <code>{}</code>\n",
            row.user_id,
            row.phone_number.as_deref().unwrap_or("not linked"),
        );

        match row.subscription_end {
            Some(end) if row.subscription_active(Utc::now()) => {
                text.push_str(&format!(
                    "✅ Subscription active until {}\n",
                    end.format("%d.%m.%Y %H:%M")
                ));
                if let Some(tariff) = row.tariff_type {
                    text.push_str(&format!("📦 {}\n", tariff.name()));
                }
                if row.tariff_type == Some(Tariff::Premium) {
                    text.push_str(&format!("📚 Lessons received: {}\n", row.tariff2_counter));
                }
            }
            Some(_) => text.push_str("❌ Subscription expired\n"),
            None => text.push_str("❌ No active subscription\n"),
        }

        if row.referral_balance > 0 {
            text.push_str(&format!("💰 Referral balance: {}\n", row.referral_balance));
        }

        self.send(user.user_id, &text).await;
        Ok(())
    }

    async fn on_referral_info(&self, user: &ChatUser) -> Result<(), ServiceError> {
        let Some(row) = self.users.get_user(user.user_id).await? else {
            self.send(user.user_id, "❌ You are not registered yet. Send /start.")
                .await;
            return Ok(());
        };

        if !row.has_paid {
            self.send(
                user.user_id,
                "❌ <b>The referral program is not available yet</b>\n\n\
                 Pay for a subscription at least once to join it.",
            )
            .await;
            return Ok(());
        }

        let Some(phone) = row.phone_number.as_deref() else {
            self.send(user.user_id, "❌ Please finish registration first: send /start.")
                .await;
            return Ok(());
        };

        let link = format!(
            "https://t.me/{}?start=r{}",
            self.bot_username,
            phone.trim_start_matches('+')
        );

        let text = format!(
            "👥 <b>Referral program</b>\n\n\
             💰 Your referral balance: <b>{}</b>\n\n\
             🎁 Invite friends with your link; each friend's first subscription \
             payment earns you {}.\n\
             Bonuses work as a discount on your own payments.\n\n\
             🔗 Your link:\n<code>{}</code>\n\n\
             📱 If the link does not work, a friend can enter your number \
             <code>{}</code> during registration.",
            row.referral_balance, self.tariffs.referral_bonus, link, phone
        );

        self.send(user.user_id, &text).await;
        Ok(())
    }

    async fn send_main_menu(&self, row: &User) {
        let text = if row.subscription_active(Utc::now()) {
            let end = row
                .subscription_end
                .map(|end| end.format("%d.%m.%Y").to_string())
                .unwrap_or_default();
            format!(
                "👋 Welcome back, {}!\n\n✅ Your subscription is active until {}\n\n\
                 Ask me anything! 💬",
                row.display_name(),
                end
            )
        } else {
            format!(
                "👋 Welcome, {}!\n\nYou need a subscription to use the bot.\n\n\
                 📦 Available tariffs:\n\
                 • Tariff 1 - {} (basic access)\n\
                 • Tariff 2 - {} (access + course lessons)",
                row.display_name(),
                self.tariffs.tariff1_price,
                self.tariffs.tariff2_price
            )
        };

        self.send(row.user_id, &text).await;
    }

    async fn dispatch(&self, request: &RegistrationRequest) -> Result<(), ServiceError> {
        let user = &request.user;

        match &request.event {
            InboundEvent::Start { deep_link } => self.on_start(user, deep_link.as_deref()).await,
            InboundEvent::ReferrerConfirmed => self.on_referrer_confirmed(user).await,
            InboundEvent::ReferrerSkipped => self.on_referrer_skipped(user).await,
            InboundEvent::ReferrerPhoneEntered { phone } => {
                self.on_referrer_phone(user, phone).await
            }
            InboundEvent::ConsentAgreed => self.on_consent_agreed(user).await,
            InboundEvent::ConsentDeclined => self.on_consent_declined(user).await,
            InboundEvent::PhoneShared {
                phone,
                contact_owner_id,
            } => self.on_phone_shared(user, phone, *contact_owner_id).await,
            InboundEvent::ChatMessage { text } => self.on_chat_message(user, text).await,
            InboundEvent::BuyTariff { tariff } => self.on_buy_tariff(user, *tariff).await,
            InboundEvent::Profile => self.on_profile(user).await,
            InboundEvent::ReferralInfo => self.on_referral_info(user).await,
        }
    }
}

#[async_trait]
impl RequestHandler<RegistrationRequest> for RegistrationRequestHandler {
    async fn handle_request(&self, request: RegistrationRequest) {
        if let Err(e) = self.dispatch(&request).await {
            log::error!(
                "Registration event failed for user {}: {}",
                request.user.user_id,
                e
            );
            self.send(
                request.user.user_id,
                "😔 Something went wrong. Please try again or contact support.",
            )
            .await;
        }
    }
}

pub struct RegistrationService;

impl RegistrationService {
    pub fn new() -> Self {
        RegistrationService {}
    }
}

#[async_trait]
impl Service<RegistrationRequest, RegistrationRequestHandler> for RegistrationService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::MemoryStore;
    use crate::services::chat::EchoChat;
    use crate::services::notifier::RecordingNotifier;

    struct Fixture {
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        handler: RegistrationRequestHandler,
        _subscription_rx: mpsc::Receiver<SubscriptionRequest>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let (subscription_tx, subscription_rx) = mpsc::channel(8);

        let handler = RegistrationRequestHandler::new(
            store.clone(),
            notifier.clone(),
            Arc::new(EchoChat),
            subscription_tx,
            Tariffs {
                tariff1_price: 1000,
                tariff2_price: 2000,
                referral_bonus: 200,
                duration_days: 30,
            },
            "course_bot".to_string(),
            "https://example.com/privacy".to_string(),
        );

        Fixture {
            store,
            notifier,
            handler,
            _subscription_rx: subscription_rx,
        }
    }

    fn chat_user(user_id: i64) -> ChatUser {
        ChatUser {
            user_id,
            username: Some("tester".to_string()),
            first_name: Some("Test".to_string()),
        }
    }

    async fn run(fixture: &Fixture, user_id: i64, event: InboundEvent) {
        fixture
            .handler
            .dispatch(&RegistrationRequest {
                user: chat_user(user_id),
                event,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn full_registration_without_referrer() {
        let f = fixture();

        run(&f, 1, InboundEvent::Start { deep_link: None }).await;
        assert_eq!(
            f.store.user(1).unwrap().registration_state,
            RegistrationState::AwaitingReferrerChoice
        );

        run(&f, 1, InboundEvent::ReferrerSkipped).await;
        assert_eq!(
            f.store.user(1).unwrap().registration_state,
            RegistrationState::AwaitingConsent
        );

        run(&f, 1, InboundEvent::ConsentAgreed).await;
        let user = f.store.user(1).unwrap();
        assert!(user.privacy_consent);
        assert!(user.privacy_consent_at.is_some());
        assert_eq!(user.registration_state, RegistrationState::AwaitingPhone);

        run(
            &f,
            1,
            InboundEvent::PhoneShared {
                phone: "79123456789".to_string(),
                contact_owner_id: 1,
            },
        )
        .await;
        let user = f.store.user(1).unwrap();
        assert_eq!(user.registration_state, RegistrationState::Active);
        assert_eq!(user.phone_number.as_deref(), Some("+79123456789"));
        assert_eq!(user.referrer_phone, None);
    }

    #[tokio::test]
    async fn referrer_must_exist_to_be_accepted() {
        let f = fixture();

        let mut referrer = MemoryStore::blank_user(10);
        referrer.phone_number = Some("+79100000001".to_string());
        f.store.seed_user(referrer);

        run(&f, 2, InboundEvent::Start { deep_link: None }).await;
        run(&f, 2, InboundEvent::ReferrerConfirmed).await;
        assert_eq!(
            f.store.user(2).unwrap().registration_state,
            RegistrationState::AwaitingReferrerPhone
        );

        // Unknown number: re-prompted, state unchanged.
        run(
            &f,
            2,
            InboundEvent::ReferrerPhoneEntered {
                phone: "+79999999999".to_string(),
            },
        )
        .await;
        let user = f.store.user(2).unwrap();
        assert_eq!(user.registration_state, RegistrationState::AwaitingReferrerPhone);
        assert_eq!(user.referrer_phone, None);

        // Known number: recorded, consent is next.
        run(
            &f,
            2,
            InboundEvent::ReferrerPhoneEntered {
                phone: "+79100000001".to_string(),
            },
        )
        .await;
        let user = f.store.user(2).unwrap();
        assert_eq!(user.registration_state, RegistrationState::AwaitingConsent);
        assert_eq!(user.referrer_phone.as_deref(), Some("+79100000001"));
    }

    #[tokio::test]
    async fn referrer_survives_phone_capture() {
        let f = fixture();

        let mut referrer = MemoryStore::blank_user(10);
        referrer.phone_number = Some("+79100000001".to_string());
        f.store.seed_user(referrer);

        run(
            &f,
            3,
            InboundEvent::Start {
                deep_link: Some("r79100000001".to_string()),
            },
        )
        .await;
        assert_eq!(
            f.store.user(3).unwrap().registration_state,
            RegistrationState::AwaitingConsent
        );

        run(&f, 3, InboundEvent::ConsentAgreed).await;
        run(
            &f,
            3,
            InboundEvent::PhoneShared {
                phone: "+79100000003".to_string(),
                contact_owner_id: 3,
            },
        )
        .await;

        let user = f.store.user(3).unwrap();
        assert_eq!(user.registration_state, RegistrationState::Active);
        assert_eq!(user.referrer_phone.as_deref(), Some("+79100000001"));
    }

    #[tokio::test]
    async fn unknown_deep_link_referrer_is_ignored() {
        let f = fixture();

        run(
            &f,
            4,
            InboundEvent::Start {
                deep_link: Some("r79999999999".to_string()),
            },
        )
        .await;

        let user = f.store.user(4).unwrap();
        assert_eq!(user.referrer_phone, None);
        assert_eq!(
            user.registration_state,
            RegistrationState::AwaitingReferrerChoice
        );
    }

    #[tokio::test]
    async fn consent_answers_ignored_outside_consent_step() {
        let f = fixture();

        // Still at the referrer-choice step; an early "agree" must not
        // record consent or jump the flow forward.
        run(&f, 12, InboundEvent::Start { deep_link: None }).await;
        run(&f, 12, InboundEvent::ConsentAgreed).await;

        let user = f.store.user(12).unwrap();
        assert!(!user.privacy_consent);
        assert_eq!(
            user.registration_state,
            RegistrationState::AwaitingReferrerChoice
        );

        run(&f, 12, InboundEvent::ConsentDeclined).await;
        let user = f.store.user(12).unwrap();
        assert!(user.privacy_consent_at.is_none());
        assert_eq!(
            user.registration_state,
            RegistrationState::AwaitingReferrerChoice
        );
    }

    #[tokio::test]
    async fn phone_capture_requires_consent() {
        let f = fixture();

        run(&f, 5, InboundEvent::Start { deep_link: None }).await;
        run(&f, 5, InboundEvent::ReferrerSkipped).await;

        run(
            &f,
            5,
            InboundEvent::PhoneShared {
                phone: "+79123456789".to_string(),
                contact_owner_id: 5,
            },
        )
        .await;

        let user = f.store.user(5).unwrap();
        assert_eq!(user.phone_number, None);
        assert_ne!(user.registration_state, RegistrationState::Active);
    }

    #[tokio::test]
    async fn foreign_contact_is_rejected() {
        let f = fixture();

        run(&f, 6, InboundEvent::Start { deep_link: None }).await;
        run(&f, 6, InboundEvent::ReferrerSkipped).await;
        run(&f, 6, InboundEvent::ConsentAgreed).await;

        run(
            &f,
            6,
            InboundEvent::PhoneShared {
                phone: "+79123456789".to_string(),
                contact_owner_id: 999,
            },
        )
        .await;

        assert_eq!(f.store.user(6).unwrap().phone_number, None);
        let messages = f.notifier.messages_for(6);
        assert!(messages.last().unwrap().contains("your own phone number"));
    }

    #[tokio::test]
    async fn phone_already_bound_elsewhere_is_a_conflict() {
        let f = fixture();

        let mut other = MemoryStore::blank_user(50);
        other.phone_number = Some("+79123456789".to_string());
        f.store.seed_user(other);

        run(&f, 7, InboundEvent::Start { deep_link: None }).await;
        run(&f, 7, InboundEvent::ReferrerSkipped).await;
        run(&f, 7, InboundEvent::ConsentAgreed).await;
        run(
            &f,
            7,
            InboundEvent::PhoneShared {
                phone: "+79123456789".to_string(),
                contact_owner_id: 7,
            },
        )
        .await;

        assert_eq!(f.store.user(7).unwrap().phone_number, None);
        let messages = f.notifier.messages_for(7);
        assert!(messages.last().unwrap().contains("already used"));
    }

    #[tokio::test]
    async fn chat_is_gated_on_subscription() {
        let f = fixture();

        let mut user = MemoryStore::blank_user(8);
        user.phone_number = Some("+79123456789".to_string());
        f.store.seed_user(user);

        run(
            &f,
            8,
            InboundEvent::ChatMessage {
                text: "hello".to_string(),
            },
        )
        .await;
        assert!(f
            .notifier
            .messages_for(8)
            .last()
            .unwrap()
            .contains("no active subscription"));

        let mut user = f.store.user(8).unwrap();
        user.subscription_end = Some(Utc::now() + chrono::Duration::days(5));
        f.store.seed_user(user);

        run(
            &f,
            8,
            InboundEvent::ChatMessage {
                text: "hello".to_string(),
            },
        )
        .await;
        assert_eq!(f.notifier.messages_for(8).last().unwrap(), "echo: hello");
    }

    #[tokio::test]
    async fn referral_info_gated_on_has_paid() {
        let f = fixture();

        let mut user = MemoryStore::blank_user(9);
        user.phone_number = Some("+79123456789".to_string());
        f.store.seed_user(user);

        run(&f, 9, InboundEvent::ReferralInfo).await;
        assert!(f
            .notifier
            .messages_for(9)
            .last()
            .unwrap()
            .contains("not available"));

        let mut user = f.store.user(9).unwrap();
        user.has_paid = true;
        user.referral_balance = 400;
        f.store.seed_user(user);

        run(&f, 9, InboundEvent::ReferralInfo).await;
        let last = f.notifier.messages_for(9).last().unwrap().clone();
        assert!(last.contains("https://t.me/course_bot?start=r79123456789"));
        assert!(last.contains("400"));
    }
}
