use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::mpsc;

use crate::repositories::course::CourseContent;
use crate::repositories::payments::{CloudPaymentsApi, PgPaymentStore};
use crate::repositories::referrals::PgReferralLedger;
use crate::repositories::users::PgUserStore;
use crate::repositories::RepositoryError;
use crate::settings::Settings;

pub mod chat;
pub mod http;
pub mod notifier;
pub mod registration;
pub mod subscriptions;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => ServiceError::NotFound(what),
            RepositoryError::Conflict(what) => ServiceError::Conflict(what),
            RepositoryError::Validation(what) => ServiceError::Validation(what),
            RepositoryError::Database(e) => ServiceError::Database(e.to_string()),
        }
    }
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Channel ends handed back to the embedding transport. The chat transport
/// feeds registration events through `registration`; payment webhooks are
/// served by the HTTP listener started here.
pub struct ServiceChannels {
    pub registration: mpsc::Sender<registration::RegistrationRequest>,
}

pub async fn start_services(
    pool: PgPool,
    settings: Settings,
) -> Result<ServiceChannels, anyhow::Error> {
    let (registration_tx, mut registration_rx) = mpsc::channel(512);
    let (subscription_tx, mut subscription_rx) = mpsc::channel(512);

    let users = Arc::new(PgUserStore::new(pool.clone()));
    let payments = Arc::new(PgPaymentStore::new(pool.clone()));
    let referrals = Arc::new(PgReferralLedger::new(pool));

    let course = Arc::new(CourseContent::load(Path::new(&settings.course.lessons_file))?);
    log::info!("Loaded {} course lessons.", course.len());

    let gateway = Arc::new(CloudPaymentsApi::new(
        settings.cloudpayments.public_id.clone(),
        settings.cloudpayments.api_secret.clone(),
        settings.cloudpayments.sandbox,
    ));
    let notifier = Arc::new(notifier::TelegramNotifier::new(
        settings.telegram.token.clone(),
    ));
    let chat_backend = Arc::new(chat::OpenAiApi::new(
        settings.openai.api_key.clone(),
        settings.openai.model.clone(),
    ));

    println!("[*] Starting subscription service.");
    let mut subscription_service = subscriptions::SubscriptionService::new();
    let subscription_handler = subscriptions::SubscriptionRequestHandler::new(
        users.clone(),
        payments,
        referrals,
        course,
        gateway.clone(),
        notifier.clone(),
        settings.tariffs.clone(),
    );
    tokio::spawn(async move {
        subscription_service
            .run(subscription_handler, &mut subscription_rx)
            .await;
    });

    println!("[*] Starting registration service.");
    let mut registration_service = registration::RegistrationService::new();
    let registration_handler = registration::RegistrationRequestHandler::new(
        users,
        notifier,
        chat_backend,
        subscription_tx.clone(),
        settings.tariffs.clone(),
        settings.telegram.bot_username.clone(),
        settings.privacy.policy_url.clone(),
    );
    tokio::spawn(async move {
        registration_service
            .run(registration_handler, &mut registration_rx)
            .await;
    });

    println!("[*] Starting HTTP server.");
    let bind = settings.http.bind.clone();
    tokio::spawn(async move {
        http::start_http_server(&bind, subscription_tx, gateway)
            .await
            .expect("Could not start HTTP server.");
    });

    println!("[SUCCESS] Started services.");
    Ok(ServiceChannels {
        registration: registration_tx,
    })
}
