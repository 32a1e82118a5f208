use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use time::OffsetDateTime;

use crate::pages::PageRegistry;
use crate::ports;
use crate::types::{HttpRequest, HttpResponse, NotificationDisplay, StoredSubscription, VapidConfig};

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimeProvider;

impl ports::TimeProvider for TokioTimeProvider {
    type Sleep<'a>
        = tokio::time::Sleep
    where
        Self: 'a;

    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn sleep<'a>(&'a self, duration: Duration) -> Self::Sleep<'a> {
        tokio::time::sleep(duration)
    }
}

#[derive(Clone, Default)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ports::HttpClient for ReqwestClient {
    type Error = reqwest::Error;
    type Fut<'a>
        = Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + Send + 'a>>
    where
        Self: 'a;

    fn execute<'a>(&'a self, request: HttpRequest) -> Self::Fut<'a> {
        Box::pin(async move {
            let mut builder = self.client.request(request.method, &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get("content-type")
                .and_then(|value| value.to_str().ok())
                .map(String::from);
            let body = response.bytes().await?.to_vec();
            Ok(HttpResponse {
                status,
                content_type,
                body,
            })
        })
    }
}

#[derive(Debug)]
pub enum NotifyError {
    NoSubscription,
    NoPage,
    Push(web_push::WebPushError),
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::NoSubscription => f.write_str("no push subscription stored"),
            NotifyError::NoPage => f.write_str("no foreground page connected"),
            NotifyError::Push(err) => write!(f, "push delivery failed: {err}"),
        }
    }
}

/// Delivers notifications over web push to this device's own
/// subscription. Used when the worker runs with VAPID credentials;
/// `close` has no retraction channel and reports success.
#[derive(Clone)]
pub struct WebPushNotifier {
    vapid: VapidConfig,
    client: Arc<web_push::WebPushClient>,
    subscription: Arc<Mutex<Option<StoredSubscription>>>,
}

impl WebPushNotifier {
    pub fn new(vapid: VapidConfig) -> Result<Self, web_push::WebPushError> {
        let client = web_push::WebPushClient::new()?;
        Ok(Self {
            vapid,
            client: Arc::new(client),
            subscription: Arc::new(Mutex::new(None)),
        })
    }

    /// The worker updates this slot whenever the stored subscription
    /// changes.
    pub fn set_subscription(&self, subscription: Option<StoredSubscription>) {
        *self.subscription.lock().expect("subscription lock") = subscription;
    }
}

impl ports::Notifier for WebPushNotifier {
    type Error = NotifyError;
    type Fut<'a>
        = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send + 'a>>
    where
        Self: 'a;

    fn present<'a>(&'a self, display: &'a NotificationDisplay) -> Self::Fut<'a> {
        Box::pin(async move {
            let subscription = self
                .subscription
                .lock()
                .expect("subscription lock")
                .clone()
                .ok_or(NotifyError::NoSubscription)?;
            let payload = serde_json::to_vec(display).unwrap_or_default();
            let subscription_info = web_push::SubscriptionInfo::new(
                subscription.endpoint.clone(),
                subscription.p256dh.clone(),
                subscription.auth.clone(),
            );
            let mut builder = web_push::WebPushMessageBuilder::new(&subscription_info)
                .map_err(NotifyError::Push)?;
            builder.set_payload(web_push::ContentEncoding::Aes128Gcm, &payload);
            let mut signature_builder = web_push::VapidSignatureBuilder::from_base64(
                &self.vapid.private_key,
                web_push::URL_SAFE_NO_PAD,
                &subscription_info,
            )
            .map_err(NotifyError::Push)?;
            signature_builder.add_claim("sub", self.vapid.subject.as_str());
            builder.set_vapid_signature(signature_builder.build().map_err(NotifyError::Push)?);
            self.client
                .send(builder.build().map_err(NotifyError::Push)?)
                .await
                .map_err(NotifyError::Push)?;
            Ok(())
        })
    }

    fn close<'a>(&'a self, _tag: &'a str) -> Self::Fut<'a> {
        Box::pin(async move { Ok(()) })
    }
}

/// Delivers notifications to a connected foreground page instead of the
/// push service. Default when no VAPID credentials are configured.
#[derive(Clone)]
pub struct PageNotifier {
    pages: PageRegistry,
}

impl PageNotifier {
    pub fn new(pages: PageRegistry) -> Self {
        Self { pages }
    }
}

impl ports::Notifier for PageNotifier {
    type Error = NotifyError;
    type Fut<'a>
        = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send + 'a>>
    where
        Self: 'a;

    fn present<'a>(&'a self, display: &'a NotificationDisplay) -> Self::Fut<'a> {
        Box::pin(async move {
            if self.pages.deliver_notification(display) {
                Ok(())
            } else {
                Err(NotifyError::NoPage)
            }
        })
    }

    fn close<'a>(&'a self, _tag: &'a str) -> Self::Fut<'a> {
        Box::pin(async move { Ok(()) })
    }
}

/// Delivery surface picked at startup: web push when VAPID credentials
/// are configured, the page channel otherwise.
#[derive(Clone)]
pub enum WorkerNotifier {
    WebPush(WebPushNotifier),
    Page(PageNotifier),
}

impl ports::Notifier for WorkerNotifier {
    type Error = NotifyError;
    type Fut<'a>
        = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send + 'a>>
    where
        Self: 'a;

    fn present<'a>(&'a self, display: &'a NotificationDisplay) -> Self::Fut<'a> {
        match self {
            WorkerNotifier::WebPush(notifier) => notifier.present(display),
            WorkerNotifier::Page(notifier) => notifier.present(display),
        }
    }

    fn close<'a>(&'a self, tag: &'a str) -> Self::Fut<'a> {
        match self {
            WorkerNotifier::WebPush(notifier) => notifier.close(tag),
            WorkerNotifier::Page(notifier) => notifier.close(tag),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ports::Reporter for TracingReporter {
    fn report(&self, context: &str, error: &dyn std::fmt::Display) {
        tracing::warn!(context, error = %error, "background task failed");
    }
}
