use serde::{Deserialize, Serialize};
use serde_json::json;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;

use crate::assets::{AssetCache, InstallError};
use crate::auth::{PageTokenSource, TokenResolver, TokenVault, VaultTokenSource};
use crate::config::{BucketNames, WorkerConfig};
use crate::fetch::{ApiClient, ApiProxy, FetchError};
use crate::notify::{ClickOutcome, PresentError, Presenter, parse_push_payload};
use crate::pages::PageRegistry;
use crate::ports::{HttpClient, Notifier, Reporter, TimeProvider};
use crate::schedule::{ScheduleEntry, ScheduleStore};
use crate::store::{BucketStore, StoreError};
use crate::sync::Synchronizer;
use crate::types::{HttpRequest, StoredSubscription};

pub const SUBSCRIPTION_KEY: &str = "subscription";

/// Messages a foreground page may post to the worker. The wire `type`
/// tags match the page-side protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum PageMessage {
    #[serde(rename = "STORE_AUTH_TOKEN")]
    StoreAuthToken { token: String },
    #[serde(rename = "CLEAR_AUTH_TOKEN")]
    ClearAuthToken,
    #[serde(rename = "GET_AUTH_TOKEN")]
    GetAuthToken,
    #[serde(rename = "CHECK_SUBSCRIPTION")]
    CheckSubscription,
    #[serde(rename = "UNSUBSCRIBE")]
    Unsubscribe,
    #[serde(rename = "SYNC_NOTIFICATIONS")]
    SyncNotifications,
    #[serde(rename = "CLEANUP_NOTIFICATIONS")]
    CleanupNotifications { participants: Vec<i64> },
    #[serde(rename = "GET_NOTIFICATION_SCHEDULES")]
    GetNotificationSchedules,
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
    #[serde(rename = "SHOW_TEST_NOTIFICATION")]
    ShowTestNotification,
}

/// Every message handler posts exactly one reply. Storage failures for
/// explicit page actions surface in the `error` field instead of being
/// swallowed.
#[derive(Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PageReply {
    Token {
        token: Option<String>,
    },
    Schedules {
        schedules: Vec<ScheduleEntry>,
    },
    Subscription {
        success: bool,
        subscribed: bool,
    },
    Ack {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl PageReply {
    pub(crate) fn ok() -> Self {
        PageReply::Ack {
            success: true,
            error: None,
        }
    }

    pub(crate) fn err(error: impl std::fmt::Display) -> Self {
        PageReply::Ack {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionStatus {
    #[serde(default)]
    active: bool,
}

/// The background worker: owns the stores, the authenticated client and
/// the notification machinery, and dispatches lifecycle events and
/// page messages.
pub struct Worker<S, C, T, N> {
    config: WorkerConfig,
    buckets: BucketNames,
    vault: TokenVault<S>,
    schedules: ScheduleStore<S>,
    assets: AssetCache<C, S>,
    proxy: ApiProxy<C, S>,
    api: ApiClient<C>,
    presenter: Presenter<C, N>,
    synchronizer: Synchronizer<S, C, T, N>,
    pages: PageRegistry,
    store: S,
    time: T,
    notifier: N,
    reporter: Arc<dyn Reporter>,
    controlling: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<S, C, T, N> Worker<S, C, T, N>
where
    S: BucketStore + Clone + Send + Sync + 'static,
    C: HttpClient,
    T: TimeProvider,
    N: Notifier,
{
    pub fn new(
        config: WorkerConfig,
        store: S,
        http: C,
        time: T,
        notifier: N,
        pages: PageRegistry,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let buckets = config.bucket_names();
        let vault = TokenVault::new(store.clone(), buckets.auth.clone());
        let resolver = TokenResolver::new(vec![
            Arc::new(VaultTokenSource::new(vault.clone())),
            Arc::new(PageTokenSource::new(
                pages.clone(),
                time.clone(),
                config.page_reply_timeout,
            )),
        ]);
        let api = ApiClient::new(http.clone(), resolver, config.upstream.clone());
        let schedules = ScheduleStore::new(store.clone(), buckets.notifications.clone());
        let assets = AssetCache::new(
            http.clone(),
            store.clone(),
            buckets.clone(),
            config.asset_manifest.clone(),
            config.upstream.clone(),
            reporter.clone(),
        );
        let proxy = ApiProxy::new(
            api.clone(),
            store.clone(),
            buckets.data.clone(),
            reporter.clone(),
        );
        let presenter = Presenter::new(
            api.clone(),
            notifier.clone(),
            pages.clone(),
            config.app_name.clone(),
            reporter.clone(),
        );
        let synchronizer = Synchronizer::new(
            schedules.clone(),
            api.clone(),
            presenter.clone(),
            time.clone(),
            reporter.clone(),
            config.notifications_allowed,
            config.poll_interval,
        );
        Self {
            config,
            buckets,
            vault,
            schedules,
            assets,
            proxy,
            api,
            presenter,
            synchronizer,
            pages,
            store,
            time,
            notifier,
            reporter,
            controlling: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn pages(&self) -> &PageRegistry {
        &self.pages
    }

    pub fn assets(&self) -> &AssetCache<C, S> {
        &self.assets
    }

    pub fn proxy(&self) -> &ApiProxy<C, S> {
        &self.proxy
    }

    pub fn api(&self) -> &ApiClient<C> {
        &self.api
    }

    pub fn presenter(&self) -> &Presenter<C, N> {
        &self.presenter
    }

    pub fn synchronizer(&self) -> &Synchronizer<S, C, T, N> {
        &self.synchronizer
    }

    /// Install: pre-fetch the asset manifest, all-or-nothing.
    pub async fn install(&self) -> Result<(), InstallError> {
        self.assets.install().await
    }

    /// Activate: purge buckets from other versions and take control of
    /// the request surface.
    pub fn activate(&self) -> Result<Vec<String>, StoreError> {
        let purged = self.assets.purge_stale_buckets()?;
        self.controlling.store(true, Ordering::SeqCst);
        Ok(purged)
    }

    pub fn is_controlling(&self) -> bool {
        self.controlling.load(Ordering::SeqCst)
    }

    pub async fn handle_message(&self, message: PageMessage) -> PageReply {
        match message {
            PageMessage::StoreAuthToken { token } => {
                match self.vault.save(&token, self.time.now()) {
                    Ok(()) => PageReply::ok(),
                    Err(err) => PageReply::err(err),
                }
            }
            PageMessage::ClearAuthToken => match self.vault.clear() {
                Ok(()) => PageReply::ok(),
                Err(err) => PageReply::err(err),
            },
            PageMessage::GetAuthToken => PageReply::Token {
                token: self
                    .vault
                    .load()
                    .ok()
                    .flatten()
                    .map(|record| record.token),
            },
            PageMessage::CheckSubscription => match self.check_subscription().await {
                Ok(subscribed) => PageReply::Subscription {
                    success: true,
                    subscribed,
                },
                Err(err) => PageReply::err(err),
            },
            PageMessage::Unsubscribe => match self.unsubscribe().await {
                Ok(()) => PageReply::ok(),
                Err(err) => PageReply::err(err),
            },
            PageMessage::SyncNotifications => match self.synchronizer.sync().await {
                Ok(_) => PageReply::ok(),
                Err(err) => PageReply::err(err),
            },
            PageMessage::CleanupNotifications { participants } => {
                match self.cleanup_schedules(&participants).await {
                    Ok(()) => PageReply::ok(),
                    Err(err) => PageReply::err(err),
                }
            }
            PageMessage::GetNotificationSchedules => match self.schedules.get_all() {
                Ok(schedules) => PageReply::Schedules { schedules },
                Err(err) => PageReply::err(err),
            },
            PageMessage::SkipWaiting => {
                self.controlling.store(true, Ordering::SeqCst);
                PageReply::ok()
            }
            PageMessage::ShowTestNotification => {
                let display = parse_push_payload(b"Testbenachrichtigung", &self.config.app_name);
                match self.notifier.present(&display).await {
                    Ok(()) => PageReply::ok(),
                    Err(err) => PageReply::err(err),
                }
            }
        }
    }

    /// Removes every schedule entry of the given participants and
    /// withdraws any notification still on display for them.
    pub async fn cleanup_schedules(&self, participants: &[i64]) -> Result<(), StoreError> {
        let removed = self.schedules.delete_where(participants)?;
        for entry in removed.iter().filter(|entry| !entry.processed) {
            self.presenter.withdraw(&entry.id).await;
        }
        Ok(())
    }

    /// Push event entry point: parse the payload (degrading to plain
    /// text) and present it. A sync-tagged push additionally refreshes
    /// the schedule store.
    pub async fn on_push(&self, data: &[u8]) -> Result<(), PresentError> {
        let display = parse_push_payload(data, &self.config.app_name);
        if display.tag == "schedule-sync" {
            if let Err(err) = self.synchronizer.sync().await {
                self.reporter.report("push-sync", &err);
            }
        }
        self.notifier
            .present(&display)
            .await
            .map_err(|err| PresentError::Notify(err.to_string()))
    }

    pub async fn on_notification_click(
        &self,
        action: &str,
        data: serde_json::Value,
    ) -> Result<ClickOutcome, PresentError> {
        self.presenter
            .on_notification_click(action, data, self.time.now())
            .await
    }

    pub fn load_subscription(&self) -> Result<Option<StoredSubscription>, StoreError> {
        let Some(bytes) = self
            .store
            .get(&self.buckets.notifications, SUBSCRIPTION_KEY)?
        else {
            return Ok(None);
        };
        Ok(serde_json::from_slice(&bytes).ok())
    }

    pub fn save_subscription(&self, subscription: &StoredSubscription) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(subscription).map_err(|_| StoreError::InvalidKey)?;
        self.store
            .put(&self.buckets.notifications, SUBSCRIPTION_KEY, &bytes)
    }

    /// Verifies the stored push subscription against the server and
    /// restores it when the server marked it inactive or lost it.
    /// Returns whether an active subscription exists afterwards.
    pub async fn check_subscription(&self) -> Result<bool, FetchError> {
        let Some(stored) = self.load_subscription()? else {
            return Ok(false);
        };
        let needs_restore = match self
            .api
            .get_json::<SubscriptionStatus>("/api/notifications/subscription")
            .await
        {
            Ok(status) => !status.active,
            Err(FetchError::Upstream(404)) => true,
            Err(err) => return Err(err),
        };
        if needs_restore {
            self.api
                .send_json(
                    axum::http::Method::POST,
                    "/api/notifications/subscription",
                    &json!({
                        "subscription": {
                            "endpoint": stored.endpoint,
                            "keys": { "p256dh": stored.p256dh, "auth": stored.auth },
                        },
                        "participantIds": stored.participant_ids,
                    }),
                )
                .await?;
        }
        Ok(true)
    }

    /// Opt-out: tells the server to drop the subscription and removes
    /// the stored record. A record that is already gone is not an
    /// error.
    pub async fn unsubscribe(&self) -> Result<(), FetchError> {
        let Some(stored) = self.load_subscription()? else {
            return Ok(());
        };
        let request = HttpRequest {
            method: axum::http::Method::DELETE,
            url: self.api.url("/api/notifications/subscription"),
            headers: Vec::new(),
            body: None,
        }
        .with_json(&json!({ "endpoint": stored.endpoint }));
        self.api.fetch_with_auth(request).await?;
        self.store
            .delete(&self.buckets.notifications, SUBSCRIPTION_KEY)?;
        Ok(())
    }

    /// Revalidates the stored token against the server; a rejected
    /// token is cleared so later resolutions fall through to the page.
    pub async fn revalidate_token(&self) -> Result<(), FetchError> {
        let Some(record) = self.vault.load()? else {
            return Ok(());
        };
        match self
            .api
            .send_json(axum::http::Method::POST, "/validate-auth", &record)
            .await
        {
            Ok(_) => Ok(()),
            Err(FetchError::AuthRejected) => {
                self.vault.clear()?;
                Err(FetchError::AuthRejected)
            }
            Err(err) => Err(err),
        }
    }

    /// Extend-lifetime contract: event work spawned here is tracked so
    /// shutdown can wait for in-flight handlers instead of tearing them
    /// down mid-write.
    pub fn spawn_tracked<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut handles = self.handles.lock().expect("handles lock");
        handles.retain(|handle| !handle.is_finished());
        handles.push(tokio::spawn(task));
    }

    pub async fn wait_for_tasks(&self) {
        let drained: Vec<JoinHandle<()>> = {
            let mut handles = self.handles.lock().expect("handles lock");
            handles.drain(..).collect()
        };
        for handle in drained {
            let _ = handle.await;
        }
    }
}
