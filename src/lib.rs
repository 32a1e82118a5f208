pub mod adapters;
pub mod app;
pub mod assets;
pub mod auth;
pub mod config;
pub mod fetch;
pub mod notify;
pub mod pages;
pub mod ports;
pub mod schedule;
pub mod state;
pub mod store;
pub mod sync;
pub mod types;
pub mod vapid;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

pub use app::app;
pub use vapid::{VapidCredentials, generate_vapid_credentials};

use std::net::SocketAddr;
use std::sync::Arc;

use crate::adapters::{
    PageNotifier, ReqwestClient, TokioTimeProvider, TracingReporter, WebPushNotifier,
    WorkerNotifier,
};
use crate::vapid::VapidConfigStatus;

/// Runs the full worker lifecycle and serves the request surface:
/// install, activate, startup revalidation and sync, polling loop,
/// then the router.
pub async fn serve(addr: SocketAddr, config: config::WorkerConfig) {
    let store = store::WorkerStore::open(config.storage_root.clone(), config.flat_storage);
    let pages = pages::PageRegistry::new();
    let reporter: Arc<dyn ports::Reporter> = Arc::new(TracingReporter);
    let page_notifier = WorkerNotifier::Page(PageNotifier::new(pages.clone()));
    let notifier = match vapid::load_vapid_config(&config) {
        VapidConfigStatus::Ready(vapid) => match WebPushNotifier::new(vapid) {
            Ok(notifier) => WorkerNotifier::WebPush(notifier),
            Err(err) => {
                tracing::warn!(error = %err, "web push unavailable, notifications go to pages");
                page_notifier
            }
        },
        VapidConfigStatus::Incomplete => {
            tracing::warn!("incomplete VAPID configuration, notifications go to pages");
            page_notifier
        }
        VapidConfigStatus::Missing => page_notifier,
    };
    let notifier_handle = notifier.clone();

    let worker = Arc::new(worker::Worker::new(
        config,
        store,
        ReqwestClient::new(),
        TokioTimeProvider,
        notifier,
        pages,
        reporter,
    ));

    // Web push needs the stored subscription credentials to deliver.
    if let WorkerNotifier::WebPush(web_push) = &notifier_handle {
        match worker.load_subscription() {
            Ok(subscription) => web_push.set_subscription(subscription),
            Err(err) => tracing::warn!(error = %err, "failed to load stored subscription"),
        }
    }

    if let Err(err) = worker.install().await {
        tracing::warn!(error = %err, "asset install incomplete, serving from the network");
    }
    match worker.activate() {
        Ok(purged) if !purged.is_empty() => {
            tracing::info!(count = purged.len(), "purged stale buckets");
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(error = %err, "bucket purge failed"),
    }

    let startup = Arc::clone(&worker);
    worker.spawn_tracked(async move {
        if let Err(err) = startup.revalidate_token().await {
            tracing::warn!(error = %err, "token revalidation failed");
        }
        if let Err(err) = startup.check_subscription().await {
            tracing::warn!(error = %err, "subscription check failed");
        }
        if let Err(err) = startup.synchronizer().sync().await {
            tracing::warn!(error = %err, "initial schedule sync failed");
        }
    });

    let poller = Arc::clone(&worker);
    tokio::spawn(async move {
        poller.synchronizer().run().await;
    });

    let state = state::WorkerState::new(Arc::clone(&worker));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind address");
    tracing::info!(%addr, "worker listening");
    axum::serve(listener, app::app(state)).await.expect("server error");

    worker.wait_for_tasks().await;
}
