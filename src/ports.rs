use std::time::Duration;

use time::OffsetDateTime;

use crate::types::{HttpRequest, HttpResponse, NotificationDisplay};

pub trait TimeProvider: Clone + Send + Sync + 'static {
    type Sleep<'a>: Future<Output = ()> + Send + 'a
    where
        Self: 'a;

    fn now(&self) -> OffsetDateTime;
    fn sleep<'a>(&'a self, duration: Duration) -> Self::Sleep<'a>;
}

/// Outbound HTTP seam. The worker never talks to the network directly;
/// tests substitute a scripted client.
pub trait HttpClient: Clone + Send + Sync + 'static {
    type Error: std::fmt::Display + Send + Sync + 'static;
    type Fut<'a>: Future<Output = Result<HttpResponse, Self::Error>> + Send + 'a
    where
        Self: 'a;

    fn execute<'a>(&'a self, request: HttpRequest) -> Self::Fut<'a>;
}

/// Renders a notification for the user, and withdraws one by tag.
/// `close` is best-effort; adapters without a retraction channel
/// report success without doing anything.
pub trait Notifier: Clone + Send + Sync + 'static {
    type Error: std::fmt::Display + Send + Sync + 'static;
    type Fut<'a>: Future<Output = Result<(), Self::Error>> + Send + 'a
    where
        Self: 'a;

    fn present<'a>(&'a self, display: &'a NotificationDisplay) -> Self::Fut<'a>;
    fn close<'a>(&'a self, tag: &'a str) -> Self::Fut<'a>;
}

/// Sink for background-task failures that do not abort their caller
/// (schedule sync, subscription restore). One seam, so tests can
/// assert on them instead of scraping logs.
pub trait Reporter: Send + Sync + 'static {
    fn report(&self, context: &str, error: &dyn std::fmt::Display);
}
