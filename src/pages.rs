use crate::types::NotificationDisplay;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

/// Events the worker pushes to a connected foreground page.
#[derive(Debug)]
pub enum PageEvent {
    /// Worker asks the page for the auth token it holds. The page
    /// answers on the enclosed channel; dropping it counts as "no
    /// token".
    RequestToken {
        reply: oneshot::Sender<Option<String>>,
    },
    /// Focus an existing window (or open one) at the given path.
    Focus { path: String },
    /// A notification delivered through the page surface.
    Notification { display: NotificationDisplay },
}

/// Registry of currently connected foreground pages. Pages come and go;
/// senders whose receiving side has gone are pruned on the next use.
#[derive(Clone, Default)]
pub struct PageRegistry {
    pages: Arc<Mutex<Vec<mpsc::UnboundedSender<PageEvent>>>>,
}

impl PageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects a page and returns its event stream. The page stays
    /// registered until it drops the receiver.
    pub fn register(&self) -> mpsc::UnboundedReceiver<PageEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.pages.lock().expect("pages lock").push(sender);
        receiver
    }

    pub fn connected(&self) -> usize {
        let mut pages = self.pages.lock().expect("pages lock");
        pages.retain(|page| !page.is_closed());
        pages.len()
    }

    /// Asks the first reachable page for its token. Pages that fail to
    /// answer are skipped; the caller bounds the overall wait.
    pub async fn request_token(&self) -> Option<String> {
        loop {
            let (reply, receiver) = oneshot::channel();
            let sent = {
                let mut pages = self.pages.lock().expect("pages lock");
                pages.retain(|page| !page.is_closed());
                match pages.first() {
                    Some(page) => page.send(PageEvent::RequestToken { reply }).is_ok(),
                    None => return None,
                }
            };
            if !sent {
                continue;
            }
            match receiver.await {
                Ok(token) => return token,
                // Page went away without answering; try the next one.
                Err(_) => continue,
            }
        }
    }

    /// Returns true if at least one page received the event.
    pub fn focus(&self, path: &str) -> bool {
        self.broadcast_first(PageEvent::Focus {
            path: path.to_string(),
        })
    }

    pub fn deliver_notification(&self, display: &NotificationDisplay) -> bool {
        self.broadcast_first(PageEvent::Notification {
            display: display.clone(),
        })
    }

    fn broadcast_first(&self, event: PageEvent) -> bool {
        let mut pages = self.pages.lock().expect("pages lock");
        pages.retain(|page| !page.is_closed());
        match pages.first() {
            Some(page) => page.send(event).is_ok(),
            None => false,
        }
    }
}

/// Token requests handed to a long-polling page, keyed by request id.
/// The page answers each id exactly once; requests whose worker side
/// already gave up waiting are evicted on the next stash.
#[derive(Default)]
pub struct PendingReplies {
    next: AtomicU64,
    waiting: Mutex<HashMap<u64, oneshot::Sender<Option<String>>>>,
}

impl PendingReplies {
    pub fn stash(&self, reply: oneshot::Sender<Option<String>>) -> u64 {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        let mut waiting = self.waiting.lock().expect("waiting lock");
        waiting.retain(|_, pending| !pending.is_closed());
        waiting.insert(id, reply);
        id
    }

    /// Completes the request; false when the id is unknown or the
    /// worker side already gave up waiting.
    pub fn answer(&self, id: u64, token: Option<String>) -> bool {
        match self.waiting.lock().expect("waiting lock").remove(&id) {
            Some(reply) => reply.send(token).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_token__should_return_none_without_pages() {
        let registry = PageRegistry::new();
        assert_eq!(registry.request_token().await, None);
    }

    #[tokio::test]
    async fn request_token__should_round_trip_to_a_connected_page() {
        // Given
        let registry = PageRegistry::new();
        let mut events = registry.register();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let PageEvent::RequestToken { reply } = event {
                    let _ = reply.send(Some("page-token".to_string()));
                }
            }
        });

        // When
        let token = registry.request_token().await;

        // Then
        assert_eq!(token.as_deref(), Some("page-token"));
    }

    #[tokio::test]
    async fn request_token__should_skip_pages_that_disconnected() {
        // Given
        let registry = PageRegistry::new();
        let gone = registry.register();
        drop(gone);
        let mut events = registry.register();
        tokio::spawn(async move {
            if let Some(PageEvent::RequestToken { reply }) = events.recv().await {
                let _ = reply.send(Some("second-page".to_string()));
            }
        });

        // When
        let token = registry.request_token().await;

        // Then
        assert_eq!(token.as_deref(), Some("second-page"));
    }

    #[tokio::test]
    async fn focus__should_report_whether_a_page_listened() {
        let registry = PageRegistry::new();
        assert!(!registry.focus("/"));

        let mut events = registry.register();
        assert!(registry.focus("/"));
        match events.recv().await {
            Some(PageEvent::Focus { path }) => assert_eq!(path, "/"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn pending_replies__should_complete_a_stashed_request_once() {
        // Given
        let pending = PendingReplies::default();
        let (reply, receiver) = oneshot::channel();
        let id = pending.stash(reply);

        // When
        let answered = pending.answer(id, Some("from-page".to_string()));
        let again = pending.answer(id, Some("from-page".to_string()));

        // Then
        assert!(answered);
        assert!(!again);
        assert_eq!(receiver.await, Ok(Some("from-page".to_string())));
    }

    #[tokio::test]
    async fn pending_replies__should_evict_abandoned_requests_on_stash() {
        // Given a request whose worker side stopped waiting
        let pending = PendingReplies::default();
        let (reply, receiver) = oneshot::channel();
        let abandoned = pending.stash(reply);
        drop(receiver);

        // When another request comes in
        let (reply, _receiver) = oneshot::channel();
        let live = pending.stash(reply);

        // Then only the live request remains
        assert!(!pending.answer(abandoned, Some("too-late".to_string())));
        let waiting = pending.waiting.lock().expect("waiting lock");
        assert_eq!(waiting.keys().collect::<Vec<_>>(), vec![&live]);
    }

    #[tokio::test]
    async fn pending_replies__should_reject_unknown_request_ids() {
        let pending = PendingReplies::default();
        assert!(!pending.answer(42, None));
    }
}
