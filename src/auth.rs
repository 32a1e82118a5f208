use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::pages::PageRegistry;
use crate::ports::TimeProvider;
use crate::store::{BucketStore, StoreError};

pub const AUTH_TOKEN_KEY: &str = "auth-token";

/// The single bearer-token record. Overwritten on login, deleted on
/// logout; the foreground page may hold its own copy for immediate use
/// but this store is the worker's source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthToken {
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub stored_at: OffsetDateTime,
}

/// Read/write access to the auth bucket.
#[derive(Debug, Clone)]
pub struct TokenVault<S> {
    store: S,
    bucket: String,
}

impl<S: BucketStore> TokenVault<S> {
    pub fn new(store: S, bucket: String) -> Self {
        Self { store, bucket }
    }

    pub fn save(&self, token: &str, now: OffsetDateTime) -> Result<(), StoreError> {
        let record = AuthToken {
            token: token.to_string(),
            stored_at: now,
        };
        let bytes = serde_json::to_vec(&record).map_err(|_| StoreError::InvalidKey)?;
        self.store.put(&self.bucket, AUTH_TOKEN_KEY, &bytes)
    }

    /// A record that fails to parse counts as absent rather than as an
    /// error; resolution then falls through to the next source.
    pub fn load(&self) -> Result<Option<AuthToken>, StoreError> {
        let Some(bytes) = self.store.get(&self.bucket, AUTH_TOKEN_KEY)? else {
            return Ok(None);
        };
        Ok(serde_json::from_slice(&bytes).ok())
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.delete(&self.bucket, AUTH_TOKEN_KEY)
    }
}

/// One strategy in the ordered token-resolution chain.
pub trait TokenSource: Send + Sync {
    fn resolve(&self) -> Pin<Box<dyn Future<Output = Option<AuthToken>> + Send + '_>>;
}

/// Tries each source in order and returns the first token found.
#[derive(Clone)]
pub struct TokenResolver {
    sources: Vec<Arc<dyn TokenSource>>,
}

impl TokenResolver {
    pub fn new(sources: Vec<Arc<dyn TokenSource>>) -> Self {
        Self { sources }
    }

    pub async fn resolve(&self) -> Option<AuthToken> {
        for source in &self.sources {
            if let Some(token) = source.resolve().await {
                return Some(token);
            }
        }
        None
    }
}

/// Source 1: the persistent auth bucket.
pub struct VaultTokenSource<S> {
    vault: TokenVault<S>,
}

impl<S: BucketStore> VaultTokenSource<S> {
    pub fn new(vault: TokenVault<S>) -> Self {
        Self { vault }
    }
}

impl<S: BucketStore + 'static> TokenSource for VaultTokenSource<S> {
    fn resolve(&self) -> Pin<Box<dyn Future<Output = Option<AuthToken>> + Send + '_>> {
        let token = self.vault.load().ok().flatten();
        Box::pin(std::future::ready(token))
    }
}

/// Source 2: round-trip to the first reachable foreground page. The
/// wait is bounded; a page that never answers must not suspend the
/// caller forever.
pub struct PageTokenSource<T> {
    pages: PageRegistry,
    time: T,
    timeout: Duration,
}

impl<T: TimeProvider> PageTokenSource<T> {
    pub fn new(pages: PageRegistry, time: T, timeout: Duration) -> Self {
        Self {
            pages,
            time,
            timeout,
        }
    }
}

impl<T: TimeProvider> TokenSource for PageTokenSource<T> {
    fn resolve(&self) -> Pin<Box<dyn Future<Output = Option<AuthToken>> + Send + '_>> {
        Box::pin(async move {
            let token = tokio::select! {
                token = self.pages.request_token() => token,
                () = self.time.sleep(self.timeout) => None,
            };
            token.map(|token| AuthToken {
                token,
                stored_at: self.time.now(),
            })
        })
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::testutil::{TestTime, datetime};

    struct FixedSource(Option<&'static str>);

    impl TokenSource for FixedSource {
        fn resolve(&self) -> Pin<Box<dyn Future<Output = Option<AuthToken>> + Send + '_>> {
            let token = self.0.map(|token| AuthToken {
                token: token.to_string(),
                stored_at: datetime("2024-05-01T06:00:00Z"),
            });
            Box::pin(std::future::ready(token))
        }
    }

    #[tokio::test]
    async fn resolve__should_return_first_source_with_a_token() {
        // Given
        let resolver = TokenResolver::new(vec![
            Arc::new(FixedSource(None)),
            Arc::new(FixedSource(Some("from-second"))),
            Arc::new(FixedSource(Some("from-third"))),
        ]);

        // When
        let token = resolver.resolve().await;

        // Then
        assert_eq!(token.expect("token").token, "from-second");
    }

    #[tokio::test]
    async fn resolve__should_return_none_when_all_sources_fail() {
        let resolver =
            TokenResolver::new(vec![Arc::new(FixedSource(None)), Arc::new(FixedSource(None))]);
        assert!(resolver.resolve().await.is_none());
    }

    #[test]
    fn vault__should_overwrite_on_save_and_remove_on_clear() {
        // Given
        let vault = TokenVault::new(MemoryStore::default(), "walking-bus-auth-v1".to_string());
        let earlier = datetime("2024-05-01T06:00:00Z");
        let later = datetime("2024-05-01T07:00:00Z");

        // When
        vault.save("first", earlier).expect("save first");
        vault.save("second", later).expect("save second");

        // Then
        let record = vault.load().expect("load").expect("record");
        assert_eq!(record.token, "second");
        assert_eq!(record.stored_at, later);

        vault.clear().expect("clear");
        assert!(vault.load().expect("load").is_none());
    }

    #[test]
    fn vault__should_treat_corrupt_records_as_absent() {
        // Given
        let store = MemoryStore::default();
        store
            .put("walking-bus-auth-v1", AUTH_TOKEN_KEY, b"not json")
            .expect("put");
        let vault = TokenVault::new(store, "walking-bus-auth-v1".to_string());

        // Then
        assert!(vault.load().expect("load").is_none());
    }

    #[tokio::test]
    async fn page_source__should_time_out_when_no_page_answers() {
        // Given a page that connects but never replies
        let pages = PageRegistry::new();
        let _events = pages.register();
        let time = TestTime::new(datetime("2024-05-01T06:00:00Z"));
        let source = PageTokenSource::new(pages, time.clone(), Duration::from_secs(3));

        // When
        let token = source.resolve().await;

        // Then
        assert!(token.is_none());
        assert_eq!(time.sleep_durations(), vec![Duration::from_secs(3)]);
    }

    #[tokio::test]
    async fn page_source__should_wrap_the_page_reply_in_a_record() {
        // Given a page that answers well before the timeout
        let pages = PageRegistry::new();
        let mut events = pages.register();
        tokio::spawn(async move {
            if let Some(crate::pages::PageEvent::RequestToken { reply }) = events.recv().await {
                let _ = reply.send(Some("page-token".to_string()));
            }
        });
        let source = PageTokenSource::new(
            pages,
            crate::adapters::TokioTimeProvider,
            Duration::from_secs(60),
        );

        // When
        let token = source.resolve().await.expect("token");

        // Then
        assert_eq!(token.token, "page-token");
    }
}
