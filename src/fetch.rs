use serde::{Deserialize, Serialize};

use std::sync::Arc;

use crate::auth::TokenResolver;
use crate::ports::{HttpClient, Reporter};
use crate::store::{BucketStore, StoreError};
use crate::types::{HttpRequest, HttpResponse};

#[derive(Debug)]
pub enum FetchError {
    /// No token resolvable anywhere; raised before any network call.
    Unauthenticated,
    /// The server answered 401 to a token we did resolve.
    AuthRejected,
    Network(String),
    Upstream(u16),
    Decode(serde_json::Error),
    Storage(StoreError),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Unauthenticated => f.write_str("no auth token resolvable"),
            FetchError::AuthRejected => f.write_str("auth token rejected by server"),
            FetchError::Network(err) => write!(f, "network unreachable: {err}"),
            FetchError::Upstream(status) => write!(f, "upstream returned status {status}"),
            FetchError::Decode(err) => write!(f, "malformed upstream response: {err}"),
            FetchError::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl From<StoreError> for FetchError {
    fn from(err: StoreError) -> Self {
        FetchError::Storage(err)
    }
}

/// Authenticated HTTP access to the walking bus server.
#[derive(Clone)]
pub struct ApiClient<C> {
    http: C,
    resolver: TokenResolver,
    upstream: String,
}

impl<C: HttpClient> ApiClient<C> {
    pub fn new(http: C, resolver: TokenResolver, upstream: String) -> Self {
        Self {
            http,
            resolver,
            upstream: upstream.trim_end_matches('/').to_string(),
        }
    }

    /// Absolute URLs pass through; paths resolve against the upstream.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{path}", self.upstream)
        }
    }

    /// Resolves a token, attaches it as a bearer header and executes
    /// the request. Fails with `Unauthenticated` before touching the
    /// network when no token is resolvable; maps an HTTP 401 to
    /// `AuthRejected`. Neither is retried here.
    pub async fn fetch_with_auth(&self, mut request: HttpRequest) -> Result<HttpResponse, FetchError> {
        let token = self
            .resolver
            .resolve()
            .await
            .ok_or(FetchError::Unauthenticated)?;
        request.headers.push((
            "authorization".to_string(),
            format!("Bearer {}", token.token),
        ));
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|err| FetchError::Network(err.to_string()))?;
        if response.status == 401 {
            return Err(FetchError::AuthRejected);
        }
        Ok(response)
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, FetchError> {
        let response = self
            .fetch_with_auth(HttpRequest::get(self.url(path)))
            .await?;
        if !response.is_success() {
            return Err(FetchError::Upstream(response.status));
        }
        response.json().map_err(FetchError::Decode)
    }

    pub async fn send_json(
        &self,
        method: axum::http::Method,
        path: &str,
        body: &impl Serialize,
    ) -> Result<HttpResponse, FetchError> {
        let request = HttpRequest {
            method,
            url: self.url(path),
            headers: Vec::new(),
            body: None,
        }
        .with_json(body);
        let response = self.fetch_with_auth(request).await?;
        if !response.is_success() {
            return Err(FetchError::Upstream(response.status));
        }
        Ok(response)
    }

    /// Unauthenticated request, used where no token is required.
    pub async fn fetch_plain(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|err| FetchError::Network(err.to_string()))?;
        Ok(response)
    }
}

/// Body as stored in the proxied-data bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl CachedResponse {
    pub fn from_response(response: &HttpResponse) -> Self {
        Self {
            status: response.status,
            content_type: response.content_type.clone(),
            body: base64::encode_config(&response.body, base64::STANDARD),
        }
    }

    pub fn into_response(self) -> HttpResponse {
        HttpResponse {
            status: self.status,
            content_type: self.content_type,
            body: base64::decode_config(&self.body, base64::STANDARD).unwrap_or_default(),
        }
    }
}

/// Read-through cache in front of the API: live responses are stored in
/// the proxied-data bucket and served again when the network goes away.
/// Cached data is best-effort and may be stale; the only eviction is
/// the whole-bucket purge at activation.
#[derive(Clone)]
pub struct ApiProxy<C, S> {
    api: ApiClient<C>,
    store: S,
    bucket: String,
    reporter: Arc<dyn Reporter>,
}

impl<C: HttpClient, S: BucketStore> ApiProxy<C, S> {
    pub fn new(api: ApiClient<C>, store: S, bucket: String, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            api,
            store,
            bucket,
            reporter,
        }
    }

    /// Only GET responses are cached; mutating requests pass straight
    /// through.
    pub async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        let cacheable = request.method == axum::http::Method::GET;
        let cache_key = request.url.clone();
        match self.api.fetch_with_auth(request).await {
            Ok(response) if response.is_success() => {
                if cacheable {
                    let cached = CachedResponse::from_response(&response);
                    if let Ok(bytes) = serde_json::to_vec(&cached)
                        && let Err(err) = self.store.put(&self.bucket, &cache_key, &bytes)
                    {
                        self.reporter.report("api-proxy-cache-write", &err);
                    }
                }
                Ok(response)
            }
            // Auth failures propagate; serving stale data would mask a
            // logged-out session.
            Err(err @ (FetchError::Unauthenticated | FetchError::AuthRejected)) => Err(err),
            Ok(response) => self.cached_or(cache_key, FetchError::Upstream(response.status)),
            Err(err) => self.cached_or(cache_key, err),
        }
    }

    fn cached_or(&self, cache_key: String, failure: FetchError) -> Result<HttpResponse, FetchError> {
        match self.store.get(&self.bucket, &cache_key) {
            Ok(Some(bytes)) => match serde_json::from_slice::<CachedResponse>(&bytes) {
                Ok(cached) => Ok(cached.into_response()),
                Err(_) => Err(failure),
            },
            _ => Err(failure),
        }
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use crate::auth::{AuthToken, TokenSource};
    use crate::store::memory::MemoryStore;
    use crate::testutil::{ScriptedClient, TestReporter, datetime, status};
    use serde_json::json;
    use std::pin::Pin;

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

    fn resolver(token: Option<&'static str>) -> TokenResolver {
        TokenResolver::new(vec![Arc::new(FixedSource(token))])
    }

    fn api(http: &ScriptedClient, token: Option<&'static str>) -> ApiClient<ScriptedClient> {
        ApiClient::new(http.clone(), resolver(token), "https://bus.example.org".to_string())
    }

    #[tokio::test]
    async fn fetch_with_auth__should_fail_before_any_network_call_without_token() {
        // Given
        let http = ScriptedClient::new();
        let api = api(&http, None);

        // When
        let result = api
            .fetch_with_auth(HttpRequest::get("https://bus.example.org/api/x"))
            .await;

        // Then
        assert!(matches!(result, Err(FetchError::Unauthenticated)));
        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn fetch_with_auth__should_attach_bearer_header() {
        // Given
        let http = ScriptedClient::new();
        http.respond_json("GET", "/api/x", json!({"ok": true}));
        let api = api(&http, Some("secret"));

        // When
        api.fetch_with_auth(HttpRequest::get("https://bus.example.org/api/x"))
            .await
            .expect("fetch");

        // Then
        let requests = http.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0]
            .headers
            .iter()
            .any(|(name, value)| name == "authorization" && value == "Bearer secret"));
    }

    #[tokio::test]
    async fn fetch_with_auth__should_map_401_to_auth_rejected() {
        // Given
        let http = ScriptedClient::new();
        http.respond("GET", "/api/x", status(401));
        let api = api(&http, Some("stale"));

        // When
        let result = api
            .fetch_with_auth(HttpRequest::get("https://bus.example.org/api/x"))
            .await;

        // Then
        assert!(matches!(result, Err(FetchError::AuthRejected)));
    }

    #[tokio::test]
    async fn proxy__should_serve_cached_copy_on_network_failure() {
        // Given a successful fetch that populated the cache
        let http = ScriptedClient::new();
        http.respond_json("GET", "/api/daily-status", json!({"fresh": true}));
        let store = MemoryStore::default();
        let proxy = ApiProxy::new(
            api(&http, Some("secret")),
            store.clone(),
            "walking-bus-data-v1".to_string(),
            Arc::new(TestReporter::new()),
        );
        let url = "https://bus.example.org/api/daily-status";
        proxy.fetch(HttpRequest::get(url)).await.expect("live fetch");

        // When the network goes away
        let offline = ScriptedClient::new();
        offline.fail("GET", "/api/daily-status");
        let proxy = ApiProxy::new(
            ApiClient::new(offline, resolver(Some("secret")), "https://bus.example.org".to_string()),
            store,
            "walking-bus-data-v1".to_string(),
            Arc::new(TestReporter::new()),
        );
        let response = proxy.fetch(HttpRequest::get(url)).await.expect("cached fetch");

        // Then
        assert_eq!(response.status, 200);
        assert_eq!(response.body, serde_json::to_vec(&json!({"fresh": true})).expect("body"));
    }

    #[tokio::test]
    async fn proxy__should_propagate_failure_without_cached_copy() {
        // Given
        let http = ScriptedClient::new();
        http.fail("GET", "/api/daily-status");
        let proxy = ApiProxy::new(
            api(&http, Some("secret")),
            MemoryStore::default(),
            "walking-bus-data-v1".to_string(),
            Arc::new(TestReporter::new()),
        );

        // When
        let result = proxy
            .fetch(HttpRequest::get("https://bus.example.org/api/daily-status"))
            .await;

        // Then
        assert!(matches!(result, Err(FetchError::Network(_))));
    }

    #[tokio::test]
    async fn proxy__should_not_mask_auth_rejection_with_cached_data() {
        // Given a cache seeded from an earlier session
        let store = MemoryStore::default();
        let url = "https://bus.example.org/api/daily-status";
        let cached = CachedResponse {
            status: 200,
            content_type: None,
            body: base64::encode_config(b"stale", base64::STANDARD),
        };
        store
            .put(
                "walking-bus-data-v1",
                url,
                &serde_json::to_vec(&cached).expect("serialize"),
            )
            .expect("seed cache");
        let http = ScriptedClient::new();
        http.respond("GET", "/api/daily-status", status(401));
        let proxy = ApiProxy::new(
            api(&http, Some("stale")),
            store,
            "walking-bus-data-v1".to_string(),
            Arc::new(TestReporter::new()),
        );

        // When
        let result = proxy.fetch(HttpRequest::get(url)).await;

        // Then
        assert!(matches!(result, Err(FetchError::AuthRejected)));
    }
}
