use std::sync::Arc;

use crate::config::BucketNames;
use crate::fetch::CachedResponse;
use crate::ports::{HttpClient, Reporter};
use crate::store::{BucketStore, StoreError};
use crate::types::{HttpRequest, HttpResponse};

#[derive(Debug)]
pub enum InstallError {
    Fetch { url: String, detail: String },
    Storage(StoreError),
}

impl std::fmt::Display for InstallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallError::Fetch { url, detail } => {
                write!(f, "failed to pre-fetch '{url}': {detail}")
            }
            InstallError::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl From<StoreError> for InstallError {
    fn from(err: StoreError) -> Self {
        InstallError::Storage(err)
    }
}

/// Install-time pre-fetch of the fixed asset manifest plus
/// cache-first serving for requests matching it. Assets are public, so
/// all fetches here are unauthenticated.
#[derive(Clone)]
pub struct AssetCache<C, S> {
    http: C,
    store: S,
    buckets: BucketNames,
    manifest: Vec<String>,
    upstream: String,
    reporter: Arc<dyn Reporter>,
}

impl<C: HttpClient, S: BucketStore> AssetCache<C, S> {
    pub fn new(
        http: C,
        store: S,
        buckets: BucketNames,
        manifest: Vec<String>,
        upstream: String,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            http,
            store,
            buckets,
            manifest,
            upstream: upstream.trim_end_matches('/').to_string(),
            reporter,
        }
    }

    fn resolve(&self, entry: &str) -> String {
        if entry.starts_with("http://") || entry.starts_with("https://") {
            entry.to_string()
        } else {
            format!("{}{entry}", self.upstream)
        }
    }

    pub fn matches(&self, requested: &str) -> bool {
        self.manifest.iter().any(|entry| entry == requested)
    }

    /// Fetches every manifest URL and commits all of them to the static
    /// bucket, or none: a single failed fetch aborts the install with
    /// nothing written (`addAll` semantics).
    pub async fn install(&self) -> Result<(), InstallError> {
        let mut fetched = Vec::with_capacity(self.manifest.len());
        for entry in &self.manifest {
            let response = self
                .http
                .execute(HttpRequest::get(self.resolve(entry)))
                .await
                .map_err(|err| InstallError::Fetch {
                    url: entry.clone(),
                    detail: err.to_string(),
                })?;
            if !response.is_success() {
                return Err(InstallError::Fetch {
                    url: entry.clone(),
                    detail: format!("status {}", response.status),
                });
            }
            fetched.push((entry.clone(), response));
        }

        for name in self.buckets.all() {
            self.store.create_bucket(name)?;
        }
        for (entry, response) in fetched {
            let cached = CachedResponse::from_response(&response);
            let bytes = serde_json::to_vec(&cached).map_err(|_| StoreError::InvalidKey)?;
            if let Err(err) = self.store.put(&self.buckets.static_assets, &entry, &bytes) {
                // Half-written static bucket is worse than none.
                let _ = self.store.delete_bucket(&self.buckets.static_assets);
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Activation: every bucket whose name is not part of the current
    /// version's set is deleted. Returns the purged names.
    pub fn purge_stale_buckets(&self) -> Result<Vec<String>, StoreError> {
        let keep = self.buckets.all();
        let mut purged = Vec::new();
        for bucket in self.store.buckets()? {
            if !keep.contains(&bucket.as_str()) {
                self.store.delete_bucket(&bucket)?;
                purged.push(bucket);
            }
        }
        Ok(purged)
    }

    /// Cache first, network second; a network hit is persisted for next
    /// time. Storage trouble during that opportunistic write must not
    /// fail the response.
    pub async fn serve(&self, requested: &str) -> Result<HttpResponse, String> {
        match self.store.get(&self.buckets.static_assets, requested) {
            Ok(Some(bytes)) => {
                if let Ok(cached) = serde_json::from_slice::<CachedResponse>(&bytes) {
                    return Ok(cached.into_response());
                }
            }
            Ok(None) => {}
            Err(err) => self.reporter.report("asset-cache-read", &err),
        }

        let response = self
            .http
            .execute(HttpRequest::get(self.resolve(requested)))
            .await
            .map_err(|err| err.to_string())?;
        if response.is_success() {
            let cached = CachedResponse::from_response(&response);
            if let Ok(bytes) = serde_json::to_vec(&cached)
                && let Err(err) = self
                    .store
                    .put(&self.buckets.static_assets, requested, &bytes)
            {
                self.reporter.report("asset-cache-write", &err);
            }
        }
        Ok(response)
    }
}
