use std::path::PathBuf;
use std::time::Duration;

/// Everything the worker knows about its environment. There is
/// deliberately no global state; each component receives the pieces it
/// needs at construction.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Base URL of the walking bus server, e.g. `https://bus.example.org`.
    pub upstream: String,
    pub app_name: String,
    /// Version tag embedded in every bucket name. Buckets carrying a
    /// different tag are purged on activation.
    pub version_tag: String,
    pub cache_prefix: String,
    /// Fixed list of URLs pre-fetched into the static bucket at install
    /// time. Relative entries are resolved against `upstream`.
    pub asset_manifest: Vec<String>,
    pub api_prefix: String,
    pub storage_root: PathBuf,
    /// Fall back to the flat key-prefixed storage layout on platforms
    /// without reliable directory listing.
    pub flat_storage: bool,
    pub poll_interval: Duration,
    /// Upper bound on the token round-trip to a foreground page. The
    /// request hangs forever without one.
    pub page_reply_timeout: Duration,
    /// The polling loop is a no-op until the user has granted
    /// notification permission.
    pub notifications_allowed: bool,
    pub vapid_private_key: Option<String>,
    pub vapid_public_key: Option<String>,
    pub vapid_subject: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BucketNames {
    pub static_assets: String,
    pub data: String,
    pub auth: String,
    pub notifications: String,
}

impl BucketNames {
    pub fn all(&self) -> [&str; 4] {
        [
            &self.static_assets,
            &self.data,
            &self.auth,
            &self.notifications,
        ]
    }
}

impl WorkerConfig {
    pub fn bucket_names(&self) -> BucketNames {
        BucketNames {
            static_assets: format!("{}-static-{}", self.cache_prefix, self.version_tag),
            data: format!("{}-data-{}", self.cache_prefix, self.version_tag),
            auth: format!("{}-auth-{}", self.cache_prefix, self.version_tag),
            notifications: format!("{}-notifications-{}", self.cache_prefix, self.version_tag),
        }
    }
}

pub fn default_asset_manifest() -> Vec<String> {
    [
        "/",
        "/static/manifest.json",
        "/static/icons/icon-192x192.png",
        "/static/icons/icon-512x512.png",
        "https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/css/bootstrap.min.css",
        "https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/js/bootstrap.bundle.min.js",
        "https://cdn.jsdelivr.net/npm/axios/dist/axios.min.js",
        "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.5.1/css/all.min.css",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[cfg(test)]
impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            upstream: "https://bus.example.org".to_string(),
            app_name: "Walking Bus".to_string(),
            version_tag: "v1".to_string(),
            cache_prefix: "walking-bus".to_string(),
            asset_manifest: default_asset_manifest(),
            api_prefix: "/api/".to_string(),
            storage_root: "/tmp/walkbus".into(),
            flat_storage: false,
            poll_interval: Duration::from_secs(60),
            page_reply_timeout: Duration::from_secs(3),
            notifications_allowed: true,
            vapid_private_key: None,
            vapid_public_key: None,
            vapid_subject: None,
        }
    }
}
