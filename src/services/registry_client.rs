use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::models::ecosystem::Ecosystem;
use crate::services::cache::CacheStore;

/// Normalized registry metadata shared by the npm and PyPI paths
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryMetadata {
    /// Package name
    pub name: String,
    /// Concrete version the metadata describes (latest when unspecified)
    pub version: Option<String>,
    /// First publish time
    pub published_at: Option<DateTime<Utc>>,
    /// Most recent update time
    pub last_updated_at: Option<DateTime<Utc>>,
    /// Maintainer names
    pub maintainers: Vec<String>,
    /// Declared runtime dependencies (name → version spec)
    pub dependencies: BTreeMap<String, String>,
    /// Weekly download count where the registry exposes one (npm only)
    pub weekly_downloads: Option<u64>,
    /// Source repository URL
    pub repository_url: Option<String>,
    /// Author string
    pub author: Option<String>,
}

/// Registry client errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Package does not exist in the registry (HTTP 404)
    #[error("Package '{0}' not found")]
    NotFound(String),

    /// Network or server failure after bounded retries
    #[error("Registry transport error: {0}")]
    Transport(String),

    /// Persistent 429 from the registry
    #[error("Rate limited by registry")]
    RateLimited,

    /// Response body did not match the expected shape
    #[error("Failed to parse registry response: {0}")]
    Parse(String),
}

/// Token bucket for one registry host
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate_per_sec: f64) -> Self {
        Self {
            tokens: rate_per_sec,
            capacity: rate_per_sec,
            refill_per_sec: rate_per_sec,
            last_refill: Instant::now(),
        }
    }

    /// Take one token, or report how long to wait for the next one
    fn acquire(&mut self) -> Option<Duration> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - self.tokens) / self.refill_per_sec))
        }
    }
}

/// Per-host request pacing
#[derive(Debug)]
struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    rate_per_sec: f64,
}

impl RateLimiter {
    fn new(rate_per_sec: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            rate_per_sec,
        }
    }

    async fn acquire(&self, host: &str) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                buckets
                    .entry(host.to_string())
                    .or_insert_with(|| TokenBucket::new(self.rate_per_sec))
                    .acquire()
            };
            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}

/// Rate-limited metadata client for the npm and PyPI registries.
///
/// Responses are cached by `(host, name, version)`; 404 is a `NotFound`
/// result, not a transport error.
#[derive(Debug)]
pub struct RegistryClient {
    client: Client,
    npm_base: String,
    pypi_base: String,
    npm_downloads_base: String,
    cache: Arc<CacheStore>,
    limiter: RateLimiter,
    user_agent: String,
    max_retries: u32,
    retry_base: Duration,
}

impl RegistryClient {
    /// Production client against the public registries
    pub fn new(cache: Arc<CacheStore>) -> Self {
        Self::with_base_urls(
            cache,
            Ecosystem::Npm.registry_url().to_string(),
            Ecosystem::Pypi.registry_url().to_string(),
            "https://api.npmjs.org".to_string(),
        )
    }

    /// Client with custom base URLs (for testing against a mock server)
    pub fn with_base_urls(
        cache: Arc<CacheStore>,
        npm_base: String,
        pypi_base: String,
        npm_downloads_base: String,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            npm_base,
            pypi_base,
            npm_downloads_base,
            cache,
            limiter: RateLimiter::new(8.0),
            user_agent: format!("depsentry/{}", env!("CARGO_PKG_VERSION")),
            max_retries: 2,
            retry_base: Duration::from_secs(1),
        }
    }

    /// Shorten retry backoff (for tests)
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    /// Fetch normalized metadata for a package, consulting the cache first
    pub async fn fetch(
        &self,
        ecosystem: Ecosystem,
        name: &str,
        version: Option<&str>,
    ) -> Result<RegistryMetadata, RegistryError> {
        let cache_key = CacheStore::content_key(
            "registry:",
            &format!("{}:{}:{}", ecosystem, name, version.unwrap_or("latest")),
        );
        if let Some(cached) = self.cache.get(&cache_key) {
            if let Ok(metadata) = serde_json::from_str::<RegistryMetadata>(&cached) {
                debug!("registry cache hit for {}:{}", ecosystem, name);
                return Ok(metadata);
            }
        }

        let metadata = match ecosystem {
            Ecosystem::Npm => self.fetch_npm(name, version).await?,
            Ecosystem::Pypi => self.fetch_pypi(name, version).await?,
        };

        if let Ok(serialized) = serde_json::to_string(&metadata) {
            self.cache.put(&cache_key, serialized);
        }
        Ok(metadata)
    }

    /// npm registry: `GET {base}/{name}` (or `/{name}/{version}`)
    async fn fetch_npm(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<RegistryMetadata, RegistryError> {
        let url = format!("{}/{}", self.npm_base, name);
        let body = self.get_json(Ecosystem::Npm.registry_host(), &url, name).await?;

        let resolved_version = version
            .map(str::to_string)
            .or_else(|| {
                body.get("dist-tags")
                    .and_then(|t| t.get("latest"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            });

        let time = body.get("time");
        let published_at = time
            .and_then(|t| t.get("created"))
            .and_then(|v| v.as_str())
            .and_then(parse_timestamp);
        let last_updated_at = time
            .and_then(|t| t.get("modified"))
            .and_then(|v| v.as_str())
            .and_then(parse_timestamp);

        let maintainers = body
            .get("maintainers")
            .and_then(|m| m.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let author = match body.get("author") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Object(obj)) => obj
                .get("name")
                .and_then(|n| n.as_str())
                .map(str::to_string),
            _ => None,
        };

        let repository_url = match body.get("repository") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Object(obj)) => obj
                .get("url")
                .and_then(|u| u.as_str())
                .map(str::to_string),
            _ => None,
        };

        let dependencies = resolved_version
            .as_deref()
            .and_then(|v| body.get("versions").and_then(|versions| versions.get(v)))
            .and_then(|info| info.get("dependencies"))
            .and_then(|deps| deps.as_object())
            .map(|deps| {
                deps.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let weekly_downloads = self.fetch_npm_weekly_downloads(name).await;

        Ok(RegistryMetadata {
            name: name.to_string(),
            version: resolved_version,
            published_at,
            last_updated_at,
            maintainers,
            dependencies,
            weekly_downloads,
            repository_url,
            author,
        })
    }

    /// npm downloads API; failures are logged and yield None
    async fn fetch_npm_weekly_downloads(&self, name: &str) -> Option<u64> {
        let url = format!("{}/downloads/point/last-week/{}", self.npm_downloads_base, name);
        match self.get_json("api.npmjs.org", &url, name).await {
            Ok(body) => body.get("downloads").and_then(|d| d.as_u64()),
            Err(err) => {
                debug!("weekly download lookup failed for {}: {}", name, err);
                None
            }
        }
    }

    /// PyPI registry: `GET {base}/{name}/json` (or `/{name}/{version}/json`)
    async fn fetch_pypi(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<RegistryMetadata, RegistryError> {
        let url = match version {
            Some(v) => format!("{}/{}/{}/json", self.pypi_base, name, v),
            None => format!("{}/{}/json", self.pypi_base, name),
        };
        let body = self.get_json(Ecosystem::Pypi.registry_host(), &url, name).await?;

        let info = body
            .get("info")
            .ok_or_else(|| RegistryError::Parse("missing 'info' object".to_string()))?;

        let resolved_version = version
            .map(str::to_string)
            .or_else(|| info.get("version").and_then(|v| v.as_str()).map(str::to_string));

        let mut maintainers = Vec::new();
        for field in ["author", "maintainer"] {
            if let Some(value) = info.get(field).and_then(|v| v.as_str()) {
                if !value.trim().is_empty() && !maintainers.contains(&value.to_string()) {
                    maintainers.push(value.to_string());
                }
            }
        }
        let author = info
            .get("author")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string);

        let repository_url = info
            .get("project_urls")
            .and_then(|urls| urls.as_object())
            .and_then(|urls| {
                ["Source", "Repository", "Homepage", "Home"]
                    .iter()
                    .find_map(|k| urls.get(*k).and_then(|v| v.as_str()))
            })
            .map(str::to_string)
            .or_else(|| {
                info.get("home_page")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.trim().is_empty())
                    .map(str::to_string)
            });

        let dependencies = info
            .get("requires_dist")
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(parse_requires_dist)
                    .collect()
            })
            .unwrap_or_default();

        let (published_at, last_updated_at) = release_time_bounds(&body);

        Ok(RegistryMetadata {
            name: name.to_string(),
            version: resolved_version,
            published_at,
            last_updated_at,
            maintainers,
            dependencies,
            // PyPI's JSON API carries no download counts
            weekly_downloads: None,
            repository_url,
            author,
        })
    }

    /// GET a JSON body with rate limiting, 404 mapping, and bounded retries
    /// with exponential backoff
    async fn get_json(
        &self,
        host: &str,
        url: &str,
        name: &str,
    ) -> Result<serde_json::Value, RegistryError> {
        let mut attempt: u32 = 0;
        loop {
            self.limiter.acquire(host).await;

            let outcome = self
                .client
                .get(url)
                .header("User-Agent", &self.user_agent)
                .header("Accept", "application/json")
                .send()
                .await;

            let retryable_error = match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(RegistryError::NotFound(name.to_string()));
                    }
                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        RegistryError::RateLimited
                    } else if status.is_server_error() {
                        RegistryError::Transport(format!("server error {}", status))
                    } else if !status.is_success() {
                        return Err(RegistryError::Transport(format!(
                            "unexpected status {}",
                            status
                        )));
                    } else {
                        return response
                            .json::<serde_json::Value>()
                            .await
                            .map_err(|e| RegistryError::Parse(e.to_string()));
                    }
                }
                Err(err) => RegistryError::Transport(err.to_string()),
            };

            if attempt >= self.max_retries {
                return Err(retryable_error);
            }
            // 429 backs off twice as long as transport failures
            let factor = if matches!(retryable_error, RegistryError::RateLimited) {
                2
            } else {
                1
            };
            let delay = self.retry_base * factor * 2u32.pow(attempt);
            warn!(
                "registry request to {} failed ({}), retrying in {:?}",
                host, retryable_error, delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Parse one `requires_dist` entry into `(name, version_spec)`, skipping
/// extras-only requirements
fn parse_requires_dist(entry: &str) -> Option<(String, String)> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }
    // Environment-marker requirements (extras, python_version gates) are not
    // unconditional dependencies
    if entry.contains("extra ==") {
        return None;
    }
    let head = entry.split(';').next().unwrap_or(entry).trim();

    let name_end = head
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
        .unwrap_or(head.len());
    let name = &head[..name_end];
    if name.is_empty() {
        return None;
    }
    let spec = head[name_end..]
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim();
    let spec = if spec.is_empty() { "*" } else { spec };
    Some((name.to_string(), spec.to_string()))
}

/// Earliest and latest upload times across all releases
fn release_time_bounds(
    body: &serde_json::Value,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let mut earliest: Option<DateTime<Utc>> = None;
    let mut latest: Option<DateTime<Utc>> = None;

    let files = body
        .get("releases")
        .and_then(|r| r.as_object())
        .map(|releases| {
            releases
                .values()
                .filter_map(|files| files.as_array())
                .flatten()
                .collect::<Vec<_>>()
        })
        .or_else(|| body.get("urls").and_then(|u| u.as_array()).map(|a| a.iter().collect()))
        .unwrap_or_default();

    for file in files {
        let uploaded = file
            .get("upload_time_iso_8601")
            .or_else(|| file.get("upload_time"))
            .and_then(|v| v.as_str())
            .and_then(parse_timestamp);
        if let Some(ts) = uploaded {
            earliest = Some(earliest.map_or(ts, |e| e.min(ts)));
            latest = Some(latest.map_or(ts, |l| l.max(ts)));
        }
    }
    (earliest, latest)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            // PyPI sometimes omits the timezone suffix
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}
