//! GitHub star counts, cached in the key-value store so page renders do not hit the GitHub API.

use crate::http::HttpClient;
use crate::store::{parse_int, KvStore};
use anyhow::Context;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

fn cache_key(repo: &str) -> String {
    format!("github:stars:{repo}")
}

/// Something that knows the authoritative star count of a repository.
#[async_trait::async_trait]
pub trait StarsProvider: Send + Sync {
    async fn fetch_stars(&self, repo: &str) -> anyhow::Result<u64>;
}

#[async_trait::async_trait]
impl<T: StarsProvider + ?Sized> StarsProvider for Arc<T> {
    async fn fetch_stars(&self, repo: &str) -> anyhow::Result<u64> {
        (**self).fetch_stars(repo).await
    }
}

#[derive(Deserialize, Debug)]
struct RepoMetadata {
    stargazers_count: u64,
}

pub struct GitHubApi {
    client: HttpClient,
    base: String,
}

impl GitHubApi {
    pub const DEFAULT_BASE: &'static str = "https://api.github.com";

    pub fn new(base: &str, token: Option<&str>) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        if let Some(token) = token {
            let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
                .with_context(|| "github token contains invalid header characters")?;
            auth.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, auth);
        }

        Ok(Self {
            client: HttpClient::with_headers(headers)?,
            base: base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl StarsProvider for GitHubApi {
    async fn fetch_stars(&self, repo: &str) -> anyhow::Result<u64> {
        let url = format!("{}/repos/{}", self.base, repo);
        let meta: RepoMetadata = self.client.to_t(url.as_str()).await?;
        Ok(meta.stargazers_count)
    }
}

pub struct StarCache<P> {
    store: Arc<dyn KvStore>,
    provider: P,
}

impl<P: StarsProvider> StarCache<P> {
    pub fn new(store: Arc<dyn KvStore>, provider: P) -> Self {
        Self { store, provider }
    }

    /// Star count of `repo` (`owner/name`), served from the cache when present. On a miss the
    /// provider is asked and a successful answer is cached for `ttl`. `None` means the count is
    /// unknown right now; failures are never cached, so the next call asks again.
    pub async fn get_stars(&self, repo: &str, ttl: Duration) -> anyhow::Result<Option<u64>> {
        let key = cache_key(repo);
        let cached = self
            .store
            .get(&key)
            .await
            .with_context(|| format!("fail to read cached stars of `{repo}`"))?;

        if let Some(stars) = parse_int(&key, cached).and_then(|n| u64::try_from(n).ok()) {
            return Ok(Some(stars));
        }

        let stars = match self.provider.fetch_stars(repo).await {
            Ok(stars) => stars,
            Err(err) => {
                tracing::warn!("[Stars] fail to fetch stargazers count for {repo}: {err:#}");
                return Ok(None);
            }
        };

        self.store
            .set_ex(&key, &stars.to_string(), ttl)
            .await
            .with_context(|| format!("fail to cache stars of `{repo}`"))?;
        Ok(Some(stars))
    }

    /// [`StarCache::get_stars`] for every repository, all lookups in flight at once.
    pub async fn get_many_stars<S: AsRef<str>>(
        &self,
        repos: &[S],
        ttl: Duration,
    ) -> anyhow::Result<HashMap<String, Option<u64>>> {
        let lookups = repos.iter().map(|repo| async move {
            let stars = self.get_stars(repo.as_ref(), ttl).await?;
            anyhow::Ok((repo.as_ref().to_string(), stars))
        });

        Ok(futures::future::try_join_all(lookups)
            .await?
            .into_iter()
            .collect())
    }
}
