use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};
use url::Url;

use crate::storage::{ObjectStore, StoredContent};
use crate::upstream::{self, UpstreamFetchError};

pub const LOGO_PREFIX: &str = "logos";
pub const DEFAULT_LOGO_MIME: &str = "image/png";

pub fn logo_key(company: &str) -> String {
  format!("{}/{}.png", LOGO_PREFIX, company)
}

#[derive(Debug, Clone)]
pub struct FetchedImage {
  pub data: Bytes,
  pub content_type: Option<String>,
}

#[async_trait]
pub trait LogoProvider: Send + Sync {
  async fn fetch_logo(&self, domain: &str) -> Result<FetchedImage, UpstreamFetchError>;
}

/// Fetches `{base_url}/{domain}`, passing the API key as `token`.
pub struct HttpLogoProvider {
  client: reqwest::Client,
  base_url: Url,
  api_key: Option<String>,
}

impl HttpLogoProvider {
  pub fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Result<Self> {
    let base_url = Url::parse(base_url).context("failed to parse logo provider base url")?;
    if base_url.cannot_be_a_base() {
      anyhow::bail!("logo provider base url cannot carry a path: {}", base_url);
    }

    Ok(Self {
      client,
      base_url,
      api_key,
    })
  }

  fn url_for(&self, domain: &str) -> Url {
    let mut url = self.base_url.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
      segments.pop_if_empty().push(domain);
    }
    if let Some(api_key) = &self.api_key {
      url.query_pairs_mut().append_pair("token", api_key);
    }
    url
  }
}

#[async_trait]
impl LogoProvider for HttpLogoProvider {
  async fn fetch_logo(&self, domain: &str) -> Result<FetchedImage, UpstreamFetchError> {
    let url = self.url_for(domain);
    debug!("fetching logo for {} from {}", domain, url.path());

    let res = upstream::check_status(self.client.get(url).send().await?).await?;
    let content_type = res
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|value| value.to_str().ok())
      .map(str::to_owned);
    let data = res.bytes().await?;

    Ok(FetchedImage { data, content_type })
  }
}

#[derive(Debug, Clone)]
pub struct Logo {
  pub data: Bytes,
  pub content_type: String,
  pub cached: bool,
}

/// Read-through cache of company logos kept in the bucket under `logos/`.
/// Entries are never refreshed; concurrent misses for the same company each
/// go upstream and the last write wins.
pub struct LogoCache {
  store: Arc<dyn ObjectStore>,
  provider: Arc<dyn LogoProvider>,
}

impl LogoCache {
  pub fn new(store: Arc<dyn ObjectStore>, provider: Arc<dyn LogoProvider>) -> Self {
    Self { store, provider }
  }

  pub async fn fetch(&self, company: &str, domain: &str) -> Result<Logo, UpstreamFetchError> {
    let key = logo_key(company);

    if let Some(content) = self.cached(&key).await {
      metrics::counter!("logo_cache_lookups_total", "result" => "hit").increment(1);
      return Ok(Logo {
        data: content.data,
        content_type: content
          .content_type
          .unwrap_or_else(|| DEFAULT_LOGO_MIME.to_owned()),
        cached: true,
      });
    }

    metrics::counter!("logo_cache_lookups_total", "result" => "miss").increment(1);

    let image = self.provider.fetch_logo(domain).await?;
    let content_type = image
      .content_type
      .unwrap_or_else(|| DEFAULT_LOGO_MIME.to_owned());

    if let Err(e) = self
      .store
      .put(&key, image.data.clone(), Some(&content_type))
      .await
    {
      warn!("failed to cache logo {}: {}", key, e);
    }

    Ok(Logo {
      data: image.data,
      content_type,
      cached: false,
    })
  }

  /// Storage failures here only cost a cache miss.
  async fn cached(&self, key: &str) -> Option<StoredContent> {
    match self.store.exists(key).await {
      Ok(true) => {}
      Ok(false) => return None,
      Err(e) => {
        warn!("failed to check cached logo {}: {}", key, e);
        return None;
      }
    }

    match self.store.get(key).await {
      Ok(content) => content,
      Err(e) => {
        warn!("failed to read cached logo {}: {}", key, e);
        None
      }
    }
  }
}
