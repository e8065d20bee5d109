use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::config::ProviderConfig;
use crate::upstream::{self, UpstreamFetchError};

/// An external JSON source whose answer is relayed to the caller unchanged.
#[async_trait]
pub trait JsonProvider: Send + Sync {
  async fn fetch(
    &self,
    query: &[(String, String)],
  ) -> Result<serde_json::Value, UpstreamFetchError>;
}

pub struct HttpJsonProvider {
  client: reqwest::Client,
  url: Url,
  api_key: Option<(String, String)>,
}

impl HttpJsonProvider {
  pub fn new(client: reqwest::Client, cfg: &ProviderConfig) -> Result<Self> {
    let url = Url::parse(&cfg.url).with_context(|| format!("invalid provider url: {}", cfg.url))?;
    let api_key = cfg.api_key.clone().map(|key| {
      (
        cfg
          .api_key_param
          .clone()
          .unwrap_or_else(|| "apiKey".to_owned()),
        key,
      )
    });

    Ok(Self {
      client,
      url,
      api_key,
    })
  }

  fn url_for(&self, query: &[(String, String)]) -> Url {
    let mut url = self.url.clone();
    {
      let mut pairs = url.query_pairs_mut();
      for (name, value) in query {
        pairs.append_pair(name, value);
      }
      if let Some((name, value)) = &self.api_key {
        pairs.append_pair(name, value);
      }
    }
    url
  }
}

#[async_trait]
impl JsonProvider for HttpJsonProvider {
  async fn fetch(
    &self,
    query: &[(String, String)],
  ) -> Result<serde_json::Value, UpstreamFetchError> {
    let url = self.url_for(query);
    debug!("relaying request to {}{}", url.host_str().unwrap_or(""), url.path());

    let res = upstream::check_status(self.client.get(url).send().await?).await?;
    Ok(res.json().await?)
  }
}

pub type ProviderRegistry = HashMap<String, Arc<dyn JsonProvider>>;

pub fn build_registry(
  client: &reqwest::Client,
  providers: &HashMap<String, ProviderConfig>,
) -> Result<ProviderRegistry> {
  providers
    .iter()
    .map(|(name, cfg)| {
      let provider: Arc<dyn JsonProvider> = Arc::new(
        HttpJsonProvider::new(client.clone(), cfg)
          .with_context(|| format!("failed to configure provider {}", name))?,
      );
      Ok((name.clone(), provider))
    })
    .collect()
}
