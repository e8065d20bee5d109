use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
  Local,
  S3,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
  pub app: AppConfig,
  pub storage: StorageConfig,
  #[serde(default)]
  pub logo: LogoConfig,
  #[serde(default)]
  pub providers: HashMap<String, ProviderConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
  pub listen: String,
  pub metrics_listen: String,
  pub max_body_size_mb: usize,
  pub enable_openapi: Option<bool>,
  pub request_timeout_secs: Option<u64>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StorageConfig {
  pub storage_type: StorageType,
  pub upload_prefix: Option<String>,
  pub max_list_pages: Option<usize>,
  pub s3: Option<StorageConfigS3>,
  pub local: Option<StorageConfigLocal>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StorageConfigS3 {
  pub endpoint: String,
  pub bucket: String,
  pub access_key_id: String,
  pub secret_access_key: String,
  pub region: String,
  pub force_path_style: bool,
  pub create_bucket: Option<bool>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StorageConfigLocal {
  pub path: String,
  pub page_size: Option<usize>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LogoConfig {
  #[serde(default = "default_logo_base_url")]
  pub base_url: String,
  pub api_key: Option<String>,
}

impl Default for LogoConfig {
  fn default() -> Self {
    Self {
      base_url: default_logo_base_url(),
      api_key: None,
    }
  }
}

fn default_logo_base_url() -> String {
  "https://img.logo.dev".to_owned()
}

#[derive(Deserialize, Debug, Clone)]
pub struct ProviderConfig {
  pub url: String,
  pub api_key: Option<String>,
  pub api_key_param: Option<String>,
}

pub fn parse(config_path: &str) -> Result<Config> {
  let toml_str = fs::read_to_string(config_path)
    .with_context(|| format!("failed to read config file: {}", config_path))?;
  let mut cfg = from_toml(&toml_str)?;
  cfg.apply_env(|name| std::env::var(name).ok());

  Ok(cfg)
}

pub fn from_toml(toml_str: &str) -> Result<Config> {
  toml::from_str(toml_str).context("failed to deserialize config")
}

impl Config {
  /// Overlays the deployment environment (MinIO credentials, bucket name and
  /// provider keys) on top of the file.
  pub fn apply_env<F>(&mut self, lookup: F)
  where
    F: Fn(&str) -> Option<String>,
  {
    if let Some(s3) = self.storage.s3.as_mut() {
      if let Some(endpoint) = lookup("MINIO_ENDPOINT") {
        s3.endpoint = if endpoint.contains("://") {
          endpoint
        } else {
          format!("http://{}", endpoint)
        };
      }
      if let Some(user) = lookup("MINIO_ROOT_USER") {
        s3.access_key_id = user;
      }
      if let Some(password) = lookup("MINIO_ROOT_PASSWORD") {
        s3.secret_access_key = password;
      }
      if let Some(bucket) = lookup("BUCKET_NAME") {
        s3.bucket = bucket;
      }
    }

    if let Some(key) = lookup("LOGO_API_KEY") {
      self.logo.api_key = Some(key);
    }

    for (name, var) in [("weather", "WEATHER_API_KEY"), ("news", "NEWS_API_KEY")] {
      if let (Some(provider), Some(key)) = (self.providers.get_mut(name), lookup(var)) {
        provider.api_key = Some(key);
      }
    }
  }
}
