use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

pub mod local_storage;
pub mod s3;

#[derive(Error, Debug)]
pub enum StorageError {
  #[error("storage backend unavailable: {0}")]
  Unavailable(String),
  #[error("storage backend error: {0}")]
  Backend(String),
  #[error("invalid object key: {0}")]
  InvalidKey(String),
  #[error("storage protocol violation: {0}")]
  ProtocolViolation(String),
}

impl From<std::io::Error> for StorageError {
  fn from(err: std::io::Error) -> Self {
    StorageError::Backend(err.to_string())
  }
}

#[derive(Debug, Clone)]
pub struct PutReceipt {
  pub key: String,
  pub etag: Option<String>,
  pub size: u64,
}

#[derive(Debug, Clone)]
pub struct StoredContent {
  pub data: Bytes,
  pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSummary {
  pub key: String,
  pub size: Option<u64>,
  pub last_modified: Option<String>,
  pub etag: Option<String>,
}

/// One bounded batch of a prefix listing. A `continuation_token` means more
/// pages exist and must be passed back verbatim to get the next one.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
  pub prefix: String,
  pub objects: Vec<ObjectSummary>,
  pub common_prefixes: Vec<String>,
  pub continuation_token: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
  /// Writes `data` at `key`, replacing whatever was there.
  async fn put(
    &self,
    key: &str,
    data: Bytes,
    content_type: Option<&str>,
  ) -> Result<PutReceipt, StorageError>;

  /// Returns `None` when the key is missing or the object is empty.
  async fn get(&self, key: &str) -> Result<Option<StoredContent>, StorageError>;

  /// Deleting a missing key is not an error.
  async fn delete(&self, key: &str) -> Result<(), StorageError>;

  async fn list(
    &self,
    prefix: &str,
    delimiter: Option<&str>,
    continuation_token: Option<&str>,
  ) -> Result<ListingPage, StorageError>;

  async fn exists(&self, key: &str) -> Result<bool, StorageError>;

  /// Makes sure the backing bucket is there before serving.
  async fn ensure_bucket(&self) -> Result<(), StorageError> {
    Ok(())
  }
}
