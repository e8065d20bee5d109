use crate::storage::{
  ListingPage, ObjectStore, ObjectSummary, PutReceipt, StorageError, StoredContent,
};
use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::{ByteStream, DateTimeFormat};
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

pub struct Client {
  s3_client: aws_sdk_s3::Client,
  bucket: String,
  create_bucket: bool,
}

impl Client {
  pub fn new(s3_client: aws_sdk_s3::Client, bucket: &str, create_bucket: bool) -> Self {
    Self {
      s3_client,
      bucket: bucket.to_owned(),
      create_bucket,
    }
  }
}

/// Connection and timeout failures mean the backend could not be reached,
/// everything else is the backend answering with an error.
fn storage_error<E, R>(operation: &str, err: SdkError<E, R>) -> StorageError
where
  E: std::error::Error + 'static,
  R: std::fmt::Debug,
{
  match &err {
    SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
      StorageError::Unavailable(format!("{}: {}", operation, DisplayErrorContext(&err)))
    }
    _ => StorageError::Backend(format!("{}: {}", operation, DisplayErrorContext(&err))),
  }
}

/// A truncated page has to carry the token for the next one, otherwise the
/// listing can't be resumed.
fn next_token(
  is_truncated: Option<bool>,
  next_continuation_token: Option<&str>,
) -> Result<Option<String>, StorageError> {
  match (is_truncated, next_continuation_token) {
    (Some(false), _) => Ok(None),
    (Some(true), None) => Err(StorageError::ProtocolViolation(
      "truncated listing without a continuation token".to_owned(),
    )),
    (_, token) => Ok(token.map(str::to_owned)),
  }
}

#[async_trait]
impl ObjectStore for Client {
  async fn put(
    &self,
    key: &str,
    data: Bytes,
    content_type: Option<&str>,
  ) -> Result<PutReceipt, StorageError> {
    let size = data.len() as u64;

    debug!("uploading object: {} to bucket: {}", key, self.bucket);

    let res = self
      .s3_client
      .put_object()
      .bucket(self.bucket.as_str())
      .key(key)
      .body(ByteStream::from(data))
      .set_content_type(content_type.map(str::to_owned))
      .send()
      .await
      .map_err(|e| storage_error("put_object", e))?;

    Ok(PutReceipt {
      key: key.to_owned(),
      etag: res.e_tag().map(|etag| etag.trim_matches('"').to_owned()),
      size,
    })
  }

  async fn get(&self, key: &str) -> Result<Option<StoredContent>, StorageError> {
    debug!("downloading object: {} from bucket: {}", key, self.bucket);

    let object = match self
      .s3_client
      .get_object()
      .bucket(self.bucket.as_str())
      .key(key)
      .send()
      .await
    {
      Ok(object) => object,
      Err(SdkError::ServiceError(service)) if service.err().is_no_such_key() => return Ok(None),
      Err(e) => return Err(storage_error("get_object", e)),
    };

    let length = object.content_length().unwrap_or(0).max(0) as usize;
    if length == 0 {
      return Ok(None);
    }

    let content_type = object.content_type().map(str::to_owned);
    let mut data = Vec::with_capacity(length);
    object
      .body
      .into_async_read()
      .read_to_end(&mut data)
      .await?;

    Ok(Some(StoredContent {
      data: Bytes::from(data),
      content_type,
    }))
  }

  async fn delete(&self, key: &str) -> Result<(), StorageError> {
    debug!("deleting object: {} from bucket: {}", key, self.bucket);

    self
      .s3_client
      .delete_object()
      .bucket(self.bucket.as_str())
      .key(key)
      .send()
      .await
      .map_err(|e| storage_error("delete_object", e))?;

    Ok(())
  }

  async fn list(
    &self,
    prefix: &str,
    delimiter: Option<&str>,
    continuation_token: Option<&str>,
  ) -> Result<ListingPage, StorageError> {
    let res = self
      .s3_client
      .list_objects_v2()
      .bucket(self.bucket.as_str())
      .prefix(prefix)
      .set_delimiter(delimiter.map(str::to_owned))
      .set_continuation_token(continuation_token.map(str::to_owned))
      .send()
      .await
      .map_err(|e| storage_error("list_objects_v2", e))?;

    let objects = res
      .contents()
      .iter()
      .filter_map(|obj| {
        obj.key().map(|key| ObjectSummary {
          key: key.to_owned(),
          size: obj.size().and_then(|size| u64::try_from(size).ok()),
          last_modified: obj
            .last_modified()
            .and_then(|ts| ts.fmt(DateTimeFormat::DateTime).ok()),
          etag: obj.e_tag().map(|etag| etag.trim_matches('"').to_owned()),
        })
      })
      .collect();

    let common_prefixes = res
      .common_prefixes()
      .iter()
      .filter_map(|p| p.prefix().map(str::to_owned))
      .collect();

    let continuation_token = next_token(res.is_truncated(), res.next_continuation_token())?;

    Ok(ListingPage {
      prefix: prefix.to_owned(),
      objects,
      common_prefixes,
      continuation_token,
    })
  }

  async fn exists(&self, key: &str) -> Result<bool, StorageError> {
    match self
      .s3_client
      .head_object()
      .bucket(self.bucket.as_str())
      .key(key)
      .send()
      .await
    {
      Ok(_) => Ok(true),
      Err(SdkError::ServiceError(service)) if service.err().is_not_found() => Ok(false),
      Err(e) => Err(storage_error("head_object", e)),
    }
  }

  async fn ensure_bucket(&self) -> Result<(), StorageError> {
    let head = self
      .s3_client
      .head_bucket()
      .bucket(self.bucket.as_str())
      .send()
      .await;

    match head {
      Ok(_) => return Ok(()),
      Err(SdkError::ServiceError(_)) if self.create_bucket => {}
      Err(e) => return Err(storage_error("head_bucket", e)),
    }

    info!("bucket {} does not exist, creating it", self.bucket);

    match self
      .s3_client
      .create_bucket()
      .bucket(self.bucket.as_str())
      .send()
      .await
    {
      Ok(_) => Ok(()),
      Err(SdkError::ServiceError(service)) if service.err().is_bucket_already_owned_by_you() => {
        Ok(())
      }
      Err(e) => Err(storage_error("create_bucket", e)),
    }
  }
}
