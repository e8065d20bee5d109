use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::storage::{
  ListingPage, ObjectStore, ObjectSummary, PutReceipt, StorageError, StoredContent,
};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: usize = 1000;

const PARTIAL_PREFIX: &str = ".partial-";
const CONTENT_TYPE_PREFIX: &str = ".content-type-";

/// Stores objects as plain files below a root directory. Keys map to relative
/// paths, so `pics/a.png` lives at `{root}/pics/a.png`. The content type given
/// on `put` is kept in a hidden sibling file.
pub struct Client {
  path: PathBuf,
  page_size: usize,
}

fn is_reserved(name: &str) -> bool {
  name.starts_with(PARTIAL_PREFIX) || name.starts_with(CONTENT_TYPE_PREFIX)
}

fn content_type_path(file_path: &Path) -> Option<PathBuf> {
  let name = file_path.file_name()?.to_string_lossy();
  Some(file_path.with_file_name(format!("{}{}", CONTENT_TYPE_PREFIX, name)))
}

impl Client {
  pub fn new(path: PathBuf) -> Self {
    Self {
      path,
      page_size: DEFAULT_PAGE_SIZE,
    }
  }

  pub fn with_page_size(mut self, page_size: usize) -> Self {
    self.page_size = page_size.max(1);
    self
  }

  fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
    let relative = Path::new(key);
    let valid = !key.is_empty()
      && relative.components().all(|component| match component {
        Component::Normal(name) => !is_reserved(&name.to_string_lossy()),
        _ => false,
      });

    if !valid {
      return Err(StorageError::InvalidKey(key.to_owned()));
    }

    Ok(self.path.join(relative))
  }

  /// True when some parent of `file_path` below the root is a stored object,
  /// so nothing can live at `file_path` itself.
  async fn below_object(&self, file_path: &Path) -> bool {
    for ancestor in file_path.ancestors().skip(1) {
      if ancestor == self.path || !ancestor.starts_with(&self.path) {
        break;
      }
      if let Ok(meta) = tokio::fs::metadata(ancestor).await {
        return meta.is_file();
      }
    }
    false
  }

  /// Metadata of the object file, `None` when nothing is stored there.
  /// Directories and paths running through an object hold no object.
  async fn object_file(
    &self,
    file_path: &Path,
  ) -> Result<Option<std::fs::Metadata>, StorageError> {
    match tokio::fs::metadata(file_path).await {
      Ok(meta) if meta.is_file() => Ok(Some(meta)),
      Ok(_) => Ok(None),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
      Err(_) if self.below_object(file_path).await => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  async fn stored_content_type(&self, file_path: &Path) -> Option<String> {
    let sidecar = content_type_path(file_path)?;
    match tokio::fs::read_to_string(&sidecar).await {
      Ok(content_type) if !content_type.is_empty() => Some(content_type),
      _ => mime_guess::from_path(file_path)
        .first_raw()
        .map(str::to_owned),
    }
  }

  /// All object keys below the root, sorted.
  async fn all_keys(&self) -> Result<Vec<(String, u64)>, StorageError> {
    let mut keys = Vec::new();
    let mut pending = vec![self.path.clone()];

    while let Some(dir) = pending.pop() {
      let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => continue,
        Err(e) => return Err(e.into()),
      };

      while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        let path = entry.path();

        if file_type.is_dir() {
          pending.push(path);
          continue;
        }

        if is_reserved(&entry.file_name().to_string_lossy()) {
          continue;
        }

        let relative = match path.strip_prefix(&self.path) {
          Ok(relative) => relative,
          Err(_) => continue,
        };
        let key = relative
          .components()
          .map(|c| c.as_os_str().to_string_lossy())
          .collect::<Vec<_>>()
          .join("/");

        keys.push((key, entry.metadata().await?.len()));
      }
    }

    keys.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(keys)
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
    let file_path = self.object_path(key)?;
    let parent = file_path
      .parent()
      .ok_or_else(|| StorageError::InvalidKey(key.to_owned()))?;

    // A key can't be both an object and a "directory" of other objects
    let is_dir = tokio::fs::metadata(&file_path)
      .await
      .map(|meta| meta.is_dir())
      .unwrap_or(false);
    if is_dir || self.below_object(&file_path).await {
      return Err(StorageError::InvalidKey(key.to_owned()));
    }

    tokio::fs::create_dir_all(parent).await?;

    let sidecar =
      content_type_path(&file_path).ok_or_else(|| StorageError::InvalidKey(key.to_owned()))?;
    match content_type {
      Some(content_type) => tokio::fs::write(&sidecar, content_type).await?,
      None => match tokio::fs::remove_file(&sidecar).await {
        Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
        _ => {}
      },
    }

    // Write next to the target and rename so readers never see half a file
    let partial = parent.join(format!("{}{}", PARTIAL_PREFIX, Uuid::new_v4()));
    tokio::fs::write(&partial, &data).await?;
    if let Err(e) = tokio::fs::rename(&partial, &file_path).await {
      let _ = tokio::fs::remove_file(&partial).await;
      return Err(e.into());
    }

    debug!("stored object: {} ({} bytes)", key, size);

    Ok(PutReceipt {
      key: key.to_owned(),
      etag: None,
      size,
    })
  }

  async fn get(&self, key: &str) -> Result<Option<StoredContent>, StorageError> {
    let file_path = self.object_path(key)?;

    match self.object_file(&file_path).await? {
      Some(meta) if meta.len() > 0 => {}
      _ => return Ok(None),
    }

    let data = match tokio::fs::read(&file_path).await {
      Ok(data) => data,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e.into()),
    };

    if data.is_empty() {
      return Ok(None);
    }

    Ok(Some(StoredContent {
      data: Bytes::from(data),
      content_type: self.stored_content_type(&file_path).await,
    }))
  }

  async fn delete(&self, key: &str) -> Result<(), StorageError> {
    let file_path = self.object_path(key)?;

    if self.object_file(&file_path).await?.is_none() {
      return Ok(());
    }

    match tokio::fs::remove_file(&file_path).await {
      Ok(()) => {}
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
      Err(e) => return Err(e.into()),
    }

    if let Some(sidecar) = content_type_path(&file_path) {
      let _ = tokio::fs::remove_file(&sidecar).await;
    }

    Ok(())
  }

  async fn list(
    &self,
    prefix: &str,
    delimiter: Option<&str>,
    continuation_token: Option<&str>,
  ) -> Result<ListingPage, StorageError> {
    let delimiter = delimiter.filter(|d| !d.is_empty());
    let mut page = ListingPage {
      prefix: prefix.to_owned(),
      ..ListingPage::default()
    };

    // The token is the last entry handed out; a token ending in the
    // delimiter is a collapsed group and everything below it was covered.
    let resumes_group = match (continuation_token, delimiter) {
      (Some(token), Some(d)) => token.ends_with(d),
      _ => false,
    };

    let mut last_entry: Option<String> = None;
    let mut emitted = 0;

    for (key, size) in self.all_keys().await? {
      if !key.starts_with(prefix) {
        continue;
      }

      if let Some(token) = continuation_token {
        if key.as_str() <= token || (resumes_group && key.starts_with(token)) {
          continue;
        }
      }

      let group = delimiter.and_then(|d| {
        key[prefix.len()..]
          .find(d)
          .map(|idx| key[..prefix.len() + idx + d.len()].to_owned())
      });

      if let Some(group) = &group {
        if page.common_prefixes.last() == Some(group) {
          continue;
        }
      }

      if emitted == self.page_size {
        page.continuation_token = last_entry;
        return Ok(page);
      }

      match group {
        Some(group) => {
          last_entry = Some(group.clone());
          page.common_prefixes.push(group);
        }
        None => {
          last_entry = Some(key.clone());
          page.objects.push(ObjectSummary {
            key,
            size: Some(size),
            last_modified: None,
            etag: None,
          });
        }
      }
      emitted += 1;
    }

    Ok(page)
  }

  async fn exists(&self, key: &str) -> Result<bool, StorageError> {
    let file_path = self.object_path(key)?;
    Ok(self.object_file(&file_path).await?.is_some())
  }

  async fn ensure_bucket(&self) -> Result<(), StorageError> {
    tokio::fs::create_dir_all(&self.path).await?;
    Ok(())
  }
}
