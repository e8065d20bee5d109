use std::sync::Arc;

use tracing::{debug, error};

use crate::storage::{ObjectStore, StorageError};

/// Upper bound on listing pages walked for one aggregation. A backend that is
/// still handing out tokens past this point is treated as broken.
pub const DEFAULT_MAX_PAGES: usize = 100_000;

pub struct BucketSizeAggregator {
  store: Arc<dyn ObjectStore>,
  max_pages: usize,
}

impl BucketSizeAggregator {
  pub fn new(store: Arc<dyn ObjectStore>) -> Self {
    Self {
      store,
      max_pages: DEFAULT_MAX_PAGES,
    }
  }

  pub fn with_max_pages(mut self, max_pages: usize) -> Self {
    self.max_pages = max_pages.max(1);
    self
  }

  /// Sums the size of every object under `prefix`, following continuation
  /// tokens until the listing is exhausted. Objects without a size count as 0.
  pub async fn total_size(&self, prefix: &str) -> Result<u128, StorageError> {
    let mut total: u128 = 0;
    let mut token: Option<String> = None;

    for pages in 1..=self.max_pages {
      let page = self.store.list(prefix, None, token.as_deref()).await?;

      total += page
        .objects
        .iter()
        .map(|obj| u128::from(obj.size.unwrap_or(0)))
        .sum::<u128>();

      match page.continuation_token {
        Some(next) => token = Some(next),
        None => {
          debug!("summed {} pages under {:?}: {} bytes", pages, prefix, total);
          return Ok(total);
        }
      }
    }

    error!(
      "listing under {:?} did not terminate after {} pages",
      prefix, self.max_pages
    );
    Err(StorageError::ProtocolViolation(format!(
      "listing did not terminate after {} pages",
      self.max_pages
    )))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::{ListingPage, ObjectSummary, PutReceipt, StoredContent};
  use async_trait::async_trait;
  use bytes::Bytes;
  use std::sync::atomic::{AtomicUsize, Ordering};

  /// Serves fixed pages, the token being the index of the next one.
  struct PagedStore {
    pages: Vec<Vec<Option<u64>>>,
    endless: bool,
    calls: AtomicUsize,
    tokens: std::sync::Mutex<Vec<Option<String>>>,
  }

  impl PagedStore {
    fn new(pages: Vec<Vec<Option<u64>>>) -> Self {
      Self {
        pages,
        endless: false,
        calls: AtomicUsize::new(0),
        tokens: std::sync::Mutex::new(Vec::new()),
      }
    }

    fn chunked(sizes: &[u64], chunk: usize) -> Self {
      Self::new(
        sizes
          .chunks(chunk)
          .map(|c| c.iter().copied().map(Some).collect())
          .collect(),
      )
    }

    fn endless() -> Self {
      Self {
        endless: true,
        ..Self::new(vec![vec![Some(1)]])
      }
    }
  }

  #[async_trait]
  impl ObjectStore for PagedStore {
    async fn put(&self, _: &str, _: Bytes, _: Option<&str>) -> Result<PutReceipt, StorageError> {
      unimplemented!()
    }

    async fn get(&self, _: &str) -> Result<Option<StoredContent>, StorageError> {
      unimplemented!()
    }

    async fn delete(&self, _: &str) -> Result<(), StorageError> {
      unimplemented!()
    }

    async fn list(
      &self,
      prefix: &str,
      _delimiter: Option<&str>,
      continuation_token: Option<&str>,
    ) -> Result<ListingPage, StorageError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self
        .tokens
        .lock()
        .unwrap()
        .push(continuation_token.map(str::to_owned));

      if self.endless {
        return Ok(ListingPage {
          prefix: prefix.to_owned(),
          objects: vec![],
          common_prefixes: vec![],
          continuation_token: Some("again".to_owned()),
        });
      }

      let index: usize = continuation_token.map_or(0, |t| t.parse().unwrap());
      let objects = self
        .pages
        .get(index)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, size)| ObjectSummary {
          key: format!("{}{}-{}", prefix, index, i),
          size,
          last_modified: None,
          etag: None,
        })
        .collect();

      let next = index + 1;
      Ok(ListingPage {
        prefix: prefix.to_owned(),
        objects,
        common_prefixes: vec![],
        continuation_token: (next < self.pages.len()).then(|| next.to_string()),
      })
    }

    async fn exists(&self, _: &str) -> Result<bool, StorageError> {
      unimplemented!()
    }
  }

  #[tokio::test]
  async fn empty_bucket_is_zero() {
    let store = Arc::new(PagedStore::new(vec![]));
    let total = BucketSizeAggregator::new(store.clone())
      .total_size("")
      .await
      .unwrap();

    assert_eq!(total, 0);
    assert_eq!(store.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn total_does_not_depend_on_page_chunking() {
    let sizes: Vec<u64> = (1..=12).map(|i| i * 1000 + 7).collect();
    let expected: u128 = sizes.iter().map(|s| u128::from(*s)).sum();

    for chunk in 1..=sizes.len() {
      let store = Arc::new(PagedStore::chunked(&sizes, chunk));
      let total = BucketSizeAggregator::new(store.clone())
        .total_size("")
        .await
        .unwrap();

      assert_eq!(total, expected, "chunk size {}", chunk);
      assert_eq!(
        store.calls.load(Ordering::SeqCst),
        sizes.len().div_ceil(chunk)
      );
    }
  }

  #[tokio::test]
  async fn tokens_are_resubmitted_verbatim() {
    let store = Arc::new(PagedStore::chunked(&[1, 2, 3], 1));
    BucketSizeAggregator::new(store.clone())
      .total_size("pics/")
      .await
      .unwrap();

    let tokens = store.tokens.lock().unwrap().clone();
    assert_eq!(
      tokens,
      vec![None, Some("1".to_owned()), Some("2".to_owned())]
    );
  }

  #[tokio::test]
  async fn missing_sizes_count_as_zero() {
    let store = Arc::new(PagedStore::new(vec![vec![Some(5), None], vec![None, Some(10)]]));
    let total = BucketSizeAggregator::new(store).total_size("").await.unwrap();

    assert_eq!(total, 15);
  }

  #[tokio::test]
  async fn sums_past_u64_without_wrapping() {
    let store = Arc::new(PagedStore::new(vec![vec![Some(u64::MAX)], vec![Some(u64::MAX)]]));
    let total = BucketSizeAggregator::new(store).total_size("").await.unwrap();

    assert_eq!(total, u128::from(u64::MAX) * 2);
  }

  #[tokio::test]
  async fn never_ending_listing_is_a_protocol_violation() {
    let store = Arc::new(PagedStore::endless());
    let res = BucketSizeAggregator::new(store.clone())
      .with_max_pages(50)
      .total_size("")
      .await;

    assert!(matches!(res, Err(StorageError::ProtocolViolation(_))));
    assert_eq!(store.calls.load(Ordering::SeqCst), 50);
  }
}
