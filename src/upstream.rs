use thiserror::Error;

/// Failure talking to a third-party provider.
#[derive(Error, Debug)]
pub enum UpstreamFetchError {
  #[error("upstream responded with {status}: {body}")]
  Status { status: u16, body: String },
  #[error("upstream request failed: {0}")]
  Transport(String),
}

impl UpstreamFetchError {
  /// The provider's status code, when it answered at all.
  pub fn status(&self) -> Option<u16> {
    match self {
      UpstreamFetchError::Status { status, .. } => Some(*status),
      UpstreamFetchError::Transport(_) => None,
    }
  }
}

impl From<reqwest::Error> for UpstreamFetchError {
  fn from(err: reqwest::Error) -> Self {
    match err.status() {
      Some(status) => UpstreamFetchError::Status {
        status: status.as_u16(),
        body: err.to_string(),
      },
      None => UpstreamFetchError::Transport(err.to_string()),
    }
  }
}

/// Turns a non-2xx response into a status error, keeping the body for logs.
pub async fn check_status(
  res: reqwest::Response,
) -> Result<reqwest::Response, UpstreamFetchError> {
  let status = res.status();
  if status.is_success() {
    return Ok(res);
  }

  let body = res.text().await.unwrap_or_default();
  Err(UpstreamFetchError::Status {
    status: status.as_u16(),
    body,
  })
}
