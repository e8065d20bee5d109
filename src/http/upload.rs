use axum::{
  extract::{Multipart, State},
  Json,
};
use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::http::error::AppError;
use crate::http::AppState;

#[derive(Serialize, ToSchema)]
pub struct UploadResponse {
  pub message: String,
  pub results: Vec<UploadResult>,
}

#[derive(Serialize, ToSchema, Debug, Clone)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum UploadResult {
  Stored {
    name: String,
    key: String,
    size: u64,
    etag: Option<String>,
  },
  Failed {
    name: String,
    key: String,
    error: String,
  },
}

struct UploadedFile {
  name: String,
  content_type: Option<String>,
  data: Bytes,
}

/// Stores every `file` part under a freshly generated key. The parts are
/// written concurrently and a failed write is reported next to the others.
#[utoipa::path(
  post,
  path = "/upload",
  request_body(
    content = String,
    content_type = "multipart/form-data",
    description = "One or more `file` parts"
  ),
  responses(
    (status = 200, description = "Per-file upload results", body = UploadResponse),
    (status = 400, description = "Malformed multipart body")
  )
)]
pub async fn upload(
  State(state): State<AppState>,
  mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
  let mut files = Vec::new();

  while let Some(field) = multipart
    .next_field()
    .await
    .map_err(|e| AppError::BadRequest(e.to_string()))?
  {
    if field.name() != Some("file") {
      continue;
    }

    // Plain form values are not files
    let name = match field.file_name() {
      Some(name) => name.to_owned(),
      None => continue,
    };
    let content_type = field.content_type().map(str::to_owned);
    let data = field
      .bytes()
      .await
      .map_err(|e| AppError::BadRequest(e.to_string()))?;

    files.push(UploadedFile {
      name,
      content_type,
      data,
    });
  }

  let results = join_all(files.into_iter().map(|file| store_file(&state, file))).await;

  Ok(Json(UploadResponse {
    message: "File uploads finished.".to_owned(),
    results,
  }))
}

async fn store_file(state: &AppState, file: UploadedFile) -> UploadResult {
  let key = state.key_namer.name(&file.name);

  match state
    .store
    .put(&key, file.data, file.content_type.as_deref())
    .await
  {
    Ok(receipt) => {
      info!("stored {} as {} ({} bytes)", file.name, key, receipt.size);
      metrics::counter!("uploads_total", "status" => "stored").increment(1);
      UploadResult::Stored {
        name: file.name,
        key: receipt.key,
        size: receipt.size,
        etag: receipt.etag,
      }
    }
    Err(e) => {
      error!("failed to store {} as {}: {}", file.name, key, e);
      metrics::counter!("uploads_total", "status" => "failed").increment(1);
      UploadResult::Failed {
        name: file.name,
        key,
        error: e.to_string(),
      }
    }
  }
}
