use axum::{
  extract::{Path, Query, State},
  http::header,
  response::{IntoResponse, Response},
  Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::http::error::AppError;
use crate::http::AppState;
use crate::storage::ListingPage;

const LISTING_DELIMITER: &str = "/";

#[derive(Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
  /// Only list keys starting with this prefix
  pub prefix: Option<String>,
  /// Token from a previous page
  pub continuation_token: Option<String>,
}

#[utoipa::path(
  get,
  path = "/list-objects",
  params(ListParams),
  responses(
    (status = 200, description = "One page of the listing, grouped by `/`", body = ListingPage)
  )
)]
pub async fn list_objects(
  State(state): State<AppState>,
  Query(params): Query<ListParams>,
) -> Result<Json<ListingPage>, AppError> {
  let page = state
    .store
    .list(
      params.prefix.as_deref().unwrap_or(""),
      Some(LISTING_DELIMITER),
      params.continuation_token.as_deref(),
    )
    .await?;

  Ok(Json(page))
}

#[utoipa::path(
  get,
  path = "/object/{key}",
  params(("key" = String, Path, description = "Object key, may contain `/`")),
  responses(
    (status = 200, description = "Object content"),
    (status = 400, description = "No key provided"),
    (status = 404, description = "Object not found")
  )
)]
pub async fn get_object(
  State(state): State<AppState>,
  Path(key): Path<String>,
) -> Result<Response, AppError> {
  if key.is_empty() {
    return Err(no_key());
  }

  let content = state
    .store
    .get(&key)
    .await?
    .ok_or(AppError::NotFound("Object not found."))?;

  let content_type = content
    .content_type
    .unwrap_or_else(|| "application/octet-stream".to_owned());

  Ok(([(header::CONTENT_TYPE, content_type)], content.data).into_response())
}

#[utoipa::path(
  delete,
  path = "/object/{key}",
  params(("key" = String, Path, description = "Object key, may contain `/`")),
  responses(
    (status = 200, description = "Object deleted, or it was never there"),
    (status = 400, description = "No key provided")
  )
)]
pub async fn delete_object(
  State(state): State<AppState>,
  Path(key): Path<String>,
) -> Result<&'static str, AppError> {
  if key.is_empty() {
    return Err(no_key());
  }

  state.store.delete(&key).await?;

  Ok("Object deleted successfully")
}

/// `/object/` with nothing after it.
pub async fn missing_key() -> AppError {
  no_key()
}

fn no_key() -> AppError {
  AppError::BadRequest("No key provided.".to_owned())
}
