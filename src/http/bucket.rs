use axum::{
  extract::{Query, State},
  Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::http::error::AppError;
use crate::http::AppState;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BucketSize {
  pub total_size: u128,
}

#[derive(Deserialize, IntoParams)]
pub struct SizeParams {
  /// Restrict the sum to keys under this prefix
  pub prefix: Option<String>,
}

#[utoipa::path(
  get,
  path = "/bucket/size",
  params(SizeParams),
  responses(
    (status = 200, description = "Total bytes stored", body = BucketSize),
    (status = 500, description = "Listing failed or never terminated"),
    (status = 503, description = "Storage unavailable")
  )
)]
pub async fn bucket_size(
  State(state): State<AppState>,
  Query(params): Query<SizeParams>,
) -> Result<Json<BucketSize>, AppError> {
  let total_size = state
    .bucket_size
    .total_size(params.prefix.as_deref().unwrap_or(""))
    .await?;

  Ok(Json(BucketSize { total_size }))
}
