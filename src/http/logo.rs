use axum::{
  extract::{Query, State},
  http::{header, HeaderName},
  response::{IntoResponse, Response},
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::http::error::AppError;
use crate::http::AppState;

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

#[derive(Deserialize, IntoParams)]
pub struct LogoParams {
  /// Company name, used as the cache key
  pub company: Option<String>,
  /// Domain the logo provider looks up
  pub domain: Option<String>,
}

#[utoipa::path(
  get,
  path = "/logo",
  params(LogoParams),
  responses(
    (status = 200, description = "Logo image, from the bucket or the provider"),
    (status = 400, description = "Missing company or domain"),
    (status = 502, description = "Provider unreachable")
  )
)]
pub async fn logo(
  State(state): State<AppState>,
  Query(params): Query<LogoParams>,
) -> Result<Response, AppError> {
  let company = required(params.company, "company")?;
  let domain = required(params.domain, "domain")?;

  let logo = state.logo_cache.fetch(&company, &domain).await?;
  let cache_status = if logo.cached { "HIT" } else { "MISS" };

  Ok(
    (
      [
        (header::CONTENT_TYPE, logo.content_type),
        (X_CACHE, cache_status.to_owned()),
      ],
      logo.data,
    )
      .into_response(),
  )
}

fn required(value: Option<String>, name: &str) -> Result<String, AppError> {
  value
    .filter(|v| !v.trim().is_empty())
    .ok_or_else(|| AppError::BadRequest(format!("missing {}", name)))
}
