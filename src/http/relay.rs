use axum::{
  extract::{Path, Query, State},
  Json,
};

use crate::http::error::AppError;
use crate::http::AppState;

#[utoipa::path(
  get,
  path = "/providers/{name}",
  params(("name" = String, Path, description = "Configured provider name")),
  responses(
    (status = 200, description = "Provider JSON, relayed as is"),
    (status = 404, description = "No such provider")
  )
)]
pub async fn relay(
  State(state): State<AppState>,
  Path(name): Path<String>,
  Query(query): Query<Vec<(String, String)>>,
) -> Result<Json<serde_json::Value>, AppError> {
  relay_to(&state, &name, &query).await
}

pub async fn weather(
  State(state): State<AppState>,
  Query(query): Query<Vec<(String, String)>>,
) -> Result<Json<serde_json::Value>, AppError> {
  relay_to(&state, "weather", &query).await
}

pub async fn news(
  State(state): State<AppState>,
  Query(query): Query<Vec<(String, String)>>,
) -> Result<Json<serde_json::Value>, AppError> {
  relay_to(&state, "news", &query).await
}

async fn relay_to(
  state: &AppState,
  name: &str,
  query: &[(String, String)],
) -> Result<Json<serde_json::Value>, AppError> {
  let provider = state
    .providers
    .get(name)
    .ok_or(AppError::NotFound("Provider not found."))?;

  Ok(Json(provider.fetch(query).await?))
}
