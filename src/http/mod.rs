use anyhow::{anyhow, Context, Result};
use axum::{
  extract::{DefaultBodyLimit, MatchedPath, Request},
  http::StatusCode,
  middleware::{self, Next},
  response::IntoResponse,
  routing::{get, post},
  Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::future::ready;
use std::{path::Path, sync::Arc};
use tokio::signal;
use tokio::time::{Duration, Instant};
use tower_http::{
  catch_panic::CatchPanicLayer,
  cors::{Any, CorsLayer},
  timeout::TimeoutLayer,
  trace::{self, TraceLayer},
};
use tracing::{info, Level};
use utoipa::OpenApi;
use utoipa_redoc::{Redoc, Servable};

use crate::bucket_size::{BucketSizeAggregator, DEFAULT_MAX_PAGES};
use crate::config::{Config, StorageType};
use crate::key_namer::{KeyNamer, DEFAULT_UPLOAD_PREFIX};
use crate::logo_cache::{HttpLogoProvider, LogoCache};
use crate::providers::{self, ProviderRegistry};
use crate::storage::{self, local_storage, s3, ObjectStore};

mod bucket;
pub mod error;
mod logo;
mod objects;
mod relay;
mod upload;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(OpenApi)]
#[openapi(
  paths(
    upload::upload,
    bucket::bucket_size,
    objects::list_objects,
    objects::get_object,
    objects::delete_object,
    logo::logo,
    relay::relay
  ),
  components(
    schemas(
      upload::UploadResponse,
      upload::UploadResult,
      bucket::BucketSize,
      storage::ListingPage,
      storage::ObjectSummary
    )
  ),
  info(
    title = "Bran Gateway API",
    version = "0.1.0",
    description = "REST gateway over an object storage bucket with a read-through logo cache"
  )
)]
struct ApiDoc;

/// Service objects shared by all handlers, built once at startup.
#[derive(Clone)]
pub struct AppState {
  store: Arc<dyn ObjectStore>,
  key_namer: Arc<KeyNamer>,
  bucket_size: Arc<BucketSizeAggregator>,
  logo_cache: Arc<LogoCache>,
  providers: Arc<ProviderRegistry>,
}

impl AppState {
  pub fn new(
    store: Arc<dyn ObjectStore>,
    key_namer: KeyNamer,
    bucket_size: BucketSizeAggregator,
    logo_cache: LogoCache,
    providers: ProviderRegistry,
  ) -> Self {
    Self {
      store,
      key_namer: Arc::new(key_namer),
      bucket_size: Arc::new(bucket_size),
      logo_cache: Arc::new(logo_cache),
      providers: Arc::new(providers),
    }
  }

  pub fn store(&self) -> &Arc<dyn ObjectStore> {
    &self.store
  }
}

fn storage_client(cfg: &Config) -> Result<Arc<dyn ObjectStore>> {
  let client: Arc<dyn ObjectStore> = match cfg.storage.storage_type {
    StorageType::Local => {
      let local = cfg
        .storage
        .local
        .as_ref()
        .ok_or_else(|| anyhow!("local storage config is missing"))?;

      let client = local_storage::Client::new(Path::new(&local.path).to_path_buf());
      Arc::new(match local.page_size {
        Some(page_size) => client.with_page_size(page_size),
        None => client,
      })
    }
    StorageType::S3 => {
      let storage_config = match &cfg.storage.s3 {
        Some(s3) => s3,
        None => return Err(anyhow!("S3 storage config is missing")),
      };

      let cred = aws_sdk_s3::config::Credentials::new(
        storage_config.access_key_id.clone(),
        storage_config.secret_access_key.clone(),
        None,
        None,
        "loaded-from-custom-env",
      );

      let s3_config = aws_sdk_s3::config::Builder::new()
        .endpoint_url(storage_config.endpoint.clone())
        .credentials_provider(cred)
        .region(aws_sdk_s3::config::Region::new(
          storage_config.region.clone(),
        ))
        // apply bucketname as path param instead of pre-domain
        .force_path_style(storage_config.force_path_style)
        .behavior_version_latest()
        .build();

      let client = aws_sdk_s3::Client::from_conf(s3_config);
      Arc::new(s3::Client::new(
        client,
        storage_config.bucket.as_str(),
        storage_config.create_bucket.unwrap_or(true),
      ))
    }
  };

  Ok(client)
}

pub fn build_state(cfg: &Config) -> Result<AppState> {
  let store = storage_client(cfg)?;

  let http_client = reqwest::Client::builder()
    .user_agent(concat!("bran-gateway/", env!("CARGO_PKG_VERSION")))
    .build()
    .context("failed to build http client")?;

  let logo_provider = HttpLogoProvider::new(
    http_client.clone(),
    &cfg.logo.base_url,
    cfg.logo.api_key.clone(),
  )?;
  let providers = providers::build_registry(&http_client, &cfg.providers)?;

  Ok(AppState::new(
    store.clone(),
    KeyNamer::new(
      cfg
        .storage
        .upload_prefix
        .as_deref()
        .unwrap_or(DEFAULT_UPLOAD_PREFIX),
    ),
    BucketSizeAggregator::new(store.clone())
      .with_max_pages(cfg.storage.max_list_pages.unwrap_or(DEFAULT_MAX_PAGES)),
    LogoCache::new(store, Arc::new(logo_provider)),
    providers,
  ))
}

pub fn router(state: AppState, cfg: &Config) -> Router {
  let mut app = Router::new()
    .route("/", get(index))
    .route("/upload", post(upload::upload))
    .route("/bucket/size", get(bucket::bucket_size))
    .route("/list-objects", get(objects::list_objects))
    .route(
      "/object/",
      get(objects::missing_key).delete(objects::missing_key),
    )
    .route(
      "/object/*key",
      get(objects::get_object).delete(objects::delete_object),
    )
    .route("/logo", get(logo::logo))
    .route("/weather", get(relay::weather))
    .route("/news", get(relay::news))
    .route("/providers/:name", get(relay::relay))
    .fallback(not_found)
    .layer(DefaultBodyLimit::max(
      cfg.app.max_body_size_mb * 1000 * 1000,
    ))
    .with_state(state);

  // Conditionally add OpenAPI routes if enabled
  if cfg.app.enable_openapi.unwrap_or(false) {
    app = app
      .merge(Redoc::with_url("/redoc", ApiDoc::openapi()))
      .route(
        "/api-docs/openapi.json",
        get(|| async { axum::Json(ApiDoc::openapi()) }),
      );
  }

  let timeout = cfg
    .app
    .request_timeout_secs
    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

  app.layer((
    middleware::from_fn(track_metrics),
    TraceLayer::new_for_http()
      .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
      .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
    CorsLayer::new()
      .allow_origin(Any)
      .allow_methods(Any)
      .allow_headers(Any),
    TimeoutLayer::new(Duration::from_secs(timeout)),
    CatchPanicLayer::new(),
  ))
}

pub fn bootstrap(cfg: &Config) -> Result<Router> {
  let state = build_state(cfg)?;
  Ok(router(state, cfg))
}

async fn index() -> &'static str {
  "Hello World"
}

async fn not_found() -> (StatusCode, &'static str) {
  (StatusCode::NOT_FOUND, "Page not found")
}

pub async fn serve(router: Router, listen: &str) -> Result<()> {
  let listener = tokio::net::TcpListener::bind(listen)
    .await
    .with_context(|| format!("failed to bind to address {}", listen))?;
  info!("listening on {}", listen);

  axum::serve(listener, router)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("error running HTTP server")
}

async fn healthz() -> &'static str {
  "pong"
}

async fn shutdown_signal() {
  let ctrl_c = async {
    signal::ctrl_c()
      .await
      .expect("failed to install Ctrl+C handler");
  };

  #[cfg(unix)]
  let terminate = async {
    signal::unix::signal(signal::unix::SignalKind::terminate())
      .expect("failed to install signal handler")
      .recv()
      .await;
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
      _ = ctrl_c => {},
      _ = terminate => {},
  }
}

pub async fn serve_metrics(listen: &str) -> Result<()> {
  let app = metrics_app()?;

  let listener = tokio::net::TcpListener::bind(listen)
    .await
    .with_context(|| format!("failed to bind to address {}", listen))?;
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("error running metrics HTTP server")
}

fn metrics_app() -> Result<Router> {
  let recorder_handle = setup_metrics_recorder()?;
  Ok(
    Router::new()
      .route("/metrics", get(move || ready(recorder_handle.render())))
      .route("/healthz", get(healthz)),
  )
}

fn setup_metrics_recorder() -> Result<PrometheusHandle> {
  const EXPONENTIAL_SECONDS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
  ];

  let handle = PrometheusBuilder::new()
    .set_buckets_for_metric(
      Matcher::Full("http_requests_duration_seconds".to_string()),
      EXPONENTIAL_SECONDS,
    )?
    .install_recorder()?;

  Ok(handle)
}

async fn track_metrics(req: Request, next: Next) -> impl IntoResponse {
  let start = Instant::now();
  let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
    matched_path.as_str().to_owned()
  } else {
    req.uri().path().to_owned()
  };
  let method = req.method().clone();

  let response = next.run(req).await;

  let latency = start.elapsed().as_secs_f64();
  let status = response.status().as_u16().to_string();

  let labels = [
    ("method", method.to_string()),
    ("path", path),
    ("status", status),
  ];

  metrics::counter!("http_requests_total", &labels).increment(1);
  metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

  response
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::{ListingPage, ObjectSummary, PutReceipt, StorageError, StoredContent};
  use async_trait::async_trait;
  use axum::body::Body;
  use bytes::Bytes;
  use http_body_util::BodyExt;
  use tower::ServiceExt;

  const CONFIG: &str = r#"
    [app]
    listen = "0.0.0.0:0"
    metrics_listen = "0.0.0.0:0"
    max_body_size_mb = 1

    [storage]
    storage_type = "Local"
  "#;

  #[derive(Clone, Copy)]
  enum Listing {
    Unreachable,
    Endless,
  }

  /// Refuses writes of `.fail` files and lists according to `listing`.
  struct FlakyStore {
    listing: Listing,
  }

  #[async_trait]
  impl ObjectStore for FlakyStore {
    async fn put(
      &self,
      key: &str,
      data: Bytes,
      _content_type: Option<&str>,
    ) -> Result<PutReceipt, StorageError> {
      if key.ends_with(".fail") {
        return Err(StorageError::Backend("disk full".to_owned()));
      }
      Ok(PutReceipt {
        key: key.to_owned(),
        etag: None,
        size: data.len() as u64,
      })
    }

    async fn get(&self, _key: &str) -> Result<Option<StoredContent>, StorageError> {
      Ok(None)
    }

    async fn delete(&self, _key: &str) -> Result<(), StorageError> {
      Ok(())
    }

    async fn list(
      &self,
      prefix: &str,
      _delimiter: Option<&str>,
      _continuation_token: Option<&str>,
    ) -> Result<ListingPage, StorageError> {
      match self.listing {
        Listing::Unreachable => Err(StorageError::Unavailable("connection refused".to_owned())),
        Listing::Endless => Ok(ListingPage {
          prefix: prefix.to_owned(),
          objects: vec![ObjectSummary {
            key: "a".to_owned(),
            size: Some(1),
            last_modified: None,
            etag: None,
          }],
          common_prefixes: Vec::new(),
          continuation_token: Some("again".to_owned()),
        }),
      }
    }

    async fn exists(&self, _key: &str) -> Result<bool, StorageError> {
      Ok(false)
    }
  }

  fn app_with(listing: Listing) -> Router {
    let cfg = crate::config::from_toml(CONFIG).unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(FlakyStore { listing });
    let provider =
      HttpLogoProvider::new(reqwest::Client::new(), "http://127.0.0.1:9", None).unwrap();

    let state = AppState::new(
      store.clone(),
      KeyNamer::new(DEFAULT_UPLOAD_PREFIX),
      BucketSizeAggregator::new(store.clone()).with_max_pages(5),
      LogoCache::new(store, Arc::new(provider)),
      ProviderRegistry::new(),
    );
    router(state, &cfg)
  }

  async fn call(app: Router, request: Request) -> (StatusCode, Vec<u8>) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
  }

  fn get_request(uri: &str) -> Request {
    axum::http::Request::builder()
      .uri(uri)
      .body(Body::empty())
      .unwrap()
  }

  #[tokio::test]
  async fn failed_write_is_reported_next_to_the_stored_ones() {
    let boundary = "XBOUNDARYX";
    let body = format!(
      "--{b}\r\n\
       Content-Disposition: form-data; name=\"file\"; filename=\"ok.png\"\r\n\
       Content-Type: image/png\r\n\r\n\
       good\r\n\
       --{b}\r\n\
       Content-Disposition: form-data; name=\"file\"; filename=\"broken.fail\"\r\n\r\n\
       bad\r\n\
       --{b}--\r\n",
      b = boundary
    );
    let request = axum::http::Request::builder()
      .method("POST")
      .uri("/upload")
      .header(
        "content-type",
        format!("multipart/form-data; boundary={}", boundary),
      )
      .body(Body::from(body))
      .unwrap();

    let (status, body) = call(app_with(Listing::Endless), request).await;
    assert_eq!(status, StatusCode::OK);

    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);

    let stored = results.iter().find(|r| r["name"] == "ok.png").unwrap();
    assert_eq!(stored["status"], "stored");
    assert_eq!(stored["size"], 4);

    let failed = results.iter().find(|r| r["name"] == "broken.fail").unwrap();
    assert_eq!(failed["status"], "failed");
    assert!(failed["key"].as_str().unwrap().starts_with("pics/"));
    assert!(failed["error"].as_str().unwrap().contains("disk full"));
  }

  #[tokio::test]
  async fn bucket_size_is_unavailable_when_the_store_is() {
    let (status, body) = call(
      app_with(Listing::Unreachable),
      get_request("/bucket/size"),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, b"Storage unavailable");
  }

  #[tokio::test]
  async fn endless_listing_is_an_internal_error() {
    let (status, body) = call(app_with(Listing::Endless), get_request("/bucket/size")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, b"Internal server error");
  }
}
