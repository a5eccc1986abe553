use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Extension, Json, Router};
use clap::Parser;
use planner_api::{
    CompletionChange, CreatedRecord, DeletedRecord, JwtAuthenticator, LocalBlobStore, PlannerApi,
    RecordView, API_CONTRACT_VERSION, DEFAULT_TOKEN_TTL_SECS, PHOTO_PREFIX,
};
use planner_core::{PlannerError, RecordKind};
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod error;
mod extract;

use error::ServiceError;
use extract::{Caller, RecordBody};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: PlannerApi,
    auth: JwtAuthenticator,
    photos: Option<LocalBlobStore>,
    store_timeout: Duration,
    max_upload_bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "planner-service")]
#[command(about = "HTTP service for goals, events, and todos")]
struct Args {
    #[arg(long, env = "PLANNER_DB", default_value = "./planner.sqlite3")]
    db: PathBuf,
    #[arg(long, env = "PLANNER_BIND", default_value = "127.0.0.1:4010")]
    bind: SocketAddr,
    /// HS256 signing key for bearer tokens (at least 32 bytes).
    #[arg(long, env = "PLANNER_JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,
    #[arg(long, env = "PLANNER_TOKEN_TTL_SECS", default_value_t = DEFAULT_TOKEN_TTL_SECS)]
    token_ttl_secs: u64,
    #[arg(long, env = "PLANNER_BLOB_DIR", default_value = "./blobs")]
    blob_dir: PathBuf,
    /// Base URL under which stored photos are served.
    #[arg(long, env = "PLANNER_PUBLIC_BASE_URL", default_value = "http://127.0.0.1:4010/blobs")]
    public_base_url: String,
    /// Upper bound for any single store call; also used as the `SQLite` busy timeout.
    #[arg(long, env = "PLANNER_STORE_TIMEOUT_MS", default_value_t = 5_000)]
    store_timeout_ms: u64,
    #[arg(long, env = "PLANNER_MAX_UPLOAD_BYTES", default_value_t = 10 * 1024 * 1024)]
    max_upload_bytes: usize,
    #[arg(long, env = "PLANNER_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl ServiceState {
    fn from_args(args: &Args) -> Result<Self> {
        let store_timeout = Duration::from_millis(args.store_timeout_ms);
        let photos = LocalBlobStore::new(args.blob_dir.clone(), args.public_base_url.clone());
        let auth = JwtAuthenticator::new(args.jwt_secret.clone(), args.token_ttl_secs)
            .context("invalid --jwt-secret")?;
        let api = PlannerApi::new(args.db.clone())
            .with_busy_timeout(store_timeout)
            .with_blob_store(Arc::new(photos.clone()));

        Ok(Self {
            api,
            auth,
            photos: Some(photos),
            store_timeout,
            max_upload_bytes: args.max_upload_bytes,
        })
    }

    /// Run one blocking API call off the async runtime, bounded by the store timeout.
    async fn run<T, F>(&self, operation: &'static str, call: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(PlannerApi) -> Result<T, PlannerError> + Send + 'static,
    {
        let api = self.api.clone();
        self.bounded(operation, move || call(api)).await
    }

    /// Run blocking work under the store timeout.
    ///
    /// A timeout only stops the caller from waiting: the blocking task cannot be
    /// cancelled, so a write that is already in flight may still commit after
    /// the client has been told the store was unavailable.
    async fn bounded<T, F>(&self, operation: &'static str, work: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, PlannerError> + Send + 'static,
    {
        let task = tokio::task::spawn_blocking(work);

        match tokio::time::timeout(self.store_timeout, task).await {
            Ok(Ok(result)) => result.map_err(ServiceError::from),
            Ok(Err(join_error)) => {
                tracing::error!(operation, error = %join_error, "store task aborted");
                Err(PlannerError::StoreUnavailable(format!("{operation} aborted")).into())
            }
            Err(_) => {
                tracing::error!(operation, timeout = ?self.store_timeout, "store call timed out");
                Err(PlannerError::StoreUnavailable(format!("{operation} timed out")).into())
            }
        }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn record_routes(kind: RecordKind) -> Router<ServiceState> {
    let mut router = Router::new()
        .route("/create", post(create_record))
        .route("/read", get(list_records))
        .route("/read/:id", get(get_record))
        .route("/update/:id", put(update_record))
        .route("/delete/:id", delete(delete_record));

    if kind.has_schedule() {
        router = router.route("/readByDate/:date", get(list_records_on_date));
    }
    router = match kind {
        // Existing clients issue GET for completion; PUT is also accepted.
        RecordKind::Goal => {
            router.route("/complete/:id", get(toggle_completion).put(toggle_completion))
        }
        RecordKind::Todo => router.route("/complete/:id", get(set_complete).put(set_complete)),
        RecordKind::Event => router,
    };

    router.layer(Extension(kind))
}

fn app(state: ServiceState) -> Router {
    let max_upload_bytes = state.max_upload_bytes;
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route(&format!("/blobs/{PHOTO_PREFIX}/:name"), get(photo))
        .nest("/goal", record_routes(RecordKind::Goal))
        .nest("/event", record_routes(RecordKind::Event))
        .nest("/todo", record_routes(RecordKind::Todo))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("planner_service={level},planner_api={level},info").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let state = ServiceState::from_args(&args)?;
    let migration = state.api.migrate(false).context("failed to migrate planner database")?;
    tracing::info!(
        db = %args.db.display(),
        schema_version = ?migration.after_version,
        "database ready"
    );

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "planner service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn photo(
    State(state): State<ServiceState>,
    Path(name): Path<String>,
) -> Result<Response, ServiceError> {
    let Some(photos) = state.photos.clone() else {
        return Err(ServiceError::not_found());
    };
    let found = state.bounded("photo", move || photos.read_photo(&name)).await?;

    let Some((bytes, content_type)) = found else {
        return Err(ServiceError::not_found());
    };
    Ok((StatusCode::OK, [("content-type", content_type)], bytes).into_response())
}

async fn create_record(
    State(state): State<ServiceState>,
    Extension(kind): Extension<RecordKind>,
    Caller(owner_id): Caller,
    body: RecordBody,
) -> Result<(StatusCode, Json<ServiceEnvelope<CreatedRecord>>), ServiceError> {
    let created = state
        .run("create", move |api| {
            api.create(&owner_id, kind, &body.payload, body.image.as_ref())
        })
        .await?;
    Ok((StatusCode::CREATED, Json(envelope(created))))
}

async fn list_records(
    State(state): State<ServiceState>,
    Extension(kind): Extension<RecordKind>,
    Caller(owner_id): Caller,
) -> Result<Json<ServiceEnvelope<Vec<RecordView>>>, ServiceError> {
    let records = state.run("list", move |api| api.list(&owner_id, kind)).await?;
    Ok(Json(envelope(records)))
}

async fn get_record(
    State(state): State<ServiceState>,
    Extension(kind): Extension<RecordKind>,
    Caller(owner_id): Caller,
    Path(id): Path<String>,
) -> Result<Json<ServiceEnvelope<RecordView>>, ServiceError> {
    let record = state.run("get", move |api| api.get(&owner_id, kind, &id)).await?;
    Ok(Json(envelope(record)))
}

async fn list_records_on_date(
    State(state): State<ServiceState>,
    Extension(kind): Extension<RecordKind>,
    Caller(owner_id): Caller,
    Path(date): Path<String>,
) -> Result<Json<ServiceEnvelope<Vec<RecordView>>>, ServiceError> {
    let records = state.run("list_on", move |api| api.list_on(&owner_id, kind, &date)).await?;
    Ok(Json(envelope(records)))
}

async fn update_record(
    State(state): State<ServiceState>,
    Extension(kind): Extension<RecordKind>,
    Caller(owner_id): Caller,
    Path(id): Path<String>,
    body: RecordBody,
) -> Result<Json<ServiceEnvelope<RecordView>>, ServiceError> {
    let record = state
        .run("update", move |api| {
            api.update(&owner_id, kind, &id, &body.payload, body.image.as_ref())
        })
        .await?;
    Ok(Json(envelope(record)))
}

async fn delete_record(
    State(state): State<ServiceState>,
    Extension(kind): Extension<RecordKind>,
    Caller(owner_id): Caller,
    Path(id): Path<String>,
) -> Result<Json<ServiceEnvelope<DeletedRecord>>, ServiceError> {
    let deleted = state.run("delete", move |api| api.delete(&owner_id, kind, &id)).await?;
    Ok(Json(envelope(deleted)))
}

async fn toggle_completion(
    State(state): State<ServiceState>,
    Extension(kind): Extension<RecordKind>,
    Caller(owner_id): Caller,
    Path(id): Path<String>,
) -> Result<Json<ServiceEnvelope<CompletionChange>>, ServiceError> {
    let change =
        state.run("toggle", move |api| api.toggle_completion(&owner_id, kind, &id)).await?;
    Ok(Json(envelope(change)))
}

async fn set_complete(
    State(state): State<ServiceState>,
    Extension(kind): Extension<RecordKind>,
    Caller(owner_id): Caller,
    Path(id): Path<String>,
) -> Result<Json<ServiceEnvelope<CompletionChange>>, ServiceError> {
    let change = state.run("complete", move |api| api.set_complete(&owner_id, kind, &id)).await?;
    Ok(Json(envelope(change)))
}
