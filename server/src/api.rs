use crate::{
    auth::Requester,
    collaborators,
    config::Config,
    db::{self, DbPool},
    discussions::{self, NewDiscussion, NewReply},
    error::AppError,
    files,
    listings::{self, ListingPatch, NewListing},
    model::{Discussion, Listing, UserSummary},
    users,
};
use anyhow::Result;
use axum::{
    async_trait,
    body::Bytes,
    extract::{
        rejection::{BytesRejection, JsonRejection},
        DefaultBodyLimit, FromRequest, Path, Query, State,
    },
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tracing::info;
use uuid::Uuid;

/// Largest defect photo accepted, in bytes.
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub image_dir: PathBuf,
    pub jwt_secret: Arc<Vec<u8>>,
    pub config: Config,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let image_dir = config.data_dir.join("defects");
        tokio::fs::create_dir_all(&image_dir).await?;
        let db_path = config.data_dir.join("nestfinder.db");
        let pool = tokio::task::spawn_blocking(move || db::open_pool(db_path)).await??;
        let jwt_secret = load_or_create_secret(&config).await?;
        Ok(Self {
            pool,
            image_dir,
            jwt_secret: Arc::new(jwt_secret),
            config,
        })
    }

    /// Run a store operation on the blocking pool with a pooled connection.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&Connection) -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| AppError::Server(e.into()))?
    }
}

/// Use the configured signing secret, or the one persisted under the data
/// directory, generating it on first start.
async fn load_or_create_secret(config: &Config) -> Result<Vec<u8>> {
    if let Some(secret) = &config.jwt_secret {
        return Ok(secret.as_bytes().to_vec());
    }
    let path = config.data_dir.join("jwt_secret");
    if let Ok(stored) = tokio::fs::read_to_string(&path).await {
        if let Ok(secret) = STANDARD.decode(stored.trim()) {
            if !secret.is_empty() {
                return Ok(secret);
            }
        }
    }
    use rand::RngCore;
    let mut secret = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    tokio::fs::write(&path, STANDARD.encode(&secret)).await?;
    info!(path = %path.display(), "generated token signing secret");
    Ok(secret)
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/properties", get(list_listings).post(create_listing))
        .route(
            "/api/properties/:id",
            get(get_listing).put(update_listing).delete(delete_listing),
        )
        .route(
            "/api/discussions",
            get(list_discussions).post(create_discussion),
        )
        .route("/api/discussions/external", get(external_discussions))
        .route("/api/discussions/:id/reply", post(add_reply))
        .route("/api/discussions/:id/like", put(like_discussion))
        .route(
            "/api/discussions/:id/reply/:reply_id/like",
            put(like_reply),
        )
        .route(
            "/api/defects/analyze",
            post(analyze_defect).layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES)),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// `Json` whose rejections come back as `{message}` validation errors.
struct ApiJson<T>(T);

#[async_trait]
impl<S, B, T> FromRequest<S, B> for ApiJson<T>
where
    Json<T>: FromRequest<S, B, Rejection = JsonRejection>,
    S: Send + Sync,
    B: Send + 'static,
{
    type Rejection = AppError;

    async fn from_request(req: Request<B>, state: &S) -> Result<Self, AppError> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::not_found(format!("{what} not found")))
}

#[derive(Deserialize)]
struct RegisterReq {
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
    role: Option<crate::model::Role>,
}

async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterReq>,
) -> Result<impl IntoResponse, AppError> {
    let secret = state.jwt_secret.clone();
    let session = state
        .with_conn(move |conn| {
            users::register(conn, &secret, req.name, req.email, req.password, req.role)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Deserialize)]
struct LoginReq {
    email: Option<String>,
    password: Option<String>,
}

async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginReq>,
) -> Result<impl IntoResponse, AppError> {
    let secret = state.jwt_secret.clone();
    let session = state
        .with_conn(move |conn| users::login(conn, &secret, req.email, req.password))
        .await?;
    Ok(Json(session))
}

async fn me(requester: Requester) -> Json<UserSummary> {
    Json(requester.summary())
}

async fn list_listings(State(state): State<AppState>) -> Result<Json<Vec<Listing>>, AppError> {
    Ok(Json(state.with_conn(listings::list).await?))
}

async fn get_listing(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Listing>, AppError> {
    let id = parse_id(&id, "Property")?;
    Ok(Json(
        state.with_conn(move |conn| listings::get(conn, &id)).await?,
    ))
}

async fn create_listing(
    State(state): State<AppState>,
    requester: Requester,
    ApiJson(fields): ApiJson<NewListing>,
) -> Result<impl IntoResponse, AppError> {
    let listing = state
        .with_conn(move |conn| listings::create(conn, fields, &requester))
        .await?;
    Ok((StatusCode::CREATED, Json(listing)))
}

async fn update_listing(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<ListingPatch>,
) -> Result<Json<Listing>, AppError> {
    let id = parse_id(&id, "Property")?;
    let listing = state
        .with_conn(move |conn| listings::update(conn, &id, patch, &requester))
        .await?;
    Ok(Json(listing))
}

async fn delete_listing(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id, "Property")?;
    state
        .with_conn(move |conn| listings::delete(conn, &id, &requester))
        .await?;
    Ok(Json(json!({ "message": "Property removed successfully" })))
}

async fn list_discussions(
    State(state): State<AppState>,
) -> Result<Json<Vec<Discussion>>, AppError> {
    Ok(Json(state.with_conn(discussions::list).await?))
}

async fn create_discussion(
    State(state): State<AppState>,
    requester: Requester,
    ApiJson(input): ApiJson<NewDiscussion>,
) -> Result<impl IntoResponse, AppError> {
    let discussion = state
        .with_conn(move |conn| discussions::create(conn, input, &requester))
        .await?;
    Ok((StatusCode::CREATED, Json(discussion)))
}

async fn add_reply(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<NewReply>,
) -> Result<Json<Discussion>, AppError> {
    let id = parse_id(&id, "Discussion")?;
    let discussion = state
        .with_conn(move |conn| discussions::add_reply(conn, &id, input, &requester))
        .await?;
    Ok(Json(discussion))
}

// Likes need an authenticated caller but are not attributed to it.
async fn like_discussion(
    State(state): State<AppState>,
    _requester: Requester,
    Path(id): Path<String>,
) -> Result<Json<Discussion>, AppError> {
    let id = parse_id(&id, "Discussion")?;
    let discussion = state
        .with_conn(move |conn| discussions::like_discussion(conn, &id))
        .await?;
    Ok(Json(discussion))
}

async fn like_reply(
    State(state): State<AppState>,
    _requester: Requester,
    Path((id, reply_id)): Path<(String, String)>,
) -> Result<Json<Discussion>, AppError> {
    let id = parse_id(&id, "Discussion")?;
    let reply_id = parse_id(&reply_id, "Reply")?;
    let discussion = state
        .with_conn(move |conn| discussions::like_reply(conn, &id, &reply_id))
        .await?;
    Ok(Json(discussion))
}

#[derive(Deserialize)]
struct ExternalQuery {
    query: Option<String>,
}

async fn external_discussions(
    State(state): State<AppState>,
    Query(q): Query<ExternalQuery>,
) -> Result<Json<Vec<Value>>, AppError> {
    let query = q.query.unwrap_or_default();
    if query.trim().is_empty() {
        return Err(AppError::validation("Query parameter is required"));
    }
    let items = collaborators::scrape_discussions(&state.config.collaborators, query.trim()).await;
    Ok(Json(items))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DefectResp {
    message: &'static str,
    result: collab_api::DefectReport,
    image_id: String,
}

async fn analyze_defect(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<DefectResp>, AppError> {
    let body = body?;
    if body.is_empty() || !files::looks_like_image(&body) {
        return Err(AppError::validation("Please upload an image"));
    }
    let image_id = files::save_image(&state.image_dir, body).await?;
    let path = files::image_path(&state.image_dir, &image_id);
    let result = collaborators::analyze_defect(&state.config.collaborators, &path).await?;
    Ok(Json(DefectResp {
        message: "Defect analysis complete",
        result,
        image_id,
    }))
}

/// Run the HTTP server with the resolved configuration.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config.bind.parse()?;
    let state = AppState::new(config).await?;
    info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .await?;
    Ok(())
}
