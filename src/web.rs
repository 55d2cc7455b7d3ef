use crate::{
    app::{App, AppError},
    auth,
    embed::enrich::read_queue_dump,
    embed::QueueDump,
    items::{ItemCreate, ItemFilters, ItemId, ItemUpdate},
    search::{SearchError, SearchQuery, SearchResponse},
};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::{signal, sync::RwLock};

#[derive(Clone)]
pub(crate) struct SharedState {
    pub app: Arc<RwLock<App>>,
}

async fn start_app(app: App) {
    let listen_addr = app.config().read().unwrap().listen_addr.clone();

    let app = Arc::new(RwLock::new(app));
    let signal = shutdown_signal(app.clone());
    let shared_state = Arc::new(SharedState { app: app.clone() });

    async fn shutdown_signal(app: Arc<RwLock<App>>) {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        log::warn!("waiting for enrichment queue to stop");
        app.write().await.shutdown();
    }

    let router = api_router(shared_state);

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .expect("couldnt bind listen address");
    log::info!("listening on {listen_addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await
        .expect("server failed");
}

pub fn start_daemon(app: App) {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("couldnt build runtime")
        .block_on(async { start_app(app).await });
}

pub(crate) fn api_router(shared_state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/api/items", get(list_items).post(create_item))
        .route("/api/items/:id", patch(update_item).delete(delete_item))
        .route("/api/health", get(health))
        .route("/api/task_queue", get(task_queue))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

// Wraps `AppError` so axum can turn it into a response.
#[derive(Debug)]
enum HttpError {
    Unauthorized,
    App(AppError),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let (status, error) = match self {
            HttpError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            HttpError::App(err) => match &err {
                AppError::NotFound => (StatusCode::NOT_FOUND, err.to_string()),
                AppError::Invalid(_) => (StatusCode::BAD_REQUEST, err.to_string()),
                AppError::Search(SearchError::InvalidFilter(_))
                | AppError::Search(SearchError::InvalidCursor) => {
                    (StatusCode::BAD_REQUEST, err.to_string())
                }
                AppError::Search(SearchError::Storage(_)) | AppError::Other(_) => {
                    log::error!("{err:?}");
                    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
                }
            },
        };

        (status, json!({ "error": error }).to_string()).into_response()
    }
}

// This enables using `?` on functions returning anything convertible to
// `AppError` inside handlers.
impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self::App(err.into())
    }
}

fn authorize(headers: &HeaderMap, app: &App) -> Result<String, HttpError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let tokens = {
        let config = app.config();
        let config = config.read().unwrap();
        config.tokens.clone()
    };

    auth::resolve_owner(header, &tokens).ok_or(HttpError::Unauthorized)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListItemsParams {
    pub query: Option<String>,
    pub category: Option<String>,
    pub vendor: Option<String>,
    pub colour: Option<String>,
    pub price_max: Option<f64>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,

    /// When false, forces the keyword path even if embeddings exist.
    pub semantic: Option<bool>,
}

async fn list_items(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Query(params): Query<ListItemsParams>,
) -> Result<Json<SearchResponse>, HttpError> {
    log::debug!("params: {params:?}");

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let owner_id = authorize(&headers, &app)?;

        let query = SearchQuery {
            owner_id,
            text: params.query,
            filters: ItemFilters {
                category: params.category,
                vendor: params.vendor,
                colour_hex: params.colour,
                price_max: params.price_max,
            },
            limit: params.limit,
            cursor: params.cursor,
            semantic: params.semantic.unwrap_or(true),
        };

        app.search(&query).map(Json).map_err(Into::into)
    })
}

async fn create_item(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Json(payload): Json<ItemCreate>,
) -> Result<impl IntoResponse, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let owner_id = authorize(&headers, &app)?;

        let item = app.create(&owner_id, payload)?;
        Ok((StatusCode::CREATED, Json(item)))
    })
}

async fn update_item(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<ItemUpdate>,
) -> Result<Json<crate::items::Item>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let owner_id = authorize(&headers, &app)?;

        app.update(&owner_id, &ItemId::from(id), payload)
            .map(Json)
            .map_err(Into::into)
    })
}

async fn delete_item(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let owner_id = authorize(&headers, &app)?;

        app.delete(&owner_id, &ItemId::from(id))?;
        Ok(StatusCode::NO_CONTENT)
    })
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn task_queue(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<QueueDump>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        Ok(Json(read_queue_dump(app.base_path())))
    })
}
