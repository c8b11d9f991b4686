use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::header,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::info;

use strongbox_shared::constants::{
    DELETE_DATA_PATH, GET_DATA_PATH, GET_USER_DATA_LIST_PATH, HEALTH_PATH, LOGIN_PATH,
    REGISTRATION_PATH, SAVE_DATA_PATH, UPDATE_DATA_PATH,
};
use strongbox_shared::protocol::{
    AuthResponse, DeleteDataRequest, DeleteDataResponse, GetDataFrame, GetDataRequest,
    GetUserDataListRequest, GetUserDataListResponse, LoginRequest, RegistrationRequest,
    SaveDataRequest, SaveDataResponse, UpdateDataRequest, UpdateDataResponse, UserDataItem,
};
use strongbox_shared::types::RecordId;
use strongbox_store::{Pool, Session};

use crate::accounts;
use crate::auth::{auth_middleware, AuthGate, Caller};
use crate::config::ServerConfig;
use crate::engine::{EngineError, StorageEngine};
use crate::error::ServerError;
use crate::stream::{forward_frames, frame_stream, ChannelSource, STREAM_BUFFER};

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<Pool>,
    pub engine: StorageEngine,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(pool: Arc<Pool>, config: ServerConfig) -> Self {
        Self {
            engine: StorageEngine::new(Arc::clone(&pool)),
            pool,
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let gate = AuthGate::new(
        state.config.allow_endpoints.clone(),
        Arc::clone(&state.pool) as Arc<dyn crate::auth::SessionLookup>,
    );

    Router::new()
        .route(HEALTH_PATH, get(health_check))
        .route(LOGIN_PATH, post(login))
        .route(REGISTRATION_PATH, post(registration))
        .route(GET_USER_DATA_LIST_PATH, post(get_user_data_list))
        .route(GET_DATA_PATH, post(get_data))
        .route(SAVE_DATA_PATH, post(save_data))
        .route(UPDATE_DATA_PATH, post(update_data))
        .route(DELETE_DATA_PATH, post(delete_data))
        // Unary bodies only; streamed bodies are bounded per frame.
        .layer(DefaultBodyLimit::max(state.config.max_message_size))
        .layer(middleware::from_fn_with_state(gate, auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run `f` on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ServerError>
where
    F: FnOnce() -> Result<T, ServerError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(format!("blocking task failed: {e}")))?
}

fn parse_record_id(raw: &str) -> Result<RecordId, ServerError> {
    RecordId::parse(raw).map_err(|_| ServerError::InvalidArgument(format!("invalid record id: {raw}")))
}

fn auth_response(session: Session) -> Json<AuthResponse> {
    Json(AuthResponse {
        token: session.token,
        user_uid: session.user_id.to_string(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ServerError> {
    let ttl = state.config.session_ttl;
    let session =
        blocking(move || accounts::login(&state.pool, &req.login, &req.password, ttl)).await?;
    Ok(auth_response(session))
}

async fn registration(
    State(state): State<AppState>,
    Json(req): Json<RegistrationRequest>,
) -> Result<Json<AuthResponse>, ServerError> {
    let ttl = state.config.session_ttl;
    let session =
        blocking(move || accounts::register(&state.pool, &req.login, &req.password, ttl)).await?;
    Ok(auth_response(session))
}

async fn get_user_data_list(
    State(state): State<AppState>,
    caller: Caller,
    Json(_req): Json<GetUserDataListRequest>,
) -> Result<Json<GetUserDataListResponse>, ServerError> {
    let engine = state.engine.clone();
    let records = blocking(move || Ok(engine.list(caller.user_id)?)).await?;

    let items = records
        .into_iter()
        .map(|r| UserDataItem {
            id: r.id.to_string(),
            kind: r.kind,
            name: r.name,
        })
        .collect();
    Ok(Json(GetUserDataListResponse { items }))
}

/// Streams the record back as framed `GetDataFrame`s. The status line is
/// only sent once the header frame exists, so lookup failures still get
/// their proper status.
async fn get_data(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<GetDataRequest>,
) -> Result<Response, ServerError> {
    let id = parse_record_id(&req.id)?;
    let (tx, mut rx) = mpsc::channel::<Result<GetDataFrame, EngineError>>(STREAM_BUFFER);

    let engine = state.engine.clone();
    tokio::task::spawn_blocking(move || {
        let result = engine.read(caller.user_id, id, |frame| {
            tx.blocking_send(Ok(frame))
                .map_err(|_| EngineError::Cancelled)
        });
        match result {
            Ok(()) | Err(EngineError::Cancelled) => {}
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
            }
        }
    });

    let first = match rx.recv().await {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => return Err(e.into()),
        None => return Err(EngineError::Worker("read ended before the header".into()).into()),
    };

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(frame_stream(first, rx)),
    )
        .into_response())
}

async fn save_data(
    State(state): State<AppState>,
    caller: Caller,
    body: Body,
) -> Result<Json<SaveDataResponse>, ServerError> {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let engine = state.engine.clone();
    let worker = tokio::task::spawn_blocking(move || {
        engine.create(caller.user_id, ChannelSource::<SaveDataRequest>::new(rx))
    });

    let forwarded = forward_frames(
        body,
        state.config.max_message_size,
        state.config.stream_idle_timeout,
        tx,
    )
    .await;
    let outcome = worker
        .await
        .map_err(|e| ServerError::Internal(format!("storage worker failed: {e}")))?;

    settle(forwarded, outcome)?;
    Ok(Json(SaveDataResponse {}))
}

async fn update_data(
    State(state): State<AppState>,
    caller: Caller,
    body: Body,
) -> Result<Json<UpdateDataResponse>, ServerError> {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let engine = state.engine.clone();
    let worker = tokio::task::spawn_blocking(move || {
        engine.update(caller.user_id, ChannelSource::<UpdateDataRequest>::new(rx))
    });

    let forwarded = forward_frames(
        body,
        state.config.max_message_size,
        state.config.stream_idle_timeout,
        tx,
    )
    .await;
    let outcome = worker
        .await
        .map_err(|e| ServerError::Internal(format!("storage worker failed: {e}")))?;

    settle(forwarded, outcome)?;
    Ok(Json(UpdateDataResponse {}))
}

/// Pick the error to report for an upload. A cancelled engine means the
/// transport failed, and the transport error says how.
fn settle<T>(
    forwarded: Result<(), ServerError>,
    outcome: Result<T, EngineError>,
) -> Result<T, ServerError> {
    match outcome {
        Ok(value) => Ok(value),
        Err(EngineError::Cancelled) => Err(match forwarded {
            Err(e) => e,
            Ok(()) => EngineError::Cancelled.into(),
        }),
        Err(e) => Err(e.into()),
    }
}

async fn delete_data(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<DeleteDataRequest>,
) -> Result<Json<DeleteDataResponse>, ServerError> {
    let id = parse_record_id(&req.id)?;
    let engine = state.engine.clone();
    blocking(move || Ok(engine.delete(caller.user_id, id)?)).await?;
    Ok(Json(DeleteDataResponse {}))
}

/// Serve on an already-bound plain TCP listener.
pub async fn serve_listener(state: AppState, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let app = build_router(state);
    info!(addr = %listener.local_addr()?, "Starting HTTP API server");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Serve on the configured address, over HTTPS when a certificate and key
/// are configured.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = state.config.http_addr;

    match state.config.tls_paths() {
        Some((cert, key)) => {
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key).await?;
            let app = build_router(state);
            info!(addr = %addr, "Starting HTTPS API server");
            axum_server::bind_rustls(addr, tls)
                .serve(app.into_make_service())
                .await?;
            Ok(())
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            serve_listener(state, listener).await
        }
    }
}
