use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use axum::body::Bytes;
use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::Connection;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServiceConfig;
use crate::estimator::RatingEstimator;
use crate::normalizer::{NormalizeError, json_number, normalize_json, required_number};
use crate::players_db::{self, NewPlayer, PlayerRow, PlayerUpdate};
use crate::schema::FEATURE_NAMES;

/// Keys a client may echo back on update that are never written.
const READ_ONLY_KEYS: [&str; 2] = ["id", "created_at"];

/// Process-wide state handed to every handler. The estimator is read-only;
/// each database operation opens its own connection.
#[derive(Clone)]
pub struct AppState {
    estimator: Arc<RatingEstimator>,
    db_path: Arc<PathBuf>,
}

impl AppState {
    pub fn new(estimator: RatingEstimator, db_path: PathBuf) -> Self {
        Self {
            estimator: Arc::new(estimator),
            db_path: Arc::new(db_path),
        }
    }

    pub fn estimator(&self) -> &RatingEstimator {
        &self.estimator
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Invalid(String),
    #[error("model error")]
    Model(anyhow::Error),
    #[error("{message}")]
    Storage {
        message: &'static str,
        cause: anyhow::Error,
    },
    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    fn storage(message: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |cause| Self::Storage { message, cause }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Invalid(_) | Self::Model(_) | Self::Storage { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<NormalizeError> for ApiError {
    fn from(err: NormalizeError) -> Self {
        Self::Invalid(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Model(cause) | Self::Storage { cause, .. } => {
                tracing::error!(error = %format!("{cause:#}"), "{self}");
            }
            Self::Invalid(_) | Self::NotFound(_) => {
                tracing::warn!("request rejected: {self}");
            }
        }
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn create_router(state: AppState, cors_permissive: bool) -> Router {
    let router = Router::new()
        .route("/predict", post(predict))
        .route("/api/add-player", post(add_player))
        .route("/api/players", get(list_players))
        .route(
            "/api/players/{id}",
            get(get_player).put(update_player).delete(delete_player),
        )
        .layer(TraceLayer::new_for_http());
    let router = if cors_permissive {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };
    router.with_state(state)
}

pub async fn serve(config: &ServiceConfig) -> anyhow::Result<()> {
    let estimator = RatingEstimator::load_from_path(&config.model_path)?;
    tracing::info!(
        model = %config.model_path.display(),
        trees = estimator.artifact().forest.trees().len(),
        trained_at = %estimator.artifact().generated_at,
        "estimator loaded"
    );

    // Fail at startup rather than on the first insert if the table can't be created.
    players_db::open_db(&config.db_path)?;
    tracing::info!(db = %config.db_path.display(), "players table ready");

    let state = AppState::new(estimator, config.db_path.clone());
    let app = create_router(state, config.cors_permissive);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!("listening on {addr}");
    axum::serve(listener, app).await.context("http server")?;
    Ok(())
}

async fn predict(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let body = parse_object(&body)?;
    let features = normalize_json(&body)?;
    tracing::info!(?features, "prediction request");

    let rating = state.estimator.predict(&features).map_err(ApiError::Model)?;
    if !rating.is_finite() {
        return Err(ApiError::Model(anyhow!("estimator returned {rating}")));
    }
    tracing::info!(rating, "prediction served");
    Ok(Json(json!({ "rating": round2(rating) })))
}

async fn add_player(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let body = parse_object(&body)?;
    let player = new_player_from_json(&body)?;

    let id = with_db(&state, move |conn| players_db::insert_player(conn, &player))
        .await
        .map_err(ApiError::storage("failed to add player to the database"))?;
    tracing::info!(id, "player added");
    Ok(Json(json!({ "message": "Player added successfully", "id": id })))
}

async fn list_players(State(state): State<AppState>) -> Result<Json<Vec<PlayerRow>>, ApiError> {
    let rows = with_db(&state, |conn| players_db::list_players(conn))
        .await
        .map_err(ApiError::storage("failed to load players"))?;
    Ok(Json(rows))
}

async fn get_player(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<PlayerRow>, ApiError> {
    let id = player_id(id)?;
    with_db(&state, move |conn| players_db::get_player(conn, id))
        .await
        .map_err(ApiError::storage("failed to load player"))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("player {id} not found")))
}

async fn update_player(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let id = player_id(id)?;
    let body = parse_object(&body)?;
    let update = player_update_from_json(&body)?;

    let found = with_db(&state, move |conn| players_db::update_player(conn, id, &update))
        .await
        .map_err(ApiError::storage("failed to update player"))?;
    if !found {
        return Err(ApiError::NotFound(format!("player {id} not found")));
    }
    Ok(Json(json!({ "success": true, "message": "Player updated successfully" })))
}

async fn delete_player(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let id = player_id(id)?;
    let found = with_db(&state, move |conn| players_db::delete_player(conn, id))
        .await
        .map_err(ApiError::storage("failed to delete player"))?;
    if !found {
        return Err(ApiError::NotFound(format!("player {id} not found")));
    }
    Ok(Json(json!({ "success": true, "message": "Player deleted successfully" })))
}

async fn with_db<T, F>(state: &AppState, op: F) -> anyhow::Result<T>
where
    F: FnOnce(&mut Connection) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let path = state.db_path.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = players_db::open_db(&path)?;
        op(&mut conn)
    })
    .await
    .context("database task panicked")?
}

fn player_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, ApiError> {
    path.map(|Path(id)| id).map_err(|err| {
        ApiError::Invalid(format!("invalid player id: {}", err.body_text()))
    })
}

fn parse_object(body: &[u8]) -> Result<Map<String, Value>, ApiError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::Invalid(
            "request body must be a JSON object".into(),
        )),
        Err(err) => Err(ApiError::Invalid(format!("invalid JSON body: {err}"))),
    }
}

fn new_player_from_json(body: &Map<String, Value>) -> Result<NewPlayer, ApiError> {
    let name = match body.get("name") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            return Err(NormalizeError::MissingField("name".into()).into());
        }
        Some(other) => {
            return Err(ApiError::Invalid(format!(
                "field `name` must be a string, got {other}"
            )));
        }
    };
    let features = normalize_json(body)?;
    let overall = required_number(body, "overall")?;
    let photo_url = optional_text(body.get("photo_url"), "photo_url")?;

    Ok(NewPlayer {
        name,
        features,
        overall,
        photo_url,
    })
}

fn player_update_from_json(body: &Map<String, Value>) -> Result<PlayerUpdate, ApiError> {
    use rusqlite::types::Value as SqlValue;

    let mut update = PlayerUpdate::default();
    for (key, value) in body {
        let key = key.as_str();
        if READ_ONLY_KEYS.contains(&key) {
            continue;
        }
        let sql_value = match key {
            "name" => match value {
                Value::String(s) if !s.trim().is_empty() => SqlValue::Text(s.trim().to_string()),
                _ => {
                    return Err(ApiError::Invalid(
                        "field `name` must be a non-empty string".into(),
                    ));
                }
            },
            "photo_url" => optional_text(Some(value), "photo_url")?
                .map(SqlValue::Text)
                .unwrap_or(SqlValue::Null),
            "overall" => SqlValue::Real(json_number(key, value)?),
            _ if FEATURE_NAMES.contains(&key) => SqlValue::Real(json_number(key, value)?),
            _ => return Err(ApiError::Invalid(format!("unknown field `{key}`"))),
        };
        update
            .set(key, sql_value)
            .map_err(|err| ApiError::Invalid(err.to_string()))?;
    }
    if update.is_empty() {
        return Err(ApiError::Invalid("no fields to update".into()));
    }
    Ok(update)
}

fn optional_text(value: Option<&Value>, field: &str) -> Result<Option<String>, ApiError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(other) => Err(ApiError::Invalid(format!(
            "field `{field}` must be a string, got {other}"
        ))),
    }
}

/// Two decimals, ties to even.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}
