//! HTTP route definitions

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::app::AppState;
use crate::config::CorsOrigins;
use crate::game::registry::DEFAULT_MAX_PLAYERS;
use crate::game::{CreateRoom, RegistryError, RoomSummary};
use crate::util::names::{sanitize_name_to, MAX_ROOM_NAME_CHARS};
use crate::util::time::uptime_secs;
use crate::ws::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);
    let cors = match &state.config.cors_origins {
        CorsOrigins::Any => cors.allow_origin(Any),
        CorsOrigins::List(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!(origin = %origin, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            cors.allow_origin(allowed)
        }
    };

    let static_files = ServeDir::new(&state.config.static_dir);
    let body_limit = state.config.max_body_bytes;

    Router::new()
        .route("/health", get(health_handler))
        .route("/rooms", get(list_rooms_handler).post(create_room_handler))
        .route("/ws", get(ws_handler))
        .fallback_service(static_files)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    rooms: usize,
    players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        rooms: state.rooms.room_count(),
        players: state.rooms.total_players(),
    })
}

// ============================================================================
// Lobby endpoints
// ============================================================================

async fn list_rooms_handler(State(state): State<AppState>) -> Json<Vec<RoomSummary>> {
    Json(state.rooms.list_room_summaries())
}

#[derive(Debug, Deserialize)]
struct CreateRoomRequest {
    #[serde(default)]
    name: String,
}

async fn create_room_handler(
    State(state): State<AppState>,
    body: Result<Json<CreateRoomRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RoomSummary>), AppError> {
    if state.room_create_limiter.check().is_err() {
        warn!("room creation rate limited");
        return Err(AppError::TooManyRequests);
    }
    let Json(req) = body?;

    let name = sanitize_name_to(&req.name, MAX_ROOM_NAME_CHARS);
    let room = state.rooms.create_room(CreateRoom {
        id: None,
        name,
        max_players: DEFAULT_MAX_PLAYERS,
        persistent: false,
    })?;

    let summary = room.summary();
    info!(room_id = %summary.id, "room created from lobby");
    Ok((StatusCode::CREATED, Json(summary)))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests")]
    TooManyRequests,
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyExists(_) => AppError::Conflict(err.to_string()),
            RegistryError::InvalidMaxPlayers => AppError::BadRequest(err.to_string()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::TooManyRequests => {
                (StatusCode::TOO_MANY_REQUESTS, "Too many requests".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::game::{RoomRegistry, Tuning};
    use crate::util::time::ManualClock;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> (Router, AppState) {
        let registry = Arc::new(RoomRegistry::new(
            Arc::new(Tuning::default()),
            Arc::new(ManualClock::new(0)),
        ));
        registry.ensure_default_rooms().unwrap();
        let state = AppState::new(Config::default(), registry);
        (build_router(state.clone()), state)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_room(name: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/rooms")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::json!({ "name": name }).to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _) = app();
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["rooms"], 3);
        assert_eq!(body["players"], 0);
        assert!(body["uptimeSecs"].is_u64());
    }

    #[tokio::test]
    async fn test_list_rooms() {
        let (router, _) = app();
        let response = router
            .oneshot(Request::get("/rooms").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let rooms = body.as_array().unwrap();
        assert_eq!(rooms.len(), 3);
        assert_eq!(rooms[0]["id"], "neon-core");
        assert_eq!(rooms[0]["maxPlayers"], 8);
        assert_eq!(rooms[0]["status"], "idle");
        assert_eq!(rooms[0]["persistent"], true);
        assert!(rooms[0]["createdAt"].is_string());
    }

    #[tokio::test]
    async fn test_create_room_sanitizes_name() {
        let (router, state) = app();
        let response = router
            .oneshot(post_room("<b>Night</b> Ops!! with a very long tail"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        let name = body["name"].as_str().unwrap();
        assert!(name.chars().count() <= MAX_ROOM_NAME_CHARS);
        assert!(!name.contains('<'));
        assert_eq!(body["maxPlayers"], 8);
        assert_eq!(body["persistent"], false);
        assert_eq!(state.rooms.room_count(), 4);
    }

    #[tokio::test]
    async fn test_create_room_rejects_malformed_json() {
        let (router, state) = app();
        let request = Request::builder()
            .method("POST")
            .uri("/rooms")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{ \"name\": "))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].is_string());
        assert_eq!(state.rooms.room_count(), 3);
    }

    #[tokio::test]
    async fn test_create_room_rate_limited() {
        let (router, _) = app();
        let mut statuses = Vec::new();
        for i in 0..(crate::util::rate_limit::ROOM_CREATE_RATE_LIMIT + 1) {
            let response = router
                .clone()
                .oneshot(post_room(&format!("Room {i}")))
                .await
                .unwrap();
            statuses.push(response.status());
        }
        assert_eq!(statuses.last(), Some(&StatusCode::TOO_MANY_REQUESTS));
        assert!(statuses[..statuses.len() - 1]
            .iter()
            .all(|s| *s == StatusCode::CREATED));
    }

    #[test]
    fn test_error_status_codes() {
        let response = AppError::from(RegistryError::AlreadyExists("x".into())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let response = AppError::TooManyRequests.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
