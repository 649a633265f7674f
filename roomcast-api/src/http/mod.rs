// Module: http
// HTTP surface of the backplane: SSE stream, rooms, messages and health checks

pub mod chat;
pub mod error;
pub mod health;
pub mod middleware;
pub mod rooms;
pub mod stream;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use roomcast_cluster::Broker;
use roomcast_core::service::{MessageStore, RoomDirectory};

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub rooms: Arc<dyn RoomDirectory>,
    pub messages: Arc<dyn MessageStore>,
    /// Request header carrying the authenticated user id
    pub identity_header: Arc<str>,
    pub heartbeat_interval: Duration,
}

impl AppState {
    pub fn new(
        broker: Arc<Broker>,
        rooms: Arc<dyn RoomDirectory>,
        messages: Arc<dyn MessageStore>,
        config: &roomcast_core::Config,
    ) -> Self {
        Self {
            broker,
            rooms,
            messages,
            identity_header: Arc::from(config.server.identity_header.as_str()),
            heartbeat_interval: config.stream.heartbeat_interval(),
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .merge(health::create_health_router())
        // Live event stream
        .route("/api/stream", get(stream::stream_events))
        // Room messages
        .route("/api/messages", post(chat::send_message))
        // Rooms
        .route("/api/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route("/api/rooms/{room_id}/join", post(rooms::join_room))
        .route("/api/rooms/{room_id}/leave", post(rooms::leave_room))
        .route("/api/rooms/{room_id}/messages", get(chat::get_messages))
        .route(
            "/api/rooms/{room_id}/connections",
            get(chat::get_connection_count),
        );

    // Apply layers before state
    let router = router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Apply state to all routes (must be last)
    router.with_state(state)
}
