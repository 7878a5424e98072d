//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::RoomRegistry;
use crate::util::rate_limit::{create_limiter, Limiter, ROOM_CREATE_RATE_LIMIT};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomRegistry>,
    /// Global limiter for `POST /rooms`
    pub room_create_limiter: Arc<Limiter>,
}

impl AppState {
    pub fn new(config: Config, rooms: Arc<RoomRegistry>) -> Self {
        Self {
            config: Arc::new(config),
            rooms,
            room_create_limiter: create_limiter(ROOM_CREATE_RATE_LIMIT),
        }
    }
}
