//! HTTP surface: lobby API, health and static files

pub mod routes;

pub use routes::{build_router, AppError};
