use axum::Router;
use axum::routing::get;
use crate::state::AppState;

pub mod dto;
pub mod events;
pub mod handler;
pub mod model;
pub mod preview;
pub mod recorder;
pub mod repository;
pub mod service;

pub fn router() -> Router<AppState> {
    Router::new().route("/status", get(handler::get_status))
}
