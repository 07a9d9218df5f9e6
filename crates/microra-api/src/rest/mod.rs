pub mod health;
pub mod interfaces;

use crate::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(interfaces::router())
        .merge(health::router())
}
