use crate::state::AppState;
use axum::Router;

pub mod google;

pub fn router() -> Router<AppState> {
    google::oauth_routes()
}
