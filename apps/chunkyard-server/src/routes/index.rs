//! Upload page

use axum::{extract::State, response::Html, routing::get, Router};

use crate::state::AppState;

const INDEX_HTML: &str = include_str!("../../static/index.html");

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(index))
}

/// GET /
///
/// The page connects to the progress listener, whose port it only learns here.
async fn index(State(state): State<AppState>) -> Html<String> {
    let port = state.config().server.progress_port.to_string();
    Html(INDEX_HTML.replace("__PROGRESS_PORT__", &port))
}
