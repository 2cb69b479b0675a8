pub mod auth;
pub mod employees;
pub mod evaluation;
pub mod session;
pub mod tasks;

use crate::state::SharedState;
use axum::{routing::get, Router};

async fn health() -> &'static str {
    "OK"
}

pub fn routes(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth::router(state.clone()))
        .nest("/employees", employees::router(state.clone()))
        .nest("/tasks", tasks::router(state.clone()))
        .nest("/evaluation", evaluation::router(state))
}
