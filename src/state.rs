use sqlx::PgPool;
use std::sync::Arc;

pub struct AppState {
    pub pool: PgPool,
    pub session_key: Vec<u8>,
}

pub type SharedState = Arc<AppState>;
