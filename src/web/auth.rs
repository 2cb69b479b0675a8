use crate::db;
use crate::domain::actor::SYSTEM_MIDDLEWARE;
use crate::domain::models::{AuditAction, Position};
use crate::domain::Actor;
use crate::state::SharedState;
use crate::web::session;
use argon2::{password_hash::PasswordHash, Argon2, PasswordVerifier};
use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub name: String,
    pub position: Position,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/logout", get(logout).post(logout))
        .with_state(state)
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

async fn login(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let ip = addr.ip().to_string();
    let agent = user_agent(&headers);

    let employee = db::find_employee_by_username(&state.pool, &payload.username)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let verified = match &employee {
        Some(employee) => PasswordHash::new(&employee.password_hash)
            .and_then(|hash| {
                Argon2::default().verify_password(payload.password.as_bytes(), &hash)
            })
            .is_ok(),
        None => false,
    };

    if !verified {
        tracing::warn!("failed login for '{}' from {}", payload.username, ip);
        db::record_audit(
            &state.pool,
            &SYSTEM_MIDDLEWARE,
            &ip,
            &agent,
            AuditAction::LoggedFailed,
            &payload.username,
        )
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        return Err(StatusCode::UNAUTHORIZED);
    }
    let employee = employee.ok_or(StatusCode::UNAUTHORIZED)?;

    db::record_audit(
        &state.pool,
        &Actor::username(employee.username.as_str()),
        &ip,
        &agent,
        AuditAction::LoggedIn,
        &employee.username,
    )
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let token = session::sign_session(&employee.username, employee.position, &state.session_key)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::SET_COOKIE,
        format!("session={token}; HttpOnly; SameSite=Lax; Path=/")
            .parse()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
    );
    Ok((
        headers,
        Json(LoginResponse {
            name: employee.name,
            position: employee.position,
        }),
    ))
}

async fn logout(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let ip = addr.ip().to_string();
    let agent = user_agent(&headers);

    // The session may already be invalid (e.g. the client was force-logged
    // out by the admission layer); the entry is recorded either way.
    let username = session::extract_token(&headers)
        .and_then(|token| session::verify_session(&token, &state.session_key).ok())
        .map(|claims| claims.username);

    let actor = match &username {
        Some(name) => Actor::username(name.as_str()),
        None => Actor::Unknown,
    };
    db::record_audit(
        &state.pool,
        &actor,
        &ip,
        &agent,
        AuditAction::LoggedOut,
        username.as_deref().unwrap_or(""),
    )
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::SET_COOKIE,
        "session=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0"
            .parse()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
    );
    Ok((headers, Json(serde_json::json!({ "logged_out": true }))))
}
